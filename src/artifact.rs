//! Turns partitions into uploadable CSV files.

use crate::error::SerializationError;
use crate::layout::Layout;
use crate::model::{Partition, PartitionKey, Schema};
use crate::{utils, Result};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) const CSV_MIME_TYPE: &str = "text/csv";

/// The materialized file of one partition. Immutable once produced.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Artifact {
    key: PartitionKey,
    file_name: String,
    mime_type: String,
    size: usize,
    #[serde(skip)]
    content: Vec<u8>,
}

impl Artifact {
    pub fn new(
        key: PartitionKey,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            key,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size: content.len(),
            content,
        }
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Writes the artifact below `dir` as `<dir>/<year>/<file name>` and returns the path.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let year_dir = dir.join(format!("{:04}", self.key.year()));
        utils::make_dir(&year_dir).await?;
        let path = year_dir.join(&self.file_name);
        utils::write(&path, &self.content).await?;
        Ok(path)
    }
}

/// Reads back the files that `Artifact::write_to` left below `dir`, sorted by partition.
///
/// Only `<dir>/<year>/<file>` entries whose file name `layout` produces for a month of that year
/// are picked up; anything else is skipped with a warning.
///
/// # Errors
/// Fails if `dir` or one of its year directories cannot be read.
pub async fn collect(dir: &Path, layout: &Layout) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    let mut years = utils::read_dir(dir).await?;
    while let Some(year_entry) = years
        .next_entry()
        .await
        .with_context(|| format!("Unable to list {}", dir.display()))?
    {
        let year_dir = year_entry.path();
        let Some(year) = year_dir
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| n.len() == 4)
            .and_then(|n| n.parse::<i32>().ok())
        else {
            debug!("Skipping {}", year_dir.display());
            continue;
        };
        if !year_dir.is_dir() {
            continue;
        }

        let mut files = utils::read_dir(&year_dir).await?;
        while let Some(file_entry) = files
            .next_entry()
            .await
            .with_context(|| format!("Unable to list {}", year_dir.display()))?
        {
            let path = file_entry.path();
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| layout.parse_file_name(n))
                .filter(|key| key.year() == year);
            let Some(key) = key else {
                warn!("{} is not a split file of {year}, skipping it", path.display());
                continue;
            };
            let content = utils::read_bytes(&path).await?;
            artifacts.push(Artifact::new(
                key,
                layout.file_name(key),
                CSV_MIME_TYPE,
                content,
            ));
        }
    }
    artifacts.sort_by_key(Artifact::key);
    Ok(artifacts)
}

/// Serializes partitions with the header of their source file.
#[derive(Debug, Clone)]
pub struct Materializer {
    headers: Vec<String>,
    layout: Layout,
}

impl Materializer {
    pub fn new(schema: &Schema, layout: Layout) -> Self {
        Self {
            headers: schema.headers().to_vec(),
            layout,
        }
    }

    /// Encodes `partition` as UTF-8 CSV: the source header row followed by each record's fields,
    /// verbatim and in source column order. The same input always yields the same bytes and name.
    pub fn materialize(
        &self,
        key: PartitionKey,
        partition: &Partition,
    ) -> std::result::Result<Artifact, SerializationError> {
        if partition.sum().is_none() {
            return Err(SerializationError::new(
                key,
                "the total amount of the partition is out of range",
            ));
        }

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_record(&self.headers)
            .map_err(|e| SerializationError::new(key, format!("unable to write header: {e}")))?;

        for record in partition.records() {
            if record.fields().len() != self.headers.len() {
                return Err(SerializationError::new(
                    key,
                    format!(
                        "row {} has {} fields but the header has {}",
                        record.row(),
                        record.fields().len(),
                        self.headers.len()
                    ),
                ));
            }
            writer.write_record(record.fields()).map_err(|e| {
                SerializationError::new(key, format!("unable to write row {}: {e}", record.row()))
            })?;
        }

        let content = writer
            .into_inner()
            .map_err(|e| SerializationError::new(key, format!("unable to flush CSV: {e}")))?;

        Ok(Artifact::new(
            key,
            self.layout.file_name(key),
            CSV_MIME_TYPE,
            content,
        ))
    }
}
