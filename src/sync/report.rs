//! The summary of one run.

use crate::error::SerializationError;
use crate::model::{Amount, AmountFormat, PartitionKey, PartitionSummary, Partitions, RejectedRow};
use crate::sync::resolver::ResolverStats;
use crate::sync::uploader::UploadOutcome;
use serde::Serialize;

/// A partition that could not be encoded.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SerializationFailure {
    key: PartitionKey,
    error: String,
}

/// Where an artifact goes, reported by dry runs.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PlannedUpload {
    pub key: PartitionKey,
    pub destination: String,
    pub file_name: String,
    pub size: usize,
}

/// Everything a caller needs to know about a run: what was read, what was rejected, and what
/// happened to each artifact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Set when the run uploads files split earlier instead of reading sales rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    split_files: Option<usize>,
    rows: usize,
    partitions: Vec<PartitionSummary>,
    rejected: Vec<RejectedRow>,
    serialization_failures: Vec<SerializationFailure>,
    planned: Vec<PlannedUpload>,
    outcomes: Vec<UploadOutcome>,
    succeeded: usize,
    failed: usize,
    resolver: ResolverStats,
}

impl RunSummary {
    pub fn new(partitions: &Partitions, rejected: Vec<RejectedRow>) -> Self {
        Self {
            rows: partitions.record_count() + rejected.len(),
            partitions: partitions.iter().map(PartitionSummary::from).collect(),
            rejected,
            ..Self::default()
        }
    }

    /// A summary for uploading `files` previously split files. There are no rows or partitions.
    pub fn for_artifacts(files: usize) -> Self {
        Self {
            split_files: Some(files),
            ..Self::default()
        }
    }

    pub fn record_serialization_failure(&mut self, e: &SerializationError) {
        self.serialization_failures.push(SerializationFailure {
            key: e.key(),
            error: e.to_string(),
        });
    }

    pub fn record_planned(&mut self, planned: PlannedUpload) {
        self.planned.push(planned);
    }

    /// Stores the upload outcomes and tallies them.
    pub fn record_uploads(&mut self, outcomes: Vec<UploadOutcome>, resolver: ResolverStats) {
        self.succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        self.failed = outcomes.len() - self.succeeded;
        self.outcomes = outcomes;
        self.resolver = resolver;
    }

    pub fn partitions(&self) -> &[PartitionSummary] {
        &self.partitions
    }

    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn serialization_failures(&self) -> &[SerializationFailure] {
        &self.serialization_failures
    }

    pub fn planned(&self) -> &[PlannedUpload] {
        &self.planned
    }

    pub fn outcomes(&self) -> &[UploadOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn resolver(&self) -> ResolverStats {
        self.resolver
    }

    /// True when every partition was encoded and every upload succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.serialization_failures.is_empty()
    }

    /// One line per partition: key, row count and total amount.
    pub fn partition_lines(&self) -> Vec<String> {
        let format = AmountFormat::new(None, true);
        self.partitions
            .iter()
            .map(|p| match p.sum() {
                Some(sum) => format!(
                    "{}: {} row(s), total {}",
                    p.key(),
                    p.count(),
                    Amount::from(sum).with_format(format)
                ),
                None => format!("{}: {} row(s), total out of range", p.key(), p.count()),
            })
            .collect()
    }

    /// A one-paragraph description of the run.
    pub fn message(&self) -> String {
        let mut message = match self.split_files {
            Some(files) => format!("Found {files} split file(s)."),
            None => format!(
                "Read {} row(s) into {} partition(s); {} row(s) rejected.",
                self.rows,
                self.partitions.len(),
                self.rejected.len()
            ),
        };
        if !self.serialization_failures.is_empty() {
            message.push_str(&format!(
                " {} partition(s) could not be serialized.",
                self.serialization_failures.len()
            ));
        }
        if !self.planned.is_empty() {
            message.push_str(&format!(
                " Dry run: {} file(s) would be uploaded.",
                self.planned.len()
            ));
        }
        if !self.outcomes.is_empty() {
            message.push_str(&format!(
                " Uploaded {} of {} file(s), {} failed. Folders: {} created, {} looked up, {} \
                cached.",
                self.succeeded,
                self.outcomes.len(),
                self.failed,
                self.resolver.creations,
                self.resolver.lookups,
                self.resolver.cache_hits
            ));
        }
        message
    }
}
