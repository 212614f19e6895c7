//! The pipeline: validate rows, partition them by month, materialize each partition as a CSV
//! file, resolve the destination folders and upload.

mod report;
mod resolver;
mod retry;
mod uploader;

pub use report::{PlannedUpload, RunSummary, SerializationFailure};
pub use resolver::{HierarchyResolver, ResolverStats};
pub use retry::{retry, Backoff, ExponentialBackoff, FixedDelay, NoDelay, Retried, RetryPolicy};
pub use uploader::{UploadOutcome, UploadStatus, Uploader};

use crate::api::Drive;
use crate::artifact::{Artifact, Materializer};
use crate::layout::Layout;
use crate::model::{partition, validate, Schema, ValidationPolicy};
use crate::source::SalesTable;
use crate::Result;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) const DEFAULT_DATE_COLUMN: &str = "日付";
pub(crate) const DEFAULT_AMOUNT_COLUMN: &str = "売上金額";
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub(crate) const DEFAULT_UPLOAD_WORKERS: usize = 4;

/// The settings of one run. Built once from the configuration and handed to the resolver and the
/// uploader; nothing reads configuration after that.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    anchor_id: String,
    layout: Layout,
    date_column: String,
    amount_column: String,
    retry: Arc<dyn RetryPolicy>,
    workers: usize,
}

impl SyncSettings {
    /// Settings with the default columns, a fixed 2 second delay over 3 attempts and 4 workers.
    pub fn new(anchor_id: impl Into<String>, layout: Layout) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            layout,
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            amount_column: DEFAULT_AMOUNT_COLUMN.to_string(),
            retry: Arc::new(FixedDelay::new(
                DEFAULT_MAX_ATTEMPTS,
                Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            )),
            workers: DEFAULT_UPLOAD_WORKERS,
        }
    }

    pub fn with_columns(mut self, date_column: impl Into<String>, amount_column: impl Into<String>) -> Self {
        self.date_column = date_column.into();
        self.amount_column = amount_column.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn amount_column(&self) -> &str {
        &self.amount_column
    }

    pub fn retry_policy(&self) -> &dyn RetryPolicy {
        self.retry.as_ref()
    }

    pub fn retry_policy_arc(&self) -> Arc<dyn RetryPolicy> {
        self.retry.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// The local part of a run: the artifacts that were produced and the summary so far.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub artifacts: Vec<Artifact>,
    pub summary: RunSummary,
}

/// Validates, partitions and materializes `table`. No remote calls are made.
///
/// # Errors
/// Fails if a required column is missing, or on the first invalid row under
/// `ValidationPolicy::Abort`. A partition that cannot be serialized does not fail the call; it is
/// recorded in the summary instead.
pub fn prepare(settings: &SyncSettings, table: SalesTable, policy: ValidationPolicy) -> Result<Prepared> {
    let schema = Schema::new(
        table.headers().to_vec(),
        settings.date_column(),
        settings.amount_column(),
    )?;
    let (records, rejected) = validate(&schema, table.into_rows(), policy)
        .context("Validation stopped at an invalid row")?
        .into_parts();
    let partitions = partition(records);
    debug!(
        "{} record(s) in {} partition(s), {} rejected",
        partitions.record_count(),
        partitions.len(),
        rejected.len()
    );

    let mut summary = RunSummary::new(&partitions, rejected);
    let materializer = Materializer::new(&schema, settings.layout().clone());
    let mut artifacts = Vec::with_capacity(partitions.len());
    for p in partitions.iter() {
        match materializer.materialize(p.key(), p) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                tracing::error!("{e}");
                summary.record_serialization_failure(&e);
            }
        }
    }
    Ok(Prepared { artifacts, summary })
}

/// Runs the whole pipeline against `drive`.
///
/// The anchor is checked before anything else, so a bad anchor fails the call without touching
/// the data. After that the call only fails on validation errors (see `prepare`); remote failures
/// are reported per artifact in the returned summary. With `dry_run` nothing is written remotely
/// and the summary lists where each file would go.
pub async fn run(
    drive: Arc<dyn Drive>,
    settings: &SyncSettings,
    table: SalesTable,
    policy: ValidationPolicy,
    cancel: CancellationToken,
    dry_run: bool,
) -> Result<RunSummary> {
    let anchor_name = check_anchor(drive.as_ref(), settings).await?;
    let Prepared { artifacts, summary } = prepare(settings, table, policy)?;
    Ok(deliver(drive, settings, artifacts, summary, &anchor_name, cancel, dry_run).await)
}

/// Uploads artifacts that were split earlier, e.g. read back with `artifact::collect`. There is
/// no validation step; otherwise this behaves like `run`.
pub async fn run_split(
    drive: Arc<dyn Drive>,
    settings: &SyncSettings,
    artifacts: Vec<Artifact>,
    cancel: CancellationToken,
    dry_run: bool,
) -> Result<RunSummary> {
    let anchor_name = check_anchor(drive.as_ref(), settings).await?;
    let summary = RunSummary::for_artifacts(artifacts.len());
    Ok(deliver(drive, settings, artifacts, summary, &anchor_name, cancel, dry_run).await)
}

/// Looks up the anchor with retry and returns its name.
async fn check_anchor(drive: &dyn Drive, settings: &SyncSettings) -> Result<String> {
    let anchor = settings.anchor_id();
    let checked = retry(settings.retry_policy(), "anchor lookup", |_| {
        drive.anchor_info(anchor)
    })
    .await;
    let anchor_node = checked
        .result
        .with_context(|| format!("The anchor {anchor} is not accessible"))?;
    info!("Uploading below '{}' ({})", anchor_node.name, anchor_node.id);
    Ok(anchor_node.name)
}

async fn deliver(
    drive: Arc<dyn Drive>,
    settings: &SyncSettings,
    artifacts: Vec<Artifact>,
    mut summary: RunSummary,
    anchor_name: &str,
    cancel: CancellationToken,
    dry_run: bool,
) -> RunSummary {
    if dry_run {
        for artifact in &artifacts {
            let path = settings.layout().node_path(artifact.key());
            summary.record_planned(PlannedUpload {
                key: artifact.key(),
                destination: format!("{anchor_name}/{path}"),
                file_name: artifact.file_name().to_string(),
                size: artifact.size(),
            });
        }
        return summary;
    }

    let resolver = HierarchyResolver::new(drive.clone(), settings.retry_policy_arc());
    let uploader = Uploader::new(drive, settings.clone(), cancel);
    let outcomes = uploader.upload_all(artifacts, &resolver).await;
    summary.record_uploads(outcomes, resolver.stats());
    summary
}
