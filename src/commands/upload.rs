use crate::api::{self, Mode};
use crate::args::UploadArgs;
use crate::artifact;
use crate::commands::Out;
use crate::source::SalesTable;
use crate::sync::{self, RunSummary};
use crate::{Config, Result};
use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handles the `sales-sync upload` command.
///
/// Uploads either a sales CSV, which is split first, or the files an earlier `split` wrote
/// (`--from-split`). Credentials are checked before the input is read. Ctrl-C stops new uploads
/// from starting; uploads in flight are allowed to finish.
///
/// # Errors
/// Returns an error when authentication or the anchor check fails, when validation aborts, when a
/// split directory holds no split files, or, after printing the summary, when any partition or
/// upload failed.
pub async fn upload(config: &Config, mode: Mode, args: &UploadArgs) -> Result<Out<RunSummary>> {
    let drive = api::drive(config, mode).await?;
    let settings = config.settings();
    let source = match (args.split_dir(), args.input()) {
        (Some(dir), _) => {
            let artifacts = artifact::collect(dir, settings.layout()).await?;
            if artifacts.is_empty() {
                bail!("No split files were found in {}", dir.display());
            }
            Source::Split(artifacts)
        }
        (None, Some(input)) => Source::Sales(SalesTable::load(input).await?),
        (None, None) => bail!("Either an input CSV or a split directory is required"),
    };

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no new uploads will be started");
            watcher.cancel();
        }
    });

    let result = match source {
        Source::Sales(table) => {
            sync::run(drive, &settings, table, args.on_invalid(), cancel, args.dry_run()).await
        }
        Source::Split(artifacts) => {
            sync::run_split(drive, &settings, artifacts, cancel, args.dry_run()).await
        }
    };
    interrupt.abort();
    let summary = result?;

    let mut details = summary.partition_lines();
    details.extend(summary.planned().iter().map(|p| {
        format!("{} -> {}/{} ({} bytes)", p.key, p.destination, p.file_name, p.size)
    }));
    details.extend(summary.outcomes().iter().filter(|o| !o.is_success()).map(|o| {
        format!(
            "{} failed after {} attempt(s): {}",
            o.artifact().file_name(),
            o.attempts(),
            o.last_error().map(|e| e.to_string()).unwrap_or_default()
        )
    }));
    let out = Out::new(summary.message(), summary.clone()).with_details(details);

    if !summary.is_success() {
        out.print();
        bail!(
            "{} upload(s) and {} partition(s) failed",
            summary.failed(),
            summary.serialization_failures().len()
        );
    }
    Ok(out)
}

enum Source {
    Sales(SalesTable),
    Split(Vec<artifact::Artifact>),
}
