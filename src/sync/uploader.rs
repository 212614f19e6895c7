//! Uploads artifacts to their resolved folders with bounded retry and bounded parallelism.

use crate::api::Drive;
use crate::artifact::Artifact;
use crate::error::RemoteError;
use crate::layout::NodePath;
use crate::sync::resolver::HierarchyResolver;
use crate::sync::retry::retry;
use crate::sync::SyncSettings;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Succeeded,
    Failed,
}

serde_plain::derive_display_from_serialize!(UploadStatus);

/// What happened to one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    artifact: Artifact,
    status: UploadStatus,
    /// Upload attempts made. Zero when the artifact never reached the upload step.
    attempts: u32,
    remote_file_id: Option<String>,
    last_error: Option<RemoteError>,
}

impl UploadOutcome {
    fn succeeded(artifact: Artifact, attempts: u32, remote_file_id: String) -> Self {
        Self {
            artifact,
            status: UploadStatus::Succeeded,
            attempts,
            remote_file_id: Some(remote_file_id),
            last_error: None,
        }
    }

    fn failed(artifact: Artifact, attempts: u32, error: RemoteError) -> Self {
        Self {
            artifact,
            status: UploadStatus::Failed,
            attempts,
            remote_file_id: None,
            last_error: Some(error),
        }
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Succeeded
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn remote_file_id(&self) -> Option<&str> {
        self.remote_file_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }
}

/// Uploads artifacts. Never fails as a whole: every artifact gets an `UploadOutcome`.
pub struct Uploader {
    drive: Arc<dyn Drive>,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(drive: Arc<dyn Drive>, settings: SyncSettings, cancel: CancellationToken) -> Self {
        Self {
            drive,
            settings,
            cancel,
        }
    }

    /// Uploads `artifact` into the folder `destination`, retrying transient failures. Each attempt
    /// sends the full content. Nothing is started once the run has been cancelled.
    pub async fn upload(&self, artifact: Artifact, destination: &str) -> UploadOutcome {
        if self.cancel.is_cancelled() {
            return cancelled(artifact);
        }

        let drive: &dyn Drive = self.drive.as_ref();
        let name = artifact.file_name();
        let content = artifact.content();
        let mime_type = artifact.mime_type();
        let retried = retry(
            self.settings.retry_policy(),
            &format!("upload {name}"),
            move |attempt| {
                debug!("Uploading {name} to {destination}, attempt {attempt}");
                drive.create_file(destination, name, content, mime_type)
            },
        )
        .await;

        match retried.result {
            Ok(file) => {
                info!(
                    "Uploaded {} ({} bytes) as {}",
                    artifact.file_name(),
                    artifact.size(),
                    file.id
                );
                UploadOutcome::succeeded(artifact, retried.attempts, file.id)
            }
            Err(e) => {
                error!("Unable to upload {}: {e}", artifact.file_name());
                UploadOutcome::failed(artifact, retried.attempts, e)
            }
        }
    }

    /// Uploads every artifact and returns one outcome per artifact in ascending partition order.
    ///
    /// Destination folders are resolved once per distinct path through `resolver`. Artifacts whose
    /// folder cannot be resolved fail without an upload attempt. Up to `workers` uploads run at a
    /// time and a failure never stops the others.
    pub async fn upload_all(
        &self,
        mut artifacts: Vec<Artifact>,
        resolver: &HierarchyResolver,
    ) -> Vec<UploadOutcome> {
        artifacts.sort_by_key(|a| a.key());
        if self.cancel.is_cancelled() {
            return artifacts.into_iter().map(cancelled).collect();
        }

        let layout = self.settings.layout();
        let paths: Vec<NodePath> = artifacts.iter().map(|a| layout.node_path(a.key())).collect();
        let destinations = resolver
            .resolve_all(&paths, self.settings.anchor_id())
            .await;

        let jobs = artifacts.into_iter().zip(paths).map(|(artifact, path)| {
            let destination = destinations.get(&path).cloned().unwrap_or_else(|| {
                Err(RemoteError::permanent(format!("{path} was never resolved")))
            });
            async move {
                match destination {
                    Ok(folder_id) => self.upload(artifact, &folder_id).await,
                    Err(e) => {
                        error!(
                            "Skipping {}: unable to resolve the folder {path}",
                            artifact.file_name()
                        );
                        UploadOutcome::failed(artifact, 0, e)
                    }
                }
            }
        });

        futures::stream::iter(jobs)
            .buffered(self.settings.workers())
            .collect()
            .await
    }
}

fn cancelled(artifact: Artifact) -> UploadOutcome {
    debug!("Not uploading {}: the run was cancelled", artifact.file_name());
    UploadOutcome::failed(
        artifact,
        0,
        RemoteError::permanent("the run was cancelled before this upload started"),
    )
}
