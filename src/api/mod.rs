//! The remote store. The `Drive` trait is the only way the rest of the crate touches Google
//! Drive; `GoogleDrive` talks to the real service and `TestDrive` is an in-memory stand-in.

mod credentials;
mod files;
mod google_drive;
mod oauth;
mod service_account;
mod test_drive;

use crate::error::RemoteError;
use crate::{Config, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) use credentials::Credentials;
pub(crate) use google_drive::GoogleDrive;
pub(crate) use oauth::TokenProvider;
pub(crate) use service_account::ServiceAccount;
pub use test_drive::{Fault, TestDrive};

/// The scope needed to list, create and upload in folders the user can already see.
pub(crate) const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// When this environment variable is set, the CLI uses `TestDrive` instead of Google Drive.
pub const SALES_SYNC_IN_TEST_MODE: &str = "SALES_SYNC_IN_TEST_MODE";

/// Selects the `Drive` implementation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Mode {
    #[default]
    Google,
    Testing,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var_os(SALES_SYNC_IN_TEST_MODE) {
            Some(_) => Mode::Testing,
            None => Mode::Google,
        }
    }
}

/// How requests to Drive are authorized.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// A user's OAuth token (`token.json`) refreshed with `client_secret.json`.
    #[default]
    #[serde(rename = "oauth")]
    OAuth,
    /// A service account key (`service_account.json`).
    ServiceAccount,
}

serde_plain::derive_display_from_serialize!(AuthMethod);

/// Whether a node is a folder-like container or a file.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    /// A shared drive root.
    Drive,
    File,
}

/// A node in the remote tree.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DriveNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
}

/// A file that was created by `Drive::create_file`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
}

/// The operations this program needs from the remote store.
#[async_trait]
pub trait Drive: Send + Sync {
    /// Lists the non-trashed folders named exactly `name` directly under `parent_id`, in the
    /// store's default order.
    async fn list_folders(
        &self,
        parent_id: &str,
        name: &str,
    ) -> std::result::Result<Vec<DriveNode>, RemoteError>;

    /// Creates a folder named `name` under `parent_id`. The store does not deduplicate by name.
    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> std::result::Result<DriveNode, RemoteError>;

    /// Uploads `content` as a new file named `name` under `parent_id`.
    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
    ) -> std::result::Result<DriveFile, RemoteError>;

    /// Looks up the anchor: a shared drive id or a folder id.
    async fn anchor_info(&self, anchor_id: &str) -> std::result::Result<DriveNode, RemoteError>;

    /// Lists the shared drives the credentials can see.
    async fn list_drives(&self) -> std::result::Result<Vec<DriveNode>, RemoteError>;
}

/// Builds the `Drive` for `mode`. In `Mode::Google` this loads the credentials and obtains an
/// access token, so missing or unusable credentials fail here before any work is done.
pub async fn drive(config: &Config, mode: Mode) -> Result<Arc<dyn Drive>> {
    match mode {
        Mode::Google => {
            let mut credentials = Credentials::load(config).await?;
            credentials.access_token().await?;
            Ok(Arc::new(GoogleDrive::new(credentials)?))
        }
        Mode::Testing => Ok(Arc::new(TestDrive::with_anchor(config.anchor_id()))),
    }
}
