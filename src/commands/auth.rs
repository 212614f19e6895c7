//! Authentication command handler.
//!
//! `sales-sync auth` never opens a browser. It only verifies that the configured credentials can
//! produce an access token: a stored user token is refreshed when it has expired, and a service
//! account requests a fresh token.

use crate::api::Credentials;
use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `sales-sync auth` command.
///
/// # Errors
/// Returns an error if the credential files are missing, a user token lacks the Drive scope, or no
/// access token can be obtained.
pub async fn auth(config: &Config) -> Result<Out<()>> {
    let mut credentials = Credentials::load(config).await.with_context(|| {
        format!(
            "Unable to use the {} credentials. A user token needs the \
            https://www.googleapis.com/auth/drive scope.",
            config.auth_method()
        )
    })?;
    credentials
        .access_token()
        .await
        .context("Unable to obtain an access token")?;
    Ok(credentials.describe().into())
}
