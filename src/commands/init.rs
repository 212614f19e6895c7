use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its subdirectories and:
/// - Creates an initial `config.json` file using `anchor` along with default settings
/// - Copies `client_secret` and `token`, or `service_account`, when given, into the secrets
///   directory.
///
/// # Arguments
/// - `home` - The directory that will be the root of data directory, e.g. `$HOME/sales-sync`
/// - `anchor` - The shared drive or folder, as an id or a Drive folder URL, that will hold the
///   year folders.
/// - `client_secret` - The downloaded OAuth 2.0 client credentials JSON.
/// - `token` - An OAuth token JSON obtained for those credentials with the Drive scope.
/// - `service_account` - A service account key. The config is set to authenticate with it.
///
/// # Errors
/// - Returns an error if the anchor is not valid or if any file operations fail.
pub async fn init(
    home: &Path,
    anchor: &str,
    client_secret: Option<&Path>,
    token: Option<&Path>,
    service_account: Option<&Path>,
) -> Result<Out<()>> {
    let config = Config::create(home, anchor, client_secret, token, service_account)
        .await
        .context("Unable to create the data directory and configs")?;
    let mut message = format!(
        "Successfully created the sales-sync directory at {}",
        config.root().display()
    );
    if service_account.is_some() {
        message.push_str(". Uploads will run as the service account, share the anchor with it");
    } else if client_secret.is_none() || token.is_none() {
        message.push_str(&format!(
            ". Place your client secret and token at {} and {} before uploading",
            config.client_secret_path().display(),
            config.token_path().display()
        ));
    }
    Ok(message.into())
}
