//! The two ways of authenticating against Drive, chosen by `auth` in `config.json`.

use crate::api::{AuthMethod, ServiceAccount, TokenProvider};
use crate::error::AuthError;
use crate::Config;

pub(crate) enum Credentials {
    /// A user's OAuth token, refreshed with the client secret.
    User(TokenProvider),
    ServiceAccount(ServiceAccount),
}

impl Credentials {
    /// Loads the credential files that `config` points at. Nothing is fetched yet.
    pub(crate) async fn load(config: &Config) -> Result<Self, AuthError> {
        match config.auth_method() {
            AuthMethod::OAuth => Ok(Credentials::User(
                TokenProvider::load(config.client_secret_path(), config.token_path()).await?,
            )),
            AuthMethod::ServiceAccount => Ok(Credentials::ServiceAccount(
                ServiceAccount::load(&config.service_account_path()).await?,
            )),
        }
    }

    /// A valid access token, refreshing or requesting one when needed.
    pub(crate) async fn access_token(&mut self) -> Result<String, AuthError> {
        match self {
            Credentials::User(tokens) => tokens.token_with_refresh().await,
            Credentials::ServiceAccount(account) => account.token().await,
        }
    }

    /// Who the credentials belong to and how long the current token lasts.
    pub(crate) fn describe(&self) -> String {
        match self {
            Credentials::User(tokens) => format!(
                "Your OAuth token is valid until {}",
                tokens.expires_at().to_rfc3339()
            ),
            Credentials::ServiceAccount(account) => match account.expires_at() {
                Some(expires_at) => format!(
                    "The service account {} has an access token valid until {}",
                    account.email(),
                    expires_at.to_rfc3339()
                ),
                None => format!("The service account {} has no access token yet", account.email()),
            },
        }
    }
}
