//! Access token management for the Drive API.
//!
//! The interactive consent flow happens outside of this program; it produces `token.json`. This
//! module loads that token together with `client_secret.json` and silently refreshes the access
//! token when it is about to expire.

use crate::api::files::{File, SecretFile, TokenFile};
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Used when the token endpoint does not say how long a new access token lives.
const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Hands out valid access tokens, refreshing and persisting them as needed.
#[derive(Debug, Clone)]
pub(crate) struct TokenProvider {
    secret: SecretFile,
    token: File<TokenFile>,
}

impl TokenProvider {
    /// Loads the client secret and the token file.
    ///
    /// # Errors
    /// Fails with `AuthError` if either file is missing or malformed, or if the token does not
    /// carry the Drive scope.
    pub(crate) async fn load(
        secret_path: impl AsRef<Path>,
        token_path: impl Into<PathBuf>,
    ) -> Result<Self, AuthError> {
        let secret_path = secret_path.as_ref();
        let secret: File<SecretFile> = File::load(secret_path).await.map_err(|e| {
            AuthError::new(format!(
                "unable to load the client secret at {}: {e:#}",
                secret_path.display()
            ))
        })?;
        let token_path = token_path.into();
        let token: File<TokenFile> = File::load(&token_path).await.map_err(|e| {
            AuthError::new(format!(
                "unable to load the token at {}: {e:#}",
                token_path.display()
            ))
        })?;
        token
            .data()
            .validate_scopes()
            .map_err(|e| AuthError::new(format!("{e:#}")))?;
        Ok(Self {
            secret: secret.data().clone(),
            token,
        })
    }

    /// When the current access token expires.
    pub(crate) fn expires_at(&self) -> DateTime<Utc> {
        self.token.data().expires_at()
    }

    /// Returns a valid access token, refreshing first if the current one is (nearly) expired.
    pub(crate) async fn token_with_refresh(&mut self) -> Result<String, AuthError> {
        if self.token.data().is_expired() {
            debug!("Access token expired at {}, refreshing", self.expires_at());
            self.refresh().await?;
        }
        Ok(self.token.data().access_token().to_string())
    }

    /// Exchanges the refresh token for a new access token and saves it to the token file.
    pub(crate) async fn refresh(&mut self) -> Result<(), AuthError> {
        let client = BasicClient::new(ClientId::new(self.secret.client_id().to_string()))
            .set_client_secret(ClientSecret::new(self.secret.client_secret().to_string()))
            .set_auth_uri(
                AuthUrl::new(self.secret.auth_uri().to_string())
                    .map_err(|e| AuthError::new(format!("invalid auth URI: {e}")))?,
            )
            .set_token_uri(
                TokenUrl::new(self.secret.token_uri().to_string())
                    .map_err(|e| AuthError::new(format!("invalid token URI: {e}")))?,
            );

        // The token endpoint must not redirect.
        let http_client = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::new(format!("unable to build HTTP client: {e}")))?;

        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&http_client)
            .await
            .map_err(|e| {
                let message = format!("unable to refresh the access token: {e}");
                match e {
                    // The token endpoint could not be reached.
                    RequestTokenError::Request(_) => AuthError::transient(message),
                    _ => AuthError::new(message),
                }
            })?;

        let lifetime = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_EXPIRY_SECS));
        self.token.data_mut().update(
            response.access_token().secret().to_string(),
            Utc::now() + lifetime,
            response.refresh_token().map(|t| t.secret().to_string()),
        );
        self.token.save().await.map_err(|e| {
            AuthError::new(format!(
                "unable to save the refreshed token to {}: {e:#}",
                self.token.path().display()
            ))
        })?;
        info!("Access token refreshed, valid until {}", self.expires_at());
        Ok(())
    }
}
