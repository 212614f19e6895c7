//! Service-account credentials.
//!
//! A downloaded service account key signs a short-lived JWT which the token endpoint exchanges
//! for an access token (the JWT bearer grant). No user consent is involved, and nothing is written
//! back to disk: the access token is only cached in memory.

use crate::api::OAUTH_SCOPE;
use crate::error::AuthError;
use crate::utils;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_EXPIRY_SECS: i64 = 3600;
/// A cached token this close to its expiry is replaced.
const EXPIRY_BUFFER_SECS: i64 = 300;
const TIMEOUT_SECONDS: u64 = 30;

/// The fields of a service account key file that the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out access tokens for a service account.
pub(crate) struct ServiceAccount {
    key: ServiceAccountKey,
    signer: EncodingKey,
    http: reqwest::Client,
    token: Option<(String, DateTime<Utc>)>,
}

impl ServiceAccount {
    /// Loads and checks the key file.
    ///
    /// # Errors
    /// Fails with `AuthError` if the file is missing, is not a service account key, or its
    /// private key is not an RSA PEM.
    pub(crate) async fn load(path: &Path) -> Result<Self, AuthError> {
        let key: ServiceAccountKey = utils::deserialize(path).await.map_err(|e| {
            AuthError::new(format!(
                "unable to load the service account key at {}: {e:#}",
                path.display()
            ))
        })?;
        let signer = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            AuthError::new(format!(
                "the private key in {} is not usable: {e}",
                path.display()
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(TIMEOUT_SECONDS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::new(format!("unable to build HTTP client: {e}")))?;
        Ok(Self {
            key,
            signer,
            http,
            token: None,
        })
    }

    pub(crate) fn email(&self) -> &str {
        &self.key.client_email
    }

    /// When the cached access token expires, if there is one.
    pub(crate) fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().map(|(_, expires_at)| *expires_at)
    }

    /// Returns the cached access token, or requests a new one when it is missing or about to
    /// expire.
    pub(crate) async fn token(&mut self) -> Result<String, AuthError> {
        if let Some((token, expires_at)) = &self.token {
            if Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) < *expires_at {
                return Ok(token.clone());
            }
            debug!("Service account token expires at {expires_at}, requesting a new one");
        }
        self.request_token().await
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: OAUTH_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.signer)
            .map_err(|e| AuthError::new(format!("unable to sign the token request: {e}")))
    }

    async fn request_token(&mut self) -> Result<String, AuthError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let uri = &self.key.token_uri;
        let response = self
            .http
            .post(uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::transient(format!("unable to reach {uri}: {e}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AuthError::transient(format!("unable to read the reply of {uri}: {e}"))
        })?;
        if !status.is_success() {
            let message = format!("{uri} refused the service account ({status}): {body}");
            return Err(
                if status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
                {
                    AuthError::transient(message)
                } else {
                    AuthError::new(message)
                },
            );
        }

        let reply: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::new(format!("unable to decode the token reply: {e}")))?;
        let expires_at =
            now + Duration::seconds(reply.expires_in.unwrap_or(DEFAULT_EXPIRY_SECS));
        info!(
            "Service account {} obtained an access token, valid until {expires_at}",
            self.key.client_email
        );
        self.token = Some((reply.access_token.clone(), expires_at));
        Ok(reply.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{serve_responses, write_service_account_key};
    use jsonwebtoken::{DecodingKey, Validation};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PUBLIC_KEY: &str = include_str!("testdata/service_account_key.pub.pem");

    #[derive(Debug, Deserialize)]
    struct DecodedClaims {
        iss: String,
        scope: String,
        aud: String,
        exp: i64,
        iat: i64,
    }

    async fn key_file(dir: &TempDir, token_uri: &str) -> PathBuf {
        write_service_account_key(dir.path(), token_uri).await
    }

    fn form_value(body: &str, name: &str) -> String {
        url::form_urlencoded::parse(body.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_assertion_claims() {
        let dir = TempDir::new().unwrap();
        let path = key_file(&dir, "https://oauth2.googleapis.com/token").await;
        let account = ServiceAccount::load(&path).await.unwrap();
        assert_eq!(account.email(), "uploader@sales.iam.gserviceaccount.com");

        let jwt = account.assertion(Utc::now()).unwrap();
        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("key-1"));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        let decoded = jsonwebtoken::decode::<DecodedClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "uploader@sales.iam.gserviceaccount.com");
        assert_eq!(decoded.claims.scope, OAUTH_SCOPE);
        assert_eq!(decoded.claims.aud, "https://oauth2.googleapis.com/token");
        assert_eq!(decoded.claims.exp - decoded.claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn test_token_is_requested_once_and_cached() {
        let (url, server) = serve_responses(vec![(
            200,
            r#"{"access_token": "sa-token", "expires_in": 3599, "token_type": "Bearer"}"#
                .to_string(),
        )])
        .await;
        let dir = TempDir::new().unwrap();
        let path = key_file(&dir, &format!("{url}/token")).await;
        let mut account = ServiceAccount::load(&path).await.unwrap();

        assert_eq!(account.token().await.unwrap(), "sa-token");
        assert_eq!(account.token().await.unwrap(), "sa-token");
        assert!(account.expires_at().unwrap() > Utc::now() + Duration::minutes(50));

        let bodies = server.await.unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(form_value(&bodies[0], "grant_type"), JWT_BEARER_GRANT);
        assert_eq!(form_value(&bodies[0], "assertion").split('.').count(), 3);
    }

    #[tokio::test]
    async fn test_token_endpoint_errors() {
        let (url, _server) = serve_responses(vec![
            (503, r#"{"error": "backend_error"}"#.to_string()),
            (400, r#"{"error": "invalid_grant"}"#.to_string()),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let path = key_file(&dir, &format!("{url}/token")).await;
        let mut account = ServiceAccount::load(&path).await.unwrap();

        let err = account.token().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        let err = account.token().await.unwrap_err();
        assert!(!err.is_transient(), "{err}");
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_keys() {
        let dir = TempDir::new().unwrap();
        assert!(ServiceAccount::load(&dir.path().join("missing.json"))
            .await
            .is_err());

        let path = dir.path().join("bad.json");
        let key = serde_json::json!({
            "private_key": "not a key",
            "client_email": "x@y",
            "token_uri": "https://oauth2.googleapis.com/token",
        });
        utils::write(&path, key.to_string()).await.unwrap();
        let err = ServiceAccount::load(&path).await.err().unwrap();
        assert!(err.to_string().contains("not usable"));
    }
}
