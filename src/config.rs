//! Configuration file handling for sales-sync.
//!
//! The configuration file is stored at `$SALES_SYNC_HOME/config.json` and contains the upload
//! anchor, the column and naming settings, the retry settings and the authentication file paths.

use crate::api::AuthMethod;
use crate::layout::{Layout, DEFAULT_FILE_NAME, DEFAULT_MONTH_FOLDER, DEFAULT_YEAR_FOLDER};
use crate::sync::{
    Backoff, ExponentialBackoff, FixedDelay, RetryPolicy, SyncSettings, DEFAULT_AMOUNT_COLUMN,
    DEFAULT_DATE_COLUMN, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_UPLOAD_WORKERS,
};
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const APP_NAME: &str = "sales-sync";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const SPLIT: &str = "split";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const SERVICE_ACCOUNT_JSON: &str = "service_account.json";
const CONFIG_JSON: &str = "config.json";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$SALES_SYNC_HOME` and from there it loads `$SALES_SYNC_HOME/config.json`. It
/// provides paths to other items that are either configurable or are expected in a certain location
/// within the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    anchor_id: String,
    layout: Layout,
}

impl Config {
    /// Creates the data directory, its subdirectories and:
    /// - Creates an initial `config.json` file using `anchor` along with default settings
    /// - Copies `secret_file` and `token_file`, when given, into `.secrets/`
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of data directory, e.g. `$HOME/sales-sync`
    /// - `anchor` - The shared drive or folder that uploads go into, either as an id or as a Drive
    ///   folder URL, e.g. `https://drive.google.com/drive/folders/0AbCdEfGhIjKlMnOp`
    /// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON.
    /// - `token_file` - A token JSON obtained for those credentials.
    /// - `service_account_file` - A service account key. When given, `auth` is set to
    ///   `service_account` and the OAuth files are not needed.
    ///
    /// # Errors
    /// - Returns an error if the anchor cannot be parsed or any file operations fail.
    pub async fn create(
        dir: impl Into<PathBuf>,
        anchor: &str,
        secret_file: Option<&Path>,
        token_file: Option<&Path>,
        service_account_file: Option<&Path>,
    ) -> Result<Self> {
        let anchor_id = extract_anchor_id(anchor)?;

        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the sales-sync home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let secrets_dir = root.join(SECRETS);
        utils::make_dir(&secrets_dir).await?;
        utils::make_dir(root.join(SPLIT)).await?;

        if let Some(secret_file) = secret_file {
            utils::copy(secret_file, secrets_dir.join(CLIENT_SECRET_JSON)).await?;
        }
        if let Some(token_file) = token_file {
            utils::copy(token_file, secrets_dir.join(TOKEN_JSON)).await?;
        }
        let auth = match service_account_file {
            Some(key_file) => {
                utils::copy(key_file, secrets_dir.join(SERVICE_ACCOUNT_JSON)).await?;
                AuthMethod::ServiceAccount
            }
            None => AuthMethod::OAuth,
        };

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            anchor: anchor.to_string(),
            auth,
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        Ok(Self {
            layout: config_file.layout()?,
            root,
            secrets: secrets_dir,
            config_path,
            config_file,
            anchor_id,
        })
    }

    /// This will
    /// - validate that the home directory exists and that the config file exists
    /// - load and validate the config file
    /// - validate that the secrets directory exists
    /// - return the loaded configuration object
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The sales-sync home directory is missing, run 'sales-sync init' first")?;
        let _ = utils::read_dir(&root).await?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let anchor_id = extract_anchor_id(&config_file.anchor)?;
        let layout = config_file.layout()?;

        let config = Self {
            secrets: root.join(SECRETS),
            root,
            config_path,
            config_file,
            anchor_id,
            layout,
        };
        if !config.secrets.is_dir() {
            bail!(
                "The secrets directory is missing '{}'",
                config.secrets.display()
            )
        }
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    /// The default output directory of `split`.
    pub fn split_dir(&self) -> PathBuf {
        self.root.join(SPLIT)
    }

    pub fn anchor(&self) -> &str {
        &self.config_file.anchor
    }

    pub fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the relative path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.token_path())
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.config_file.auth
    }

    /// Returns the stored `service_account_path` if it is absolute, otherwise resolves the
    /// relative path.
    pub fn service_account_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.service_account_path())
    }

    /// The retry policy described by `max_attempts`, `retry_delay_ms` and `backoff`.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        let f = &self.config_file;
        let delay = Duration::from_millis(f.retry_delay_ms);
        match f.backoff {
            Backoff::Fixed => Arc::new(FixedDelay::new(f.max_attempts, delay)),
            Backoff::Exponential => Arc::new(ExponentialBackoff::new(f.max_attempts, delay)),
        }
    }

    /// The immutable settings for one run.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings::new(&self.anchor_id, self.layout.clone())
            .with_columns(
                &self.config_file.date_column,
                &self.config_file.amount_column,
            )
            .with_retry_policy(self.retry_policy())
            .with_workers(self.config_file.upload_workers)
    }

    /// Checks if `p` is relative, and if so, resolves it. Returns it unchanged if it is absolute.
    fn resolve_secrets_file_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file. Only
/// `app_name`, `config_version` and `anchor` are required; everything else has a default.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "sales-sync",
///   "config_version": 1,
///   "anchor": "https://drive.google.com/drive/folders/0AbCdEfGhIjKlMnOp",
///   "date_column": "日付",
///   "amount_column": "売上金額",
///   "year_folder": "{year}年",
///   "month_folder": "{month}月",
///   "file_name": "{year}年{month}月_売上データ.csv",
///   "max_attempts": 3,
///   "retry_delay_ms": 2000,
///   "backoff": "fixed",
///   "upload_workers": 4,
///   "auth": "oauth",
///   "client_secret_path": ".secrets/client_secret.json",
///   "token_path": ".secrets/token.json",
///   "service_account_path": ".secrets/service_account.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "sales-sync"
    app_name: String,

    config_version: u8,

    /// Shared drive id, folder id, or Drive folder URL under which the year folders live
    anchor: String,

    #[serde(default = "default_date_column")]
    date_column: String,

    #[serde(default = "default_amount_column")]
    amount_column: String,

    #[serde(default = "default_year_folder")]
    year_folder: String,

    #[serde(default = "default_month_folder")]
    month_folder: String,

    #[serde(default = "default_file_name")]
    file_name: String,

    /// Total upload attempts per file, including the first
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,

    #[serde(default)]
    backoff: Backoff,

    #[serde(default = "default_upload_workers")]
    upload_workers: usize,

    /// `oauth` (user token) or `service_account`
    #[serde(default)]
    auth: AuthMethod,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to config.json or absolute)
    /// Defaults to $SALES_SYNC_HOME/.secrets/client_secret.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file (optional, relative to config.json or absolute)
    /// Defaults to $SALES_SYNC_HOME/.secrets/token.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,

    /// Path to the service account key (optional, relative to config.json or absolute)
    /// Defaults to $SALES_SYNC_HOME/.secrets/service_account.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    service_account_path: Option<PathBuf>,
}

fn default_date_column() -> String {
    DEFAULT_DATE_COLUMN.to_string()
}

fn default_amount_column() -> String {
    DEFAULT_AMOUNT_COLUMN.to_string()
}

fn default_year_folder() -> String {
    DEFAULT_YEAR_FOLDER.to_string()
}

fn default_month_folder() -> String {
    DEFAULT_MONTH_FOLDER.to_string()
}

fn default_file_name() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_upload_workers() -> usize {
    DEFAULT_UPLOAD_WORKERS
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            anchor: String::new(),
            date_column: default_date_column(),
            amount_column: default_amount_column(),
            year_folder: default_year_folder(),
            month_folder: default_month_folder(),
            file_name: default_file_name(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff: Backoff::default(),
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            auth: AuthMethod::default(),
            client_secret_path: None,
            token_path: None,
            service_account_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads and validates a ConfigFile from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if a setting is out of range
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;

        ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        ensure!(
            config.max_attempts >= 1,
            "max_attempts must be at least 1 in {}",
            path.display()
        );
        ensure!(
            config.upload_workers >= 1,
            "upload_workers must be at least 1 in {}",
            path.display()
        );
        let _ = config
            .layout()
            .with_context(|| format!("Invalid naming template in {}", path.display()))?;

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }

    fn layout(&self) -> Result<Layout> {
        Layout::new(&self.year_folder, &self.month_folder, &self.file_name)
    }

    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $SALES_SYNC_HOME/.secrets/client_secret.json
    pub fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $SALES_SYNC_HOME/.secrets/token.json
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }

    /// If None, defaults to $SALES_SYNC_HOME/.secrets/service_account.json
    pub fn service_account_path(&self) -> PathBuf {
        self.service_account_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(SERVICE_ACCOUNT_JSON))
    }
}

/// Extracts the anchor id from a Drive URL, or returns the input when it already is a bare id.
///
/// Accepted URL forms:
/// - `https://drive.google.com/drive/folders/<ID>` (also under `/drive/u/0/folders/<ID>`)
/// - `https://drive.google.com/open?id=<ID>`
fn extract_anchor_id(anchor: &str) -> Result<String> {
    let anchor = anchor.trim();
    ensure!(!anchor.is_empty(), "The anchor is empty");

    let url = match Url::parse(anchor) {
        Ok(url) => url,
        Err(_) => {
            ensure!(
                anchor
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "'{anchor}' is neither a Drive URL nor a folder id"
            );
            return Ok(anchor.to_string());
        }
    };

    if let Some(segments) = url.path_segments() {
        let segments: Vec<&str> = segments.collect();
        if let Some(ix) = segments.iter().position(|s| *s == "folders") {
            if let Some(id) = segments.get(ix + 1).filter(|s| !s.is_empty()) {
                return Ok(id.to_string());
            }
        }
    }
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
        return Ok(id.into_owned());
    }
    bail!(
        "Invalid Google Drive URL '{anchor}'. Expected: https://drive.google.com/drive/folders/FOLDER_ID"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_create() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("sales_sync_home");
        let secret_source_file = dir.path().join("x.json");
        let secret_content = "12345";
        let anchor = "https://drive.google.com/drive/folders/0AbCdEfGhIjKlMnOp?usp=sharing";
        utils::write(&secret_source_file, secret_content)
            .await
            .unwrap();

        let config = Config::create(
            &home_dir,
            anchor,
            Some(secret_source_file.as_path()),
            None,
            None,
        )
        .await
        .unwrap();

        assert_eq!(anchor, config.anchor());
        assert_eq!("0AbCdEfGhIjKlMnOp", config.anchor_id());
        let found_secret_content = utils::read(&config.client_secret_path()).await.unwrap();
        assert_eq!(secret_content, found_secret_content);
        // The original is copied, not moved.
        assert!(secret_source_file.is_file());
        assert!(config.secrets().is_dir());
        assert!(config.split_dir().is_dir());

        let loaded = Config::load(&home_dir).await.unwrap();
        assert_eq!(loaded.anchor_id(), "0AbCdEfGhIjKlMnOp");
        assert_eq!(loaded.layout(), &Layout::default());
    }

    #[tokio::test]
    async fn test_config_load_missing_home() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(dir.path().join("nope")).await.is_err());
        // A home directory without config.json
        let err = Config::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("config file is missing"));
    }

    #[tokio::test]
    async fn test_config_settings() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(CONFIG_JSON);
        utils::make_dir(dir.path().join(SECRETS)).await.unwrap();
        let json = r#"{
            "app_name": "sales-sync",
            "config_version": 1,
            "anchor": "folder_123",
            "date_column": "Date",
            "amount_column": "Amount",
            "file_name": "{year}-{month}.csv",
            "max_attempts": 5,
            "retry_delay_ms": 100,
            "backoff": "exponential",
            "upload_workers": 2
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let config = Config::load(dir.path()).await.unwrap();
        let settings = config.settings();
        assert_eq!(settings.anchor_id(), "folder_123");
        assert_eq!(settings.date_column(), "Date");
        assert_eq!(settings.amount_column(), "Amount");
        assert_eq!(settings.workers(), 2);
        assert_eq!(settings.retry_policy().max_attempts(), 5);
        assert_eq!(
            settings.retry_policy().delay(3),
            Duration::from_millis(400)
        );
        let key = crate::model::PartitionKey::new(2024, 3).unwrap();
        assert_eq!(settings.layout().file_name(key), "2024-03.csv");
        assert_eq!(settings.layout().node_path(key).to_string(), "2024年/03月");
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let json = r#"{
            "app_name": "sales-sync",
            "config_version": 1,
            "anchor": "abc"
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(config, ConfigFile {
            anchor: "abc".to_string(),
            ..ConfigFile::default()
        });
        assert_eq!(
            config.client_secret_path(),
            PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON)
        );
        assert_eq!(config.token_path(), PathBuf::from(SECRETS).join(TOKEN_JSON));
        assert_eq!(config.auth, AuthMethod::OAuth);
        assert_eq!(
            config.service_account_path(),
            PathBuf::from(SECRETS).join(SERVICE_ACCOUNT_JSON)
        );
    }

    #[tokio::test]
    async fn test_config_service_account_auth() {
        let dir = TempDir::new().unwrap();
        utils::make_dir(dir.path().join(SECRETS)).await.unwrap();
        let json = r#"{
            "app_name": "sales-sync",
            "config_version": 1,
            "anchor": "abc",
            "auth": "service_account",
            "service_account_path": "keys/uploader.json"
        }"#;
        utils::write(dir.path().join(CONFIG_JSON), json).await.unwrap();

        let config = Config::load(dir.path()).await.unwrap();
        assert_eq!(config.auth_method(), AuthMethod::ServiceAccount);
        assert_eq!(
            config.service_account_path(),
            dir.path().join("keys/uploader.json")
        );

        let bad = json.replace("service_account\",", "robot\",");
        utils::write(dir.path().join(CONFIG_JSON), bad).await.unwrap();
        assert!(Config::load(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_file_load_rejects_bad_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        for (json, expected) in [
            (
                r#"{"app_name": "tiller", "config_version": 1, "anchor": "a"}"#,
                "Invalid app_name",
            ),
            (
                r#"{"app_name": "sales-sync", "config_version": 1, "anchor": "a", "max_attempts": 0}"#,
                "max_attempts",
            ),
            (
                r#"{"app_name": "sales-sync", "config_version": 1, "anchor": "a", "file_name": "x.csv"}"#,
                "Invalid naming template",
            ),
        ] {
            utils::write(&config_path, json).await.unwrap();
            let err = ConfigFile::load(&config_path).await.unwrap_err();
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[test]
    fn test_config_file_serialization_omits_none_fields() {
        let json = serde_json::to_string(&ConfigFile::default()).unwrap();
        assert!(!json.contains("client_secret_path"));
        assert!(!json.contains("token_path"));
        assert!(json.contains("\"backoff\":\"fixed\""));
    }

    #[test]
    fn test_extract_anchor_id() {
        let cases = [
            ("https://drive.google.com/drive/folders/1a2B3c", "1a2B3c"),
            ("https://drive.google.com/drive/u/0/folders/1a2B3c?usp=sharing", "1a2B3c"),
            ("https://drive.google.com/open?id=1a2B3c", "1a2B3c"),
            ("0AbCdEf-_x", "0AbCdEf-_x"),
            ("  0AbCdEf  ", "0AbCdEf"),
        ];
        for (input, expected) in cases {
            assert_eq!(extract_anchor_id(input).unwrap(), expected, "{input}");
        }
        assert!(extract_anchor_id("").is_err());
        assert!(extract_anchor_id("https://example.com/invalid").is_err());
        assert!(extract_anchor_id("not an id").is_err());
    }
}
