//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::{utils, Config};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// An RSA key used to sign service account assertions in tests.
pub const SERVICE_ACCOUNT_PRIVATE_KEY: &str =
    include_str!("api/testdata/service_account_key.pem");

/// Three months of sales and one row with a bad date.
pub const SAMPLE_SALES: &str = "日付,商品名,売上金額\n\
    2024-03-15,りんご,\"¥1,000\"\n\
    2023-12-05,みかん,500\n\
    2024-01-10,ぶどう,300\n\
    not a date,なし,100\n\
    2024-03-20,もも,250\n";

/// Test environment that sets up a sales-sync home directory with a Config and fake credentials.
/// Holds TempDir to keep the directory alive for the duration of the test.
pub struct TestEnv {
    _temp_dir: TempDir,
    root: PathBuf,
    config: Config,
}

impl TestEnv {
    /// Creates a test environment whose anchor is a random id.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("sales-sync");
        let secret_path = temp_dir.path().join("client_secret.json");
        let token_path = temp_dir.path().join("token.json");

        // Minimal client_secret.json
        let secret_content = r#"{
            "installed": {
                "client_id": "test-client-id",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost"],
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;
        std::fs::write(&secret_path, secret_content).unwrap();
        let token_content = r#"{
            "scopes": ["https://www.googleapis.com/auth/drive"],
            "access_token": "test-access-token",
            "refresh_token": "test-refresh-token",
            "expires_at": "2099-01-01T00:00:00Z"
        }"#;
        std::fs::write(&token_path, token_content).unwrap();

        let anchor = Uuid::new_v4().to_string().replace('-', "");
        let config = Config::create(
            &root,
            &anchor,
            Some(secret_path.as_path()),
            Some(token_path.as_path()),
            None,
        )
        .await
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            root,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` as the input CSV and returns its path.
    pub async fn write_input(&self, content: &str) -> PathBuf {
        let path = self.root.join("sales.csv");
        utils::write(&path, content).await.unwrap();
        path
    }
}

/// Writes a service account key file whose token endpoint is `token_uri` into `dir`.
pub async fn write_service_account_key(dir: &Path, token_uri: &str) -> PathBuf {
    let path = dir.join("service_account.json");
    let key = serde_json::json!({
        "type": "service_account",
        "project_id": "sales",
        "private_key_id": "key-1",
        "private_key": SERVICE_ACCOUNT_PRIVATE_KEY,
        "client_email": "uploader@sales.iam.gserviceaccount.com",
        "client_id": "123",
        "token_uri": token_uri,
    });
    utils::write(&path, key.to_string()).await.unwrap();
    path
}

/// Serves one canned JSON response per connection, in order, on a local port. Returns the base
/// URL and a handle that yields the request bodies once every response has been sent.
pub async fn serve_responses(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut bodies = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            bodies.push(read_request_body(&mut stream).await);
            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        bodies
    });
    (url, handle)
}

async fn read_request_body(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let start = end + 4;
            if buf.len() >= start + length {
                return String::from_utf8_lossy(&buf[start..start + length]).into_owned();
            }
        }
    }
}
