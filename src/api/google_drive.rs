//! Implements the `Drive` trait with the Google Drive v3 REST API.
//!
//! Every request carries `supportsAllDrives=true` so that shared drives behave like My Drive.

use crate::api::{Credentials, Drive, DriveFile, DriveNode, NodeKind};
use crate::error::RemoteError;
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVES_URL: &str = "https://www.googleapis.com/drive/v3/drives";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const TIMEOUT_SECONDS: u64 = 60;
const PAGE_SIZE: &str = "100";

/// Talks to Google Drive. Holds the `Credentials` and renews the access token before each
/// request when it is about to expire.
pub(crate) struct GoogleDrive {
    http: reqwest::Client,
    credentials: Mutex<Credentials>,
}

impl GoogleDrive {
    pub(crate) fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            credentials: Mutex::new(credentials),
        })
    }

    /// A token refresh that could not reach the token endpoint is retried like any other
    /// transient failure.
    async fn access_token(&self) -> std::result::Result<String, RemoteError> {
        Ok(self.credentials.lock().await.access_token().await?)
    }

    /// Sends `request` with the bearer token and decodes a successful JSON response as `T`.
    async fn send<T>(&self, request: RequestBuilder, what: &str) -> std::result::Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_transport(e, what))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, what))?;
        trace!("{what}: HTTP {status}");

        if !status.is_success() {
            return Err(classify_status(status, &body, what));
        }
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::permanent(format!("{what}: unable to decode response: {e}")))
    }
}

#[async_trait]
impl Drive for GoogleDrive {
    async fn list_folders(
        &self,
        parent_id: &str,
        name: &str,
    ) -> std::result::Result<Vec<DriveNode>, RemoteError> {
        let query = folder_query(parent_id, name);
        let what = format!("listing '{name}' in {parent_id}");
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("fields", "nextPageToken,files(id,name,mimeType)".to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("corpora", "allDrives".to_string()),
                ("supportsAllDrives", "true".to_string()),
                ("includeItemsFromAllDrives", "true".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: FileList = self
                .send(self.http.get(FILES_URL).query(&params), &what)
                .await?;
            nodes.extend(page.files.into_iter().map(FileResource::into_node));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!("Found {} folder(s) named '{name}' in {parent_id}", nodes.len());
        Ok(nodes)
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> std::result::Result<DriveNode, RemoteError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let request = self
            .http
            .post(FILES_URL)
            .query(&[("supportsAllDrives", "true"), ("fields", "id,name,mimeType")])
            .json(&metadata);
        let created: FileResource = self
            .send(request, &format!("creating folder '{name}' in {parent_id}"))
            .await?;
        Ok(created.into_node())
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
    ) -> std::result::Result<DriveFile, RemoteError> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        let boundary = format!("sales-sync-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &metadata.to_string(), content, mime_type);
        let request = self
            .http
            .post(UPLOAD_URL)
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", "id,name,size"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let created: FileResource = self
            .send(request, &format!("uploading '{name}' to {parent_id}"))
            .await?;
        Ok(DriveFile {
            size: created.size.as_deref().and_then(|s| s.parse().ok()),
            id: created.id,
            name: created.name,
        })
    }

    async fn anchor_info(&self, anchor_id: &str) -> std::result::Result<DriveNode, RemoteError> {
        let drive_url = format!("{DRIVES_URL}/{anchor_id}");
        let what = format!("looking up anchor {anchor_id}");
        match self
            .send::<SharedDrive>(self.http.get(&drive_url), &what)
            .await
        {
            Ok(drive) => return Ok(drive.into_node()),
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => debug!("{anchor_id} is not a shared drive ({e}), trying it as a folder"),
        }

        let file_url = format!("{FILES_URL}/{anchor_id}");
        let request = self
            .http
            .get(&file_url)
            .query(&[("supportsAllDrives", "true"), ("fields", "id,name,mimeType")]);
        let file: FileResource = self.send(request, &what).await?;
        let node = file.into_node();
        if node.kind != NodeKind::Folder {
            return Err(RemoteError::permanent(format!(
                "The anchor {anchor_id} is a file, not a folder"
            )));
        }
        Ok(node)
    }

    async fn list_drives(&self) -> std::result::Result<Vec<DriveNode>, RemoteError> {
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("fields", "nextPageToken,drives(id,name)".to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: DriveList = self
                .send(self.http.get(DRIVES_URL).query(&params), "listing shared drives")
                .await?;
            nodes.extend(page.drives.into_iter().map(SharedDrive::into_node));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!("Found {} shared drive(s)", nodes.len());
        Ok(nodes)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveList {
    #[serde(default)]
    drives: Vec<SharedDrive>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    /// Drive encodes int64 values as strings.
    size: Option<String>,
}

impl FileResource {
    fn into_node(self) -> DriveNode {
        let kind = if self.mime_type == FOLDER_MIME_TYPE {
            NodeKind::Folder
        } else {
            NodeKind::File
        };
        DriveNode {
            id: self.id,
            name: self.name,
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SharedDrive {
    id: String,
    name: String,
}

impl SharedDrive {
    fn into_node(self) -> DriveNode {
        DriveNode {
            id: self.id,
            name: self.name,
            kind: NodeKind::Drive,
        }
    }
}

/// The search query for non-trashed folders named `name` directly under `parent_id`.
fn folder_query(parent_id: &str, name: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false and '{}' in parents",
        escape_query(name),
        escape_query(parent_id)
    )
}

/// Escapes a string literal for the Drive query language.
fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Builds a `multipart/related` body: JSON metadata followed by the file bytes.
fn multipart_body(boundary: &str, metadata: &str, content: &[u8], mime_type: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
            --{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn classify_transport(e: reqwest::Error, what: &str) -> RemoteError {
    let message = format!("{what}: {e}");
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        RemoteError::transient(message)
    } else {
        RemoteError::permanent(message)
    }
}

/// Maps an unsuccessful HTTP status to a `RemoteError`. Throttling and server errors are worth
/// retrying; everything else is not.
fn classify_status(status: StatusCode, body: &str, what: &str) -> RemoteError {
    let message = format!("{what}: HTTP {status}: {}", body.trim());
    let rate_limited = status == StatusCode::FORBIDDEN
        && (body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded"));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || rate_limited
    {
        RemoteError::transient(message)
    } else {
        RemoteError::permanent(message)
    }
}
