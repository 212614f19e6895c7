//! Implements the `Drive` trait with an in-memory tree for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without using Google Drive.

use crate::api::{Drive, DriveFile, DriveNode, NodeKind};
use crate::error::RemoteError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_ANCHOR: &str = "test-anchor";

/// The kind of failure to inject.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Fault {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    fault: Fault,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl FaultPlan {
    /// Consumes one failure, if any is left.
    fn take(&mut self) -> Option<Fault> {
        match self.remaining.as_mut() {
            None => Some(self.fault),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.fault)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    parent: Option<String>,
    kind: NodeKind,
    trashed: bool,
    content: Vec<u8>,
}

impl Node {
    fn to_drive_node(&self) -> DriveNode {
        DriveNode {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// Insertion order is the store's default listing order.
    nodes: Vec<Node>,
    next_id: u64,
    list_calls: usize,
    create_folder_calls: usize,
    create_file_calls: usize,
    list_faults: HashMap<String, FaultPlan>,
    folder_faults: HashMap<String, FaultPlan>,
    upload_faults: HashMap<String, FaultPlan>,
}

impl State {
    fn add(&mut self, parent: Option<&str>, name: &str, kind: NodeKind, content: Vec<u8>) -> String {
        self.next_id += 1;
        let id = format!("node-{}", self.next_id);
        self.nodes.push(Node {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            kind,
            trashed: false,
            content,
        });
        id
    }

    fn live(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id && !n.trashed)
    }

    fn require_container(&self, id: &str) -> Result<(), RemoteError> {
        match self.live(id) {
            Some(n) if n.kind != NodeKind::File => Ok(()),
            Some(_) => Err(RemoteError::permanent(format!("{id} is not a folder"))),
            None => Err(RemoteError::permanent(format!("File not found: {id}"))),
        }
    }
}

fn inject(faults: &mut HashMap<String, FaultPlan>, name: &str, op: &str) -> Result<(), RemoteError> {
    match faults.get_mut(name).and_then(FaultPlan::take) {
        Some(Fault::Transient) => Err(RemoteError::transient(format!(
            "injected transient failure during {op} of '{name}'"
        ))),
        Some(Fault::Permanent) => Err(RemoteError::permanent(format!(
            "injected permanent failure during {op} of '{name}'"
        ))),
        None => Ok(()),
    }
}

/// An in-memory `Drive` with call counters and fault injection. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct TestDrive {
    anchor: String,
    state: Arc<Mutex<State>>,
}

impl Default for TestDrive {
    fn default() -> Self {
        Self::with_anchor(DEFAULT_ANCHOR)
    }
}

impl TestDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree whose root is a shared drive with the id `anchor`.
    pub fn with_anchor(anchor: impl Into<String>) -> Self {
        let anchor = anchor.into();
        let mut state = State::default();
        state.nodes.push(Node {
            id: anchor.clone(),
            name: "Sales".to_string(),
            parent: None,
            kind: NodeKind::Drive,
            trashed: false,
            content: Vec::new(),
        });
        Self {
            anchor,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn anchor_id(&self) -> &str {
        &self.anchor
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a folder directly, bypassing counters and faults. Used to seed pre-existing trees,
    /// including duplicate siblings.
    pub fn insert_folder(&self, parent_id: &str, name: &str) -> String {
        self.state()
            .add(Some(parent_id), name, NodeKind::Folder, Vec::new())
    }

    /// Adds another shared drive next to the anchor and returns its id.
    pub fn insert_drive(&self, name: &str) -> String {
        self.state().add(None, name, NodeKind::Drive, Vec::new())
    }

    /// Moves a node to the trash.
    pub fn trash(&self, id: &str) {
        if let Some(n) = self.state().nodes.iter_mut().find(|n| n.id == id) {
            n.trashed = true;
        }
    }

    /// The non-trashed children of `parent_id`, folders and files, in insertion order.
    pub fn children(&self, parent_id: &str) -> Vec<DriveNode> {
        self.state()
            .nodes
            .iter()
            .filter(|n| !n.trashed && n.parent.as_deref() == Some(parent_id))
            .map(Node::to_drive_node)
            .collect()
    }

    /// The non-trashed folders named `name` under `parent_id`.
    pub fn folders_named(&self, parent_id: &str, name: &str) -> Vec<DriveNode> {
        self.children(parent_id)
            .into_iter()
            .filter(|n| n.kind == NodeKind::Folder && n.name == name)
            .collect()
    }

    /// The uploaded bytes of a file.
    pub fn content(&self, file_id: &str) -> Option<Vec<u8>> {
        self.state()
            .live(file_id)
            .filter(|n| n.kind == NodeKind::File)
            .map(|n| n.content.clone())
    }

    /// Total number of non-trashed files in the tree.
    pub fn file_count(&self) -> usize {
        self.state()
            .nodes
            .iter()
            .filter(|n| !n.trashed && n.kind == NodeKind::File)
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn create_folder_calls(&self) -> usize {
        self.state().create_folder_calls
    }

    pub fn create_file_calls(&self) -> usize {
        self.state().create_file_calls
    }

    /// Fails listings of folders named `name`. `times: None` fails every call.
    pub fn fail_list(&self, name: &str, fault: Fault, times: Option<u32>) {
        self.state().list_faults.insert(
            name.to_string(),
            FaultPlan {
                fault,
                remaining: times,
            },
        );
    }

    /// Fails creation of folders named `name`. `times: None` fails every call.
    pub fn fail_create_folder(&self, name: &str, fault: Fault, times: Option<u32>) {
        self.state().folder_faults.insert(
            name.to_string(),
            FaultPlan {
                fault,
                remaining: times,
            },
        );
    }

    /// Fails uploads of files named `name`. `times: None` fails every call.
    pub fn fail_upload(&self, name: &str, fault: Fault, times: Option<u32>) {
        self.state().upload_faults.insert(
            name.to_string(),
            FaultPlan {
                fault,
                remaining: times,
            },
        );
    }
}

#[async_trait]
impl Drive for TestDrive {
    async fn list_folders(&self, parent_id: &str, name: &str) -> Result<Vec<DriveNode>, RemoteError> {
        let found = {
            let mut state = self.state();
            state.list_calls += 1;
            inject(&mut state.list_faults, name, "listing")?;
            state
                .nodes
                .iter()
                .filter(|n| {
                    !n.trashed
                        && n.kind == NodeKind::Folder
                        && n.name == name
                        && n.parent.as_deref() == Some(parent_id)
                })
                .map(Node::to_drive_node)
                .collect()
        };
        // Let other tasks run between the lookup and whatever the caller does next.
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveNode, RemoteError> {
        let node = {
            let mut state = self.state();
            state.create_folder_calls += 1;
            inject(&mut state.folder_faults, name, "folder creation")?;
            state.require_container(parent_id)?;
            let id = state.add(Some(parent_id), name, NodeKind::Folder, Vec::new());
            DriveNode {
                id,
                name: name.to_string(),
                kind: NodeKind::Folder,
            }
        };
        tokio::task::yield_now().await;
        Ok(node)
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        _mime_type: &str,
    ) -> Result<DriveFile, RemoteError> {
        let file = {
            let mut state = self.state();
            state.create_file_calls += 1;
            inject(&mut state.upload_faults, name, "upload")?;
            state.require_container(parent_id)?;
            let id = state.add(Some(parent_id), name, NodeKind::File, content.to_vec());
            DriveFile {
                id,
                name: name.to_string(),
                size: Some(content.len() as u64),
            }
        };
        tokio::task::yield_now().await;
        Ok(file)
    }

    async fn anchor_info(&self, anchor_id: &str) -> Result<DriveNode, RemoteError> {
        let state = self.state();
        state.require_container(anchor_id)?;
        state
            .live(anchor_id)
            .map(Node::to_drive_node)
            .ok_or_else(|| RemoteError::permanent(format!("File not found: {anchor_id}")))
    }

    async fn list_drives(&self) -> Result<Vec<DriveNode>, RemoteError> {
        let state = self.state();
        Ok(state
            .nodes
            .iter()
            .filter(|n| !n.trashed && n.kind == NodeKind::Drive)
            .map(Node::to_drive_node)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_excludes_trashed_and_files() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let a = drive.insert_folder(&anchor, "2024年");
        let b = drive.insert_folder(&anchor, "2024年");
        drive.trash(&a);
        drive
            .create_file(&anchor, "2024年", b"x", "text/csv")
            .await
            .unwrap();

        let found = drive.list_folders(&anchor, "2024年").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b);
        assert_eq!(drive.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_drives() {
        let drive = TestDrive::new();
        let other = drive.insert_drive("経理");
        drive.insert_folder(drive.anchor_id(), "2024年");
        let names: Vec<_> = drive
            .list_drives()
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect();
        assert_eq!(
            names,
            vec![
                (drive.anchor_id().to_string(), "Sales".to_string()),
                (other.clone(), "経理".to_string())
            ]
        );
        drive.trash(&other);
        assert_eq!(drive.list_drives().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        drive.fail_upload("a.csv", Fault::Transient, Some(2));

        for _ in 0..2 {
            let err = drive
                .create_file(&anchor, "a.csv", b"1", "text/csv")
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        let file = drive
            .create_file(&anchor, "a.csv", b"1", "text/csv")
            .await
            .unwrap();
        assert_eq!(drive.content(&file.id).unwrap(), b"1");
        assert_eq!(drive.create_file_calls(), 3);
        assert_eq!(drive.file_count(), 1);
    }

    #[tokio::test]
    async fn test_anchor_info() {
        let drive = TestDrive::with_anchor("root-1");
        let node = drive.anchor_info("root-1").await.unwrap();
        assert_eq!(node.kind, NodeKind::Drive);

        let err = drive.anchor_info("missing").await.unwrap_err();
        assert!(!err.is_transient());

        let err = drive
            .create_folder("missing", "x")
            .await
            .unwrap_err();
        assert!(err.message().contains("not found"));
    }
}
