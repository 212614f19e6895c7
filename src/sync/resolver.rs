//! Resolves folder paths below the anchor to remote ids, creating missing folders exactly once.

use crate::api::{Drive, DriveNode};
use crate::error::RemoteError;
use crate::layout::NodePath;
use crate::sync::retry::{retry, RetryPolicy};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, trace, warn};

/// A cache entry. `None` means "not resolved yet"; holding the lock means "being resolved".
type Slot = Arc<tokio::sync::Mutex<Option<String>>>;

/// Counters for one run, reported in the run summary.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct ResolverStats {
    /// Remote listings issued.
    pub lookups: usize,
    /// Folders created.
    pub creations: usize,
    /// Segments answered from the cache without a remote call.
    pub cache_hits: usize,
}

/// Walks `NodePath`s from a root id, re-using existing folders and creating missing ones.
///
/// Resolved ids are cached for the lifetime of the resolver, keyed by `(parent id, name)`. Each key
/// has its own async lock, so concurrent callers asking for the same folder wait for the first one
/// instead of both creating it. This is the only place in the crate that creates folders.
pub struct HierarchyResolver {
    drive: Arc<dyn Drive>,
    policy: Arc<dyn RetryPolicy>,
    cache: Mutex<HashMap<(String, String), Slot>>,
    lookups: AtomicUsize,
    creations: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl HierarchyResolver {
    pub fn new(drive: Arc<dyn Drive>, policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            drive,
            policy,
            cache: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            creations: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            creations: self.creations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, parent: &str, name: &str) -> Slot {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry((parent.to_string(), name.to_string()))
            .or_default()
            .clone()
    }

    /// Returns the id of the last folder of `path` below `root`, resolving or creating each
    /// segment in turn. An empty path resolves to `root`.
    ///
    /// Every listing and creation goes through the resolver's retry policy. A resolver built with
    /// `NoDelay::new(1)` makes a single attempt per call and does not retry.
    ///
    /// # Errors
    /// Any remote error (after retries) fails the whole path. Cache entries written by this call
    /// are cleared before returning so that a later call starts from a clean state.
    pub async fn resolve(&self, path: &NodePath, root: &str) -> Result<String, RemoteError> {
        let mut parent = root.to_string();
        let mut inserted: Vec<Slot> = Vec::new();

        for segment in path.segments() {
            let slot = self.slot(&parent, segment);
            let mut entry = slot.lock().await;
            if let Some(id) = entry.as_ref() {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!("Cache hit for '{segment}' in {parent}: {id}");
                parent = id.clone();
                continue;
            }

            let operation = format!("resolve '{segment}' in {parent}");
            let retried = retry(self.policy.as_ref(), &operation, |_| {
                self.lookup_or_create(&parent, segment)
            })
            .await;

            match retried.result {
                Ok(id) => {
                    *entry = Some(id.clone());
                    drop(entry);
                    inserted.push(slot);
                    parent = id;
                }
                Err(e) => {
                    drop(entry);
                    for slot in inserted {
                        *slot.lock().await = None;
                    }
                    return Err(e);
                }
            }
        }
        Ok(parent)
    }

    /// Resolves each distinct path once. Paths are grouped by their first segment: groups run
    /// concurrently, paths inside a group run one after another so that a year folder is settled
    /// before its months are looked up.
    pub async fn resolve_all(
        &self,
        paths: &[NodePath],
        root: &str,
    ) -> BTreeMap<NodePath, Result<String, RemoteError>> {
        let mut groups: BTreeMap<Option<&str>, Vec<&NodePath>> = BTreeMap::new();
        for path in paths {
            let group = groups.entry(path.first()).or_default();
            if !group.contains(&path) {
                group.push(path);
            }
        }

        let branches = groups.into_values().map(|group| async move {
            let mut resolved = Vec::with_capacity(group.len());
            for path in group {
                resolved.push((path.clone(), self.resolve(path, root).await));
            }
            resolved
        });
        join_all(branches).await.into_iter().flatten().collect()
    }

    /// One remote step: list the folders named `name` under `parent` and use the first, or create
    /// one if there are none. Listing again on every attempt keeps a retried creation from
    /// producing a second folder when the first attempt actually went through.
    async fn lookup_or_create(&self, parent: &str, name: &str) -> Result<String, RemoteError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let found = self.drive.list_folders(parent, name).await?;
        match found.as_slice() {
            [] => {
                let DriveNode { id, .. } = self.drive.create_folder(parent, name).await?;
                self.creations.fetch_add(1, Ordering::Relaxed);
                info!("Created folder '{name}' ({id}) in {parent}");
                Ok(id)
            }
            [only] => Ok(only.id.clone()),
            [first, ..] => {
                warn!(
                    "Found {} folders named '{name}' in {parent}, using the first one ({})",
                    found.len(),
                    first.id
                );
                Ok(first.id.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Fault, TestDrive};
    use crate::sync::retry::NoDelay;

    fn resolver(drive: &TestDrive) -> HierarchyResolver {
        HierarchyResolver::new(Arc::new(drive.clone()), Arc::new(NoDelay::new(3)))
    }

    fn path(segments: &[&str]) -> NodePath {
        NodePath::new(segments.iter().copied())
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let resolver = resolver(&drive);
        let p = path(&["2024年", "03月"]);

        let first = resolver.resolve(&p, &anchor).await.unwrap();
        let second = resolver.resolve(&p, &anchor).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(drive.create_folder_calls(), 2);
        assert_eq!(drive.list_calls(), 2);
        assert_eq!(
            resolver.stats(),
            ResolverStats {
                lookups: 2,
                creations: 2,
                cache_hits: 2
            }
        );

        // A fresh resolver, as in a second run, finds the folders instead of creating them.
        let rerun = HierarchyResolver::new(Arc::new(drive.clone()), Arc::new(NoDelay::new(3)));
        assert_eq!(rerun.resolve(&p, &anchor).await.unwrap(), first);
        assert_eq!(drive.create_folder_calls(), 2);
        assert_eq!(rerun.stats().creations, 0);
    }

    #[tokio::test]
    async fn test_resolve_empty_path_is_root() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let id = resolver(&drive)
            .resolve(&NodePath::new(Vec::<String>::new()), &anchor)
            .await
            .unwrap();
        assert_eq!(id, anchor);
        assert_eq!(drive.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_duplicate_folders_uses_first() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let first = drive.insert_folder(&anchor, "2024年");
        let _second = drive.insert_folder(&anchor, "2024年");

        let id = resolver(&drive)
            .resolve(&path(&["2024年"]), &anchor)
            .await
            .unwrap();
        assert_eq!(id, first);
        assert_eq!(drive.folders_named(&anchor, "2024年").len(), 2);
        assert_eq!(drive.create_folder_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_ignores_trashed_folders() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let old = drive.insert_folder(&anchor, "2024年");
        drive.trash(&old);

        let id = resolver(&drive)
            .resolve(&path(&["2024年"]), &anchor)
            .await
            .unwrap();
        assert_ne!(id, old);
        assert_eq!(drive.create_folder_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_retries_transient_listing() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        drive.fail_list("2024年", Fault::Transient, Some(2));

        let resolver = resolver(&drive);
        resolver
            .resolve(&path(&["2024年", "01月"]), &anchor)
            .await
            .unwrap();
        assert_eq!(resolver.stats().lookups, 4);
        assert_eq!(drive.folders_named(&anchor, "2024年").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_single_attempt_policy() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        drive.fail_list("2024年", Fault::Transient, Some(1));
        let resolver =
            HierarchyResolver::new(Arc::new(drive.clone()), Arc::new(NoDelay::new(1)));

        let err = resolver.resolve(&path(&["2024年"]), &anchor).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(drive.list_calls(), 1);
        assert_eq!(drive.create_folder_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_resolve_rolls_back_cache() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        drive.fail_create_folder("03月", Fault::Permanent, Some(1));
        let resolver = resolver(&drive);
        let p = path(&["2024年", "03月"]);

        let err = resolver.resolve(&p, &anchor).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(resolver.stats().lookups, 2);

        // The year entry was cleared, so the next call looks it up again and finds the folder
        // created by the failed call rather than creating another.
        let id = resolver.resolve(&p, &anchor).await.unwrap();
        assert_eq!(resolver.stats().lookups, 4);
        assert_eq!(resolver.stats().cache_hits, 0);
        assert_eq!(drive.folders_named(&anchor, "2024年").len(), 1);
        let year = &drive.folders_named(&anchor, "2024年")[0].id;
        assert_eq!(drive.folders_named(year, "03月")[0].id, id);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_do_not_duplicate() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let resolver = resolver(&drive);
        let p = path(&["2024年", "03月"]);

        let (a, b, c) = tokio::join!(
            resolver.resolve(&p, &anchor),
            resolver.resolve(&p, &anchor),
            resolver.resolve(&p, &anchor)
        );
        assert_eq!(a.as_ref().unwrap(), b.as_ref().unwrap());
        assert_eq!(b.unwrap(), c.unwrap());
        assert_eq!(drive.create_folder_calls(), 2);
        assert_eq!(drive.folders_named(&anchor, "2024年").len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_all_groups_by_year() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        let resolver = resolver(&drive);
        let paths = vec![
            path(&["2023年", "12月"]),
            path(&["2024年", "01月"]),
            path(&["2024年", "03月"]),
            path(&["2024年", "03月"]),
        ];

        let resolved = resolver.resolve_all(&paths, &anchor).await;
        assert_eq!(resolved.len(), 3);
        assert!(resolved.values().all(|r| r.is_ok()));
        // Two years and three months.
        assert_eq!(drive.create_folder_calls(), 5);
        assert_eq!(drive.children(&anchor).len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_all_isolates_failures() {
        let drive = TestDrive::new();
        let anchor = drive.anchor_id().to_string();
        drive.fail_create_folder("2023年", Fault::Permanent, None);
        let resolver = resolver(&drive);
        let bad = path(&["2023年", "12月"]);
        let good = path(&["2024年", "01月"]);

        let resolved = resolver
            .resolve_all(&[bad.clone(), good.clone()], &anchor)
            .await;
        assert!(resolved[&bad].is_err());
        assert!(resolved[&good].is_ok());
    }
}
