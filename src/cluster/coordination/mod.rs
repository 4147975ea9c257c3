//! Hierarchical coordination store.
//!
//! Cluster topology lives in a small tree of versioned records addressed by
//! slash-separated paths (`/clusterq/nodes/node_1`). The tree offers the
//! primitives the cluster layer needs and nothing more:
//!
//! - create / get / delete / children / exists
//! - `set` with an optional expected version (optimistic concurrency)
//! - a global change counter with long-poll `wait_for_change`, from which
//!   watchers derive added/removed/changed events
//!
//! # Available Implementations
//!
//! - [`MemoryCoordinationStore`]: in-process tree, also served over TCP by
//!   the `coordinator` role
//! - [`RemoteCoordinationStore`]: TCP client for a remote coordinator

mod memory;
mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

pub use memory::MemoryCoordinationStore;
pub use remote::{CoordinationService, RemoteCoordinationStore};

/// Record data plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub data: Vec<u8>,
    /// Starts at 0 on create and grows by one per `set`.
    pub version: u64,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a record. The parent must exist.
    ///
    /// Fails with `NodeExists` if the path exists, `NoNode` if the parent does not.
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Versioned>;

    /// Replace the data of a record, returning its new version.
    ///
    /// With `expected_version`, fails with `BadVersion` when the record changed.
    async fn set(&self, path: &str, data: Vec<u8>, expected_version: Option<u64>) -> Result<u64>;

    /// Delete a record without children.
    async fn delete(&self, path: &str, expected_version: Option<u64>) -> Result<()>;

    /// Names (not paths) of the direct children, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Block until the change counter exceeds `since` or `timeout` elapses.
    ///
    /// Returns the current counter either way.
    async fn wait_for_change(&self, since: u64, timeout: Duration) -> Result<u64>;
}

/// Check that `path` is absolute, has no empty segments and no trailing slash.
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(Error::Invalid(format!("invalid coordination path '{}'", path)));
    }
    Ok(())
}

/// Parent of a non-root path.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Create `path` and any missing ancestors with empty data.
pub async fn ensure_path(store: &dyn CoordinationStore, path: &str) -> Result<()> {
    validate_path(path)?;
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match store.create(&current, Vec::new()).await {
            Ok(()) | Err(Error::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[tokio::test]
    async fn test_ensure_path_is_idempotent() {
        let store = MemoryCoordinationStore::new();
        ensure_path(&store, "/a/b/c").await.unwrap();
        ensure_path(&store, "/a/b/c").await.unwrap();
        assert!(store.exists("/a/b").await.unwrap());
        assert_eq!(store.children("/a").await.unwrap(), vec!["b"]);
    }
}
