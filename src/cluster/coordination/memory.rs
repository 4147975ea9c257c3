//! In-process coordination tree.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use super::{CoordinationStore, Versioned, parent_path, validate_path};
use crate::error::{Error, Result};

/// Coordination tree held in memory.
///
/// The root `/` always exists and carries no data. Every successful mutation
/// bumps a change counter observed through [`CoordinationStore::wait_for_change`].
pub struct MemoryCoordinationStore {
    records: Mutex<BTreeMap<String, Versioned>>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            records: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Versioned>>> {
        self.records
            .lock()
            .map_err(|_| Error::Fatal("coordination tree lock poisoned".to_string()))
    }

    fn bump(&self) {
        self.changes.send_modify(|counter| *counter += 1);
    }

    fn exists_locked(records: &BTreeMap<String, Versioned>, path: &str) -> bool {
        path == "/" || records.contains_key(path)
    }

    fn has_children(records: &BTreeMap<String, Versioned>, path: &str) -> bool {
        let prefix = format!("{}/", path);
        records
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        validate_path(path)?;
        {
            let mut records = self.records()?;
            if Self::exists_locked(&records, path) {
                return Err(Error::NodeExists(path.to_string()));
            }
            let parent = parent_path(path).unwrap_or("/");
            if !Self::exists_locked(&records, parent) {
                return Err(Error::NoNode(parent.to_string()));
            }
            records.insert(path.to_string(), Versioned { data, version: 0 });
        }
        self.bump();
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Versioned> {
        validate_path(path)?;
        let records = self.records()?;
        if path == "/" {
            return Ok(Versioned {
                data: Vec::new(),
                version: 0,
            });
        }
        records
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn set(&self, path: &str, data: Vec<u8>, expected_version: Option<u64>) -> Result<u64> {
        validate_path(path)?;
        let version = {
            let mut records = self.records()?;
            let record = records
                .get_mut(path)
                .ok_or_else(|| Error::NoNode(path.to_string()))?;
            if let Some(expected) = expected_version
                && record.version != expected
            {
                return Err(Error::BadVersion {
                    path: path.to_string(),
                    expected,
                });
            }
            record.data = data;
            record.version += 1;
            record.version
        };
        self.bump();
        Ok(version)
    }

    async fn delete(&self, path: &str, expected_version: Option<u64>) -> Result<()> {
        validate_path(path)?;
        {
            let mut records = self.records()?;
            let record = records
                .get(path)
                .ok_or_else(|| Error::NoNode(path.to_string()))?;
            if let Some(expected) = expected_version
                && record.version != expected
            {
                return Err(Error::BadVersion {
                    path: path.to_string(),
                    expected,
                });
            }
            if Self::has_children(&records, path) {
                return Err(Error::Invalid(format!("{} still has children", path)));
            }
            records.remove(path);
        }
        self.bump();
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path)?;
        let records = self.records()?;
        if !Self::exists_locked(&records, path) {
            return Err(Error::NoNode(path.to_string()));
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        Ok(records
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        let records = self.records()?;
        Ok(Self::exists_locked(&records, path))
    }

    async fn wait_for_change(&self, since: u64, timeout: Duration) -> Result<u64> {
        let mut rx = self.changes.subscribe();
        // Timing out is not an error; the caller just sees an unchanged counter.
        let _ = tokio::time::timeout(timeout, rx.wait_for(|counter| *counter > since)).await;
        let current = *rx.borrow();
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryCoordinationStore::new();
        assert!(matches!(
            store.create("/a/b", vec![]).await,
            Err(Error::NoNode(_))
        ));
        store.create("/a", vec![]).await.unwrap();
        store.create("/a/b", b"x".to_vec()).await.unwrap();
        assert!(matches!(
            store.create("/a/b", vec![]).await,
            Err(Error::NodeExists(_))
        ));
        assert_eq!(store.get("/a/b").await.unwrap().data, b"x");
    }

    #[tokio::test]
    async fn test_set_checks_version() {
        let store = MemoryCoordinationStore::new();
        store.create("/n", b"v0".to_vec()).await.unwrap();
        assert_eq!(store.set("/n", b"v1".to_vec(), Some(0)).await.unwrap(), 1);
        let err = store.set("/n", b"v2".to_vec(), Some(0)).await.unwrap_err();
        assert!(matches!(err, Error::BadVersion { expected: 0, .. }));
        assert_eq!(store.set("/n", b"v2".to_vec(), None).await.unwrap(), 2);
        assert!(matches!(
            store.set("/missing", vec![], None).await,
            Err(Error::NoNode(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty() {
        let store = MemoryCoordinationStore::new();
        store.create("/t", vec![]).await.unwrap();
        store.create("/t/c", vec![]).await.unwrap();
        assert!(store.delete("/t", None).await.is_err());
        store.delete("/t/c", None).await.unwrap();
        store.delete("/t", None).await.unwrap();
        assert!(!store.exists("/t").await.unwrap());
    }

    #[tokio::test]
    async fn test_children_are_direct_and_sorted() {
        let store = MemoryCoordinationStore::new();
        store.create("/r", vec![]).await.unwrap();
        store.create("/r/b", vec![]).await.unwrap();
        store.create("/r/a", vec![]).await.unwrap();
        store.create("/r/a/deep", vec![]).await.unwrap();
        store.create("/rx", vec![]).await.unwrap();

        assert_eq!(store.children("/r").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.children("/").await.unwrap(), vec!["r", "rx"]);
        assert!(store.children("/none").await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_change_wakes_on_mutation() {
        let store = std::sync::Arc::new(MemoryCoordinationStore::new());
        let since = store.wait_for_change(0, Duration::ZERO).await.unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.create("/x", vec![]).await.unwrap();
        });

        let next = store
            .wait_for_change(since, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(next > since);
    }

    #[tokio::test]
    async fn test_wait_for_change_times_out_quietly() {
        let store = MemoryCoordinationStore::new();
        let counter = store
            .wait_for_change(0, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(counter, 0);
    }
}
