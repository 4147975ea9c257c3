//! Thin typed wrapper over a SlateDB instance.
//!
//! Values are bincode encoded. Writes use `await_durable: false`; durability is
//! provided by SlateDB's periodic flush interval and an explicit [`KvStore::flush`]
//! on shutdown.

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slatedb::Db;
use slatedb::config::{PutOptions, Settings as SlateDbSettings, WriteOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::info;

use super::keys::prefix_end;
use crate::error::{Error, Result};

/// Write options for non-blocking writes.
const FAST_WRITE_OPTIONS: WriteOptions = WriteOptions {
    await_durable: false,
};

/// Default SlateDB flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

pub struct KvStore {
    db: Db,
    path: String,
}

impl KvStore {
    /// Open (or create) the database stored under `path` in `object_store`.
    pub async fn open(
        object_store: Arc<dyn ObjectStore>,
        path: &str,
        flush_interval: Duration,
    ) -> Result<Self> {
        info!(path = %path, "Opening SlateDB store");

        let settings = SlateDbSettings {
            flush_interval: Some(flush_interval),
            ..SlateDbSettings::default()
        };
        let path_for_task = path.to_string();

        let db = spawn_blocking(move || {
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async move {
                Db::builder(ObjectPath::from(path_for_task.as_str()), object_store)
                    .with_settings(settings)
                    .build()
                    .await
            })
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {}", e)))??;

        Ok(Self {
            db,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn get_raw(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.db.get(key).await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .put_with_options(key, value, &PutOptions::default(), &FAST_WRITE_OPTIONS)
            .await?;
        Ok(())
    }

    pub async fn put<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put_raw(key, &bytes).await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete_with_options(key, &FAST_WRITE_OPTIONS).await?;
        Ok(())
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let end = prefix_end(prefix);
        self.scan_range(prefix, &end).await
    }

    /// All entries in `[start, end)`, in key order.
    pub async fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let mut iter = self.db.scan(start..end).await?;
        let mut entries = Vec::new();
        while let Some(item) = iter.next().await? {
            entries.push((item.key, item.value));
        }
        Ok(entries)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush().await?;
        Ok(())
    }

    /// Flush pending writes and close the database.
    pub async fn close(&self) -> Result<()> {
        info!(path = %self.path, "Closing SlateDB store");
        self.db.flush().await?;
        self.db.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("path", &self.path).finish()
    }
}
