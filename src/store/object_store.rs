//! Object store creation and configuration.
//!
//! Stores are backed by SlateDB, which in turn writes to an object store:
//! the local filesystem for single-host deployments, S3 for shared storage,
//! or an in-memory store for tests and ephemeral nodes.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};

/// Object store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreType {
    /// Local filesystem rooted at `path`.
    Local { path: String },
    /// Amazon S3 (or a compatible endpoint).
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
    /// Process-local memory; contents vanish on restart.
    Memory,
}

impl ObjectStoreType {
    /// Build from `OBJECT_STORE_TYPE` and related variables.
    ///
    /// - `local` (default): `DATA_PATH`, falling back to `default_path`
    /// - `s3`: `S3_BUCKET`, `S3_REGION`, optional `S3_ENDPOINT`
    /// - `memory`
    pub fn from_env(default_path: &str) -> Self {
        let kind = std::env::var("OBJECT_STORE_TYPE").unwrap_or_else(|_| "local".to_string());
        match kind.to_lowercase().as_str() {
            "memory" => ObjectStoreType::Memory,
            "s3" => ObjectStoreType::S3 {
                bucket: std::env::var("S3_BUCKET").unwrap_or_default(),
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
            },
            _ => ObjectStoreType::Local {
                path: std::env::var("DATA_PATH").unwrap_or_else(|_| default_path.to_string()),
            },
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ObjectStoreType::Local { path } if path.is_empty() => {
                Err("local object store path must not be empty".to_string())
            }
            ObjectStoreType::S3 { bucket, .. } if bucket.is_empty() => {
                Err("S3_BUCKET must be set for the s3 object store".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Create an object store for the given backend.
pub fn create_object_store(kind: &ObjectStoreType) -> Result<Arc<dyn ObjectStore>> {
    match kind {
        ObjectStoreType::Local { path } => {
            std::fs::create_dir_all(path)
                .map_err(|e| Error::Config(format!("Failed to create data directory: {}", e)))?;

            let store = LocalFileSystem::new_with_prefix(path)?;
            info!(path = %path, "Using local filesystem object store");
            Ok(Arc::new(store))
        }
        ObjectStoreType::S3 {
            bucket,
            region,
            endpoint,
        } => {
            use object_store::aws::AmazonS3Builder;

            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region);

            if let Some(ep) = endpoint {
                builder = builder.with_endpoint(ep).with_allow_http(true);
            }

            let store = builder.build()?;
            info!(bucket = %bucket, region = %region, "Using S3 object store");
            Ok(Arc::new(store))
        }
        ObjectStoreType::Memory => {
            info!("Using in-memory object store");
            Ok(Arc::new(InMemory::new()))
        }
    }
}
