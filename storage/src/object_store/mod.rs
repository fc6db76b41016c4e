mod mem;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub use mem::*;

use crate::Result;

#[derive(thiserror::Error, Debug)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("other: {0}")]
    Other(String),
}

/// Durable blob storage. Objects are immutable once put; the engine never
/// rewrites a stored SSTable.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, obj: Bytes) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Bytes>;

    async fn remove(&self, path: &str) -> Result<()>;
}

pub type ObjectStoreRef = Arc<dyn ObjectStore>;
