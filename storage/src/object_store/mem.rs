use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::ObjectStore;
use crate::{ObjectStoreError, Result};

/// In-memory object store used in tests and local development.
#[derive(Default)]
pub struct MemObjectStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemObjectStore {
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn put(&self, path: &str, obj: Bytes) -> Result<()> {
        let mut objects = self.objects.write();
        objects.insert(path.to_string(), obj);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read();
        let obj = objects
            .get(path)
            .cloned()
            .ok_or_else(|| ObjectStoreError::ObjectNotFound(path.to_string()))?;
        Ok(obj)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.write();
        objects
            .remove(path)
            .ok_or_else(|| ObjectStoreError::ObjectNotFound(path.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn test_put_get_remove() {
        let store = MemObjectStore::default();
        store.put("a/1.sst", Bytes::from_static(b"blob")).await.unwrap();
        assert_eq!(store.get("a/1.sst").await.unwrap(), Bytes::from_static(b"blob"));
        store.remove("a/1.sst").await.unwrap();
        assert!(store.get("a/1.sst").await.is_err());
    }
}
