use std::sync::Arc;

use cirruskv_common::coding::TableFormat;
use moka::future::Cache;

use super::{SsTable, SsTableId};
use crate::object_store::ObjectStoreRef;
use crate::{Error, Result};

/// Shared cache of decoded SSTables keyed by id, backed by the object store.
pub struct TableCache {
    path: String,
    format: TableFormat,
    store: ObjectStoreRef,
    cache: Cache<SsTableId, Arc<SsTable>>,
}

pub type TableCacheRef = Arc<TableCache>;

impl TableCache {
    pub fn new(path: String, format: TableFormat, store: ObjectStoreRef, capacity: u64) -> Self {
        Self {
            path,
            format,
            store,
            cache: Cache::new(capacity),
        }
    }

    /// Insert a freshly built table without touching the object store.
    pub async fn add(&self, id: SsTableId, table: Arc<SsTable>) {
        self.cache.insert(id, table).await;
    }

    /// Upload the serialized table and make it servable from the cache.
    pub async fn put(&self, id: SsTableId, table: Arc<SsTable>) -> Result<()> {
        self.add(id, table.clone()).await;
        self.store.put(&self.sst_path(&id), table.serialize()).await
    }

    /// Resolve a table by id, loading and decoding it from the object store
    /// on a cache miss. A stored table whose format differs from the
    /// configured one is refused rather than misread.
    pub async fn table(&self, id: &SsTableId) -> Result<Arc<SsTable>> {
        if let Some(table) = self.cache.get(id).await {
            return Ok(table);
        }
        let buf = self.store.get(&self.sst_path(id)).await?;
        let table = Arc::new(SsTable::decode(buf)?);
        if table.format() != self.format {
            return Err(Error::DecodeError(format!(
                "table {} has unexpected format {:?}",
                id,
                table.format()
            )));
        }
        self.cache.insert(*id, table.clone()).await;
        Ok(table)
    }

    fn sst_path(&self, id: &SsTableId) -> String {
        format!("{}/{}.sst", self.path, id)
    }
}
