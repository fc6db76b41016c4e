use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Iterator, Seek};
use crate::components::{KeyValue, SsTable, SsTableId, TableCacheRef};
use crate::Result;

/// Iterator over one SSTable restricted to `[start, end)`.
///
/// The table is resolved through the shared table cache on the first seek
/// only, so constructing the iterator is free; a scan that never reaches
/// this table never loads it.
pub struct LazySstableIterator {
    id: SsTableId,
    cache: TableCacheRef,
    start: Option<Bytes>,
    end: Option<Bytes>,
    table: Option<Arc<SsTable>>,
    offset: usize,
    current: Option<KeyValue>,
}

impl LazySstableIterator {
    pub fn new(
        id: SsTableId,
        cache: TableCacheRef,
        start: Option<Bytes>,
        end: Option<Bytes>,
    ) -> Self {
        Self {
            id,
            cache,
            start,
            end,
            table: None,
            offset: 0,
            current: None,
        }
    }

    async fn ensure_table(&mut self) -> Result<Arc<SsTable>> {
        if self.table.is_none() {
            self.table = Some(self.cache.table(&self.id).await?);
        }
        Ok(self.table.as_ref().unwrap().clone())
    }

    fn position(&mut self, table: &SsTable, offset: usize) {
        self.offset = offset;
        self.current = if offset < table.num_entries() {
            let entry = table.entry(offset);
            match &self.end {
                Some(end) if entry.key.as_ref() >= end.as_ref() => None,
                _ => Some(entry),
            }
        } else {
            None
        };
    }
}

#[async_trait]
impl Iterator for LazySstableIterator {
    async fn next(&mut self) -> Result<()> {
        assert!(self.is_valid());
        let table = self.table.as_ref().unwrap().clone();
        self.position(&table, self.offset + 1);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        assert!(self.is_valid());
        &self.current.as_ref().unwrap().key
    }

    fn value(&self) -> &[u8] {
        assert!(self.is_valid());
        &self.current.as_ref().unwrap().value
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    async fn seek<'s>(&mut self, seek: Seek<'s>) -> Result<bool> {
        let table = self.ensure_table().await?;
        let found = match seek {
            Seek::First => {
                let offset = match &self.start {
                    Some(start) => table.lower_bound(start),
                    None => 0,
                };
                self.position(&table, offset);
                self.is_valid()
            }
            Seek::RandomForward(key) => {
                let from = match &self.start {
                    Some(start) if key < start.as_ref() => start.clone(),
                    _ => Bytes::copy_from_slice(key),
                };
                let offset = table.lower_bound(&from);
                self.position(&table, offset);
                self.is_valid() && self.key() == key
            }
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use cirruskv_common::coding::TableFormat;
    use test_log::test;
    use uuid::Uuid;

    use super::*;
    use crate::components::{SsTableBuilder, TableCache};
    use crate::object_store::MemObjectStore;

    async fn build_iterator_for_test(
        start: Option<Bytes>,
        end: Option<Bytes>,
    ) -> LazySstableIterator {
        let mut builder = SsTableBuilder::new(TableFormat::V1, 0, 0, Bytes::from("k0"));
        for (key, value) in [("k01", "v01"), ("k03", "v03"), ("k05", "v05")] {
            builder.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        let (table, _, _) = builder.build().unwrap();
        let cache = Arc::new(TableCache::new(
            "test".to_string(),
            TableFormat::V1,
            Arc::new(MemObjectStore::default()),
            64,
        ));
        let id = Uuid::new_v4();
        cache.add(id, Arc::new(table)).await;
        LazySstableIterator::new(id, cache, start, end)
    }

    #[test(tokio::test)]
    async fn test_forward_iterate() {
        let mut it = build_iterator_for_test(None, None).await;
        it.seek(Seek::First).await.unwrap();
        for (key, value) in [("k01", "v01"), ("k03", "v03"), ("k05", "v05")] {
            assert!(it.is_valid());
            assert_eq!(it.key(), key.as_bytes());
            assert_eq!(it.value(), value.as_bytes());
            it.next().await.unwrap();
        }
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_range_bounds() {
        let mut it =
            build_iterator_for_test(Some(Bytes::from("k02")), Some(Bytes::from("k05"))).await;
        it.seek(Seek::First).await.unwrap();
        assert_eq!(it.key(), b"k03");
        it.next().await.unwrap();
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_random_forward() {
        let mut it = build_iterator_for_test(None, None).await;
        assert!(it.seek(Seek::RandomForward(b"k03")).await.unwrap());
        assert!(!it.seek(Seek::RandomForward(b"k04")).await.unwrap());
        assert_eq!(it.key(), b"k05");
        it.seek(Seek::RandomForward(b"k06")).await.unwrap();
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_unknown_table_errors() {
        let cache = Arc::new(TableCache::new(
            "test".to_string(),
            TableFormat::V1,
            Arc::new(MemObjectStore::default()),
            64,
        ));
        let mut it = LazySstableIterator::new(Uuid::new_v4(), cache, None, None);
        assert!(it.seek(Seek::First).await.is_err());
    }
}
