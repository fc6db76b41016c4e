use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Iterator, Seek};
use crate::components::{KeyValue, Memtable};
use crate::Result;

/// Iterator over a memtable restricted to `[start, end)`.
///
/// The view is live: positions are resolved by key against the memtable on
/// every move, so entries admitted ahead of the cursor after construction
/// are observed. The `Arc` keeps a frozen memtable alive for as long as any
/// reader still needs it.
pub struct MemtableIterator {
    memtable: Arc<Memtable>,
    start: Option<Bytes>,
    end: Option<Bytes>,
    current: Option<KeyValue>,
}

impl MemtableIterator {
    pub fn new(memtable: Arc<Memtable>, start: Option<Bytes>, end: Option<Bytes>) -> Self {
        Self {
            memtable,
            start,
            end,
            current: None,
        }
    }

    fn clamp(&self, key: &[u8]) -> Bytes {
        match &self.start {
            Some(start) if key < start.as_ref() => start.clone(),
            _ => Bytes::copy_from_slice(key),
        }
    }
}

#[async_trait]
impl Iterator for MemtableIterator {
    async fn next(&mut self) -> Result<()> {
        assert!(self.is_valid());
        let key = self.current.take().unwrap().key;
        self.current = self.memtable.first_after(&key, self.end.as_deref());
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
        let found = match seek {
            Seek::First => {
                self.current = self
                    .memtable
                    .first_at_or_after(self.start.as_deref(), self.end.as_deref());
                self.is_valid()
            }
            Seek::RandomForward(key) => {
                let from = self.clamp(key);
                self.current = self
                    .memtable
                    .first_at_or_after(Some(&from), self.end.as_deref());
                self.is_valid() && self.key() == key
            }
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::components::Batch;

    fn build_memtable_for_test() -> Arc<Memtable> {
        let memtable = Arc::new(Memtable::new(1 << 20));
        let mut batch = Batch::new();
        for (key, value) in [("k01", "v01"), ("k03", "v03"), ("k05", "v05")] {
            batch.add_entry(KeyValue {
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::copy_from_slice(value.as_bytes()),
            });
        }
        memtable.write(&batch, None);
        memtable
    }

    #[test(tokio::test)]
    async fn test_forward_iterate() {
        let memtable = build_memtable_for_test();
        let mut it = MemtableIterator::new(memtable, None, None);
        it.seek(Seek::First).await.unwrap();
        for key in ["k01", "k03", "k05"] {
            assert!(it.is_valid());
            assert_eq!(it.key(), key.as_bytes());
            it.next().await.unwrap();
        }
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_range_bounds() {
        let memtable = build_memtable_for_test();
        let mut it =
            MemtableIterator::new(memtable, Some(Bytes::from("k02")), Some(Bytes::from("k05")));
        it.seek(Seek::First).await.unwrap();
        assert_eq!(it.key(), b"k03");
        it.next().await.unwrap();
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_random_forward() {
        let memtable = build_memtable_for_test();
        let mut it = MemtableIterator::new(memtable, None, None);
        assert!(!it.seek(Seek::RandomForward(b"k02")).await.unwrap());
        assert_eq!(it.key(), b"k03");
        assert!(it.seek(Seek::RandomForward(b"k03")).await.unwrap());
        it.seek(Seek::RandomForward(b"k06")).await.unwrap();
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_reseek_observes_new_entries() {
        let memtable = build_memtable_for_test();
        let mut it = MemtableIterator::new(memtable.clone(), None, None);
        it.seek(Seek::RandomForward(b"k06")).await.unwrap();
        assert!(!it.is_valid());

        let mut batch = Batch::new();
        batch.add_entry(KeyValue {
            key: Bytes::from("k07"),
            value: Bytes::from("v07"),
        });
        memtable.write(&batch, None);

        it.seek(Seek::RandomForward(b"k06")).await.unwrap();
        assert!(it.is_valid());
        assert_eq!(it.key(), b"k07");
    }
}
