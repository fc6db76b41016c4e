use std::cmp::Reverse;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use cirruskv_common::coding::successor;

use super::{BoxedIterator, Iterator, Seek};
use crate::Result;

struct HeapNode {
    /// Smaller is newer. Sources prepended after construction get priorities
    /// below every existing one.
    priority: i64,
    iter: BoxedIterator,
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.iter
            .key()
            .cmp(other.iter.key())
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

/// Priority-ordered multi-way merge with per-key newest-wins.
///
/// Sources are ordered newest to oldest; when several sources hold the same
/// key, the newest one is delivered and the rest are skipped. Positions are
/// recomputed from an inclusive resume bound on every move: sources over
/// live memtables may admit entries ahead of the cursor at any time, and a
/// source that ran dry earlier is re-polled rather than discarded, so such
/// entries are never skipped. [`MergeIterator::prepend`] splices in a new
/// top-priority source mid-iteration.
pub struct MergeIterator {
    /// Valid sources, min-ordered by (key, priority).
    ///
    /// `heap` holds every currently valid source whenever the iterator is
    /// valid.
    heap: BinaryHeap<Reverse<HeapNode>>,
    /// Sources with no entry at or after the resume bound right now.
    idle: Vec<HeapNode>,
    /// Inclusive lower bound of the current position. `None` means the start
    /// of every source's own range.
    resume: Option<Vec<u8>>,
    initialized: bool,
    front_priority: i64,
}

impl MergeIterator {
    pub fn new(iters: Vec<BoxedIterator>) -> Self {
        let idle = iters
            .into_iter()
            .enumerate()
            .map(|(i, iter)| HeapNode {
                priority: i as i64,
                iter,
            })
            .collect();
        Self {
            heap: BinaryHeap::new(),
            idle,
            resume: None,
            initialized: false,
            front_priority: -1,
        }
    }

    /// Splice in `iter` as the new highest-priority source. Before the first
    /// seek the source is just queued; afterwards it is positioned at the
    /// current resume bound immediately.
    pub async fn prepend(&mut self, iter: BoxedIterator) -> Result<()> {
        let priority = self.front_priority;
        self.front_priority -= 1;
        let mut node = HeapNode { priority, iter };
        if !self.initialized {
            self.idle.push(node);
            return Ok(());
        }
        Self::seek_node(&mut node, &self.resume).await?;
        if node.iter.is_valid() {
            self.heap.push(Reverse(node));
        } else {
            self.idle.push(node);
        }
        Ok(())
    }

    /// Recompute every source position from the resume bound. Entries
    /// admitted to live sources since the last move become visible.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.initialized {
            self.materialize().await?;
        }
        Ok(())
    }

    /// Raise the resume bound to `resume` (inclusive) and reposition. Used
    /// by the engine to continue strictly after the last key it handed out.
    pub async fn advance_to(&mut self, resume: Vec<u8>) -> Result<()> {
        if self.resume.as_ref().map_or(true, |cur| &resume > cur) {
            self.resume = Some(resume);
        }
        self.initialized = true;
        self.materialize().await
    }

    async fn materialize(&mut self) -> Result<()> {
        let mut nodes = std::mem::take(&mut self.idle);
        nodes.extend(self.heap.drain().map(|r| r.0));
        for mut node in nodes {
            Self::seek_node(&mut node, &self.resume).await?;
            if node.iter.is_valid() {
                self.heap.push(Reverse(node));
            } else {
                self.idle.push(node);
            }
        }
        Ok(())
    }

    async fn seek_node(node: &mut HeapNode, resume: &Option<Vec<u8>>) -> Result<()> {
        match resume {
            None => node.iter.seek(Seek::First).await?,
            Some(key) => node.iter.seek(Seek::RandomForward(key)).await?,
        };
        Ok(())
    }
}

#[async_trait]
impl Iterator for MergeIterator {
    async fn next(&mut self) -> Result<()> {
        assert!(self.is_valid());
        let resume = successor(self.key());
        self.resume = Some(resume);
        self.materialize().await
    }

    fn key(&self) -> &[u8] {
        assert!(self.is_valid());
        self.heap.peek().unwrap().0.iter.key()
    }

    fn value(&self) -> &[u8] {
        assert!(self.is_valid());
        self.heap.peek().unwrap().0.iter.value()
    }

    fn is_valid(&self) -> bool {
        !self.heap.is_empty()
    }

    async fn seek<'s>(&mut self, seek: Seek<'s>) -> Result<bool> {
        self.initialized = true;
        let found = match seek {
            Seek::First => {
                self.resume = None;
                self.materialize().await?;
                self.is_valid()
            }
            Seek::RandomForward(key) => {
                self.resume = Some(key.to_vec());
                self.materialize().await?;
                self.is_valid() && self.key() == key
            }
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use test_log::test;

    use super::*;
    use crate::components::{Batch, KeyValue, Memtable};
    use crate::iterator::MemtableIterator;

    fn build_memtable_for_test(kvs: &[(&str, &str)]) -> Arc<Memtable> {
        let memtable = Arc::new(Memtable::new(1 << 20));
        let mut batch = Batch::new();
        for (key, value) in kvs {
            batch.add_entry(KeyValue {
                key: Bytes::copy_from_slice(key.as_bytes()),
                value: Bytes::copy_from_slice(value.as_bytes()),
            });
        }
        memtable.write(&batch, None);
        memtable
    }

    fn iter_over(memtable: &Arc<Memtable>) -> BoxedIterator {
        Box::new(MemtableIterator::new(memtable.clone(), None, None))
    }

    fn build_iterator_for_test() -> MergeIterator {
        MergeIterator::new(vec![
            iter_over(&build_memtable_for_test(&[("k01", "a"), ("k05", "a"), ("k09", "a")])),
            iter_over(&build_memtable_for_test(&[("k02", "b"), ("k06", "b"), ("k10", "b")])),
            iter_over(&build_memtable_for_test(&[("k03", "c"), ("k07", "c"), ("k11", "c")])),
        ])
    }

    #[test(tokio::test)]
    async fn test_forward_iterate() {
        let mut it = build_iterator_for_test();
        it.seek(Seek::First).await.unwrap();
        for i in (1..=3).chain(5..=7).chain(9..=11) {
            assert!(it.is_valid());
            assert_eq!(it.key(), format!("k{:02}", i).as_bytes());
            it.next().await.unwrap();
        }
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_seek_random_forward() {
        let mut it = build_iterator_for_test();
        assert!(it.seek(Seek::RandomForward(b"k06")).await.unwrap());
        assert_eq!(it.key(), b"k06");
        assert!(!it.seek(Seek::RandomForward(b"k04")).await.unwrap());
        assert_eq!(it.key(), b"k05");
    }

    #[test(tokio::test)]
    async fn test_newest_wins_and_skips_duplicates() {
        let mut it = MergeIterator::new(vec![
            iter_over(&build_memtable_for_test(&[("k1", "new")])),
            iter_over(&build_memtable_for_test(&[("k1", "old"), ("k2", "old")])),
        ]);
        it.seek(Seek::First).await.unwrap();
        assert_eq!(it.key(), b"k1");
        assert_eq!(it.value(), b"new");
        it.next().await.unwrap();
        // The older source's "k1" is skipped, not re-delivered.
        assert_eq!(it.key(), b"k2");
        it.next().await.unwrap();
        assert!(!it.is_valid());
    }

    #[test(tokio::test)]
    async fn test_prepend_before_init() {
        let mut it = MergeIterator::new(vec![iter_over(&build_memtable_for_test(&[("k2", "old")]))]);
        it.prepend(iter_over(&build_memtable_for_test(&[("k1", "new"), ("k2", "new")])))
            .await
            .unwrap();
        it.seek(Seek::First).await.unwrap();
        assert_eq!(it.key(), b"k1");
        it.next().await.unwrap();
        assert_eq!(it.value(), b"new");
    }

    #[test(tokio::test)]
    async fn test_prepend_mid_iteration() {
        let mut it = MergeIterator::new(vec![iter_over(&build_memtable_for_test(&[
            ("a", "1"),
            ("b", "1"),
            ("c", "1"),
        ]))]);
        it.seek(Seek::First).await.unwrap();
        assert_eq!(it.key(), b"a");
        it.next().await.unwrap();

        it.prepend(iter_over(&build_memtable_for_test(&[("a2", "2"), ("b", "2")])))
            .await
            .unwrap();
        // The spliced source outranks the old one from the current position
        // onwards.
        assert_eq!(it.key(), b"a2");
        it.next().await.unwrap();
        assert_eq!(it.key(), b"b");
        assert_eq!(it.value(), b"2");
        it.next().await.unwrap();
        assert_eq!(it.key(), b"c");
    }

    #[test(tokio::test)]
    async fn test_refresh_revives_dry_source() {
        let memtable = build_memtable_for_test(&[("a", "1")]);
        let mut it = MergeIterator::new(vec![iter_over(&memtable)]);
        it.seek(Seek::First).await.unwrap();
        it.next().await.unwrap();
        assert!(!it.is_valid());

        let mut batch = Batch::new();
        batch.add_entry(KeyValue {
            key: Bytes::from("b"),
            value: Bytes::from("2"),
        });
        memtable.write(&batch, None);

        it.refresh().await.unwrap();
        assert!(it.is_valid());
        assert_eq!(it.key(), b"b");
    }

    #[test(tokio::test)]
    async fn test_advance_to_is_monotone() {
        let mut it = build_iterator_for_test();
        it.seek(Seek::First).await.unwrap();
        it.advance_to(successor(b"k06")).await.unwrap();
        assert_eq!(it.key(), b"k07");
        // A lower bound never moves the cursor backwards.
        it.advance_to(successor(b"k01")).await.unwrap();
        assert_eq!(it.key(), b"k07");
    }
}
