use async_trait::async_trait;

use super::{BoxedIterator, Iterator, Seek};
use crate::Result;

/// Concatenation of disjoint ordered sources.
pub struct ChainIterator {
    /// Iterators to chain. Must be in ASC order and must not overlap.
    iters: Vec<BoxedIterator>,
    /// Current iterator index.
    ///
    /// Note: If [`ChainIterator`] is valid, the current iterator must be
    /// valid, too.
    offset: usize,
}

impl ChainIterator {
    pub fn new(iters: Vec<BoxedIterator>) -> Self {
        Self {
            iters,
            offset: usize::MAX,
        }
    }

    /// Invalidate the current state after reaching the end.
    fn invalid(&mut self) {
        self.offset = self.iters.len()
    }

    /// Position on `offset`, skipping forward over empty members.
    async fn settle_forward(&mut self, offset: usize) -> Result<()> {
        self.offset = offset;
        while self.offset < self.iters.len() {
            if self.iters[self.offset].is_valid() {
                return Ok(());
            }
            self.offset += 1;
            if self.offset < self.iters.len() {
                self.iters[self.offset].seek(Seek::First).await?;
            }
        }
        self.invalid();
        Ok(())
    }

    /// Move to the next entry.
    ///
    /// Note: Ensure that the current state is valid.
    async fn next_inner(&mut self) -> Result<()> {
        self.iters[self.offset].next().await?;
        if !self.iters[self.offset].is_valid() {
            let next = self.offset + 1;
            if next < self.iters.len() {
                self.iters[next].seek(Seek::First).await?;
            }
            self.settle_forward(next).await?;
        }
        Ok(())
    }

    /// Binary search for the first member holding a key `>= key`. Members
    /// are disjoint and ASC, so "member still has an entry at or after the
    /// key" is monotone over the member index.
    async fn binary_seek(&mut self, key: &[u8]) -> Result<()> {
        let mut left = 0;
        let mut right = self.iters.len();
        while left < right {
            let mid = left + (right - left) / 2;
            self.iters[mid].seek(Seek::RandomForward(key)).await?;
            if self.iters[mid].is_valid() {
                right = mid;
            } else {
                left = mid + 1;
            }
        }
        if left >= self.iters.len() {
            self.invalid();
            return Ok(());
        }
        self.iters[left].seek(Seek::RandomForward(key)).await?;
        self.settle_forward(left).await
    }
}

#[async_trait]
impl Iterator for ChainIterator {
    async fn next(&mut self) -> Result<()> {
        assert!(self.is_valid());
        self.next_inner().await
    }

    fn key(&self) -> &[u8] {
        assert!(self.is_valid());
        self.iters[self.offset].key()
    }

    fn value(&self) -> &[u8] {
        assert!(self.is_valid());
        self.iters[self.offset].value()
    }

    fn is_valid(&self) -> bool {
        self.offset < self.iters.len()
    }

    async fn seek<'s>(&mut self, seek: Seek<'s>) -> Result<bool> {
        if self.iters.is_empty() {
            self.invalid();
            return Ok(false);
        }
        let found = match seek {
            Seek::First => {
                self.iters[0].seek(Seek::First).await?;
                self.settle_forward(0).await?;
                self.is_valid()
            }
            Seek::RandomForward(key) => {
                self.binary_seek(key).await?;
                self.is_valid() && self.key() == key
            }
        };
        Ok(found)
    }
}
