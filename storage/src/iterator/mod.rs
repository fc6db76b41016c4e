mod chain_iterator;
mod memtable_iterator;
mod merge_iterator;
mod sstable_iterator;

use async_trait::async_trait;
pub use chain_iterator::*;
pub use memtable_iterator::*;
pub use merge_iterator::*;
pub use sstable_iterator::*;

use crate::Result;

pub enum Seek<'s> {
    /// Seek to the first valid position in order if exists.
    First,
    /// Seek forward for the first key that equals the given key or the first
    /// key bigger than it.
    RandomForward(&'s [u8]),
}

/// [`Iterator`] defines shared behaviours for all iterators.
///
/// NOTE:
///
/// [`Iterator`] must be initialized with `seek` before use. Seeking is
/// idempotent; callers over live sources may re-seek an exhausted iterator
/// to observe entries admitted after it ran dry.
#[async_trait]
pub trait Iterator: Send + Sync {
    /// Move a valid iterator to the next key.
    ///
    /// Note:
    ///
    /// - Before calling this function, make sure the iterator `is_valid`.
    /// - If the position after calling this is invalid, this function WON'T
    ///   return an `Err`. You should check `is_valid` before continuing the
    ///   iteration.
    ///
    /// # Panics
    ///
    /// This function will panic if the iterator is invalid.
    async fn next(&mut self) -> Result<()>;

    /// Retrieve the current key.
    ///
    /// # Panics
    ///
    /// This function will panic if the iterator is invalid.
    fn key(&self) -> &[u8];

    /// Retrieve the current value.
    ///
    /// # Panics
    ///
    /// This function will panic if the iterator is invalid.
    fn value(&self) -> &[u8];

    /// Indicate whether the iterator can be used.
    fn is_valid(&self) -> bool;

    /// Initialize or reset the iterator with the given seek mode.
    ///
    /// `seek` returns a bool which means an exact match of the given seek
    /// condition is found in this iterator. Do not decide whether the
    /// position is valid by the return value; check `is_valid` instead.
    async fn seek<'s>(&mut self, seek: Seek<'s>) -> Result<bool>;
}

pub type BoxedIterator = Box<dyn Iterator>;
