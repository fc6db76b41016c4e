use std::sync::Arc;

use bytes::Bytes;
use cirruskv_common::coding::successor;
use tokio::sync::Mutex;

use super::cloud_engine::CloudEngineCore;
use crate::components::{KeyValue, Memtable};
use crate::iterator::{Iterator, MemtableIterator, MergeIterator, Seek};
use crate::{Error, Result};

pub(crate) struct IterInner {
    pub mi: MergeIterator,
    pub last_key: Option<Bytes>,
    pub initialized: bool,
}

impl IterInner {
    /// Seek on first use so that constructing an iterator performs no
    /// object-store I/O; optionally recompute positions so keys admitted to
    /// live memtables since the last move are observed.
    async fn ensure_ready(&mut self, refresh: bool) -> Result<()> {
        if !self.initialized {
            self.mi.seek(Seek::First).await?;
            self.initialized = true;
        } else if refresh {
            self.mi.refresh().await?;
        }
        Ok(())
    }
}

/// Shared state of one registered iterator. The engine's iterator set holds
/// it so rotation can splice in the replacement memtable.
pub(crate) struct IterState {
    pub range_start: Option<Bytes>,
    pub range_end: Option<Bytes>,
    pub inner: Mutex<IterInner>,
}

impl IterState {
    pub fn new(range_start: Option<Bytes>, range_end: Option<Bytes>, mi: MergeIterator) -> Self {
        Self {
            range_start,
            range_end,
            inner: Mutex::new(IterInner {
                mi,
                last_key: None,
                initialized: false,
            }),
        }
    }

    /// Prepend an iterator over the replacement memtable, resuming strictly
    /// after the last delivered key so nothing is re-delivered and nothing
    /// committed to the new memtable is missed.
    pub async fn splice_memtable(&self, memtable: &Arc<Memtable>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let start = match &inner.last_key {
            Some(key) => Some(Bytes::from(successor(key))),
            None => self.range_start.clone(),
        };
        let iter = MemtableIterator::new(memtable.clone(), start, self.range_end.clone());
        inner.mi.prepend(Box::new(iter)).await
    }
}

/// User-visible cursor over the engine's merged view of one key range.
///
/// The handle stays registered with the engine until `close` is called;
/// rotation keeps registered handles consistent, so a handle that is simply
/// dropped leaks its registry slot until the engine is dropped.
pub struct EngineIterator {
    engine: Arc<CloudEngineCore>,
    id: u64,
    state: Arc<IterState>,
}

impl EngineIterator {
    pub(crate) fn new(engine: Arc<CloudEngineCore>, id: u64, state: Arc<IterState>) -> Self {
        Self { engine, id, state }
    }

    pub async fn is_valid(&self) -> Result<bool> {
        let mut inner = self.state.inner.lock().await;
        inner.ensure_ready(true).await?;
        Ok(inner.mi.is_valid())
    }

    /// The entry at the cursor. The delivered key becomes the iterator's
    /// resume point across rotations.
    pub async fn current(&self) -> Result<KeyValue> {
        let mut inner = self.state.inner.lock().await;
        inner.ensure_ready(false).await?;
        if !inner.mi.is_valid() {
            return Err(Error::InvalidArgument("iterator is not valid".to_string()));
        }
        let kv = KeyValue {
            key: Bytes::copy_from_slice(inner.mi.key()),
            value: Bytes::copy_from_slice(inner.mi.value()),
        };
        inner.last_key = Some(kv.key.clone());
        Ok(kv)
    }

    /// Advance strictly past the last delivered key (or past the current
    /// cursor position if nothing has been delivered yet). A no-op on an
    /// exhausted iterator.
    pub async fn next(&self) -> Result<()> {
        let mut inner = self.state.inner.lock().await;
        inner.ensure_ready(false).await?;
        if !inner.mi.is_valid() {
            return Ok(());
        }
        let key = inner.mi.key().to_vec();
        let floor = match &inner.last_key {
            Some(last) if last.as_ref() >= key.as_slice() => successor(last),
            _ => successor(&key),
        };
        inner.mi.advance_to(floor).await
    }

    /// Deregister from the engine. The iterator no longer pins rotated
    /// memtables afterwards.
    pub async fn close(self) {
        self.engine.remove_iterator(self.id).await;
    }
}
