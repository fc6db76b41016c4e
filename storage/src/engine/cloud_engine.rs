use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cirruskv_common::coding::{append_u64_le, increment_bytes_be, read_u64_le};
use cirruskv_common::sync::SpinLock;
use cirruskv_common::time::monotonic_nanos;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::dedup::{dedup_key, SequenceMap};
use super::flush::{flush_run_loop, BufSizeEstimates, FlushEntry, FlushQueue};
use super::iterator::{EngineIterator, IterState};
use super::{CloudEngineOptions, WriteBatch};
use crate::components::{KeyValue, Memtable, TableCache, TableCacheRef, WriteResult};
use crate::controller::ControllerRef;
use crate::iterator::{BoxedIterator, ChainIterator, LazySstableIterator, MemtableIterator, MergeIterator};
use crate::object_store::ObjectStoreRef;
use crate::{Error, Result};

const ITERATOR_TABLE_ID_LIMIT: usize = 10_000;

/// The active memtable, the registered iterators, and the rotation stamp.
/// Guarded by the engine read-write lock: writers share it, rotation and
/// iterator-set changes take it exclusively.
struct MemtableState {
    memtable: Arc<Memtable>,
    iterators: HashMap<u64, Arc<IterState>>,
    next_iterator_id: u64,
    last_replace: Option<u64>,
}

#[derive(Default)]
struct Lifecycle {
    flush_handle: Option<JoinHandle<()>>,
    timer_handle: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

pub struct CloudEngineCore {
    pub(crate) options: CloudEngineOptions,
    pub(crate) controller: ControllerRef,
    pub(crate) table_cache: TableCacheRef,
    mt: RwLock<MemtableState>,
    /// A separate lock for the flush queue so that head removal by the
    /// registration loop does not block writer-side rotation.
    pub(crate) flush_queue: SpinLock<FlushQueue>,
    flush_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
    lifecycle: Mutex<Lifecycle>,
    started: AtomicBool,
    sequences: SequenceMap,
    pub(crate) estimates: BufSizeEstimates,
}

impl CloudEngineCore {
    fn ensure_started(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    pub(crate) fn flush_sender(&self) -> Option<mpsc::Sender<()>> {
        self.flush_tx.lock().clone()
    }

    pub(crate) async fn remove_iterator(&self, id: u64) {
        let mut mt = self.mt.write().await;
        mt.iterators.remove(&id);
    }

    /// Swap the active memtable for a fresh one and queue the frozen one for
    /// flushing. Idempotent on the memtable pointer: concurrent writers may
    /// both see a full memtable, only the first swap wins.
    async fn rotate(&self, old: &Arc<Memtable>) -> Result<()> {
        let tx = {
            let mut mt = self.mt.write().await;
            if !Arc::ptr_eq(&mt.memtable, old) {
                return Ok(());
            }
            debug!("adding memtable to flush queue and creating a new one");
            let fresh = Arc::new(Memtable::new(self.options.memtable_max_size.0 as usize));
            let frozen = std::mem::replace(&mut mt.memtable, fresh.clone());
            for state in mt.iterators.values() {
                state.splice_memtable(&fresh).await?;
            }
            {
                let mut queue = self.flush_queue.lock();
                queue.entries.push_back(Arc::new(FlushEntry::new(frozen)));
            }
            mt.last_replace = Some(monotonic_nanos());
            self.flush_sender()
        };
        // Signal after releasing the lock; a saturated channel blocks the
        // rotating writer here, not every reader of the memtable pointer.
        if let Some(tx) = tx {
            if tx.send(()).await.is_err() {
                debug!("flush loop stopped; rotation signal dropped");
            }
        }
        Ok(())
    }

    /// Rotate if the memtable has not been replaced within the configured
    /// interval, measured on the monotonic clock.
    async fn maybe_rotate(&self) -> Result<()> {
        let interval = self.options.memtable_max_replace_interval.as_nanos() as u64;
        let (memtable, due) = {
            let mt = self.mt.read().await;
            let due = match mt.last_replace {
                None => true,
                Some(last) => monotonic_nanos().saturating_sub(last) >= interval,
            };
            (mt.memtable.clone(), due)
        };
        if due {
            debug!("periodic replace of memtable occurring");
            self.rotate(&memtable).await?;
        }
        Ok(())
    }
}

async fn replace_timer_loop(core: Arc<CloudEngineCore>, mut stop_rx: watch::Receiver<bool>) {
    let period = core.options.memtable_max_replace_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = core.maybe_rotate().await {
                    warn!("failed to replace memtable: {}", e);
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}

/// Log-structured, cloud-backed key-value engine core.
///
/// Writes land in an arena-backed memtable; full memtables rotate into a
/// FIFO flush queue, upload to the object store in parallel and register
/// with the controller strictly in rotation order. Readers merge the active
/// memtable, the queued memtables and the registered SSTables into one
/// ordered view that stays consistent while memtables rotate underneath it.
#[derive(Clone)]
pub struct CloudEngine {
    core: Arc<CloudEngineCore>,
}

impl CloudEngine {
    pub fn new(
        object_store: ObjectStoreRef,
        controller: ControllerRef,
        options: CloudEngineOptions,
    ) -> Self {
        let table_cache = Arc::new(TableCache::new(
            options.sstable_path.clone(),
            options.table_format,
            object_store,
            options.table_cache_capacity,
        ));
        let memtable = Arc::new(Memtable::new(options.memtable_max_size.0 as usize));
        Self {
            core: Arc::new(CloudEngineCore {
                options,
                controller,
                table_cache,
                mt: RwLock::new(MemtableState {
                    memtable,
                    iterators: HashMap::new(),
                    next_iterator_id: 0,
                    last_replace: None,
                }),
                flush_queue: SpinLock::default(),
                flush_tx: parking_lot::Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                started: AtomicBool::new(false),
                sequences: SequenceMap::default(),
                estimates: BufSizeEstimates::default(),
            }),
        }
    }

    /// Launch the flush loop and arm the periodic-rotation timer.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.core.lifecycle.lock().await;
        if self.core.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let (flush_tx, flush_rx) =
            mpsc::channel(self.core.options.memtable_flush_queue_max_size.max(1));
        *self.core.flush_tx.lock() = Some(flush_tx);
        lifecycle.flush_handle = Some(tokio::spawn(flush_run_loop(self.core.clone(), flush_rx)));
        let (stop_tx, stop_rx) = watch::channel(false);
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.timer_handle = Some(tokio::spawn(replace_timer_loop(self.core.clone(), stop_rx)));
        self.core.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Disarm the timer, close the flush signal channel and wait for the
    /// registration loop to drain. In-flight uploads complete or fail on
    /// their own; their entries simply stay unregistered until recovery.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.core.lifecycle.lock().await;
        if !self.core.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stop_tx) = lifecycle.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = lifecycle.timer_handle.take() {
            let _ = handle.await;
        }
        *self.core.flush_tx.lock() = None;
        if let Some(handle) = lifecycle.flush_handle.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Admit a batch. Duplicates (per-processor sequence already accepted)
    /// report success without touching storage; a full memtable triggers
    /// rotation and the batch is retried against the fresh one, applied
    /// exactly once.
    pub async fn write(&self, write_batch: WriteBatch) -> Result<()> {
        self.core.ensure_started()?;
        let WriteBatch {
            processor_id,
            sequence_num,
            mut batch,
            mut completion,
        } = write_batch;
        if sequence_num != -1 && !self.core.sequences.advance(processor_id, sequence_num) {
            // Seen before, e.g. replayed on recovery after failure. The
            // completion still fires once per submission.
            if let Some(completion) = completion {
                completion(Ok(()));
            }
            return Ok(());
        }
        if !self.core.options.disable_batch_sequence_insertion {
            // Record the sequence as a row in the batch itself so recovery
            // can rebuild the dedup map from durable state.
            let mut value = Vec::with_capacity(8);
            append_u64_le(&mut value, sequence_num as u64);
            batch.add_entry(KeyValue {
                key: dedup_key(self.core.options.db_id, processor_id),
                value: value.into(),
            });
        }
        loop {
            let (memtable, result) = {
                let mt = self.core.mt.read().await;
                let memtable = mt.memtable.clone();
                let result = memtable.write(&batch, completion.take());
                (memtable, result)
            };
            match result {
                WriteResult::Applied => return Ok(()),
                WriteResult::Full {
                    completion: returned,
                } => {
                    completion = returned;
                    self.core.rotate(&memtable).await?;
                }
            }
        }
    }

    /// Open a cursor over `[range_start, range_end)`, merging the active
    /// memtable, the queued memtables (newest first) and every overlapping
    /// SSTable group reported by the controller (newest first). The handle
    /// is registered so rotation keeps it consistent; `close` it when done.
    pub async fn new_iterator(
        &self,
        range_start: Option<Bytes>,
        range_end: Option<Bytes>,
    ) -> Result<EngineIterator> {
        self.core.ensure_started()?;
        if let (Some(start), Some(end)) = (&range_start, &range_end) {
            if start > end {
                return Err(Error::InvalidArgument(
                    "range start is greater than range end".to_string(),
                ));
            }
        }
        let groups = self
            .core
            .controller
            .get_table_ids_for_range(
                range_start.as_deref(),
                range_end.as_deref(),
                ITERATOR_TABLE_ID_LIMIT,
            )
            .await?;

        let mut mt = self.core.mt.write().await;
        let mut iters: Vec<BoxedIterator> = Vec::with_capacity(groups.len() + 1);
        iters.push(Box::new(MemtableIterator::new(
            mt.memtable.clone(),
            range_start.clone(),
            range_end.clone(),
        )));
        {
            let queue = self.core.flush_queue.lock();
            for entry in queue.entries.iter().rev() {
                iters.push(Box::new(MemtableIterator::new(
                    entry.memtable.clone(),
                    range_start.clone(),
                    range_end.clone(),
                )));
            }
        }
        // It is possible that a queued memtable has been flushed already and
        // its SSTable shows up here as well; the merge keeps the newer
        // source and ignores the equal keys below it.
        for group in groups {
            match group.as_slice() {
                [] => {}
                [id] => iters.push(Box::new(LazySstableIterator::new(
                    *id,
                    self.core.table_cache.clone(),
                    range_start.clone(),
                    range_end.clone(),
                ))),
                ids => {
                    let members = ids
                        .iter()
                        .map(|id| {
                            Box::new(LazySstableIterator::new(
                                *id,
                                self.core.table_cache.clone(),
                                range_start.clone(),
                                range_end.clone(),
                            )) as BoxedIterator
                        })
                        .collect();
                    iters.push(Box::new(ChainIterator::new(members)));
                }
            }
        }

        let mi = MergeIterator::new(iters);
        let state = Arc::new(IterState::new(range_start, range_end, mi));
        let id = mt.next_iterator_id;
        mt.next_iterator_id += 1;
        mt.iterators.insert(id, state.clone());
        Ok(EngineIterator::new(self.core.clone(), id, state))
    }

    /// Recovery helper: scan the processor's dedup row and hydrate the
    /// sequence map from it. Returns the recovered sequence, if any.
    pub async fn load_last_batch_sequence(&self, processor_id: u64) -> Result<Option<i64>> {
        let range_start = dedup_key(self.core.options.db_id, processor_id);
        let range_end = Bytes::from(increment_bytes_be(&range_start));
        let iter = self.new_iterator(Some(range_start), Some(range_end)).await?;
        let result = if iter.is_valid().await? {
            let kv = iter.current().await?;
            let sequence = read_u64_le(&kv.value) as i64;
            self.core.sequences.store(processor_id, sequence);
            Some(sequence)
        } else {
            None
        };
        iter.close().await;
        Ok(result)
    }

    /// Rotate the current memtable unconditionally. This is the periodic
    /// timer's path; it is public for operational flushing and tests.
    pub async fn force_rotate(&self) -> Result<()> {
        self.core.ensure_started()?;
        let memtable = {
            let mt = self.core.mt.read().await;
            mt.memtable.clone()
        };
        self.core.rotate(&memtable).await
    }

    pub fn last_batch_sequence(&self, processor_id: u64) -> Option<i64> {
        self.core.sequences.get(processor_id)
    }

    pub fn flush_queue_len(&self) -> usize {
        self.core.flush_queue.lock().entries.len()
    }

    pub fn table_cache(&self) -> &TableCacheRef {
        &self.core.table_cache
    }
}
