use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use cirruskv_common::atomic::may_advance_u32;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use super::cloud_engine::CloudEngineCore;
use crate::components::{build_sstable, Memtable, SsTableId};
use crate::controller::{RegistrationBatch, RegistrationEntry};
use crate::iterator::MemtableIterator;
use crate::Result;

/// Descriptor of an uploaded SSTable, published on the flush-queue entry
/// once the upload completes.
#[derive(Clone, Debug)]
pub(crate) struct SsTableInfo {
    pub id: SsTableId,
    pub smallest_key: Bytes,
    pub largest_key: Bytes,
}

/// One frozen memtable awaiting upload and registration.
pub(crate) struct FlushEntry {
    pub memtable: Arc<Memtable>,
    info: OnceLock<SsTableInfo>,
}

impl FlushEntry {
    pub fn new(memtable: Arc<Memtable>) -> Self {
        Self {
            memtable,
            info: OnceLock::new(),
        }
    }

    pub fn set_sstable_info(&self, info: SsTableInfo) {
        debug!(id = ?info.id, "setting sstable info on flush entry");
        if self.info.set(info).is_err() {
            debug_assert!(false, "sstable info set twice");
        }
    }

    pub fn sstable_info(&self) -> Option<&SsTableInfo> {
        self.info.get()
    }
}

/// Flush-queue state guarded by the engine's spin lock. `next_upload` indexes
/// the first entry whose upload has not been scheduled yet.
#[derive(Default)]
pub(crate) struct FlushQueue {
    pub entries: VecDeque<Arc<FlushEntry>>,
    pub next_upload: usize,
}

/// Max-watermark estimates of the SSTable build buffer sizes, scaled by 5%
/// headroom. Updates race freely; these only pre-size buffers.
#[derive(Default)]
pub(crate) struct BufSizeEstimates {
    buf_size: AtomicU32,
    entries: AtomicU32,
}

impl BufSizeEstimates {
    pub fn hints(&self) -> (usize, usize) {
        (
            self.buf_size.load(Ordering::Relaxed) as usize,
            self.entries.load(Ordering::Relaxed) as usize,
        )
    }

    pub fn update(&self, buf_size: usize, entries: usize) {
        if buf_size > self.buf_size.load(Ordering::Relaxed) as usize {
            may_advance_u32(&self.buf_size, (buf_size as f64 * 1.05) as u32);
        }
        if entries > self.entries.load(Ordering::Relaxed) as usize {
            may_advance_u32(&self.entries, (entries as f64 * 1.05) as u32);
        }
    }
}

/// Single consumer of the flush signal channel.
///
/// Memtables stay in the flush queue until fully stored and registered with
/// the controller. Uploads run in parallel, but registration happens here
/// only, in the exact order the memtables were rotated: the head of the queue
/// is drained only while its upload has published `SsTableInfo`.
pub(crate) async fn flush_run_loop(core: Arc<CloudEngineCore>, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        loop {
            let registered = {
                let mut queue = core.flush_queue.lock();
                match queue.entries.front() {
                    Some(entry) if entry.sstable_info().is_some() => {
                        let entry = queue.entries.pop_front().unwrap();
                        if queue.next_upload > 0 {
                            queue.next_upload -= 1;
                        }
                        Some(entry)
                    }
                    _ => None,
                }
            };
            let Some(entry) = registered else { break };
            let info = entry.sstable_info().unwrap().clone();
            debug!(id = ?info.id, "registering sstable with controller");
            if let Err(e) = core
                .controller
                .apply_changes(RegistrationBatch {
                    registrations: vec![RegistrationEntry {
                        level: 0,
                        table_id: info.id,
                        key_start: info.smallest_key.clone(),
                        key_end: info.largest_key.clone(),
                    }],
                    deregistrations: vec![],
                })
                .await
            {
                error!("failed to register sstable: {}", e);
                return;
            }
            entry.memtable.committed();
        }

        // Schedule the next not-yet-started upload, if any.
        let next = {
            let mut queue = core.flush_queue.lock();
            if queue.next_upload < queue.entries.len() {
                let entry = queue.entries[queue.next_upload].clone();
                queue.next_upload += 1;
                Some(entry)
            } else {
                None
            }
        };
        if let Some(entry) = next {
            let core_clone = core.clone();
            tokio::spawn(async move {
                if let Err(e) = upload_memtable(core_clone, entry).await {
                    error!("failed to flush memtable: {}", e);
                }
            });
        }
    }
}

/// Serialize one frozen memtable and upload it. Registration is NOT done
/// here: it must follow rotation order while uploads run in parallel, so the
/// run loop is re-signaled instead.
async fn upload_memtable(core: Arc<CloudEngineCore>, entry: Arc<FlushEntry>) -> Result<()> {
    let memtable = entry.memtable.clone();
    let (size_hint, entries_hint) = core.estimates.hints();
    debug!("flushing memtable");
    let mut iter = MemtableIterator::new(memtable.clone(), None, None);
    let (table, smallest_key, largest_key) = build_sstable(
        core.options.table_format,
        size_hint,
        entries_hint,
        memtable.common_prefix(),
        &mut iter,
    )
    .await?;
    let table = Arc::new(table);
    let (size, entries) = (table.size_bytes(), table.num_entries());
    let id = Uuid::new_v4();
    core.table_cache.put(id, table).await?;
    debug!(?id, size, entries, "uploaded sstable to object store");
    entry.set_sstable_info(SsTableInfo {
        id,
        smallest_key,
        largest_key,
    });
    core.estimates.update(size, entries);
    if let Some(tx) = core.flush_sender() {
        if tx.send(()).await.is_err() {
            debug!("flush loop stopped; upload signal dropped");
        }
    }
    Ok(())
}
