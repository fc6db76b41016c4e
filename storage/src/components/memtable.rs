use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::Result;

/// A single key/value entry. Keys are opaque and compare lexicographically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

/// Invoked exactly once when the batch it was submitted with reaches its
/// terminal state: `Ok(())` after the owning memtable has been durably
/// registered, or the write error otherwise.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + Sync + 'static>;

/// An ordered sequence of entries applied atomically. Immutable after
/// submission.
#[derive(Default)]
pub struct Batch {
    entries: Vec<KeyValue>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, kv: KeyValue) {
        self.entries.push(kv);
    }

    pub fn entries(&self) -> &[KeyValue] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a memtable write. `Full` hands back the completion unconsumed
/// so the caller can retry the batch against a fresh memtable.
pub enum WriteResult {
    Applied,
    Full { completion: Option<Completion> },
}

/// Bookkeeping cost per entry on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 32;

struct MemtableCore {
    entries: BTreeMap<Bytes, Bytes>,
    common_prefix: Option<Bytes>,
    completions: Vec<Completion>,
}

/// Ordered in-memory write buffer over a bounded arena. The arena is a byte
/// budget sized at construction; once exhausted the memtable refuses further
/// batches and the engine rotates it out.
///
/// Lookups are live: an iterator positioned by key observes entries admitted
/// ahead of its position after it was created.
pub struct Memtable {
    capacity: usize,
    allocated: AtomicUsize,
    core: RwLock<MemtableCore>,
}

impl Memtable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            allocated: AtomicUsize::new(0),
            core: RwLock::new(MemtableCore {
                entries: BTreeMap::new(),
                common_prefix: None,
                completions: vec![],
            }),
        }
    }

    /// Apply `batch` atomically. A batch that does not fit the remaining
    /// arena is refused unapplied, except into an empty memtable: an
    /// oversized batch must not be able to rotate forever.
    pub fn write(&self, batch: &Batch, completion: Option<Completion>) -> WriteResult {
        let cost: usize = batch
            .entries()
            .iter()
            .map(|kv| kv.key.len() + kv.value.len() + ENTRY_OVERHEAD)
            .sum();
        let mut core = self.core.write();
        if !core.entries.is_empty() && self.allocated.load(Ordering::Relaxed) + cost > self.capacity
        {
            return WriteResult::Full { completion };
        }
        self.allocated.fetch_add(cost, Ordering::Relaxed);
        for kv in batch.entries() {
            core.common_prefix = Some(match core.common_prefix.take() {
                None => kv.key.clone(),
                Some(prefix) => {
                    let shared = prefix
                        .iter()
                        .zip(kv.key.iter())
                        .take_while(|(a, b)| a == b)
                        .count();
                    prefix.slice(..shared)
                }
            });
            core.entries.insert(kv.key.clone(), kv.value.clone());
        }
        if let Some(completion) = completion {
            core.completions.push(completion);
        }
        WriteResult::Applied
    }

    /// Smallest entry with key `>= from` (or the first entry when `from` is
    /// `None`), bounded by the exclusive `end`.
    pub fn first_at_or_after(&self, from: Option<&[u8]>, end: Option<&[u8]>) -> Option<KeyValue> {
        if let (Some(from), Some(end)) = (from, end) {
            if from >= end {
                return None;
            }
        }
        let lower = match from {
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        };
        self.lookup(lower, end)
    }

    /// Smallest entry with key strictly greater than `from`, bounded by the
    /// exclusive `end`.
    pub fn first_after(&self, from: &[u8], end: Option<&[u8]>) -> Option<KeyValue> {
        if let Some(end) = end {
            if from >= end {
                return None;
            }
        }
        self.lookup(Bound::Excluded(from), end)
    }

    fn lookup(&self, lower: Bound<&[u8]>, end: Option<&[u8]>) -> Option<KeyValue> {
        let upper = match end {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let core = self.core.read();
        core.entries
            .range::<[u8], _>((lower, upper))
            .next()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
    }

    /// Longest common prefix of all keys, used by the SSTable builder for
    /// key compression. Empty until the first write.
    pub fn common_prefix(&self) -> Bytes {
        self.core.read().common_prefix.clone().unwrap_or_default()
    }

    /// Fire every stored completion exactly once. Called after the SSTable
    /// produced from this memtable has been registered with the controller.
    pub fn committed(&self) {
        let completions = {
            let mut core = self.core.write();
            std::mem::take(&mut core.completions)
        };
        for completion in completions {
            completion(Ok(()));
        }
    }

    pub fn mem_size(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn mem_remain(&self) -> usize {
        self.capacity.saturating_sub(self.mem_size())
    }

    pub fn num_entries(&self) -> usize {
        self.core.read().entries.len()
    }
}
