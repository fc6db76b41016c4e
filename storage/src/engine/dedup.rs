use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use cirruskv_common::coding::{append_u64_be, encode_key_prefix};
use parking_lot::RwLock;

/// Reserved system table id under which dedup rows live.
pub const SYSTEM_TABLE_DEDUP_ID: u64 = 1;

const SEQUENCE_MAP_SHARDS: usize = 16;

/// Key of the dedup row recording the last accepted batch sequence of a
/// processor. Rows are plain entries in the user key space so they flush and
/// recover like any other data.
pub fn dedup_key(db_id: u64, processor_id: u64) -> Bytes {
    let mut buf = Vec::with_capacity(32);
    encode_key_prefix(&mut buf, db_id, SYSTEM_TABLE_DEDUP_ID, 0);
    append_u64_be(&mut buf, processor_id);
    buf.into()
}

/// Last accepted batch sequence per processor, sharded to keep concurrent
/// writers off each other's locks.
pub(crate) struct SequenceMap {
    buckets: Vec<RwLock<HashMap<u64, i64>>>,
}

impl Default for SequenceMap {
    fn default() -> Self {
        Self::new(SEQUENCE_MAP_SHARDS)
    }
}

impl SequenceMap {
    pub fn new(shards: usize) -> Self {
        let buckets = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { buckets }
    }

    fn bucket(&self, processor_id: u64) -> &RwLock<HashMap<u64, i64>> {
        let mut hasher = DefaultHasher::new();
        processor_id.hash(&mut hasher);
        &self.buckets[(hasher.finish() % self.buckets.len() as u64) as usize]
    }

    /// Record `sequence_num` as the processor's newest sequence. Returns
    /// `false` without updating when the sequence has been seen already, i.e.
    /// the batch is a duplicate.
    pub fn advance(&self, processor_id: u64, sequence_num: i64) -> bool {
        let mut bucket = self.bucket(processor_id).write();
        match bucket.get(&processor_id) {
            Some(last) if sequence_num <= *last => false,
            _ => {
                bucket.insert(processor_id, sequence_num);
                true
            }
        }
    }

    /// Unconditional overwrite, used when hydrating from durable dedup rows.
    pub fn store(&self, processor_id: u64, sequence_num: i64) {
        self.bucket(processor_id).write().insert(processor_id, sequence_num);
    }

    pub fn get(&self, processor_id: u64) -> Option<i64> {
        self.bucket(processor_id).read().get(&processor_id).copied()
    }
}
