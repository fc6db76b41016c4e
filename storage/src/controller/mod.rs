mod mem;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub use mem::*;

use crate::components::SsTableId;
use crate::Result;

/// One table registered or deregistered with the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationEntry {
    pub level: u32,
    pub table_id: SsTableId,
    pub key_start: Bytes,
    pub key_end: Bytes,
}

/// Atomic catalog update.
#[derive(Clone, Debug, Default)]
pub struct RegistrationBatch {
    pub registrations: Vec<RegistrationEntry>,
    pub deregistrations: Vec<SsTableId>,
}

/// External catalog mapping key ranges to SSTables. The controller is the
/// source of truth for which tables a reader must consult.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Return ids of all tables overlapping `[key_start, key_end)` as a list
    /// of non-overlap groups, newest group first. Tables within one group do
    /// not overlap each other and are ordered ascending by key.
    async fn get_table_ids_for_range(
        &self,
        key_start: Option<&[u8]>,
        key_end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Vec<SsTableId>>>;

    async fn apply_changes(&self, batch: RegistrationBatch) -> Result<()>;
}

pub type ControllerRef = Arc<dyn Controller>;
