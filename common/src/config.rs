use std::str::FromStr;

use serde::Deserialize;

use crate::coding::TableFormat;

/// Declarative engine configuration. Sizes and durations are human-readable
/// strings ("64 MiB", "200 ms"); the storage crate parses them into runtime
/// options.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    pub db_id: u64,
    pub memtable_max_size_bytes: String,
    pub memtable_flush_queue_max_size: usize,
    pub memtable_max_replace_time: String,
    #[serde(default)]
    pub disable_batch_sequence_insertion: bool,
    pub table_format: TableFormat,
    pub sstable_path: String,
    pub table_cache_capacity: u64,
}

impl FromStr for EngineConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = toml::from_str(s)?;
        Ok(c)
    }
}
