mod cloud_engine;
mod dedup;
mod flush;
mod iterator;

use std::time::Duration;

use bytesize::ByteSize;
use cirruskv_common::coding::TableFormat;
use cirruskv_common::config::EngineConfig;
pub use cloud_engine::*;
pub use dedup::{dedup_key, SYSTEM_TABLE_DEDUP_ID};
pub use iterator::EngineIterator;

use crate::components::{Batch, Completion};
use crate::{Error, Result};

/// A batch submission envelope. `sequence_num` is strictly increasing per
/// processor; `-1` bypasses dedup and is meant for tests only.
pub struct WriteBatch {
    pub processor_id: u64,
    pub sequence_num: i64,
    pub batch: Batch,
    pub completion: Option<Completion>,
}

impl WriteBatch {
    pub fn new(
        processor_id: u64,
        sequence_num: i64,
        batch: Batch,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            processor_id,
            sequence_num,
            batch,
            completion,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CloudEngineOptions {
    pub db_id: u64,
    /// Arena size of each new memtable.
    pub memtable_max_size: ByteSize,
    /// Capacity of the flush signal channel; once saturated, rotation blocks
    /// the writer.
    pub memtable_flush_queue_max_size: usize,
    /// A memtable that has not rotated within this interval is rotated by the
    /// periodic timer.
    pub memtable_max_replace_interval: Duration,
    /// Skip the synthetic dedup row per batch (testing).
    pub disable_batch_sequence_insertion: bool,
    pub table_format: TableFormat,
    /// Object store path prefix for uploaded SSTables.
    pub sstable_path: String,
    pub table_cache_capacity: u64,
}

impl TryFrom<EngineConfig> for CloudEngineOptions {
    type Error = Error;

    fn try_from(config: EngineConfig) -> Result<Self> {
        let memtable_max_size = config
            .memtable_max_size_bytes
            .parse::<ByteSize>()
            .map_err(Error::InvalidArgument)?;
        let memtable_max_replace_interval =
            humantime::parse_duration(&config.memtable_max_replace_time).map_err(Error::err)?;
        Ok(Self {
            db_id: config.db_id,
            memtable_max_size,
            memtable_flush_queue_max_size: config.memtable_flush_queue_max_size,
            memtable_max_replace_interval,
            disable_batch_sequence_insertion: config.disable_batch_sequence_insertion,
            table_format: config.table_format,
            sstable_path: config.sstable_path,
            table_cache_capacity: config.table_cache_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_log::test;

    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = EngineConfig::from_str(
            r#"
            db_id = 3
            memtable_max_size_bytes = "4 MiB"
            memtable_flush_queue_max_size = 8
            memtable_max_replace_time = "250 ms"
            table_format = "V1"
            sstable_path = "sst"
            table_cache_capacity = 256
            "#,
        )
        .unwrap();
        let options = CloudEngineOptions::try_from(config).unwrap();
        assert_eq!(options.memtable_max_size, ByteSize::mib(4));
        assert_eq!(options.memtable_max_replace_interval, Duration::from_millis(250));
        assert_eq!(options.db_id, 3);
    }
}
