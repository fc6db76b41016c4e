use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Controller, RegistrationBatch, RegistrationEntry};
use crate::components::SsTableId;
use crate::{Error, Result};

/// In-memory catalog used in tests and local development.
///
/// Level 0 holds whole-memtable flushes which may overlap arbitrarily, so it
/// is kept newest-first and every table forms its own non-overlap group.
/// Higher levels hold disjoint tables kept ordered by key, one group per
/// level.
pub struct MemController {
    levels: RwLock<Vec<Vec<RegistrationEntry>>>,
    registration_log: RwLock<Vec<SsTableId>>,
}

impl Default for MemController {
    fn default() -> Self {
        Self {
            levels: RwLock::new(vec![vec![]]),
            registration_log: RwLock::new(vec![]),
        }
    }
}

impl MemController {
    /// Every registration ever applied, in application order. Exposed so
    /// tests can assert registration ordering.
    pub fn registration_log(&self) -> Vec<SsTableId> {
        self.registration_log.read().clone()
    }

    pub fn table_count(&self) -> usize {
        self.levels.read().iter().map(|level| level.len()).sum()
    }

    pub fn level_entries(&self, level: usize) -> Vec<RegistrationEntry> {
        self.levels.read().get(level).cloned().unwrap_or_default()
    }

    fn overlaps(entry: &RegistrationEntry, key_start: Option<&[u8]>, key_end: Option<&[u8]>) -> bool {
        // `key_end` of an entry is the inclusive largest key of the table;
        // the queried range is half-open.
        let before_end = match key_end {
            Some(end) => entry.key_start.as_ref() < end,
            None => true,
        };
        let after_start = match key_start {
            Some(start) => entry.key_end.as_ref() >= start,
            None => true,
        };
        before_end && after_start
    }
}

#[async_trait]
impl Controller for MemController {
    async fn get_table_ids_for_range(
        &self,
        key_start: Option<&[u8]>,
        key_end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Vec<SsTableId>>> {
        let levels = self.levels.read();
        let mut groups = vec![];
        let mut total = 0;
        for (level_idx, level) in levels.iter().enumerate() {
            let mut group = vec![];
            for entry in level.iter() {
                if total >= limit {
                    break;
                }
                if !Self::overlaps(entry, key_start, key_end) {
                    continue;
                }
                total += 1;
                if level_idx == 0 {
                    // Level 0 tables may overlap each other: one group each.
                    groups.push(vec![entry.table_id]);
                } else {
                    group.push(entry.table_id);
                }
            }
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn apply_changes(&self, batch: RegistrationBatch) -> Result<()> {
        let mut levels = self.levels.write();
        for registration in batch.registrations {
            let level = registration.level as usize;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            self.registration_log.write().push(registration.table_id);
            if level == 0 {
                levels[level].insert(0, registration);
            } else {
                levels[level].push(registration);
                levels[level].sort_by(|a, b| a.key_start.cmp(&b.key_start));
            }
        }
        for table_id in batch.deregistrations {
            let mut found = false;
            for level in levels.iter_mut() {
                if let Some(pos) = level.iter().position(|e| e.table_id == table_id) {
                    level.remove(pos);
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(Error::ControllerError(format!(
                    "cannot deregister unknown table {}",
                    table_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use test_log::test;
    use uuid::Uuid;

    use super::*;

    fn entry(level: u32, start: &str, end: &str) -> RegistrationEntry {
        RegistrationEntry {
            level,
            table_id: Uuid::new_v4(),
            key_start: Bytes::copy_from_slice(start.as_bytes()),
            key_end: Bytes::copy_from_slice(end.as_bytes()),
        }
    }

    async fn register(controller: &MemController, entry: RegistrationEntry) {
        controller
            .apply_changes(RegistrationBatch {
                registrations: vec![entry],
                deregistrations: vec![],
            })
            .await
            .unwrap();
    }

    #[test(tokio::test)]
    async fn test_level0_groups_newest_first() {
        let controller = MemController::default();
        let e1 = entry(0, "a", "m");
        let e2 = entry(0, "b", "z");
        register(&controller, e1.clone()).await;
        register(&controller, e2.clone()).await;

        let groups = controller
            .get_table_ids_for_range(Some(b"a".as_ref()), Some(b"zz".as_ref()), 10)
            .await
            .unwrap();
        // Every level-0 table is its own group; the later registration wins
        // the front slot.
        assert_eq!(groups, vec![vec![e2.table_id], vec![e1.table_id]]);
        assert_eq!(controller.registration_log(), vec![e1.table_id, e2.table_id]);
    }

    #[test(tokio::test)]
    async fn test_nonoverlap_level_single_group() {
        let controller = MemController::default();
        let e1 = entry(1, "m", "p");
        let e2 = entry(1, "a", "c");
        register(&controller, e1.clone()).await;
        register(&controller, e2.clone()).await;

        let groups = controller
            .get_table_ids_for_range(None, None, 10)
            .await
            .unwrap();
        // One ordered group for the non-overlap level, sorted by key.
        assert_eq!(groups, vec![vec![e2.table_id, e1.table_id]]);
    }

    #[test(tokio::test)]
    async fn test_range_filter() {
        let controller = MemController::default();
        let e1 = entry(0, "a", "c");
        let e2 = entry(0, "x", "z");
        register(&controller, e1.clone()).await;
        register(&controller, e2.clone()).await;

        let groups = controller
            .get_table_ids_for_range(Some(b"b".as_ref()), Some(b"d".as_ref()), 10)
            .await
            .unwrap();
        assert_eq!(groups, vec![vec![e1.table_id]]);

        let groups = controller
            .get_table_ids_for_range(Some(b"d".as_ref()), Some(b"x".as_ref()), 10)
            .await
            .unwrap();
        assert!(groups.is_empty());
    }

    #[test(tokio::test)]
    async fn test_deregistration() {
        let controller = MemController::default();
        let e1 = entry(0, "a", "c");
        register(&controller, e1.clone()).await;
        controller
            .apply_changes(RegistrationBatch {
                registrations: vec![],
                deregistrations: vec![e1.table_id],
            })
            .await
            .unwrap();
        assert_eq!(controller.table_count(), 0);
        assert!(controller
            .apply_changes(RegistrationBatch {
                registrations: vec![],
                deregistrations: vec![e1.table_id],
            })
            .await
            .is_err());
    }
}
