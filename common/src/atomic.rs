use std::sync::atomic::{AtomicU32, Ordering};

/// Advance `cell` to `val` if `val` is greater than the stored value.
/// Concurrent losers are tolerated; callers use this for watermarks where
/// an occasional missed advance only costs a slightly stale estimate.
pub fn may_advance_u32(cell: &AtomicU32, val: u32) {
    let mut old = cell.load(Ordering::Relaxed);
    while val > old {
        match cell.compare_exchange_weak(old, val, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => break,
            Err(v) => old = v,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use itertools::Itertools;
    use test_log::test;

    use super::*;

    #[test]
    fn test_may_advance_keeps_max() {
        let cell = AtomicU32::new(10);
        may_advance_u32(&cell, 5);
        assert_eq!(cell.load(Ordering::SeqCst), 10);
        may_advance_u32(&cell, 20);
        assert_eq!(cell.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_may_advance_concurrent() {
        let cell = Arc::new(AtomicU32::new(0));
        let handles = (1..=64u32)
            .map(|v| {
                let cell_clone = cell.clone();
                std::thread::spawn(move || may_advance_u32(&cell_clone, v))
            })
            .collect_vec();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cell.load(Ordering::SeqCst), 64);
    }
}
