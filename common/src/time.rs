use std::time::Instant;

lazy_static::lazy_static! {
    /// Process-lifetime epoch of the monotonic clock.
    static ref MONOTONIC_EPOCH: Instant = Instant::now();
}

/// Nanoseconds elapsed since the process monotonic epoch.
///
/// Interval arithmetic in the engine must use this source rather than wall
/// time: adjustments to the system clock must not trigger or suppress
/// scheduled work.
pub fn monotonic_nanos() -> u64 {
    MONOTONIC_EPOCH.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_log::test;

    use super::*;

    #[test]
    fn test_monotonic_nanos_advances() {
        let t1 = monotonic_nanos();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = monotonic_nanos();
        assert!(t2 > t1);
        assert!(t2 - t1 >= 5_000_000);
    }
}
