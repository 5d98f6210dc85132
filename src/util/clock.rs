//! Monotonic millisecond clock.
//!
//! All scheduling arithmetic (shares, slices, wait durations) is done on
//! milliseconds from a single monotonic epoch anchored the first time the
//! clock is read. Wall-clock time never enters the scheduler, so clock
//! adjustments cannot move shares backwards.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the process-wide monotonic epoch.
///
/// The epoch is anchored on the first call; calling this early in `main`
/// pins it to process startup.
#[must_use]
pub fn now_ms() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_monotonic() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_now_ms_advances() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ms();
        assert!(b > a);
    }
}
