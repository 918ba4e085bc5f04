//! Process-global clock source.
//!
//! All scheduler eligibility decisions read time through [`now`] so tests
//! can install a deterministic constant clock.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

type ClockFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static CLOCK: Lazy<RwLock<Option<ClockFn>>> = Lazy::new(|| RwLock::new(None));

/// Current time from the installed source, or the system clock.
pub fn now() -> DateTime<Utc> {
    match &*CLOCK.read() {
        Some(f) => f(),
        None => Utc::now(),
    }
}

/// Install a clock override. Used by tests; the override is process-wide.
pub fn set_clock<F>(f: F)
where
    F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
{
    *CLOCK.write() = Some(Box::new(f));
}

/// Remove any clock override, reverting to the system clock.
pub fn reset_clock() {
    *CLOCK.write() = None;
}

/// Serializes tests that install a clock override; the override is
/// process-wide and cargo runs tests on parallel threads.
#[cfg(test)]
pub(crate) static CLOCK_TEST_LOCK: Lazy<parking_lot::Mutex<()>> =
    Lazy::new(|| parking_lot::Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clock_override() {
        let _guard = CLOCK_TEST_LOCK.lock();
        let fixed = Utc.timestamp_opt(1_498_600_000, 0).unwrap();
        set_clock(move || fixed);
        assert_eq!(now(), fixed);
        reset_clock();
        assert!(now() > fixed);
    }
}
