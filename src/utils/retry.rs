//! Bounded exponential backoff for recoverable disk/metastore calls.

use std::thread;
use std::time::Duration;

use crate::{Result, StoreError};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 50;

/// Run `op` up to three times, sleeping 50ms, 100ms between attempts.
/// Non-recoverable errors abort immediately.
pub fn with_retries<T, F>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_recoverable() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let backoff = BASE_BACKOFF_MS << (attempt - 1);
                log::warn!("{} failed (attempt {}): {}; retrying in {}ms", what, attempt, e, backoff);
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => {
                if let StoreError::Cancelled = e {
                    return Err(e);
                }
                log::error!("{} failed permanently: {}", what, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_then_succeeds() {
        let mut calls = 0;
        let result: Result<u32> = with_retries("op", || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::MetaStore("transient".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_three() {
        let mut calls = 0;
        let result: Result<()> = with_retries("op", || {
            calls += 1;
            Err(StoreError::MetaStore("down".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_recoverable_aborts() {
        let mut calls = 0;
        let result: Result<()> = with_retries("op", || {
            calls += 1;
            Err(StoreError::SchemaMismatch("bad".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
