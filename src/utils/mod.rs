//! Shared utilities: the injectable clock and bounded retry.

mod clock;
mod retry;

#[cfg(test)]
pub(crate) use clock::CLOCK_TEST_LOCK;
pub use clock::{now, reset_clock, set_clock};
pub use retry::with_retries;
