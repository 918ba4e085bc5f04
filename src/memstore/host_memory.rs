//! Host memory accounting.
//!
//! Every row-sized allocation in the engine reports through the manager;
//! a configured cap turns further reservations into `OutOfHostMemory`, and
//! the failing job unwinds and retries on a later tick.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::{Result, StoreError};

pub struct HostMemoryManager {
    limit: i64,
    unmanaged: AtomicI64,
}

impl HostMemoryManager {
    pub fn new(limit: i64) -> Self {
        Self { limit, unmanaged: AtomicI64::new(0) }
    }

    /// Unconditional bookkeeping of unmanaged space; `delta` may be
    /// negative. Releases always go through here.
    pub fn report_unmanaged_space_usage_change(&self, delta: i64) {
        let total = self.unmanaged.fetch_add(delta, Ordering::AcqRel) + delta;
        debug_assert!(total >= 0, "unmanaged space accounting went negative");
    }

    /// Reserve `bytes` against the cap, failing without side effects when
    /// the cap would be exceeded.
    pub fn try_reserve(&self, bytes: i64) -> Result<()> {
        let total = self.unmanaged.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if total > self.limit {
            self.unmanaged.fetch_sub(bytes, Ordering::AcqRel);
            return Err(StoreError::OutOfHostMemory {
                requested: bytes,
                available: (self.limit - (total - bytes)).max(0),
            });
        }
        Ok(())
    }

    pub fn unmanaged_usage(&self) -> i64 {
        self.unmanaged.load(Ordering::Acquire)
    }
}

/// Accumulates one owner's charges and refunds them all on drop. Backfill
/// contexts and staging stores hold one tracker each, so releasing the
/// owner returns its entire footprint in one step.
pub struct MemoryTracker {
    manager: Arc<HostMemoryManager>,
    charged: i64,
}

impl MemoryTracker {
    pub fn new(manager: Arc<HostMemoryManager>) -> Self {
        Self { manager, charged: 0 }
    }

    pub fn charge(&mut self, bytes: i64) -> Result<()> {
        self.manager.try_reserve(bytes)?;
        self.charged += bytes;
        Ok(())
    }

    pub fn charged(&self) -> i64 {
        self.charged
    }
}

impl Drop for MemoryTracker {
    fn drop(&mut self) {
        if self.charged > 0 {
            self.manager.report_unmanaged_space_usage_change(-self.charged);
        }
    }
}
