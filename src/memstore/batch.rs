//! Row blocks: the immutable column-handle batch used by archive storage,
//! and the mutable, preallocated live batch used by staging stores.
//!
//! An archive-side [`Batch`] holds one shared handle per schema column.
//! Handles are `Arc`s so a derived batch starts as a shallow alias of its
//! base; replacing one handle (a copy-on-write fork) leaves every other
//! column shared. A deleted schema column keeps its slot as `None` and
//! reads as null.

use std::sync::Arc;

use crate::data::{DataType, DataValue};
use crate::memstore::vector_party::VectorParty;

// ============================================================================
// Archive-side batch
// ============================================================================

/// Immutable column-oriented row block: one vector-party handle per schema
/// column, all of equal logical length.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub columns: Vec<Option<Arc<VectorParty>>>,
}

impl Batch {
    pub fn new(columns: Vec<Option<Arc<VectorParty>>>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Logical row count: the length of any materialized column.
    pub fn row_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .map(|vp| vp.len())
            .next()
            .unwrap_or(0)
    }

    /// Cell read; absent (deleted) columns read as null.
    pub fn get_data_value(&self, row: usize, col: usize) -> DataValue {
        match self.columns.get(col) {
            Some(Some(vp)) => vp.get(row),
            _ => DataValue::Null,
        }
    }

    /// Logical equality: same shape and same value at every cell. Column
    /// representation (flat, compressed, absent-null) is not compared.
    pub fn equals(&self, other: &Batch) -> bool {
        if self.column_count() != other.column_count()
            || self.row_count() != other.row_count()
        {
            return false;
        }
        for col in 0..self.column_count() {
            for row in 0..self.row_count() {
                if self.get_data_value(row, col) != other.get_data_value(row, col) {
                    return false;
                }
            }
        }
        true
    }
}

// ============================================================================
// Live batch
// ============================================================================

/// Mutable batch of a live/staging store. Columns are preallocated to the
/// store's batch size on first write and addressed by row index; rows past
/// the store's append pointer are unreadable garbage by contract.
#[derive(Debug)]
pub struct LiveBatch {
    pub capacity: usize,
    pub columns: Vec<Option<VectorParty>>,
}

impl LiveBatch {
    pub fn new(capacity: usize, column_count: usize) -> Self {
        Self {
            capacity,
            columns: (0..column_count).map(|_| None).collect(),
        }
    }

    /// Write a cell, materializing the column on first touch.
    pub fn set_value(&mut self, row: usize, col: usize, dtype: DataType, value: &DataValue) {
        debug_assert!(row < self.capacity);
        let vp = self.columns[col]
            .get_or_insert_with(|| VectorParty::new_flat(dtype, self.capacity));
        vp.set(row, value);
    }

    /// Cell read; untouched columns read as null.
    pub fn get_data_value(&self, row: usize, col: usize) -> DataValue {
        match self.columns.get(col) {
            Some(Some(vp)) => vp.get(row),
            _ => DataValue::Null,
        }
    }

    /// Heap bytes of the materialized columns.
    pub fn allocated_bytes(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .map(|vp| vp.allocated_bytes())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint_column(values: &[Option<u64>]) -> Arc<VectorParty> {
        let mut vp = VectorParty::new_flat(DataType::Uint32, values.len());
        for (row, v) in values.iter().enumerate() {
            if let Some(v) = v {
                vp.set(row, &DataValue::Uint(*v));
            }
        }
        Arc::new(vp)
    }

    #[test]
    fn test_batch_reads_and_equality() {
        let a = Batch::new(vec![
            Some(uint_column(&[Some(1), Some(2)])),
            None,
        ]);
        let b = Batch::new(vec![
            Some(uint_column(&[Some(1), Some(2)])),
            Some(uint_column(&[None, None])),
        ]);
        assert_eq!(a.row_count(), 2);
        assert_eq!(a.get_data_value(0, 0), DataValue::Uint(1));
        assert_eq!(a.get_data_value(0, 1), DataValue::Null);
        // a deleted column equals an all-null column
        assert!(a.equals(&b));
    }

    #[test]
    fn test_batch_alias_shares_pointers() {
        let base = Batch::new(vec![Some(uint_column(&[Some(1)])), None]);
        let alias = base.clone();
        assert!(Arc::ptr_eq(
            base.columns[0].as_ref().unwrap(),
            alias.columns[0].as_ref().unwrap()
        ));
    }

    #[test]
    fn test_live_batch_lazy_columns() {
        let mut lb = LiveBatch::new(4, 3);
        assert_eq!(lb.get_data_value(0, 1), DataValue::Null);
        lb.set_value(2, 1, DataType::Uint32, &DataValue::Uint(5));
        assert_eq!(lb.get_data_value(2, 1), DataValue::Uint(5));
        assert!(lb.columns[0].is_none());
        assert!(lb.columns[1].is_some());
    }
}
