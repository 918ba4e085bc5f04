//! Vector party: one column's storage inside a batch.
//!
//! Two modes:
//! - `Flat`: one slot per row. Live batches and forked archive columns.
//! - `SortCompressed`: run-length layout for archive sort columns. Parallel
//!   `values`/`validity` arrays hold one entry per run; `counts` holds the
//!   prefix row count at each run boundary, so a row index resolves to its
//!   run by binary search.
//!
//! Array (list) columns store per-slot `(start, len)` spans into a shared
//! byte heap. Rewriting a list slot appends the new bytes and repoints the
//! span; stale heap bytes are dropped when the column is next compacted by
//! a re-archive.
//!
//! Serialized layout (little-endian):
//! ```text
//! [mode: u8][dtype: u8][reserved: u16][rows: u32][entries: u32]
//! [validity bitmap: ceil(entries/8) bytes]
//! [values: fixed-width slots, or offset table + heap for arrays]
//! [counts: (entries + 1) × u32, sort-compressed mode only]
//! ```

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::data::{DataType, DataValue};
use crate::Result;

const MODE_FLAT: u8 = 1;
const MODE_SORT_COMPRESSED: u8 = 3;

// ============================================================================
// Validity bitmap
// ============================================================================

/// Packed validity bits, one per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    bits: Vec<u8>,
    len: usize,
}

impl Bitmap {
    pub fn with_len(len: usize) -> Self {
        Self { bits: vec![0; (len + 7) / 8], len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    #[inline]
    pub fn set(&mut self, i: usize, valid: bool) {
        debug_assert!(i < self.len);
        if valid {
            self.bits[i / 8] |= 1 << (i % 8);
        } else {
            self.bits[i / 8] &= !(1 << (i % 8));
        }
    }

    pub fn push(&mut self, valid: bool) {
        if self.len % 8 == 0 {
            self.bits.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, valid);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

// ============================================================================
// Column values
// ============================================================================

/// Raw packed slots of a column, independent of mode.
#[derive(Debug, Clone)]
pub enum ColumnValues {
    /// Fixed-width little-endian slots, `width` bytes each.
    Fixed { width: usize, data: Vec<u8> },
    /// Array slots: `(heap start, byte length)` per slot over a shared heap.
    VarLen { spans: Vec<(u32, u32)>, heap: Vec<u8> },
}

impl ColumnValues {
    fn fixed(dtype: DataType, slots: usize) -> Self {
        let width = dtype.value_width();
        ColumnValues::Fixed { width, data: vec![0; width * slots] }
    }

    fn var_len(slots: usize) -> Self {
        ColumnValues::VarLen { spans: vec![(0, 0); slots], heap: Vec::new() }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            ColumnValues::Fixed { data, .. } => data.len(),
            ColumnValues::VarLen { spans, heap } => spans.len() * 8 + heap.len(),
        }
    }
}

// ============================================================================
// Vector party
// ============================================================================

/// One column's storage. See the module docs for the two modes.
#[derive(Debug, Clone)]
pub enum VectorParty {
    Flat {
        dtype: DataType,
        validity: Bitmap,
        values: ColumnValues,
    },
    SortCompressed {
        dtype: DataType,
        /// Per-run validity.
        validity: Bitmap,
        /// Per-run values.
        values: ColumnValues,
        /// Prefix row counts: `counts[0] == 0`, strictly increasing,
        /// `counts[runs]` is the total row count.
        counts: Vec<u32>,
    },
}

impl VectorParty {
    /// An all-null flat vector with `rows` preallocated slots.
    pub fn new_flat(dtype: DataType, rows: usize) -> Self {
        let values = if dtype.is_array() {
            ColumnValues::var_len(rows)
        } else {
            ColumnValues::fixed(dtype, rows)
        };
        VectorParty::Flat { dtype, validity: Bitmap::with_len(rows), values }
    }

    /// Build a sort-compressed vector from per-run entries and prefix counts.
    /// `counts.len()` must be `runs + 1` with `counts[0] == 0`.
    pub fn new_sort_compressed(
        dtype: DataType,
        runs: Vec<DataValue>,
        counts: Vec<u32>,
    ) -> Self {
        debug_assert_eq!(counts.len(), runs.len() + 1);
        debug_assert_eq!(counts.first().copied(), Some(0));
        debug_assert!(counts.windows(2).all(|w| w[0] < w[1]));
        let mut validity = Bitmap::with_len(0);
        let mut values = if dtype.is_array() {
            ColumnValues::var_len(0)
        } else {
            ColumnValues::Fixed { width: dtype.value_width(), data: Vec::new() }
        };
        for run in &runs {
            push_value(&mut values, &mut validity, dtype, run);
        }
        VectorParty::SortCompressed { dtype, validity, values, counts }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            VectorParty::Flat { dtype, .. } | VectorParty::SortCompressed { dtype, .. } => *dtype,
        }
    }

    pub fn is_sort_compressed(&self) -> bool {
        matches!(self, VectorParty::SortCompressed { .. })
    }

    /// Logical row count.
    pub fn len(&self) -> usize {
        match self {
            VectorParty::Flat { validity, .. } => validity.len(),
            VectorParty::SortCompressed { counts, .. } => {
                counts.last().copied().unwrap_or(0) as usize
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of physical entries (rows for flat, runs for compressed).
    pub fn entries(&self) -> usize {
        match self {
            VectorParty::Flat { validity, .. } => validity.len(),
            VectorParty::SortCompressed { validity, .. } => validity.len(),
        }
    }

    /// Read the value at a logical row.
    pub fn get(&self, row: usize) -> DataValue {
        match self {
            VectorParty::Flat { dtype, validity, values } => {
                read_slot(values, validity, *dtype, row)
            }
            VectorParty::SortCompressed { dtype, validity, values, counts } => {
                debug_assert!((row as u32) < *counts.last().unwrap_or(&0));
                // counts[run] <= row < counts[run + 1]
                let run = counts.partition_point(|&c| c <= row as u32) - 1;
                read_slot(values, validity, *dtype, run)
            }
        }
    }

    /// Write a value at a row. Flat vectors only; compressed vectors must
    /// be forked to flat first.
    pub fn set(&mut self, row: usize, value: &DataValue) {
        match self {
            VectorParty::Flat { dtype, validity, values } => {
                write_slot(values, validity, *dtype, row, value)
            }
            VectorParty::SortCompressed { .. } => {
                unreachable!("writes to a sort-compressed vector must fork it first")
            }
        }
    }

    /// Decompress into a flat vector of the same logical rows. Flat input
    /// is copied as-is.
    pub fn to_flat(&self) -> VectorParty {
        match self {
            VectorParty::Flat { .. } => self.clone(),
            VectorParty::SortCompressed { dtype, .. } => {
                let rows = self.len();
                let mut flat = VectorParty::new_flat(*dtype, rows);
                for row in 0..rows {
                    flat.set(row, &self.get(row));
                }
                flat
            }
        }
    }

    /// Logical equality: same type, same length, same value at every row.
    /// Representation (flat vs compressed) is not compared.
    pub fn equals(&self, other: &VectorParty) -> bool {
        if self.data_type() != other.data_type() || self.len() != other.len() {
            return false;
        }
        (0..self.len()).all(|row| self.get(row) == other.get(row))
    }

    /// Approximate host-memory footprint in bytes.
    pub fn allocated_bytes(&self) -> usize {
        match self {
            VectorParty::Flat { validity, values, .. } => {
                validity.as_bytes().len() + values.heap_bytes()
            }
            VectorParty::SortCompressed { validity, values, counts, .. } => {
                validity.as_bytes().len() + values.heap_bytes() + counts.len() * 4
            }
        }
    }

    /// Stream the serialized layout to a writer.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        let (mode, dtype, validity, values, counts): (_, _, _, _, Option<&Vec<u32>>) = match self {
            VectorParty::Flat { dtype, validity, values } => {
                (MODE_FLAT, dtype, validity, values, None)
            }
            VectorParty::SortCompressed { dtype, validity, values, counts } => {
                (MODE_SORT_COMPRESSED, dtype, validity, values, Some(counts))
            }
        };
        w.write_u8(mode)?;
        w.write_u8(dtype.to_wire())?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u32::<LittleEndian>(self.len() as u32)?;
        w.write_u32::<LittleEndian>(self.entries() as u32)?;
        w.write_all(validity.as_bytes())?;
        match values {
            ColumnValues::Fixed { data, .. } => w.write_all(data)?,
            ColumnValues::VarLen { spans, heap } => {
                // Compacted on write: spans become a dense offset table.
                let mut offset = 0u32;
                for &(_, len) in spans {
                    w.write_u32::<LittleEndian>(offset)?;
                    offset += len;
                }
                w.write_u32::<LittleEndian>(offset)?;
                for &(start, len) in spans {
                    w.write_all(&heap[start as usize..(start + len) as usize])?;
                }
            }
        }
        if let Some(counts) = counts {
            for &c in counts {
                w.write_u32::<LittleEndian>(c)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Slot access helpers
// ============================================================================

fn read_slot(
    values: &ColumnValues,
    validity: &Bitmap,
    dtype: DataType,
    slot: usize,
) -> DataValue {
    if !validity.get(slot) {
        return DataValue::Null;
    }
    match values {
        ColumnValues::Fixed { width, data } => {
            DataValue::unpack(dtype, &data[slot * width..(slot + 1) * width])
        }
        ColumnValues::VarLen { spans, heap } => {
            let (start, len) = spans[slot];
            let raw = &heap[start as usize..(start + len) as usize];
            let elem = dtype.element_type();
            let width = elem.value_width();
            let items = raw
                .chunks_exact(width)
                .map(|chunk| DataValue::unpack(elem, chunk))
                .collect();
            DataValue::Array(items)
        }
    }
}

fn write_slot(
    values: &mut ColumnValues,
    validity: &mut Bitmap,
    dtype: DataType,
    slot: usize,
    value: &DataValue,
) {
    if value.is_null() {
        validity.set(slot, false);
        return;
    }
    match values {
        ColumnValues::Fixed { width, data } => {
            let mut packed = Vec::with_capacity(*width);
            value.pack_into(dtype, &mut packed);
            data[slot * *width..(slot + 1) * *width].copy_from_slice(&packed);
        }
        ColumnValues::VarLen { spans, heap } => {
            let items = match value {
                DataValue::Array(items) => items,
                _ => unreachable!("scalar write into an array column"),
            };
            let elem = dtype.element_type();
            let start = heap.len() as u32;
            for item in items {
                item.pack_into(elem, heap);
            }
            spans[slot] = (start, heap.len() as u32 - start);
        }
    }
    validity.set(slot, true);
}

/// Append one entry to a growable values/validity pair (builder path).
fn push_value(
    values: &mut ColumnValues,
    validity: &mut Bitmap,
    dtype: DataType,
    value: &DataValue,
) {
    match values {
        ColumnValues::Fixed { width, data } => {
            if value.is_null() {
                data.extend(std::iter::repeat(0).take(*width));
            } else {
                value.pack_into(dtype, data);
            }
        }
        ColumnValues::VarLen { spans, heap } => {
            let start = heap.len() as u32;
            if let DataValue::Array(items) = value {
                let elem = dtype.element_type();
                for item in items {
                    item.pack_into(elem, heap);
                }
            }
            spans.push((start, heap.len() as u32 - start));
        }
    }
    validity.push(!value.is_null());
}

// ============================================================================
// Builders
// ============================================================================

/// Builds a flat vector by appending rows (used by the re-archive merge for
/// unsorted columns).
pub struct FlatBuilder {
    dtype: DataType,
    validity: Bitmap,
    values: ColumnValues,
}

impl FlatBuilder {
    pub fn new(dtype: DataType) -> Self {
        let values = if dtype.is_array() {
            ColumnValues::var_len(0)
        } else {
            ColumnValues::Fixed { width: dtype.value_width(), data: Vec::new() }
        };
        Self { dtype, validity: Bitmap::with_len(0), values }
    }

    pub fn append(&mut self, value: &DataValue) {
        push_value(&mut self.values, &mut self.validity, self.dtype, value);
    }

    pub fn finish(self) -> VectorParty {
        VectorParty::Flat { dtype: self.dtype, validity: self.validity, values: self.values }
    }
}

/// Builds a sort-compressed vector by appending rows in sort order;
/// consecutive equal values collapse into one run.
pub struct SortCompressedBuilder {
    dtype: DataType,
    validity: Bitmap,
    values: ColumnValues,
    counts: Vec<u32>,
    last: Option<DataValue>,
    rows: u32,
}

impl SortCompressedBuilder {
    pub fn new(dtype: DataType) -> Self {
        // Array columns are never sort columns; they stay flat.
        debug_assert!(!dtype.is_array());
        Self {
            dtype,
            validity: Bitmap::with_len(0),
            values: ColumnValues::Fixed { width: dtype.value_width(), data: Vec::new() },
            counts: vec![0],
            last: None,
            rows: 0,
        }
    }

    pub fn append(&mut self, value: &DataValue) {
        let same_run = self.rows > 0 && self.last.as_ref() == Some(value);
        if !same_run {
            if self.rows > 0 {
                self.counts.push(self.rows);
            }
            push_value(&mut self.values, &mut self.validity, self.dtype, value);
            self.last = Some(value.clone());
        }
        self.rows += 1;
    }

    pub fn finish(mut self) -> VectorParty {
        if self.rows > 0 {
            self.counts.push(self.rows);
        }
        VectorParty::SortCompressed {
            dtype: self.dtype,
            validity: self.validity,
            values: self.values,
            counts: self.counts,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
