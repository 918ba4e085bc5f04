//! Self-describing binary upsert batch.
//!
//! The wire format (little-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ magic: u32                                       │
//! │ row_count: u32                                   │
//! │ column_count: u16, reserved: u16                 │
//! ├──────────────────────────────────────────────────┤
//! │ per column: col_id u16, data_type u8, mode u8    │
//! ├──────────────────────────────────────────────────┤
//! │ body offsets: (column_count + 1) × u32           │
//! ├──────────────────────────────────────────────────┤
//! │ per column body:                                 │
//! │   mode 2: null bitmap, ceil(rows/8) bytes        │
//! │   padding to 8-byte alignment                    │
//! │   packed values (modes 1 and 2)                  │
//! ├──────────────────────────────────────────────────┤
//! │ crc32: u32 over everything above                 │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Bool values pack one bit per row; arrays pack a `(rows + 1) × u32`
//! offset table, then per row a `u32` item count followed by the packed
//! elements. Columns present in a batch need not cover the schema; a
//! missing column means "no change".

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::data::{DataType, DataValue};
use crate::{Result, StoreError};

const MAGIC: u32 = 0x4152_5542;

/// Column body layout modes.
pub const COLUMN_MODE_NULL_ONLY: u8 = 0;
pub const COLUMN_MODE_ALL_VALID: u8 = 1;
pub const COLUMN_MODE_NULLABLE: u8 = 2;

#[derive(Debug, Clone, Copy)]
struct ColumnHeader {
    col_id: u16,
    dtype: DataType,
    mode: u8,
    /// Offset of the column body from the start of the blob.
    body: usize,
}

/// A parsed, read-only upsert batch over its backing blob.
#[derive(Debug)]
pub struct UpsertBatch {
    buf: Vec<u8>,
    row_count: u32,
    columns: Vec<ColumnHeader>,
}

fn corrupt(what: impl Into<String>) -> StoreError {
    StoreError::InvalidUpsertRow(what.into())
}

fn slice<'a>(buf: &'a [u8], start: usize, len: usize) -> Result<&'a [u8]> {
    buf.get(start..start + len)
        .ok_or_else(|| corrupt(format!("truncated at byte {}", start)))
}

impl UpsertBatch {
    /// Parse and validate a blob. The blob is retained; reads index into it.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < 16 {
            return Err(corrupt("blob shorter than fixed header"));
        }
        if LittleEndian::read_u32(&buf[0..4]) != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let body_end = buf.len() - 4;
        let expected_crc = LittleEndian::read_u32(&buf[body_end..]);
        if crc32fast::hash(&buf[..body_end]) != expected_crc {
            return Err(corrupt("checksum mismatch"));
        }

        let row_count = LittleEndian::read_u32(&buf[4..8]);
        let column_count = LittleEndian::read_u16(&buf[8..10]) as usize;
        let headers_at = 12;
        let offsets_at = headers_at + column_count * 4;
        let bodies_at = offsets_at + (column_count + 1) * 4;
        if bodies_at > body_end {
            return Err(corrupt("column table overruns blob"));
        }

        let mut columns = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let h = &buf[headers_at + i * 4..headers_at + (i + 1) * 4];
            let col_id = LittleEndian::read_u16(&h[0..2]);
            let dtype = DataType::from_wire(h[2])
                .ok_or_else(|| corrupt(format!("unknown data type {:#x}", h[2])))?;
            let mode = h[3];
            if mode > COLUMN_MODE_NULLABLE {
                return Err(corrupt(format!("unknown column mode {}", mode)));
            }
            let body = LittleEndian::read_u32(
                &buf[offsets_at + i * 4..offsets_at + (i + 1) * 4],
            ) as usize;
            columns.push(ColumnHeader { col_id, dtype, mode, body });
        }
        let end = LittleEndian::read_u32(
            &buf[offsets_at + column_count * 4..offsets_at + (column_count + 1) * 4],
        ) as usize;
        if end != body_end {
            return Err(corrupt("body offsets do not close at checksum"));
        }
        let mut prev = bodies_at;
        for col in &columns {
            if col.body < prev || col.body > body_end {
                return Err(corrupt("non-monotonic column body offsets"));
            }
            prev = col.body;
        }

        Ok(Self { buf, row_count, columns })
    }

    pub fn row_count(&self) -> usize {
        self.row_count as usize
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Schema column id carried by the batch column at `idx`.
    pub fn column_id(&self, idx: usize) -> usize {
        self.columns[idx].col_id as usize
    }

    pub fn column_type(&self, idx: usize) -> DataType {
        self.columns[idx].dtype
    }

    /// Read the cell at `(row, column idx)`.
    pub fn get_value(&self, row: usize, idx: usize) -> Result<DataValue> {
        if row >= self.row_count as usize {
            return Err(corrupt(format!("row {} out of {}", row, self.row_count)));
        }
        let col = self.columns[idx];
        let rows = self.row_count as usize;
        if col.mode == COLUMN_MODE_NULL_ONLY {
            return Ok(DataValue::Null);
        }
        let mut at = col.body;
        if col.mode == COLUMN_MODE_NULLABLE {
            let bitmap = slice(&self.buf, at, (rows + 7) / 8)?;
            if bitmap[row / 8] & (1 << (row % 8)) == 0 {
                return Ok(DataValue::Null);
            }
            at += (rows + 7) / 8;
        }
        at = (at + 7) & !7;

        if col.dtype.is_array() {
            let offsets = slice(&self.buf, at, (rows + 1) * 4)?;
            let data_at = at + (rows + 1) * 4;
            let start = LittleEndian::read_u32(&offsets[row * 4..]) as usize;
            let raw = slice(&self.buf, data_at + start, 4)?;
            let items = LittleEndian::read_u32(raw) as usize;
            let elem = col.dtype.element_type();
            let width = elem.value_width();
            let body = slice(&self.buf, data_at + start + 4, items * width)?;
            Ok(DataValue::Array(
                body.chunks_exact(width)
                    .map(|chunk| DataValue::unpack(elem, chunk))
                    .collect(),
            ))
        } else if col.dtype == DataType::Bool {
            let bits = slice(&self.buf, at, (rows + 7) / 8)?;
            Ok(DataValue::Bool(bits[row / 8] & (1 << (row % 8)) != 0))
        } else {
            let width = col.dtype.value_width();
            let raw = slice(&self.buf, at + row * width, width)?;
            Ok(DataValue::unpack(col.dtype, raw))
        }
    }

    /// Bytes held by the backing blob, for host-memory accounting.
    pub fn allocated_bytes(&self) -> usize {
        self.buf.len()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an upsert batch blob column by column, row by row.
pub struct UpsertBatchBuilder {
    columns: Vec<(u16, DataType, Vec<DataValue>)>,
    rows: usize,
}

impl UpsertBatchBuilder {
    pub fn new() -> Self {
        Self { columns: Vec::new(), rows: 0 }
    }

    /// Declare a column. Existing rows get null for it.
    pub fn add_column(&mut self, col_id: usize, dtype: DataType) -> &mut Self {
        self.columns.push((col_id as u16, dtype, vec![DataValue::Null; self.rows]));
        self
    }

    /// Append one all-null row.
    pub fn add_row(&mut self) -> &mut Self {
        self.rows += 1;
        for (_, _, values) in &mut self.columns {
            values.push(DataValue::Null);
        }
        self
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: DataValue) -> &mut Self {
        self.columns[column].2[row] = value;
        self
    }

    /// Serialize to the wire format.
    pub fn build(&self) -> Result<Vec<u8>> {
        let column_count = self.columns.len();
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(MAGIC)?;
        buf.write_u32::<LittleEndian>(self.rows as u32)?;
        buf.write_u16::<LittleEndian>(column_count as u16)?;
        buf.write_u16::<LittleEndian>(0)?;

        let mut modes = Vec::with_capacity(column_count);
        for (col_id, dtype, values) in &self.columns {
            let nulls = values.iter().filter(|v| v.is_null()).count();
            let mode = if nulls == self.rows {
                COLUMN_MODE_NULL_ONLY
            } else if nulls > 0 {
                COLUMN_MODE_NULLABLE
            } else {
                COLUMN_MODE_ALL_VALID
            };
            modes.push(mode);
            buf.write_u16::<LittleEndian>(*col_id)?;
            buf.write_u8(dtype.to_wire())?;
            buf.write_u8(mode)?;
        }

        let offsets_at = buf.len();
        buf.resize(offsets_at + (column_count + 1) * 4, 0);

        let mut bodies = Vec::with_capacity(column_count);
        for (i, (_, dtype, values)) in self.columns.iter().enumerate() {
            bodies.push(buf.len() as u32);
            self.write_body(&mut buf, *dtype, values, modes[i])?;
        }
        bodies.push(buf.len() as u32);
        for (i, offset) in bodies.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[offsets_at + i * 4..offsets_at + (i + 1) * 4], *offset);
        }

        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        Ok(buf)
    }

    fn write_body(
        &self,
        buf: &mut Vec<u8>,
        dtype: DataType,
        values: &[DataValue],
        mode: u8,
    ) -> Result<()> {
        if mode == COLUMN_MODE_NULL_ONLY {
            return Ok(());
        }
        if mode == COLUMN_MODE_NULLABLE {
            let mut bitmap = vec![0u8; (self.rows + 7) / 8];
            for (row, v) in values.iter().enumerate() {
                if !v.is_null() {
                    bitmap[row / 8] |= 1 << (row % 8);
                }
            }
            buf.extend_from_slice(&bitmap);
        }
        while buf.len() % 8 != 0 {
            buf.push(0);
        }

        if dtype.is_array() {
            let offsets_at = buf.len();
            buf.resize(offsets_at + (self.rows + 1) * 4, 0);
            let data_at = buf.len();
            let elem = dtype.element_type();
            for (row, v) in values.iter().enumerate() {
                let offset = (buf.len() - data_at) as u32;
                LittleEndian::write_u32(
                    &mut buf[offsets_at + row * 4..offsets_at + (row + 1) * 4],
                    offset,
                );
                let items = match v {
                    DataValue::Array(items) => items.as_slice(),
                    _ => &[],
                };
                buf.write_u32::<LittleEndian>(items.len() as u32)?;
                for item in items {
                    item.pack_into(elem, buf);
                }
            }
            let end = (buf.len() - data_at) as u32;
            LittleEndian::write_u32(
                &mut buf[offsets_at + self.rows * 4..offsets_at + (self.rows + 1) * 4],
                end,
            );
        } else if dtype == DataType::Bool {
            let mut bits = vec![0u8; (self.rows + 7) / 8];
            for (row, v) in values.iter().enumerate() {
                if let DataValue::Bool(true) = v {
                    bits[row / 8] |= 1 << (row % 8);
                }
            }
            buf.extend_from_slice(&bits);
        } else {
            for v in values {
                if v.is_null() {
                    buf.extend(std::iter::repeat(0).take(dtype.value_width()));
                } else {
                    v.pack_into(dtype, buf);
                }
            }
        }
        Ok(())
    }
}

impl Default for UpsertBatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
