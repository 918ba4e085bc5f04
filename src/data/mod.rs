//! Core data model: column types, tagged values, record locators.

use serde::{Deserialize, Serialize};

/// Seconds per day; fact tables partition on `ts / SECONDS_PER_DAY`.
pub const SECONDS_PER_DAY: u32 = 86400;

/// Day number (batch ID) of a Unix-second timestamp.
#[inline]
pub fn day_of_timestamp(ts: u32) -> i32 {
    (ts / SECONDS_PER_DAY) as i32
}

// ============================================================================
// Data types
// ============================================================================

const TYPE_BOOL: u8 = 1;
const TYPE_INT8: u8 = 2;
const TYPE_UINT8: u8 = 3;
const TYPE_INT16: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_INT32: u8 = 6;
const TYPE_UINT32: u8 = 7;
const TYPE_INT64: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_FLOAT32: u8 = 10;
const TYPE_FLOAT64: u8 = 11;
const TYPE_UUID: u8 = 12;

/// High bit of the wire code marks an array of the scalar type in the low
/// seven bits.
const ARRAY_FLAG: u8 = 0x80;

/// Column data type.
///
/// Scalars are fixed-width; `Uuid` is a 16-byte fixed array; `Array(t)`
/// is a variable-length list of scalar `t` (one level only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Uuid,
    ArrayBool,
    ArrayInt8,
    ArrayUint8,
    ArrayInt16,
    ArrayUint16,
    ArrayInt32,
    ArrayUint32,
    ArrayInt64,
    ArrayUint64,
    ArrayFloat32,
    ArrayFloat64,
    ArrayUuid,
}

impl DataType {
    /// Decode a wire code; `None` for unknown codes.
    pub fn from_wire(code: u8) -> Option<Self> {
        let scalar = match code & !ARRAY_FLAG {
            TYPE_BOOL => DataType::Bool,
            TYPE_INT8 => DataType::Int8,
            TYPE_UINT8 => DataType::Uint8,
            TYPE_INT16 => DataType::Int16,
            TYPE_UINT16 => DataType::Uint16,
            TYPE_INT32 => DataType::Int32,
            TYPE_UINT32 => DataType::Uint32,
            TYPE_INT64 => DataType::Int64,
            TYPE_UINT64 => DataType::Uint64,
            TYPE_FLOAT32 => DataType::Float32,
            TYPE_FLOAT64 => DataType::Float64,
            TYPE_UUID => DataType::Uuid,
            _ => return None,
        };
        if code & ARRAY_FLAG != 0 {
            Some(scalar.as_array())
        } else {
            Some(scalar)
        }
    }

    /// Encode to the wire code.
    pub fn to_wire(self) -> u8 {
        match self {
            DataType::Bool => TYPE_BOOL,
            DataType::Int8 => TYPE_INT8,
            DataType::Uint8 => TYPE_UINT8,
            DataType::Int16 => TYPE_INT16,
            DataType::Uint16 => TYPE_UINT16,
            DataType::Int32 => TYPE_INT32,
            DataType::Uint32 => TYPE_UINT32,
            DataType::Int64 => TYPE_INT64,
            DataType::Uint64 => TYPE_UINT64,
            DataType::Float32 => TYPE_FLOAT32,
            DataType::Float64 => TYPE_FLOAT64,
            DataType::Uuid => TYPE_UUID,
            array => array.element_type().to_wire() | ARRAY_FLAG,
        }
    }

    /// The array type whose elements are `self`. Panics on nested arrays,
    /// which the format does not allow.
    pub fn as_array(self) -> Self {
        match self {
            DataType::Bool => DataType::ArrayBool,
            DataType::Int8 => DataType::ArrayInt8,
            DataType::Uint8 => DataType::ArrayUint8,
            DataType::Int16 => DataType::ArrayInt16,
            DataType::Uint16 => DataType::ArrayUint16,
            DataType::Int32 => DataType::ArrayInt32,
            DataType::Uint32 => DataType::ArrayUint32,
            DataType::Int64 => DataType::ArrayInt64,
            DataType::Uint64 => DataType::ArrayUint64,
            DataType::Float32 => DataType::ArrayFloat32,
            DataType::Float64 => DataType::ArrayFloat64,
            DataType::Uuid => DataType::ArrayUuid,
            _ => panic!("nested array types are not representable"),
        }
    }

    pub fn is_array(self) -> bool {
        self.to_wire() & ARRAY_FLAG != 0
    }

    /// Element type of an array column; identity for scalars.
    pub fn element_type(self) -> Self {
        match self {
            DataType::ArrayBool => DataType::Bool,
            DataType::ArrayInt8 => DataType::Int8,
            DataType::ArrayUint8 => DataType::Uint8,
            DataType::ArrayInt16 => DataType::Int16,
            DataType::ArrayUint16 => DataType::Uint16,
            DataType::ArrayInt32 => DataType::Int32,
            DataType::ArrayUint32 => DataType::Uint32,
            DataType::ArrayInt64 => DataType::Int64,
            DataType::ArrayUint64 => DataType::Uint64,
            DataType::ArrayFloat32 => DataType::Float32,
            DataType::ArrayFloat64 => DataType::Float64,
            DataType::ArrayUuid => DataType::Uuid,
            scalar => scalar,
        }
    }

    /// Packed width in bytes of one scalar value. Bool packs to one byte
    /// in value arrays (one bit in validity vectors).
    pub fn value_width(self) -> usize {
        match self.element_type() {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
            DataType::Uuid => 16,
            _ => unreachable!(),
        }
    }
}

// ============================================================================
// Data values
// ============================================================================

/// A single cell value. The column's declared [`DataType`] governs how a
/// value packs into vectors; integral values are widened at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Fixed-width byte values (Uuid).
    Bytes(Vec<u8>),
    /// Array cell; elements are scalar values of the column's element type.
    Array(Vec<DataValue>),
}

impl DataValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Pack the value into `buf` using the column type's width and
    /// little-endian layout. Null must be handled by the caller (validity).
    pub fn pack_into(&self, dtype: DataType, buf: &mut Vec<u8>) {
        let width = dtype.value_width();
        match self {
            DataValue::Null => buf.extend(std::iter::repeat(0).take(width)),
            DataValue::Bool(v) => buf.push(*v as u8),
            DataValue::Int(v) => buf.extend_from_slice(&v.to_le_bytes()[..width]),
            DataValue::Uint(v) => buf.extend_from_slice(&v.to_le_bytes()[..width]),
            DataValue::Float(v) => match dtype.element_type() {
                DataType::Float32 => buf.extend_from_slice(&(*v as f32).to_le_bytes()),
                _ => buf.extend_from_slice(&v.to_le_bytes()),
            },
            DataValue::Bytes(b) => {
                buf.extend_from_slice(b);
                if b.len() < width {
                    buf.extend(std::iter::repeat(0).take(width - b.len()));
                }
            }
            DataValue::Array(_) => panic!("array values pack through list vectors"),
        }
    }

    /// Unpack one value of `dtype` from a packed little-endian slice.
    pub fn unpack(dtype: DataType, raw: &[u8]) -> DataValue {
        match dtype.element_type() {
            DataType::Bool => DataValue::Bool(raw[0] != 0),
            DataType::Int8 => DataValue::Int(raw[0] as i8 as i64),
            DataType::Uint8 => DataValue::Uint(raw[0] as u64),
            DataType::Int16 => {
                DataValue::Int(i16::from_le_bytes([raw[0], raw[1]]) as i64)
            }
            DataType::Uint16 => {
                DataValue::Uint(u16::from_le_bytes([raw[0], raw[1]]) as u64)
            }
            DataType::Int32 => {
                DataValue::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64)
            }
            DataType::Uint32 => {
                DataValue::Uint(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64)
            }
            DataType::Int64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw[..8]);
                DataValue::Int(i64::from_le_bytes(b))
            }
            DataType::Uint64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw[..8]);
                DataValue::Uint(u64::from_le_bytes(b))
            }
            DataType::Float32 => {
                DataValue::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64)
            }
            DataType::Float64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&raw[..8]);
                DataValue::Float(f64::from_le_bytes(b))
            }
            DataType::Uuid => DataValue::Bytes(raw[..16].to_vec()),
            _ => unreachable!(),
        }
    }

    /// The u32 reading of a timestamp column value, if it has one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            DataValue::Uint(v) if *v <= u32::MAX as u64 => Some(*v as u32),
            DataValue::Int(v) if *v >= 0 && *v <= u32::MAX as i64 => Some(*v as u32),
            _ => None,
        }
    }

    /// Total ordering used by the archive sort: null sorts first, then by
    /// value. Only comparable variants meet in practice (same column type).
    pub fn sort_cmp(&self, other: &DataValue) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Ordering::Equal,
            (DataValue::Null, _) => Ordering::Less,
            (_, DataValue::Null) => Ordering::Greater,
            (DataValue::Bool(a), DataValue::Bool(b)) => a.cmp(b),
            (DataValue::Int(a), DataValue::Int(b)) => a.cmp(b),
            (DataValue::Uint(a), DataValue::Uint(b)) => a.cmp(b),
            (DataValue::Float(a), DataValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (DataValue::Bytes(a), DataValue::Bytes(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

// ============================================================================
// Record locators
// ============================================================================

/// Batch ID of the first batch in a backfill staging store. Live-store
/// batches occupy the non-negative range.
pub const BASE_BATCH_ID: i32 = i32::MIN;

/// Locates one row inside a store: which batch, which row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordID {
    pub batch_id: i32,
    pub index: u32,
}

impl RecordID {
    pub fn new(batch_id: i32, index: u32) -> Self {
        Self { batch_id, index }
    }
}

// ============================================================================
// Tests
// ============================================================================
