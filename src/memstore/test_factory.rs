//! Shared fixtures for the backfill and scheduler test suites: the
//! seven-column fact-table schema, its base archive batch, the four
//! upsert batches of the canonical backfill patch, and scripted fakes
//! for the disk store and metastore.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::{DataType, DataValue, RecordID};
use crate::diskstore::{DiskStore, VectorPartyWriter};
use crate::memstore::archive_store::ArchiveBatch;
use crate::memstore::backfill::BackfillPatch;
use crate::memstore::batch::Batch;
use crate::memstore::upsert_batch::{UpsertBatch, UpsertBatchBuilder};
use crate::memstore::vector_party::VectorParty;
use crate::metastore::MetaStore;
use crate::schema::{Column, TableConfig, TableSchema};
use crate::{Result, StoreError};

pub fn uint(v: u64) -> DataValue {
    DataValue::Uint(v)
}

pub fn arr(items: &[i64]) -> DataValue {
    DataValue::Array(items.iter().map(|&v| DataValue::Int(v)).collect())
}

/// The seven-column fact table: column 0 is time, columns 1 and 5 are the
/// archiving sort order, columns 1 and 2 the primary key, column 3 is
/// deleted, column 6 is an int16 array.
pub fn backfill_schema() -> Arc<TableSchema> {
    Arc::new(TableSchema {
        name: "test".into(),
        config: TableConfig {
            archiving_delay_minutes: 500,
            archiving_interval_minutes: 300,
            backfill_store_batch_size: 20_000,
            ..Default::default()
        },
        is_fact_table: true,
        columns: (0..7)
            .map(|i| Column { name: format!("c{}", i), deleted: i == 3 })
            .collect(),
        value_type_by_column: vec![
            DataType::Uint32,
            DataType::Uint32,
            DataType::Uint32,
            DataType::Uint32,
            DataType::Uint32,
            DataType::Uint32,
            DataType::ArrayInt16,
        ],
        archiving_sort_columns: vec![1, 5],
        primary_key_columns: vec![1, 2],
        primary_key_bytes: 8,
        default_values: vec![DataValue::Null; 7],
    })
}

pub fn flat_uint32(values: &[Option<u64>]) -> Arc<VectorParty> {
    let mut vp = VectorParty::new_flat(DataType::Uint32, values.len());
    for (row, v) in values.iter().enumerate() {
        if let Some(v) = v {
            vp.set(row, &DataValue::Uint(*v));
        }
    }
    Arc::new(vp)
}

pub fn flat_array(values: &[Option<&[i64]>]) -> Arc<VectorParty> {
    let mut vp = VectorParty::new_flat(DataType::ArrayInt16, values.len());
    for (row, v) in values.iter().enumerate() {
        if let Some(items) = v {
            vp.set(row, &arr(items));
        }
    }
    Arc::new(vp)
}

/// Ten sorted base rows for day 0, sort-compressed on columns 1 and 5.
///
/// ```text
/// row:  c0 c1 c2 c4 c5 c6
///  0:    1  0  0  1 10 [1,2]
///  1:    1  0  1  1 10 [11,12]
///  2:    1  0  2  2 11 null
///  3:    1  0  3  2 11 [3]
///  4:    2  1  0  3 12 null
///  5:    2  1  1  3 12 [4,5]
///  6:    2  1  2  4 13 null
///  7:    2  2  0  4 13 [6]
///  8:    2  2  1  5 14 null
///  9:    2  2  2  5 14 [7,8]
/// ```
pub fn base_archive_batch() -> Arc<ArchiveBatch> {
    let c0 = flat_uint32(&[1, 1, 1, 1, 2, 2, 2, 2, 2, 2].map(Some));
    let c1 = Arc::new(VectorParty::new_sort_compressed(
        DataType::Uint32,
        vec![uint(0), uint(1), uint(2)],
        vec![0, 4, 7, 10],
    ));
    let c2 = flat_uint32(&[0, 1, 2, 3, 0, 1, 2, 0, 1, 2].map(Some));
    let c4 = flat_uint32(&[1, 1, 2, 2, 3, 3, 4, 4, 5, 5].map(Some));
    let c5 = Arc::new(VectorParty::new_sort_compressed(
        DataType::Uint32,
        vec![uint(10), uint(11), uint(12), uint(13), uint(14)],
        vec![0, 2, 4, 6, 8, 10],
    ));
    let c6 = flat_array(&[
        Some(&[1, 2]),
        Some(&[11, 12]),
        None,
        Some(&[3]),
        None,
        Some(&[4, 5]),
        None,
        Some(&[6]),
        None,
        Some(&[7, 8]),
    ]);
    Arc::new(ArchiveBatch {
        day: 0,
        batch_version: 0,
        seq: 0,
        size: 10,
        batch: Batch::new(vec![
            Some(c0),
            Some(c1),
            Some(c2),
            None,
            Some(c4),
            Some(c5),
            Some(c6),
        ]),
    })
}

/// The four upsert batches of the canonical patch: an idempotent row, a
/// sort-key move, an insert, in-place scalar and array updates, four more
/// sort-key moves and a duplicated insert.
pub fn backfill_upsert_batches() -> Vec<UpsertBatch> {
    // batch 0 carries columns 0, 1, 2, 3 (deleted) and 5
    let mut b0 = UpsertBatchBuilder::new();
    b0.add_column(0, DataType::Uint32)
        .add_column(1, DataType::Uint32)
        .add_column(2, DataType::Uint32)
        .add_column(3, DataType::Uint32)
        .add_column(5, DataType::Uint32);
    let rows0: [[u64; 5]; 3] = [[1, 0, 0, 7, 10], [1, 0, 1, 7, 11], [1, 9, 9, 7, 20]];
    for (row, values) in rows0.iter().enumerate() {
        b0.add_row();
        for (idx, v) in values.iter().enumerate() {
            b0.set_value(row, idx, uint(*v));
        }
    }

    // batch 1 carries time, the primary key and column 4
    let mut b1 = UpsertBatchBuilder::new();
    b1.add_column(0, DataType::Uint32)
        .add_column(1, DataType::Uint32)
        .add_column(2, DataType::Uint32)
        .add_column(4, DataType::Uint32);
    let rows1: [[u64; 4]; 3] = [[1, 0, 0, 1], [1, 0, 2, 12], [1, 0, 3, 13]];
    for (row, values) in rows1.iter().enumerate() {
        b1.add_row();
        for (idx, v) in values.iter().enumerate() {
            b1.set_value(row, idx, uint(*v));
        }
    }

    // batch 2 carries time, the primary key and the array column
    let mut b2 = UpsertBatchBuilder::new();
    b2.add_column(0, DataType::Uint32)
        .add_column(1, DataType::Uint32)
        .add_column(2, DataType::Uint32)
        .add_column(6, DataType::ArrayInt16);
    b2.add_row()
        .set_value(0, 0, uint(2))
        .set_value(0, 1, uint(1))
        .set_value(0, 2, uint(1))
        .set_value(0, 3, arr(&[21, 22]));

    // batch 3 carries every live column
    let mut b3 = UpsertBatchBuilder::new();
    b3.add_column(0, DataType::Uint32)
        .add_column(1, DataType::Uint32)
        .add_column(2, DataType::Uint32)
        .add_column(4, DataType::Uint32)
        .add_column(5, DataType::Uint32)
        .add_column(6, DataType::ArrayInt16);
    let rows3: [([u64; 5], &[i64]); 6] = [
        ([2, 1, 0, 30, 15], &[31]),
        ([2, 1, 2, 31, 15], &[32]),
        ([2, 2, 0, 32, 16], &[33]),
        ([2, 2, 2, 33, 16], &[34]),
        ([3, 5, 5, 40, 30], &[41, 42]),
        ([3, 5, 5, 41, 31], &[43]),
    ];
    for (row, (scalars, items)) in rows3.iter().enumerate() {
        b3.add_row();
        for (idx, v) in scalars.iter().enumerate() {
            b3.set_value(row, idx, uint(*v));
        }
        b3.set_value(row, 5, arr(items));
    }

    [b0, b1, b2, b3]
        .iter()
        .map(|b| UpsertBatch::from_bytes(b.build().expect("fixture builds")).expect("fixture parses"))
        .collect()
}

/// The canonical 13-record patch over [`backfill_upsert_batches`].
pub fn backfill_patch(batches: Vec<UpsertBatch>) -> BackfillPatch {
    let record_ids = vec![
        RecordID::new(0, 0),
        RecordID::new(0, 1),
        RecordID::new(0, 2),
        RecordID::new(1, 0),
        RecordID::new(1, 1),
        RecordID::new(1, 2),
        RecordID::new(2, 0),
        RecordID::new(3, 0),
        RecordID::new(3, 1),
        RecordID::new(3, 2),
        RecordID::new(3, 3),
        RecordID::new(3, 4),
        RecordID::new(3, 5),
    ];
    BackfillPatch { day: 0, record_ids, backfill_batches: Arc::new(batches) }
}

// ============================================================================
// Scripted fakes
// ============================================================================

struct FakeWriter {
    file: std::fs::File,
}

impl Write for FakeWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.file.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl VectorPartyWriter for FakeWriter {
    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Disk store writing real files under a scratch dir, laid out as
/// `table/shard/day/{column}@{version}:{seq}`. Re-opening the same
/// coordinates truncates, so retried writes are idempotent like the real
/// store. Calls are recorded for assertions and opens can be scripted to
/// fail.
pub struct SharedFakeDiskStore {
    root: tempfile::TempDir,
    pub deletes: Mutex<Vec<(String, i32, i32, u32, u32)>>,
    pub fail_opens: Mutex<u32>,
}

impl SharedFakeDiskStore {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("scratch dir for the fake disk store"),
            deletes: Mutex::new(Vec::new()),
            fail_opens: Mutex::new(0),
        }
    }

    fn batch_dir(&self, table: &str, shard: i32, day: i32) -> std::path::PathBuf {
        self.root
            .path()
            .join(table)
            .join(shard.to_string())
            .join(day.to_string())
    }

    /// Every persisted file as a `table/shard/day/column@version:seq`
    /// key, sorted.
    pub fn file_keys(&self) -> Vec<String> {
        fn walk(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        walk(&path, out);
                    } else {
                        out.push(path);
                    }
                }
            }
        }
        let mut paths = Vec::new();
        walk(self.root.path(), &mut paths);
        let mut keys: Vec<String> = paths
            .iter()
            .filter_map(|path| path.strip_prefix(self.root.path()).ok())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect();
        keys.sort();
        keys
    }
}

impl DiskStore for SharedFakeDiskStore {
    fn open_vector_party_file_for_write(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        column: usize,
        batch_version: u32,
        seq: u32,
    ) -> Result<Box<dyn VectorPartyWriter>> {
        {
            let mut fail = self.fail_opens.lock();
            if *fail > 0 {
                *fail -= 1;
                return Err(StoreError::DiskIo(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "scripted open failure",
                )));
            }
        }
        let dir = self.batch_dir(table, shard, day);
        std::fs::create_dir_all(&dir)?;
        let file =
            std::fs::File::create(dir.join(format!("{}@{}:{}", column, batch_version, seq)))?;
        Ok(Box::new(FakeWriter { file }))
    }

    fn delete_batch_versions(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        batch_version: u32,
        seq: u32,
    ) -> Result<()> {
        self.deletes
            .lock()
            .push((table.to_string(), shard, day, batch_version, seq));
        let suffix = format!("@{}:{}", batch_version, seq);
        if let Ok(entries) = std::fs::read_dir(self.batch_dir(table, shard, day)) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().ends_with(&suffix) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMetaStore {
    /// `(table, shard, day, batch_version, seq, row_count)` commits.
    pub versions: Mutex<Vec<(String, i32, i32, u32, u32, usize)>>,
    pub cutoffs: Mutex<Vec<(String, i32, u32)>>,
    /// Fail the next N cutoff updates.
    pub fail_cutoffs: Mutex<u32>,
}

impl MetaStore for FakeMetaStore {
    fn add_archive_batch_version(
        &self,
        table: &str,
        shard: i32,
        day: i32,
        batch_version: u32,
        seq: u32,
        row_count: usize,
    ) -> Result<()> {
        self.versions
            .lock()
            .push((table.to_string(), shard, day, batch_version, seq, row_count));
        Ok(())
    }

    fn update_archiving_cutoff(&self, table: &str, shard: i32, cutoff: u32) -> Result<()> {
        {
            let mut fail = self.fail_cutoffs.lock();
            if *fail > 0 {
                *fail -= 1;
                return Err(StoreError::MetaStore("scripted cutoff failure".into()));
            }
        }
        self.cutoffs.lock().push((table.to_string(), shard, cutoff));
        Ok(())
    }

    fn extend_enum_dict(
        &self,
        _table: &str,
        _column: usize,
        values: &[String],
    ) -> Result<Vec<u32>> {
        Ok((0..values.len() as u32).collect())
    }
}
