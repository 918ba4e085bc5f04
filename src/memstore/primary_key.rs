//! Open-addressed primary-key index.
//!
//! Maps a fixed-width key (the packed primary-key column bytes) to the
//! [`RecordID`] of the live row holding it. Linear probing over a
//! power-of-two bucket array; the table rehashes at 3/4 load. Mutation is
//! serialized by the owning store's lock.

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

use crate::data::RecordID;

const INITIAL_BUCKETS: usize = 64;
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

/// Outcome of [`PrimaryKey::find_or_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOrInsert {
    /// The key was already present at this record.
    Existing(RecordID),
    /// The key was inserted pointing at the given record.
    Inserted,
}

pub struct PrimaryKey {
    key_bytes: usize,
    hasher: RandomState,
    /// Bucket keys, `num_buckets * key_bytes` wide.
    keys: Vec<u8>,
    records: Vec<RecordID>,
    occupied: Vec<bool>,
    size: usize,
}

impl PrimaryKey {
    pub fn new(key_bytes: usize) -> Self {
        Self::with_buckets(key_bytes, INITIAL_BUCKETS)
    }

    fn with_buckets(key_bytes: usize, buckets: usize) -> Self {
        Self {
            key_bytes,
            hasher: RandomState::new(),
            keys: vec![0; buckets * key_bytes],
            records: vec![RecordID::new(0, 0); buckets],
            occupied: vec![false; buckets],
            size: 0,
        }
    }

    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    /// Number of keys present.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Approximate heap footprint for host-memory accounting.
    pub fn allocated_bytes(&self) -> usize {
        self.keys.len() + self.records.len() * std::mem::size_of::<RecordID>() + self.occupied.len()
    }

    fn num_buckets(&self) -> usize {
        self.occupied.len()
    }

    #[inline]
    fn hash(&self, key: &[u8]) -> usize {
        let mut h = self.hasher.build_hasher();
        h.write(key);
        h.finish() as usize & (self.num_buckets() - 1)
    }

    #[inline]
    fn bucket_key(&self, bucket: usize) -> &[u8] {
        &self.keys[bucket * self.key_bytes..(bucket + 1) * self.key_bytes]
    }

    /// Look up a key.
    pub fn find(&self, key: &[u8]) -> Option<RecordID> {
        debug_assert_eq!(key.len(), self.key_bytes);
        let mut bucket = self.hash(key);
        loop {
            if !self.occupied[bucket] {
                return None;
            }
            if self.bucket_key(bucket) == key {
                return Some(self.records[bucket]);
            }
            bucket = (bucket + 1) & (self.num_buckets() - 1);
        }
    }

    /// Insert `key → record` unless the key exists; reports which happened.
    pub fn find_or_insert(&mut self, key: &[u8], record: RecordID) -> FindOrInsert {
        debug_assert_eq!(key.len(), self.key_bytes);
        if (self.size + 1) * MAX_LOAD_DEN > self.num_buckets() * MAX_LOAD_NUM {
            self.grow();
        }
        let mut bucket = self.hash(key);
        loop {
            if !self.occupied[bucket] {
                self.occupied[bucket] = true;
                self.keys[bucket * self.key_bytes..(bucket + 1) * self.key_bytes]
                    .copy_from_slice(key);
                self.records[bucket] = record;
                self.size += 1;
                return FindOrInsert::Inserted;
            }
            if self.bucket_key(bucket) == key {
                return FindOrInsert::Existing(self.records[bucket]);
            }
            bucket = (bucket + 1) & (self.num_buckets() - 1);
        }
    }

    /// Repoint an existing key at a new record. No-op if absent.
    pub fn update(&mut self, key: &[u8], record: RecordID) {
        let mut bucket = self.hash(key);
        loop {
            if !self.occupied[bucket] {
                return;
            }
            if self.bucket_key(bucket) == key {
                self.records[bucket] = record;
                return;
            }
            bucket = (bucket + 1) & (self.num_buckets() - 1);
        }
    }

    fn grow(&mut self) {
        let mut bigger = Self::with_buckets(self.key_bytes, self.num_buckets() * 2);
        bigger.hasher = self.hasher.clone();
        for bucket in 0..self.num_buckets() {
            if self.occupied[bucket] {
                let key = self.bucket_key(bucket).to_vec();
                bigger.find_or_insert(&key, self.records[bucket]);
            }
        }
        *self = bigger;
    }
}
