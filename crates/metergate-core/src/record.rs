//! Append-only cost records.
//!
//! One record per executed query, written for audit and trend analysis and
//! never mutated afterwards. The sled-backed store keys records by
//! timestamp-plus-counter so appends stay ordered and `recent` is a reverse
//! range scan; the in-memory store backs tests and short-lived processes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::request::QueryCategory;

/// Longest query-text prefix retained on a record.
pub const QUERY_TEXT_LIMIT: usize = 500;

/// Counter distinguishing records appended within the same microsecond.
static RECORD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Audit record for one executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// When the query completed.
    pub at: DateTime<Utc>,
    /// Query category.
    pub category: QueryCategory,
    /// Bytes the backend scanned.
    pub bytes_processed: u64,
    /// Bytes the backend billed (may exceed bytes processed due to minimum
    /// billing granularity).
    pub bytes_billed: u64,
    /// Cost derived from billed bytes, in dollars.
    pub estimated_cost: f64,
    /// Truncated query text.
    pub query_text: String,
    /// Wall-clock execution duration in milliseconds.
    pub duration_ms: u64,
}

impl CostRecord {
    /// Build a record, truncating the query text.
    pub fn new(
        category: QueryCategory,
        bytes_processed: u64,
        bytes_billed: u64,
        estimated_cost: f64,
        query_text: &str,
        duration_ms: u64,
    ) -> Self {
        let query_text = if query_text.len() > QUERY_TEXT_LIMIT {
            let mut end = QUERY_TEXT_LIMIT;
            while !query_text.is_char_boundary(end) {
                end -= 1;
            }
            query_text[..end].to_string()
        } else {
            query_text.to_string()
        };
        Self {
            at: Utc::now(),
            category,
            bytes_processed,
            bytes_billed,
            estimated_cost,
            query_text,
            duration_ms,
        }
    }
}

/// Durable sink for cost records.
pub trait CostRecordStore: Send + Sync {
    /// Append one record.
    fn append(&self, record: &CostRecord) -> Result<(), Error>;

    /// Most recent records, newest first, at most `limit`.
    fn recent(&self, limit: usize) -> Result<Vec<CostRecord>, Error>;

    /// Total records stored.
    fn len(&self) -> Result<usize, Error>;

    /// Whether the store holds no records.
    fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<CostRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CostRecordStore for MemoryRecordStore {
    fn append(&self, record: &CostRecord) -> Result<(), Error> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CostRecord>, Error> {
        let records = self.records.lock();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    fn len(&self) -> Result<usize, Error> {
        Ok(self.records.lock().len())
    }
}

/// Sled-backed record store.
///
/// Keys are `timestamp_micros (BE) || counter (BE)` so iteration order is
/// append order and collisions within one microsecond stay distinct.
pub struct SledRecordStore {
    tree: sled::Tree,
}

impl SledRecordStore {
    /// Tree name within the sled database.
    const TREE: &'static str = "cost_records";

    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::open(path)?;
        let tree = db.open_tree(Self::TREE)?;
        Ok(Self { tree })
    }

    /// Wrap a tree from an already-open database.
    pub fn with_db(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE)?;
        Ok(Self { tree })
    }

    fn key_for(record: &CostRecord) -> [u8; 16] {
        let micros = record.at.timestamp_micros().max(0) as u64;
        let counter = RECORD_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut key = [0u8; 16];
        key[0..8].copy_from_slice(&micros.to_be_bytes());
        key[8..16].copy_from_slice(&counter.to_be_bytes());
        key
    }
}

impl CostRecordStore for SledRecordStore {
    fn append(&self, record: &CostRecord) -> Result<(), Error> {
        let key = Self::key_for(record);
        let value =
            serde_json::to_vec(record).map_err(|e| Error::Serialization(e.to_string()))?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CostRecord>, Error> {
        let mut records = Vec::with_capacity(limit.min(64));
        for item in self.tree.iter().rev().take(limit) {
            let (_, value) = item?;
            let record: CostRecord = serde_json::from_slice(&value)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, Error> {
        Ok(self.tree.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cost: f64, text: &str) -> CostRecord {
        CostRecord::new(QueryCategory::Report, 1_000, 10_485_760, cost, text, 250)
    }

    #[test]
    fn test_query_text_truncated() {
        let long = "SELECT ".repeat(200);
        let record = record(0.01, &long);
        assert_eq!(record.query_text.len(), QUERY_TEXT_LIMIT);
    }

    #[test]
    fn test_memory_store_recent_newest_first() {
        let store = MemoryRecordStore::new();
        store.append(&record(0.01, "SELECT 1")).unwrap();
        store.append(&record(0.02, "SELECT 2")).unwrap();
        store.append(&record(0.03, "SELECT 3")).unwrap();

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query_text, "SELECT 3");
        assert_eq!(recent[1].query_text, "SELECT 2");
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_sled_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(dir.path()).unwrap();

        store.append(&record(0.01, "SELECT 1")).unwrap();
        store.append(&record(0.02, "SELECT 2")).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query_text, "SELECT 2");
        assert!((recent[0].estimated_cost - 0.02).abs() < 1e-9);
        assert_eq!(recent[0].category, QueryCategory::Report);
    }

    #[test]
    fn test_sled_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledRecordStore::open(dir.path()).unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store.recent(5).unwrap().is_empty());
    }
}
