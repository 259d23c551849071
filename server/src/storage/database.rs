//! High-level vital-sign store.
//!
//! Wraps a [`BTree`] with the file naming and queries the HTTP layer needs.

use std::path::Path;

use crate::storage::btree::{BTree, BTreeError, Key, StorePaths, TreeStats};
use crate::storage::record::VitalRecord;

/// A vital-sign store on disk.
///
/// Not safe for concurrent use; callers sharing a store must serialize
/// access, e.g. behind a mutex.
#[derive(Debug)]
pub struct VitalStore {
    tree: BTree,
}

impl VitalStore {
    /// Open the store rooted at `base_path`, creating its files if needed.
    ///
    /// The store consists of `{base_path}_index.dat`, `{base_path}_data.dat`
    /// and `{base_path}_meta.dat`.
    pub fn open(base_path: &Path, max_degree: usize) -> Result<Self, BTreeError> {
        let paths = StorePaths::from_base(base_path);
        let existed = paths.meta.exists();

        let tree = BTree::create_or_open(&paths, max_degree)?;

        if existed {
            tracing::debug!(
                "opened vital store {}: {} records, root at {}",
                base_path.display(),
                tree.record_count(),
                tree.root_offset()
            );
        } else {
            tracing::debug!(
                "created vital store {} with max degree {max_degree}",
                base_path.display()
            );
        }

        Ok(Self { tree })
    }

    /// Record a reading under `timestamp`.
    pub fn insert(&mut self, timestamp: Key, record: &VitalRecord) -> Result<(), BTreeError> {
        self.tree.insert(timestamp, record)
    }

    pub fn search(&mut self, timestamp: Key) -> Result<Option<VitalRecord>, BTreeError> {
        self.tree.search(timestamp)
    }

    /// Readings with `low <= timestamp <= high`, oldest first.
    pub fn range_query(&mut self, low: Key, high: Key) -> Result<Vec<VitalRecord>, BTreeError> {
        self.tree.range_query(low, high)
    }

    /// Readings for one patient within `[low, high]`, oldest first.
    pub fn readings_for_patient(
        &mut self,
        patient_id: i32,
        low: Key,
        high: Key,
    ) -> Result<Vec<VitalRecord>, BTreeError> {
        let mut readings = self.tree.range_query(low, high)?;
        readings.retain(|r| r.patient_id == patient_id);
        Ok(readings)
    }

    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.tree.record_count()
    }

    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.tree.max_degree()
    }

    /// Check the on-disk tree for structural damage.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        self.tree.verify()
    }

    pub fn sync(&self) -> Result<(), BTreeError> {
        self.tree.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::vital;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_three_files() {
        let dir = tempdir().expect("create temp dir");
        let base = dir.path().join("icu");

        let store = VitalStore::open(&base, 4).expect("open store");
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.max_degree(), 4);

        assert!(dir.path().join("icu_index.dat").exists());
        assert!(dir.path().join("icu_data.dat").exists());
        assert!(dir.path().join("icu_meta.dat").exists());
    }

    #[test]
    fn test_readings_for_patient_filters() {
        let dir = tempdir().expect("create temp dir");
        let mut store = VitalStore::open(&dir.path().join("icu"), 3).expect("open store");

        for ts in 0..30 {
            let patient = if ts % 3 == 0 { 101 } else { 202 };
            store.insert(ts, &vital(patient, ts)).expect("insert");
        }

        let readings = store.readings_for_patient(101, 5, 20).expect("query");
        let timestamps: Vec<i64> = readings.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![6, 9, 12, 15, 18]);

        assert!(store.readings_for_patient(303, 0, 30).expect("query").is_empty());
    }

    #[test]
    fn test_store_reopens_with_data() {
        let dir = tempdir().expect("create temp dir");
        let base = dir.path().join("icu");

        {
            let mut store = VitalStore::open(&base, 3).expect("open store");
            store.insert(100, &vital(1, 100)).expect("insert");
            store.insert(200, &vital(2, 200)).expect("insert");
            store.sync().expect("sync");
        }

        let mut store = VitalStore::open(&base, 3).expect("reopen store");
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.search(200).expect("search"), Some(vital(2, 200)));
        assert_eq!(store.range_query(0, 1000).expect("range").len(), 2);
        assert_eq!(store.verify().expect("verify").entry_count, 2);
    }
}
