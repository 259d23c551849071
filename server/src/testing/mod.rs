//! Helpers shared by unit tests across the crate.

use tempfile::{TempDir, tempdir};

use crate::storage::{StorePaths, VitalRecord};

/// Build a plausible reading whose measurements are derived from `timestamp`,
/// so two readings with different timestamps are distinguishable.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn vital(patient_id: i32, timestamp: i64) -> VitalRecord {
    let jitter = timestamp.rem_euclid(20) as i32;
    VitalRecord {
        patient_id,
        timestamp,
        heart_rate: 60 + jitter,
        systolic_bp: 110 + jitter,
        diastolic_bp: 70 + jitter / 2,
        spo2: 95 + jitter % 5,
        temperature: 36.5 + jitter as f32 / 10.0,
    }
}

/// Fresh store paths inside a temporary directory.
///
/// The directory is removed when the returned `TempDir` is dropped, so
/// callers must keep it alive for the duration of the test.
pub fn temp_store_paths() -> (TempDir, StorePaths) {
    let dir = tempdir().expect("create temp dir");
    let paths = StorePaths::from_base(&dir.path().join("vitals"));
    (dir, paths)
}
