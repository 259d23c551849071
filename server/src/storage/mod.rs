//! Vital-sign storage engine.
//!
//! A B-tree index over reading timestamps, persisted across three files.
//!
//! # File Format
//!
//! - `{base}_index.dat`: B-tree nodes, all the same size for a given degree
//! - `{base}_data.dat`: 32-byte vital-sign records
//! - `{base}_meta.dat`: one 52-byte metadata record
//!
//! Both data-bearing files are append-only arenas; space is never reclaimed.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use vitals::storage::{VitalRecord, VitalStore};
//!
//! let mut store = VitalStore::open(Path::new("./data/vitals"), 50)?;
//! let reading = VitalRecord {
//!     patient_id: 101,
//!     timestamp: 1_733_308_200,
//!     heart_rate: 75,
//!     systolic_bp: 120,
//!     diastolic_bp: 80,
//!     spo2: 98,
//!     temperature: 37.2,
//! };
//! store.insert(reading.timestamp, &reading)?;
//! store.sync()?;
//! # Ok::<(), vitals::storage::BTreeError>(())
//! ```

mod arena;
pub mod btree;
mod database;
mod meta;
mod record;

pub use arena::ArenaError;
pub use btree::{BTree, BTreeError, BTreeErrorKind, StorePaths, TreeStats};
pub use database::VitalStore;
pub use meta::{META_SIZE, MetaError, Metadata};
pub use record::{RECORD_SIZE, RecordError, VitalRecord};
