//! Disk-based B-tree index keyed by timestamp.
//!
//! # Structure
//!
//! The tree is split across three files:
//! - index file: fixed-size nodes, each identified by its byte offset
//! - data file: fixed-size records, referenced from nodes by byte offset
//! - metadata file: root offset, allocation cursors and record count
//!
//! Internal nodes hold entries too, so a search may stop above the leaves.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use vitals::storage::btree::{BTree, StorePaths};
//!
//! let paths = StorePaths::from_base(Path::new("./data/vitals"));
//! let mut tree = BTree::create_or_open(&paths, 50)?;
//! let readings = tree.range_query(1_733_308_200, 1_733_311_800)?;
//! # Ok::<(), vitals::storage::btree::BTreeError>(())
//! ```

mod node;
mod tree;

pub use node::{
    Key, MAX_DEGREE, MIN_DEGREE, Node, NodeError, NodeKind, NodeLayout, NodeOffset, RecordOffset,
};
pub use tree::{BTree, BTreeError, BTreeErrorKind, StorePaths, TreeStats};
