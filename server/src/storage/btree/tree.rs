//! Disk-resident B-tree over timestamp keys.
//!
//! Nodes live in the index file and are addressed by byte offset; records live
//! in the data file and are likewise addressed by offset. Both files grow by
//! appending fixed-size slots. A third file holds the metadata record that
//! ties them together.
//!
//! Insertion uses preemptive splitting: any full node met on the way down is
//! split before it is entered, so the leaf always has room for the new key.
//! A key equal to a separator descends to the separator's right. A key equal
//! to a separator promoted by a split made during that same insert stays on
//! its left, whether the split was of the root or of an inner child.
//!
//! No node is cached between operations. Each step loads a node, mutates it,
//! writes it back and drops it.

// Degrees are bounded by MAX_DEGREE, so they fit in u32.
#![allow(clippy::cast_possible_truncation)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::storage::arena::{Arena, ArenaError};
use crate::storage::btree::node::{Key, Node, NodeError, NodeLayout, NodeOffset, RecordOffset};
use crate::storage::meta::{MetaError, MetaFile, Metadata};
use crate::storage::record::{RECORD_SIZE, RecordError, VitalRecord};

/// Locations of the three files that make up one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub index: PathBuf,
    pub data: PathBuf,
    pub meta: PathBuf,
}

impl StorePaths {
    /// Derive `{base}_index.dat`, `{base}_data.dat` and `{base}_meta.dat`.
    #[must_use]
    pub fn from_base(base: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name: OsString = base.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            index: with_suffix("_index.dat"),
            data: with_suffix("_data.dat"),
            meta: with_suffix("_meta.dat"),
        }
    }
}

/// Shape of the tree as observed by [`BTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, counting the root. A lone leaf root has depth 1.
    pub depth: usize,
    pub node_count: u64,
    pub entry_count: u64,
}

/// A B-tree store backed by an index file, a data file and a metadata file.
#[derive(Debug)]
pub struct BTree {
    layout: NodeLayout,
    nodes: Arena,
    records: Arena,
    meta: MetaFile,
    root: NodeOffset,
    total_records: u64,
}

impl BTree {
    /// Open the store at `paths`, or initialize it if it has no metadata yet.
    ///
    /// A fresh store gets a single empty leaf as its root. An existing store
    /// must have been created with the same `max_degree`.
    pub fn create_or_open(paths: &StorePaths, max_degree: usize) -> Result<Self, BTreeError> {
        let layout = NodeLayout::new(max_degree).ok_or(BTreeError::InvalidDegree(max_degree))?;
        let mut meta = MetaFile::open(&paths.meta)?;

        match meta.load()? {
            Some(stored) => {
                if stored.max_degree as usize != max_degree {
                    return Err(BTreeError::DegreeMismatch {
                        stored: stored.max_degree,
                        requested: max_degree,
                    });
                }

                let nodes = Arena::open(&paths.index, layout.encoded_len(), stored.next_node_offset)?;
                let records = Arena::open(&paths.data, RECORD_SIZE, stored.next_record_offset)?;
                let mut tree = Self {
                    layout,
                    nodes,
                    records,
                    meta,
                    root: stored.root_offset,
                    total_records: stored.total_records,
                };

                // Fail at open rather than on first use if the root is unreadable
                tree.load_node(tree.root)?;
                Ok(tree)
            }
            None => {
                let nodes = Arena::open(&paths.index, layout.encoded_len(), 0)?;
                let records = Arena::open(&paths.data, RECORD_SIZE, 0)?;
                let root = NodeOffset(nodes.next_offset());
                let mut tree = Self {
                    layout,
                    nodes,
                    records,
                    meta,
                    root,
                    total_records: 0,
                };

                tree.append_node(&Node::leaf(root, &layout))?;
                tree.store_meta(0)?;
                Ok(tree)
            }
        }
    }

    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.layout.max_degree()
    }

    #[must_use]
    pub const fn root_offset(&self) -> NodeOffset {
        self.root
    }

    /// Number of records inserted since the store was created.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.total_records
    }

    /// Look up a record by key.
    ///
    /// With duplicate keys, any one of the matching records may be returned.
    pub fn search(&mut self, key: Key) -> Result<Option<VitalRecord>, BTreeError> {
        let mut node = self.load_node(self.root)?;
        loop {
            let i = node.lower_bound(key);
            if i < node.key_count() && node.keys[i] == key {
                return self.read_record(node.record_offsets[i]).map(Some);
            }
            if node.is_leaf() {
                return Ok(None);
            }
            node = self.load_node(node.children[i])?;
        }
    }

    /// All records with `low <= key <= high`, in ascending key order.
    pub fn range_query(&mut self, low: Key, high: Key) -> Result<Vec<VitalRecord>, BTreeError> {
        Ok(self
            .range_entries(low, high)?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Like [`range_query`](Self::range_query), but keeps each record's key.
    pub fn range_entries(
        &mut self,
        low: Key,
        high: Key,
    ) -> Result<Vec<(Key, VitalRecord)>, BTreeError> {
        if low > high {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        self.collect_range(self.root, low, high, &mut hits)?;

        hits.into_iter()
            .map(|(key, offset)| Ok((key, self.read_record(offset)?)))
            .collect()
    }

    /// Store `record` under `key`.
    ///
    /// Duplicate keys are kept as separate entries.
    pub fn insert(&mut self, key: Key, record: &VitalRecord) -> Result<(), BTreeError> {
        let record_offset = RecordOffset(self.records.append(&record.to_bytes())?);

        let mut node = self.load_node(self.root)?;
        if node.is_full(&self.layout) {
            let mut new_root =
                Node::internal_with_child(self.next_node_offset(), node.offset, &self.layout);
            self.append_node(&new_root)?;
            let (left, right) = self.split_child(&mut new_root, 0, node)?;
            self.root = new_root.offset;
            node = if new_root.keys[0] < key { right } else { left };
        }

        loop {
            if node.is_leaf() {
                node.insert_entry(key, record_offset);
                self.write_node(&node)?;
                break;
            }

            let mut i = node.upper_bound(key);
            let child = self.load_node(node.children[i])?;
            let next = if child.is_full(&self.layout) {
                let (left, right) = self.split_child(&mut node, i, child)?;
                if node.keys[i] < key {
                    i += 1;
                    right
                } else {
                    left
                }
            } else {
                child
            };
            debug_assert_eq!(next.offset, node.children[i]);
            node = next;
        }

        let total_records = self.total_records + 1;
        self.store_meta(total_records)?;
        self.total_records = total_records;
        Ok(())
    }

    /// Walk the whole tree and check every structural invariant.
    ///
    /// Any violation is reported as corruption.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats {
            depth: 0,
            node_count: 0,
            entry_count: 0,
        };
        let mut leaf_depth = None;
        self.verify_node(self.root, None, None, 1, &mut leaf_depth, &mut stats)?;
        stats.depth = leaf_depth.unwrap_or(0);

        if stats.entry_count != self.total_records {
            return Err(BTreeError::InvalidStructure {
                node: self.root,
                reason: format!(
                    "tree holds {} entries but metadata counts {}",
                    stats.entry_count, self.total_records
                ),
            });
        }
        Ok(stats)
    }

    /// Flush all three files to disk.
    pub fn sync(&self) -> Result<(), BTreeError> {
        self.nodes.sync()?;
        self.records.sync()?;
        self.meta.sync()?;
        Ok(())
    }

    /// Split the full child `child`, found at `parent.children[index]`.
    ///
    /// The child keeps the lower `t - 1` keys, its middle key moves up into
    /// the parent and the rest go to a new sibling. Returns both halves.
    ///
    /// The parent is written before the truncated child. A failure between
    /// the two leaves the upper half reachable twice, never lost.
    fn split_child(
        &mut self,
        parent: &mut Node,
        index: usize,
        mut child: Node,
    ) -> Result<(Node, Node), BTreeError> {
        let mid = self.layout.min_keys();

        let mut upper_keys = child.keys.split_off(mid);
        let mut upper_records = child.record_offsets.split_off(mid);
        let sibling_keys = upper_keys.split_off(1);
        let sibling_records = upper_records.split_off(1);
        let sibling_children = if child.is_leaf() {
            Vec::new()
        } else {
            child.children.split_off(mid + 1)
        };

        let sibling = Node {
            offset: self.next_node_offset(),
            kind: child.kind,
            keys: sibling_keys,
            record_offsets: sibling_records,
            children: sibling_children,
        };

        parent.keys.insert(index, upper_keys[0]);
        parent.record_offsets.insert(index, upper_records[0]);
        parent.children.insert(index + 1, sibling.offset);

        self.append_node(&sibling)?;
        self.write_node(parent)?;
        self.write_node(&child)?;

        Ok((child, sibling))
    }

    /// In-order walk of the subtree at `offset`, collecting entries in range.
    ///
    /// Returns `true` once a key above `high` has been seen, after which
    /// nothing further right can qualify.
    fn collect_range(
        &mut self,
        offset: NodeOffset,
        low: Key,
        high: Key,
        hits: &mut Vec<(Key, RecordOffset)>,
    ) -> Result<bool, BTreeError> {
        let node = self.load_node(offset)?;

        for i in node.lower_bound(low)..node.key_count() {
            if !node.is_leaf() && self.collect_range(node.children[i], low, high, hits)? {
                return Ok(true);
            }
            if node.keys[i] > high {
                return Ok(true);
            }
            hits.push((node.keys[i], node.record_offsets[i]));
        }

        if node.is_leaf() {
            Ok(false)
        } else {
            self.collect_range(node.children[node.key_count()], low, high, hits)
        }
    }

    /// Check the subtree at `offset` against inclusive key bounds.
    fn verify_node(
        &mut self,
        offset: NodeOffset,
        lower: Option<Key>,
        upper: Option<Key>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> Result<(), BTreeError> {
        let invalid = |reason: String| BTreeError::InvalidStructure {
            node: offset,
            reason,
        };

        // A tree can never be deeper than it has nodes
        if depth as u64 > self.nodes.allocated_slots() {
            return Err(invalid("child pointers form a cycle".to_string()));
        }

        let node = self.load_node(offset)?;
        stats.node_count += 1;
        stats.entry_count += node.key_count() as u64;

        let is_root = offset == self.root;
        if !is_root && node.key_count() < self.layout.min_keys() {
            return Err(invalid(format!(
                "{} keys is below the minimum of {}",
                node.key_count(),
                self.layout.min_keys()
            )));
        }
        if !node.is_leaf() && node.key_count() == 0 {
            return Err(invalid("internal node has no keys".to_string()));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first())
            && *first < lo
        {
            return Err(invalid(format!("key {first} is below separator {lo}")));
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last())
            && *last > hi
        {
            return Err(invalid(format!("key {last} is above separator {hi}")));
        }

        if node.is_leaf() {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(invalid(format!(
                        "leaf at depth {depth}, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        for (i, child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
            let child_upper = node.keys.get(i).copied().or(upper);
            self.verify_node(*child, child_lower, child_upper, depth + 1, leaf_depth, stats)?;
        }
        Ok(())
    }

    fn load_node(&mut self, offset: NodeOffset) -> Result<Node, BTreeError> {
        let bytes = self.nodes.read(offset.0)?;
        Ok(Node::decode(&self.layout, offset, &bytes)?)
    }

    fn write_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        self.nodes.overwrite(node.offset.0, &node.encode(&self.layout))?;
        Ok(())
    }

    /// Write a node that was created at `next_node_offset()`.
    fn append_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        let offset = self.nodes.append(&node.encode(&self.layout))?;
        debug_assert_eq!(offset, node.offset.0);
        Ok(())
    }

    const fn next_node_offset(&self) -> NodeOffset {
        NodeOffset(self.nodes.next_offset())
    }

    fn read_record(&mut self, offset: RecordOffset) -> Result<VitalRecord, BTreeError> {
        let bytes = self.records.read(offset.0)?;
        Ok(VitalRecord::from_bytes(&bytes)?)
    }

    /// Persist the current root and cursors together with `total_records`.
    fn store_meta(&mut self, total_records: u64) -> Result<(), BTreeError> {
        let meta = Metadata {
            max_degree: self.layout.max_degree() as u32,
            root_offset: self.root,
            next_node_offset: self.nodes.next_offset(),
            next_record_offset: self.records.next_offset(),
            total_records,
        };
        self.meta.store(&meta)?;
        Ok(())
    }
}

/// Broad category of a [`BTreeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreeErrorKind {
    /// A backing file could not be opened, read or written.
    Io,
    /// Stored data cannot be decoded or violates tree invariants.
    Corrupt,
    /// The store was opened with unusable or conflicting settings.
    Configuration,
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Index or data file error.
    Arena(ArenaError),
    /// Metadata file error.
    Meta(MetaError),
    /// Node could not be decoded.
    Node(NodeError),
    /// Record could not be decoded.
    Record(RecordError),
    /// Nodes decode individually but do not form a valid tree.
    InvalidStructure { node: NodeOffset, reason: String },
    /// Degree outside the supported range.
    InvalidDegree(usize),
    /// Store was created with a different degree.
    DegreeMismatch { stored: u32, requested: usize },
}

impl BTreeError {
    #[must_use]
    pub const fn kind(&self) -> BTreeErrorKind {
        match self {
            Self::Arena(e) if !e.is_corruption() => BTreeErrorKind::Io,
            Self::Meta(e) if !e.is_corruption() => BTreeErrorKind::Io,
            Self::InvalidDegree(_) | Self::DegreeMismatch { .. } => BTreeErrorKind::Configuration,
            _ => BTreeErrorKind::Corrupt,
        }
    }

    /// Whether the store's contents cannot be trusted.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self.kind(), BTreeErrorKind::Corrupt)
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arena(e) => write!(f, "arena error: {e}"),
            Self::Meta(e) => write!(f, "metadata error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Record(e) => write!(f, "record error: {e}"),
            Self::InvalidStructure { node, reason } => {
                write!(f, "invalid tree structure at {node}: {reason}")
            }
            Self::InvalidDegree(d) => write!(f, "invalid max degree: {d}"),
            Self::DegreeMismatch { stored, requested } => write!(
                f,
                "store was created with max degree {stored}, opened with {requested}"
            ),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Arena(e) => Some(e),
            Self::Meta(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Record(e) => Some(e),
            Self::InvalidStructure { .. }
            | Self::InvalidDegree(_)
            | Self::DegreeMismatch { .. } => None,
        }
    }
}

impl From<ArenaError> for BTreeError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

impl From<MetaError> for BTreeError {
    fn from(e: MetaError) -> Self {
        Self::Meta(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<RecordError> for BTreeError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}
