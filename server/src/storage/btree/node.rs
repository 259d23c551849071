//! B-tree node type and fixed-width serialization.
//!
//! Every node of a given tree encodes to the same number of bytes, decided by
//! the tree's maximum degree `t` alone. Unused key and child slots are written
//! as zeroes and ignored on decode.
//!
//! Node layout (little-endian):
//! - `kind`: 1 byte (0 = internal, 1 = leaf)
//! - reserved: 1 byte
//! - `key_count`: 2 bytes
//! - `checksum`: 4 bytes (CRC32 of the node with this field zeroed)
//! - `self_offset`: 8 bytes
//! - keys: `2t - 1` x 8 bytes
//! - record offsets: `2t - 1` x 8 bytes
//! - child offsets: `2t` x 8 bytes
//!
//! Total: `48 * t` bytes

use std::fmt;

/// Index key: a timestamp in seconds since the Unix epoch.
pub type Key = i64;

/// Smallest degree that yields a useful tree.
pub const MIN_DEGREE: usize = 2;

/// Largest supported degree; keeps the key count within its u16 field.
pub const MAX_DEGREE: usize = 4096;

/// Node header size in bytes.
const HEADER_SIZE: usize = 16;

/// Size of a single key or offset slot.
const SLOT_SIZE: usize = 8;

/// Header field offsets.
mod offsets {
    pub const KIND: usize = 0;
    pub const KEY_COUNT: usize = 2;
    pub const CHECKSUM: usize = 4;
    pub const SELF_OFFSET: usize = 8;
}

/// Byte offset of a node inside the index file.
///
/// This is the node's only identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeOffset(pub u64);

/// Byte offset of a record inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordOffset(pub u64);

impl fmt::Display for NodeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node@{}", self.0)
    }
}

impl fmt::Display for RecordOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record@{}", self.0)
    }
}

/// Node kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Size arithmetic for nodes of a tree with a fixed maximum degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    max_degree: usize,
}

impl NodeLayout {
    /// Create a layout for the given degree.
    ///
    /// Returns `None` if the degree is outside `MIN_DEGREE..=MAX_DEGREE`.
    #[must_use]
    pub const fn new(max_degree: usize) -> Option<Self> {
        if max_degree < MIN_DEGREE || max_degree > MAX_DEGREE {
            return None;
        }
        Some(Self { max_degree })
    }

    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Maximum keys per node (`2t - 1`).
    #[must_use]
    pub const fn max_keys(&self) -> usize {
        2 * self.max_degree - 1
    }

    /// Maximum children per internal node (`2t`).
    #[must_use]
    pub const fn max_children(&self) -> usize {
        2 * self.max_degree
    }

    /// Minimum keys in any non-root node (`t - 1`).
    #[must_use]
    pub const fn min_keys(&self) -> usize {
        self.max_degree - 1
    }

    /// Encoded size of one node in bytes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        HEADER_SIZE + SLOT_SIZE * (2 * self.max_keys() + self.max_children())
    }

    const fn keys_start(&self) -> usize {
        HEADER_SIZE
    }

    const fn record_offsets_start(&self) -> usize {
        self.keys_start() + SLOT_SIZE * self.max_keys()
    }

    const fn children_start(&self) -> usize {
        self.record_offsets_start() + SLOT_SIZE * self.max_keys()
    }
}

/// A B-tree node as loaded from (or about to be written to) the index file.
///
/// `record_offsets` runs parallel to `keys`. `children` is empty for leaves
/// and has exactly `keys.len() + 1` entries for internal nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Where this node lives in the index file.
    pub offset: NodeOffset,
    pub kind: NodeKind,
    pub keys: Vec<Key>,
    pub record_offsets: Vec<RecordOffset>,
    pub children: Vec<NodeOffset>,
}

impl Node {
    /// Create an empty leaf at the given offset.
    #[must_use]
    pub fn leaf(offset: NodeOffset, layout: &NodeLayout) -> Self {
        Self {
            offset,
            kind: NodeKind::Leaf,
            keys: Vec::with_capacity(layout.max_keys()),
            record_offsets: Vec::with_capacity(layout.max_keys()),
            children: Vec::new(),
        }
    }

    /// Create an internal node with no keys and a single child.
    ///
    /// This is the shape of a fresh root just before its old root child splits.
    #[must_use]
    pub fn internal_with_child(offset: NodeOffset, child: NodeOffset, layout: &NodeLayout) -> Self {
        let mut children = Vec::with_capacity(layout.max_children());
        children.push(child);
        Self {
            offset,
            kind: NodeKind::Internal,
            keys: Vec::with_capacity(layout.max_keys()),
            record_offsets: Vec::with_capacity(layout.max_keys()),
            children,
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Check if the node holds the maximum number of keys.
    #[must_use]
    pub fn is_full(&self, layout: &NodeLayout) -> bool {
        self.keys.len() >= layout.max_keys()
    }

    /// Index of the first key that is `>= key`.
    #[must_use]
    pub fn lower_bound(&self, key: Key) -> usize {
        self.keys.partition_point(|k| *k < key)
    }

    /// Index just past the last key that is `<= key`.
    ///
    /// Used for insertion, so equal keys land to the right of existing ones.
    #[must_use]
    pub fn upper_bound(&self, key: Key) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    /// Place a key into a leaf, after any keys equal to it.
    pub fn insert_entry(&mut self, key: Key, record: RecordOffset) {
        let idx = self.upper_bound(key);
        self.keys.insert(idx, key);
        self.record_offsets.insert(idx, record);
    }

    /// Serialize the node to its fixed-width form.
    #[must_use]
    pub fn encode(&self, layout: &NodeLayout) -> Vec<u8> {
        let mut buf = vec![0u8; layout.encoded_len()];

        buf[offsets::KIND] = self.kind as u8;
        // key count is bounded by max_keys, which fits in u16 for MAX_DEGREE
        #[allow(clippy::cast_possible_truncation)]
        let key_count = self.keys.len() as u16;
        buf[offsets::KEY_COUNT..offsets::CHECKSUM].copy_from_slice(&key_count.to_le_bytes());
        buf[offsets::SELF_OFFSET..HEADER_SIZE].copy_from_slice(&self.offset.0.to_le_bytes());

        write_slots(&mut buf, layout.keys_start(), self.keys.iter().map(|k| k.to_le_bytes()));
        write_slots(
            &mut buf,
            layout.record_offsets_start(),
            self.record_offsets.iter().map(|r| r.0.to_le_bytes()),
        );
        write_slots(
            &mut buf,
            layout.children_start(),
            self.children.iter().map(|c| c.0.to_le_bytes()),
        );

        let checksum = compute_checksum(&buf);
        buf[offsets::CHECKSUM..offsets::SELF_OFFSET].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserialize a node that was read from `offset`.
    pub fn decode(layout: &NodeLayout, offset: NodeOffset, bytes: &[u8]) -> Result<Self, NodeError> {
        if bytes.len() != layout.encoded_len() {
            return Err(NodeError::Truncated {
                expected: layout.encoded_len(),
                actual: bytes.len(),
            });
        }

        let stored_checksum = read_u32(bytes, offsets::CHECKSUM);
        let actual_checksum = compute_checksum(bytes);
        if stored_checksum != actual_checksum {
            return Err(NodeError::ChecksumMismatch {
                expected: stored_checksum,
                actual: actual_checksum,
            });
        }

        let kind = NodeKind::try_from(bytes[offsets::KIND]).map_err(NodeError::InvalidKind)?;

        let key_count = usize::from(u16::from_le_bytes([
            bytes[offsets::KEY_COUNT],
            bytes[offsets::KEY_COUNT + 1],
        ]));
        if key_count > layout.max_keys() {
            return Err(NodeError::KeyCountOutOfRange {
                key_count,
                max_keys: layout.max_keys(),
            });
        }

        let stored_offset = NodeOffset(read_u64(bytes, offsets::SELF_OFFSET));
        if stored_offset != offset {
            return Err(NodeError::OffsetMismatch {
                stored: stored_offset,
                read_from: offset,
            });
        }

        let mut keys = Vec::with_capacity(layout.max_keys());
        let mut record_offsets = Vec::with_capacity(layout.max_keys());
        for i in 0..key_count {
            keys.push(read_i64(bytes, layout.keys_start() + i * SLOT_SIZE));
            record_offsets.push(RecordOffset(read_u64(
                bytes,
                layout.record_offsets_start() + i * SLOT_SIZE,
            )));
        }

        if keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(NodeError::KeysOutOfOrder);
        }

        let children = match kind {
            NodeKind::Leaf => Vec::new(),
            NodeKind::Internal => {
                let mut children = Vec::with_capacity(layout.max_children());
                for i in 0..=key_count {
                    children.push(NodeOffset(read_u64(
                        bytes,
                        layout.children_start() + i * SLOT_SIZE,
                    )));
                }
                children
            }
        };

        Ok(Self {
            offset,
            kind,
            keys,
            record_offsets,
            children,
        })
    }
}

/// Write consecutive 8-byte slots starting at `start`.
fn write_slots(buf: &mut [u8], start: usize, slots: impl Iterator<Item = [u8; SLOT_SIZE]>) {
    for (i, slot) in slots.enumerate() {
        let at = start + i * SLOT_SIZE;
        buf[at..at + SLOT_SIZE].copy_from_slice(&slot);
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(out)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut out = [0u8; SLOT_SIZE];
    out.copy_from_slice(&bytes[at..at + SLOT_SIZE]);
    u64::from_le_bytes(out)
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    let mut out = [0u8; SLOT_SIZE];
    out.copy_from_slice(&bytes[at..at + SLOT_SIZE]);
    i64::from_le_bytes(out)
}

/// CRC32 of an encoded node, treating the checksum field as zero.
fn compute_checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..offsets::CHECKSUM]);
    hasher.update(&[0u8; 4]);
    hasher.update(&bytes[offsets::SELF_OFFSET..]);
    hasher.finalize()
}

/// Errors that can occur when decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Fewer (or more) bytes than one encoded node.
    Truncated { expected: usize, actual: usize },
    /// Unknown node kind byte.
    InvalidKind(u8),
    /// Key count exceeds the layout's capacity.
    KeyCountOutOfRange { key_count: usize, max_keys: usize },
    /// Stored checksum does not match the node contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The node claims to live somewhere other than where it was read.
    OffsetMismatch {
        stored: NodeOffset,
        read_from: NodeOffset,
    },
    /// Keys are not in non-decreasing order.
    KeysOutOfOrder,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "node truncated: expected {expected} bytes, got {actual}")
            }
            Self::InvalidKind(v) => write!(f, "invalid node kind: 0x{v:02x}"),
            Self::KeyCountOutOfRange {
                key_count,
                max_keys,
            } => write!(f, "key count {key_count} exceeds maximum {max_keys}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "node checksum mismatch: expected {expected}, got {actual}")
            }
            Self::OffsetMismatch { stored, read_from } => {
                write!(f, "node read from {read_from} claims to be {stored}")
            }
            Self::KeysOutOfOrder => write!(f, "node keys out of order"),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(t: usize) -> NodeLayout {
        NodeLayout::new(t).expect("valid degree")
    }

    #[test]
    fn test_layout_bounds() {
        assert!(NodeLayout::new(0).is_none());
        assert!(NodeLayout::new(1).is_none());
        assert!(NodeLayout::new(MAX_DEGREE + 1).is_none());

        let l = layout(3);
        assert_eq!(l.max_keys(), 5);
        assert_eq!(l.max_children(), 6);
        assert_eq!(l.min_keys(), 2);
        assert_eq!(l.encoded_len(), 48 * 3);
    }

    #[test]
    fn test_encoded_len_independent_of_occupancy() {
        let l = layout(4);
        let empty = Node::leaf(NodeOffset(0), &l);

        let mut full = Node::leaf(NodeOffset(0), &l);
        for i in 0..l.max_keys() {
            full.insert_entry(i as Key, RecordOffset(i as u64 * 32));
        }

        assert_eq!(empty.encode(&l).len(), l.encoded_len());
        assert_eq!(full.encode(&l).len(), l.encoded_len());
    }

    #[test]
    fn test_leaf_roundtrip() {
        let l = layout(3);
        let mut node = Node::leaf(NodeOffset(144), &l);
        node.insert_entry(30, RecordOffset(64));
        node.insert_entry(10, RecordOffset(0));
        node.insert_entry(20, RecordOffset(32));

        let bytes = node.encode(&l);
        let restored = Node::decode(&l, NodeOffset(144), &bytes).expect("should decode");

        assert_eq!(restored, node);
        assert_eq!(restored.keys, vec![10, 20, 30]);
        assert_eq!(
            restored.record_offsets,
            vec![RecordOffset(0), RecordOffset(32), RecordOffset(64)]
        );
        assert!(restored.children.is_empty());
    }

    #[test]
    fn test_internal_roundtrip() {
        let l = layout(3);
        let node = Node {
            offset: NodeOffset(288),
            kind: NodeKind::Internal,
            keys: vec![-5, 7],
            record_offsets: vec![RecordOffset(96), RecordOffset(128)],
            children: vec![NodeOffset(0), NodeOffset(144), NodeOffset(432)],
        };

        let bytes = node.encode(&l);
        let restored = Node::decode(&l, NodeOffset(288), &bytes).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_duplicate_keys_insert_to_the_right() {
        let l = layout(3);
        let mut node = Node::leaf(NodeOffset(0), &l);
        node.insert_entry(5, RecordOffset(0));
        node.insert_entry(5, RecordOffset(32));
        node.insert_entry(1, RecordOffset(64));

        assert_eq!(node.keys, vec![1, 5, 5]);
        // the later insert of key 5 sits after the earlier one
        assert_eq!(node.record_offsets[1], RecordOffset(0));
        assert_eq!(node.record_offsets[2], RecordOffset(32));
    }

    #[test]
    fn test_bounds() {
        let l = layout(3);
        let mut node = Node::leaf(NodeOffset(0), &l);
        for k in [10, 20, 20, 30] {
            node.insert_entry(k, RecordOffset(0));
        }

        assert_eq!(node.lower_bound(5), 0);
        assert_eq!(node.lower_bound(20), 1);
        assert_eq!(node.upper_bound(20), 3);
        assert_eq!(node.upper_bound(35), 4);
    }

    #[test]
    fn test_decode_truncated() {
        let l = layout(3);
        let bytes = Node::leaf(NodeOffset(0), &l).encode(&l);

        let result = Node::decode(&l, NodeOffset(0), &bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(NodeError::Truncated { .. })));
    }

    #[test]
    fn test_decode_detects_corruption() {
        let l = layout(3);
        let mut node = Node::leaf(NodeOffset(0), &l);
        node.insert_entry(42, RecordOffset(0));
        let mut bytes = node.encode(&l);

        bytes[HEADER_SIZE] ^= 0xFF;
        let result = Node::decode(&l, NodeOffset(0), &bytes);
        assert!(matches!(result, Err(NodeError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_decode_invalid_kind() {
        let l = layout(3);
        let mut bytes = Node::leaf(NodeOffset(0), &l).encode(&l);

        // Rewrite the kind and fix up the checksum so only the kind is wrong
        bytes[offsets::KIND] = 7;
        let checksum = compute_checksum(&bytes);
        bytes[offsets::CHECKSUM..offsets::SELF_OFFSET].copy_from_slice(&checksum.to_le_bytes());

        let result = Node::decode(&l, NodeOffset(0), &bytes);
        assert_eq!(result, Err(NodeError::InvalidKind(7)));
    }

    #[test]
    fn test_decode_wrong_offset() {
        let l = layout(3);
        let bytes = Node::leaf(NodeOffset(144), &l).encode(&l);

        let result = Node::decode(&l, NodeOffset(288), &bytes);
        assert!(matches!(result, Err(NodeError::OffsetMismatch { .. })));
    }

    #[test]
    fn test_all_zero_bytes_are_not_a_valid_node() {
        let l = layout(3);
        let bytes = vec![0u8; l.encoded_len()];

        // A zero-filled slot must not be mistaken for an empty node.
        assert!(Node::decode(&l, NodeOffset(0), &bytes).is_err());
    }
}
