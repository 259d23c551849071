//! Store metadata record and the file that holds it.
//!
//! The metadata file contains exactly one fixed-size record. It is the only
//! source of truth for reopening a store: the root offset and both arena
//! cursors are restored from it.
//!
//! Layout (little-endian):
//! - magic: 8 bytes (`VITALBTR`)
//! - `format_version`: 4 bytes
//! - `max_degree`: 4 bytes
//! - `root_offset`: 8 bytes
//! - `next_node_offset`: 8 bytes
//! - `next_record_offset`: 8 bytes
//! - `total_records`: 8 bytes
//! - checksum: 4 bytes (CRC32 of the preceding 48 bytes)
//!
//! Total: 52 bytes

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::btree::NodeOffset;

/// Magic number identifying a vitals metadata file.
pub const MAGIC: [u8; 8] = *b"VITALBTR";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the encoded metadata record in bytes.
pub const META_SIZE: usize = 52;

mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const MAX_DEGREE: usize = 12;
    pub const ROOT_OFFSET: usize = 16;
    pub const NEXT_NODE_OFFSET: usize = 24;
    pub const NEXT_RECORD_OFFSET: usize = 32;
    pub const TOTAL_RECORDS: usize = 40;
    pub const CHECKSUM: usize = 48;
}

/// Tree configuration and allocation bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Degree the store was created with. Fixed for its lifetime.
    pub max_degree: u32,
    pub root_offset: NodeOffset,
    /// Next free byte offset in the index file.
    pub next_node_offset: u64,
    /// Next free byte offset in the data file.
    pub next_record_offset: u64,
    pub total_records: u64,
}

impl Metadata {
    /// Serialize to the fixed-width on-disk form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[offsets::MAGIC..offsets::FORMAT_VERSION].copy_from_slice(&MAGIC);
        buf[offsets::FORMAT_VERSION..offsets::MAX_DEGREE]
            .copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[offsets::MAX_DEGREE..offsets::ROOT_OFFSET]
            .copy_from_slice(&self.max_degree.to_le_bytes());
        buf[offsets::ROOT_OFFSET..offsets::NEXT_NODE_OFFSET]
            .copy_from_slice(&self.root_offset.0.to_le_bytes());
        buf[offsets::NEXT_NODE_OFFSET..offsets::NEXT_RECORD_OFFSET]
            .copy_from_slice(&self.next_node_offset.to_le_bytes());
        buf[offsets::NEXT_RECORD_OFFSET..offsets::TOTAL_RECORDS]
            .copy_from_slice(&self.next_record_offset.to_le_bytes());
        buf[offsets::TOTAL_RECORDS..offsets::CHECKSUM]
            .copy_from_slice(&self.total_records.to_le_bytes());

        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        buf[offsets::CHECKSUM..META_SIZE].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserialize from the fixed-width on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetaError> {
        let bytes: &[u8; META_SIZE] = bytes
            .get(..META_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(MetaError::Truncated {
                actual: bytes.len(),
            })?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[offsets::MAGIC..offsets::FORMAT_VERSION]);
        if magic != MAGIC {
            return Err(MetaError::InvalidMagic(magic));
        }

        let stored = read_u32(bytes, offsets::CHECKSUM);
        let actual = crc32fast::hash(&bytes[..offsets::CHECKSUM]);
        if stored != actual {
            return Err(MetaError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let format_version = read_u32(bytes, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(MetaError::UnsupportedVersion(format_version));
        }

        Ok(Self {
            max_degree: read_u32(bytes, offsets::MAX_DEGREE),
            root_offset: NodeOffset(read_u64(bytes, offsets::ROOT_OFFSET)),
            next_node_offset: read_u64(bytes, offsets::NEXT_NODE_OFFSET),
            next_record_offset: read_u64(bytes, offsets::NEXT_RECORD_OFFSET),
            total_records: read_u64(bytes, offsets::TOTAL_RECORDS),
        })
    }
}

fn read_u32(bytes: &[u8; META_SIZE], at: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(out)
}

fn read_u64(bytes: &[u8; META_SIZE], at: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(out)
}

/// Owner of the metadata file.
#[derive(Debug)]
pub struct MetaFile {
    file: File,
    path: PathBuf,
}

impl MetaFile {
    /// Open the metadata file, creating an empty one if it does not exist.
    pub fn open(path: &Path) -> Result<Self, MetaError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| MetaError::Io(path.to_path_buf(), e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Read the stored metadata.
    ///
    /// Returns `Ok(None)` for an empty file, meaning the store has never been
    /// initialized.
    pub fn load(&mut self) -> Result<Option<Metadata>, MetaError> {
        let mut bytes = Vec::with_capacity(META_SIZE);
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| MetaError::Io(self.error_path(), e))?;
        self.file
            .read_to_end(&mut bytes)
            .map_err(|e| MetaError::Io(self.error_path(), e))?;

        if bytes.is_empty() {
            return Ok(None);
        }
        Metadata::from_bytes(&bytes).map(Some)
    }

    /// Rewrite the whole metadata record.
    pub fn store(&mut self, meta: &Metadata) -> Result<(), MetaError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| MetaError::Io(self.error_path(), e))?;
        self.file
            .write_all(&meta.to_bytes())
            .map_err(|e| MetaError::Io(self.error_path(), e))
    }

    pub fn sync(&self) -> Result<(), MetaError> {
        self.file
            .sync_all()
            .map_err(|e| MetaError::Io(self.error_path(), e))
    }

    /// Owned copy of the backing path, for error values.
    #[allow(clippy::disallowed_methods)] // Clone needed to move the path into the error
    fn error_path(&self) -> PathBuf {
        self.path.clone()
    }
}

/// Errors that can occur when reading or writing metadata.
#[derive(Debug)]
pub enum MetaError {
    /// I/O error on the metadata file.
    Io(PathBuf, std::io::Error),
    /// File holds fewer bytes than one metadata record.
    Truncated { actual: usize },
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Stored checksum does not match the record contents.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl MetaError {
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(..))
    }
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "I/O error on {}: {e}", path.display()),
            Self::Truncated { actual } => {
                write!(f, "metadata truncated: expected {META_SIZE} bytes, got {actual}")
            }
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "metadata checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Metadata {
        Metadata {
            max_degree: 50,
            root_offset: NodeOffset(2400),
            next_node_offset: 7200,
            next_record_offset: 32_000,
            total_records: 1000,
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), META_SIZE);
        assert_eq!(&bytes[..8], b"VITALBTR");

        let restored = Metadata::from_bytes(&bytes).expect("should parse");
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_metadata_invalid_magic() {
        let mut bytes = sample().to_bytes();
        bytes[..8].copy_from_slice(b"BADMAGIC");

        let result = Metadata::from_bytes(&bytes);
        assert!(matches!(result, Err(MetaError::InvalidMagic(_))));
    }

    #[test]
    fn test_metadata_bit_flip_detected() {
        let mut bytes = sample().to_bytes();
        bytes[offsets::TOTAL_RECORDS] ^= 0x01;

        let result = Metadata::from_bytes(&bytes);
        assert!(matches!(result, Err(MetaError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_metadata_unsupported_version() {
        let mut bytes = sample().to_bytes();
        bytes[offsets::FORMAT_VERSION..offsets::MAX_DEGREE].copy_from_slice(&2u32.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[..offsets::CHECKSUM]);
        bytes[offsets::CHECKSUM..].copy_from_slice(&checksum.to_le_bytes());

        let result = Metadata::from_bytes(&bytes);
        assert!(matches!(result, Err(MetaError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_metadata_truncated() {
        let bytes = sample().to_bytes();
        let result = Metadata::from_bytes(&bytes[..30]);
        assert!(matches!(result, Err(MetaError::Truncated { actual: 30 })));
    }

    #[test]
    fn test_meta_file_empty_means_fresh() {
        let dir = tempdir().expect("create temp dir");
        let mut file = MetaFile::open(&dir.path().join("meta.dat")).expect("open");

        assert_eq!(file.load().expect("load"), None);
    }

    #[test]
    fn test_meta_file_store_and_reload() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("meta.dat");

        {
            let mut file = MetaFile::open(&path).expect("open");
            file.store(&sample()).expect("store");

            let mut updated = sample();
            updated.total_records += 1;
            file.store(&updated).expect("store again");
            file.sync().expect("sync");
        }

        let mut file = MetaFile::open(&path).expect("reopen");
        let loaded = file.load().expect("load").expect("metadata present");
        assert_eq!(loaded.total_records, 1001);
        assert_eq!(
            std::fs::metadata(&path).expect("stat").len(),
            META_SIZE as u64
        );
    }

    #[test]
    fn test_meta_file_partial_record_is_corrupt() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("meta.dat");
        std::fs::write(&path, &sample().to_bytes()[..10]).expect("write");

        let mut file = MetaFile::open(&path).expect("open");
        let err = file.load().expect_err("should fail");
        assert!(err.is_corruption());
    }
}
