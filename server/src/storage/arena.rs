//! Append-only arena over a single backing file.
//!
//! An arena hands out fixed-size slots at monotonically increasing byte
//! offsets. Space is never freed or reused; a slot may only be rewritten in
//! place once it has been allocated.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A fixed-slot, append-only region of a file.
#[derive(Debug)]
pub struct Arena {
    file: File,
    path: PathBuf,
    slot_size: u64,
    /// Offset of the next slot to hand out. Everything below it is allocated.
    next_offset: u64,
}

impl Arena {
    /// Open the arena file at `path`, creating it if missing.
    ///
    /// `next_offset` is the allocation cursor restored from metadata (0 for a
    /// fresh store). The file must already hold every byte below the cursor.
    pub fn open(path: &Path, slot_size: usize, next_offset: u64) -> Result<Self, ArenaError> {
        let slot_size = slot_size as u64;
        if slot_size == 0 || next_offset % slot_size != 0 {
            return Err(ArenaError::Misaligned {
                offset: next_offset,
                slot_size,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ArenaError::Io(path.to_path_buf(), e))?;

        let file_len = file
            .metadata()
            .map_err(|e| ArenaError::Io(path.to_path_buf(), e))?
            .len();
        if file_len < next_offset {
            return Err(ArenaError::FileTooShort {
                path: path.to_path_buf(),
                file_len,
                required: next_offset,
            });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            slot_size,
            next_offset,
        })
    }

    /// Offset that the next `append` will return.
    #[must_use]
    pub const fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Number of slots allocated so far.
    #[must_use]
    pub const fn allocated_slots(&self) -> u64 {
        self.next_offset / self.slot_size
    }

    /// Write a new slot at the end of the arena and return its offset.
    ///
    /// The cursor only moves once the bytes have been written.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, ArenaError> {
        self.check_len(bytes)?;

        let offset = self.next_offset;
        self.write_at(offset, bytes)?;
        self.next_offset = offset + self.slot_size;

        Ok(offset)
    }

    /// Rewrite an already allocated slot in place.
    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ArenaError> {
        self.check_len(bytes)?;
        self.check_offset(offset)?;
        self.write_at(offset, bytes)
    }

    /// Read the slot at `offset`.
    pub fn read(&mut self, offset: u64) -> Result<Vec<u8>, ArenaError> {
        self.check_offset(offset)?;

        // slot sizes are derived from in-memory layouts, so they fit in usize
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = vec![0u8; self.slot_size as usize];

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| ArenaError::Io(self.error_path(), e))?;
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                ArenaError::ShortRead {
                    path: self.error_path(),
                    offset,
                }
            } else {
                ArenaError::Io(self.error_path(), e)
            }
        })?;

        Ok(buf)
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), ArenaError> {
        self.file
            .sync_all()
            .map_err(|e| ArenaError::Io(self.error_path(), e))
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ArenaError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| ArenaError::Io(self.error_path(), e))?;
        self.file
            .write_all(bytes)
            .map_err(|e| ArenaError::Io(self.error_path(), e))
    }

    /// Owned copy of the backing path, for error values.
    #[allow(clippy::disallowed_methods)] // Clone needed to move the path into the error
    fn error_path(&self) -> PathBuf {
        self.path.clone()
    }

    fn check_len(&self, bytes: &[u8]) -> Result<(), ArenaError> {
        if bytes.len() as u64 == self.slot_size {
            Ok(())
        } else {
            Err(ArenaError::WrongSlotSize {
                expected: self.slot_size,
                actual: bytes.len(),
            })
        }
    }

    const fn check_offset(&self, offset: u64) -> Result<(), ArenaError> {
        if offset % self.slot_size != 0 {
            return Err(ArenaError::Misaligned {
                offset,
                slot_size: self.slot_size,
            });
        }
        if offset >= self.next_offset {
            return Err(ArenaError::OutOfBounds {
                offset,
                next_offset: self.next_offset,
            });
        }
        Ok(())
    }
}

/// Errors that can occur during arena operations.
#[derive(Debug)]
pub enum ArenaError {
    /// I/O error on the backing file.
    Io(PathBuf, std::io::Error),
    /// The file ended before a full slot could be read.
    ShortRead { path: PathBuf, offset: u64 },
    /// The file is shorter than the allocation cursor says it must be.
    FileTooShort {
        path: PathBuf,
        file_len: u64,
        required: u64,
    },
    /// Offset refers to a slot that has not been allocated.
    OutOfBounds { offset: u64, next_offset: u64 },
    /// Offset does not fall on a slot boundary.
    Misaligned { offset: u64, slot_size: u64 },
    /// Caller passed a buffer that is not exactly one slot.
    WrongSlotSize { expected: u64, actual: usize },
}

impl ArenaError {
    /// Whether this error means the stored data cannot be trusted, as
    /// opposed to the file system refusing an operation.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(..) | Self::WrongSlotSize { .. })
    }
}

impl std::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "I/O error on {}: {e}", path.display()),
            Self::ShortRead { path, offset } => {
                write!(f, "short read at offset {offset} in {}", path.display())
            }
            Self::FileTooShort {
                path,
                file_len,
                required,
            } => write!(
                f,
                "{} is {file_len} bytes but metadata requires at least {required}",
                path.display()
            ),
            Self::OutOfBounds {
                offset,
                next_offset,
            } => write!(
                f,
                "offset {offset} out of bounds (allocated up to {next_offset})"
            ),
            Self::Misaligned { offset, slot_size } => {
                write!(f, "offset {offset} is not aligned to slot size {slot_size}")
            }
            Self::WrongSlotSize { expected, actual } => {
                write!(f, "slot must be {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for ArenaError {
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

    #[test]
    fn test_append_is_monotonic() {
        let dir = tempdir().expect("create temp dir");
        let mut arena = Arena::open(&dir.path().join("a.dat"), 4, 0).expect("open arena");

        assert_eq!(arena.append(b"aaaa").expect("append"), 0);
        assert_eq!(arena.append(b"bbbb").expect("append"), 4);
        assert_eq!(arena.append(b"cccc").expect("append"), 8);
        assert_eq!(arena.next_offset(), 12);
        assert_eq!(arena.allocated_slots(), 3);

        assert_eq!(arena.read(4).expect("read"), b"bbbb");
    }

    #[test]
    fn test_overwrite_in_place() {
        let dir = tempdir().expect("create temp dir");
        let mut arena = Arena::open(&dir.path().join("a.dat"), 4, 0).expect("open arena");

        arena.append(b"aaaa").expect("append");
        arena.append(b"bbbb").expect("append");
        arena.overwrite(0, b"zzzz").expect("overwrite");

        assert_eq!(arena.read(0).expect("read"), b"zzzz");
        assert_eq!(arena.read(4).expect("read"), b"bbbb");
        // Rewriting never allocates
        assert_eq!(arena.next_offset(), 8);
    }

    #[test]
    fn test_unallocated_offsets_rejected() {
        let dir = tempdir().expect("create temp dir");
        let mut arena = Arena::open(&dir.path().join("a.dat"), 4, 0).expect("open arena");
        arena.append(b"aaaa").expect("append");

        assert!(matches!(arena.read(4), Err(ArenaError::OutOfBounds { .. })));
        assert!(matches!(
            arena.overwrite(8, b"xxxx"),
            Err(ArenaError::OutOfBounds { .. })
        ));
        assert!(matches!(arena.read(2), Err(ArenaError::Misaligned { .. })));
    }

    #[test]
    fn test_wrong_slot_size_does_not_advance() {
        let dir = tempdir().expect("create temp dir");
        let mut arena = Arena::open(&dir.path().join("a.dat"), 4, 0).expect("open arena");

        let result = arena.append(b"toolong");
        assert!(matches!(result, Err(ArenaError::WrongSlotSize { .. })));
        assert_eq!(arena.next_offset(), 0);
    }

    #[test]
    fn test_reopen_restores_cursor() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("a.dat");

        {
            let mut arena = Arena::open(&path, 4, 0).expect("open arena");
            arena.append(b"aaaa").expect("append");
            arena.append(b"bbbb").expect("append");
            arena.sync().expect("sync");
        }

        let mut arena = Arena::open(&path, 4, 8).expect("reopen arena");
        assert_eq!(arena.read(0).expect("read"), b"aaaa");
        assert_eq!(arena.append(b"cccc").expect("append"), 8);
    }

    #[test]
    fn test_cursor_past_end_of_file_is_corrupt() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("a.dat");
        std::fs::write(&path, b"aaaa").expect("write file");

        let result = Arena::open(&path, 4, 8);
        let err = result.expect_err("should reject");
        assert!(matches!(err, ArenaError::FileTooShort { .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_unopenable_file_is_io_error() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("missing").join("a.dat");

        let err = Arena::open(&path, 4, 0).expect_err("should fail");
        assert!(matches!(err, ArenaError::Io(..)));
        assert!(!err.is_corruption());
    }
}
