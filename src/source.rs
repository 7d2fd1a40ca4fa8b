//! Bounded, seekable views over a backing file or in-memory buffer.
//!
//! A [`Backing`] names where bytes live.  A [`SourceHandle`] is an open,
//! positioned window `offset..offset + length` over a backing.  Reads past
//! the end of the window behave like end-of-file even when the backing has
//! more bytes after it, so a decoder can never wander into a neighbouring
//! resource.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read-buffer size used when the caller does not ask for one.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Range {offset}+{length} exceeds backing length {available}")]
    OutOfRange { offset: u64, length: u64, available: u64 },
    #[error("Seek to {target} is outside the {length}-byte window")]
    SeekOutOfWindow { target: i128, length: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Anything that can be read and repositioned.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

// ── Backing ──────────────────────────────────────────────────────────────────

/// Where the bytes of a resource physically live.
///
/// Memory backings exist for callers that already hold the data (embedded
/// preload regions, tests); they are not part of the manifest format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backing {
    File(PathBuf),
    #[serde(skip)]
    Memory(Arc<[u8]>),
}

impl Backing {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Backing::File(path.into())
    }

    pub fn memory(bytes: impl Into<Arc<[u8]>>) -> Self {
        Backing::Memory(bytes.into())
    }

    /// Total number of bytes in the backing.
    pub fn len(&self) -> Result<u64, SourceError> {
        match self {
            Backing::File(path) => Ok(std::fs::metadata(path)?.len()),
            Backing::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> Result<bool, SourceError> {
        Ok(self.len()? == 0)
    }

    /// Rebase a relative file path onto `base`.  Absolute paths and memory
    /// backings are returned unchanged.
    pub fn resolve(&self, base: &Path) -> Backing {
        match self {
            Backing::File(path) if path.is_relative() => Backing::File(base.join(path)),
            other => other.clone(),
        }
    }

    /// Short human-readable label for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Backing::File(path) => path.display().to_string(),
            Backing::Memory(bytes) => format!("<memory: {} bytes>", bytes.len()),
        }
    }

    fn open_reader(&self) -> io::Result<Box<dyn ReadSeek + Send>> {
        Ok(match self {
            Backing::File(path) => Box::new(File::open(path)?),
            Backing::Memory(bytes) => Box::new(Cursor::new(Arc::clone(bytes))),
        })
    }
}

// ── SourceHandle ─────────────────────────────────────────────────────────────

/// An open window over a [`Backing`].
///
/// Positions reported and accepted by the handle are relative to the start
/// of the window.
pub struct SourceHandle {
    reader: BufReader<Box<dyn ReadSeek + Send>>,
    start:  u64,
    length: u64,
    pos:    u64,
}

impl SourceHandle {
    pub fn open(backing: &Backing, offset: u64, length: u64) -> Result<Self, SourceError> {
        Self::with_capacity(backing, offset, length, DEFAULT_BUFFER_SIZE)
    }

    /// Open a window with an explicit read-buffer size.  The buffer never
    /// exceeds the window itself, so a tiny resource in a huge file does not
    /// allocate a huge buffer.
    pub fn with_capacity(
        backing:  &Backing,
        offset:   u64,
        length:   u64,
        capacity: usize,
    ) -> Result<Self, SourceError> {
        let available = backing.len()?;
        let in_bounds = offset
            .checked_add(length)
            .is_some_and(|end| end <= available);
        if !in_bounds {
            return Err(SourceError::OutOfRange { offset, length, available });
        }

        let mut inner = backing.open_reader()?;
        inner.seek(SeekFrom::Start(offset))?;

        let capacity = capacity.min(usize::try_from(length).unwrap_or(usize::MAX)).max(1);
        Ok(Self {
            reader: BufReader::with_capacity(capacity, inner),
            start:  offset,
            length,
            pos:    0,
        })
    }

    /// Absolute offset of the window within the backing.
    pub fn start(&self) -> u64 { self.start }

    pub fn len(&self) -> u64 { self.length }

    pub fn is_empty(&self) -> bool { self.length == 0 }

    pub fn position(&self) -> u64 { self.pos }

    pub fn remaining(&self) -> u64 { self.length - self.pos }

    /// Move to an absolute position inside the window.
    pub fn seek_to(&mut self, target: u64) -> Result<(), SourceError> {
        self.seek_by(i128::from(target) - i128::from(self.pos))
    }

    /// Move relative to the current position.  The end of the window is a
    /// valid target; anything beyond it, or before the start, is rejected.
    pub fn seek_by(&mut self, delta: i128) -> Result<(), SourceError> {
        let target = i128::from(self.pos) + delta;
        if target < 0 || target > i128::from(self.length) {
            return Err(SourceError::SeekOutOfWindow { target, length: self.length });
        }
        let delta = i64::try_from(delta).map_err(|_| SourceError::SeekOutOfWindow {
            target,
            length: self.length,
        })?;
        self.reader.seek_relative(delta)?;
        self.pos = target as u64;
        Ok(())
    }

    /// Skip `n` bytes forward.
    pub fn skip(&mut self, n: u64) -> Result<(), SourceError> {
        self.seek_by(i128::from(n))
    }

    /// Read exactly `n` bytes into a fresh buffer.
    pub fn read_vec(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Read for SourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = (buf.len() as u64).min(self.remaining()) as usize;
        if max == 0 {
            return Ok(0);
        }
        let n = self.reader.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(bytes: &[u8], offset: u64, length: u64) -> SourceHandle {
        SourceHandle::open(&Backing::memory(bytes.to_vec()), offset, length).unwrap()
    }

    #[test]
    fn reads_stop_at_window_end() {
        let mut h = window(b"0123456789", 2, 4);
        let mut out = Vec::new();
        h.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"2345");
        assert_eq!(h.remaining(), 0);
    }

    #[test]
    fn seeks_are_window_relative() {
        let mut h = window(b"0123456789", 3, 5);
        h.seek_to(4).unwrap();
        assert_eq!(h.read_vec(1).unwrap(), b"7");
        h.seek_by(-3).unwrap();
        assert_eq!(h.position(), 2);
        assert_eq!(h.read_vec(2).unwrap(), b"56");
        h.seek_to(5).unwrap();
        assert_eq!(h.remaining(), 0);
    }

    #[test]
    fn seeks_outside_window_are_rejected() {
        let mut h = window(b"0123456789", 3, 5);
        assert!(matches!(h.seek_to(6), Err(SourceError::SeekOutOfWindow { target: 6, length: 5 })));
        assert!(matches!(h.seek_by(-1), Err(SourceError::SeekOutOfWindow { target: -1, .. })));
        assert_eq!(h.position(), 0);
    }

    #[test]
    fn range_past_backing_is_rejected() {
        let err = SourceHandle::open(&Backing::memory(vec![0u8; 8]), 6, 3).unwrap_err();
        assert!(matches!(err, SourceError::OutOfRange { offset: 6, length: 3, available: 8 }));
        assert!(SourceHandle::open(&Backing::memory(vec![0u8; 8]), u64::MAX, 2).is_err());
    }

    #[test]
    fn file_backing_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), b"abcdef").unwrap();
        let backing = Backing::file("blob.bin").resolve(dir.path());
        assert_eq!(backing.len().unwrap(), 6);
        let mut h = SourceHandle::with_capacity(&backing, 1, 3, 1).unwrap();
        assert_eq!(h.read_vec(3).unwrap(), b"bcd");
    }
}
