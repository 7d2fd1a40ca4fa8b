//! Resources whose first bytes are stored apart from the rest.
//!
//! Some formats keep a small preload region (for example the start of an
//! audio stream) in the directory and the remainder elsewhere.  The preload
//! segment is emitted first, then the main range.  The main range is read
//! through a buffer of at most `main_chunk_cap` bytes however large it is.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use super::{copy_through, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::descriptor::{Segment, SourceDescriptor};
use crate::source::{SourceHandle, DEFAULT_BUFFER_SIZE};

const NAME: &str = "preload";

/// Largest read buffer used for the main segment.
pub const DEFAULT_MAIN_CHUNK_CAP: usize = 200 * 1024;

#[derive(Debug)]
pub struct SegmentedPreloadExporter {
    main_chunk_cap: usize,
    session:        Option<PreloadSession>,
    status:         Status,
}

#[derive(Debug)]
struct PreloadSession {
    handle:  SourceHandle,
    main:    Option<Segment>,
    peeked:  Option<u8>,
}

impl SegmentedPreloadExporter {
    pub fn new() -> Self {
        Self::with_chunk_cap(DEFAULT_MAIN_CHUNK_CAP)
    }

    pub fn with_chunk_cap(main_chunk_cap: usize) -> Self {
        Self { main_chunk_cap: main_chunk_cap.max(1), session: None, status: Status::default() }
    }

    /// Whether the session has moved on to the main segment.
    pub fn in_main_segment(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.main.is_none())
    }
}

impl Default for SegmentedPreloadExporter {
    fn default() -> Self { Self::new() }
}

impl Exporter for SegmentedPreloadExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();

        let main = Segment::new(descriptor.backing.clone(), descriptor.offset, descriptor.length);
        let opened = match descriptor.preload.as_ref().filter(|p| p.length > 0) {
            Some(preload) => {
                SourceHandle::with_capacity(&preload.backing, preload.offset, preload.length, DEFAULT_BUFFER_SIZE)
                    .map(|handle| PreloadSession { handle, main: Some(main), peeked: None })
            }
            None => SourceHandle::with_capacity(&main.backing, main.offset, main.length, self.main_chunk_cap)
                .map(|handle| PreloadSession { handle, main: None, peeked: None }),
        };
        match opened {
            Ok(session) => self.session = Some(session),
            Err(e) => self.status.fail(NAME, e.into()),
        }
    }

    fn available(&mut self) -> bool {
        if !self.status.is_open() {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.peeked.is_some() {
            return true;
        }

        // At most one segment transition.
        loop {
            if session.handle.remaining() > 0 {
                return match session.handle.read_u8() {
                    Ok(byte) => {
                        session.peeked = Some(byte);
                        true
                    }
                    Err(e) => {
                        self.session = None;
                        self.status.fail(NAME, e.into());
                        false
                    }
                };
            }
            let Some(main) = session.main.take() else {
                self.session = None;
                self.status.exhaust();
                return false;
            };
            tracing::debug!(offset = main.offset, length = main.length, "preload exhausted, switching to main segment");
            match SourceHandle::with_capacity(&main.backing, main.offset, main.length, self.main_chunk_cap) {
                Ok(handle) => session.handle = handle,
                Err(e) => {
                    self.session = None;
                    self.status.fail(NAME, e.into());
                    return false;
                }
            }
        }
    }

    fn read(&mut self) -> u8 {
        self.session
            .as_mut()
            .and_then(|s| s.peeked.take())
            .unwrap_or(0)
    }

    fn close(&mut self) {
        self.session = None;
        self.status.close();
    }

    /// Preload and main bytes are stored as they decode; splitting them again
    /// is up to the archive writer.
    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
        copy_through(input, sink)
    }

    fn state(&self) -> SessionState { self.status.state() }

    fn failure(&self) -> Option<&ExportError> { self.status.failure() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::read_all;
    use crate::source::Backing;

    fn split(preload: &[u8], main: &[u8]) -> SourceDescriptor {
        let main_len = main.len() as u64;
        SourceDescriptor::new(Backing::memory(main.to_vec()), 0, main_len)
            .with_preload(Segment::new(Backing::memory(preload.to_vec()), 0, preload.len() as u64))
    }

    #[test]
    fn preload_then_main() {
        let mut exporter = SegmentedPreloadExporter::new();
        assert_eq!(read_all(&mut exporter, &split(b"HEAD", b"-body")), b"HEAD-body");
    }

    #[test]
    fn transition_happens_in_available() {
        let mut exporter = SegmentedPreloadExporter::new();
        exporter.open(&split(b"P", b"M"));
        assert!(exporter.available());
        assert!(!exporter.in_main_segment());
        assert_eq!(exporter.read(), b'P');
        assert!(exporter.available());
        assert!(exporter.in_main_segment());
        assert_eq!(exporter.read(), b'M');
        assert!(!exporter.available());
    }

    #[test]
    fn empty_preload_starts_in_main() {
        let mut exporter = SegmentedPreloadExporter::new();
        exporter.open(&split(b"", b"xyz"));
        assert!(exporter.in_main_segment());
        assert!(exporter.available());
    }

    #[test]
    fn no_preload_behaves_like_direct() {
        let mut exporter = SegmentedPreloadExporter::with_chunk_cap(2);
        let desc = SourceDescriptor::memory(vec![9u8; 1000]);
        assert_eq!(read_all(&mut exporter, &desc), vec![9u8; 1000]);
    }

    #[test]
    fn empty_main_ends_after_preload() {
        let mut exporter = SegmentedPreloadExporter::new();
        assert_eq!(read_all(&mut exporter, &split(b"only", b"")), b"only");
        assert!(exporter.failure().is_none());
    }

    #[test]
    fn bad_main_range_ends_after_preload() {
        let desc = SourceDescriptor::new(Backing::memory(vec![0u8; 4]), 2, 40)
            .with_preload(Segment::new(Backing::memory(b"pre".to_vec()), 0, 3));
        let mut exporter = SegmentedPreloadExporter::new();
        assert_eq!(read_all(&mut exporter, &desc), b"pre");
        assert!(matches!(exporter.failure(), Some(ExportError::Source(_))));
    }
}
