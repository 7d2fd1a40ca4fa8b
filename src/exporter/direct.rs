//! Uncompressed, unencrypted byte ranges.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use super::{copy_through, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::descriptor::SourceDescriptor;
use crate::source::{SourceHandle, DEFAULT_BUFFER_SIZE};

const NAME: &str = "direct";

/// Streams `descriptor.length` bytes starting at `descriptor.offset` exactly
/// as stored.
#[derive(Debug)]
pub struct DirectExporter {
    buffer_size: usize,
    handle:      Option<SourceHandle>,
    /// Byte fetched by `available()` and handed out by `read()`.
    peeked:      Option<u8>,
    status:      Status,
}

impl DirectExporter {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size, handle: None, peeked: None, status: Status::default() }
    }
}

impl Default for DirectExporter {
    fn default() -> Self { Self::new() }
}

impl Exporter for DirectExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();
        match SourceHandle::with_capacity(
            &descriptor.backing,
            descriptor.offset,
            descriptor.length,
            self.buffer_size,
        ) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => self.status.fail(NAME, e.into()),
        }
    }

    fn available(&mut self) -> bool {
        if !self.status.is_open() {
            return false;
        }
        if self.peeked.is_some() {
            return true;
        }
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        if handle.remaining() == 0 {
            self.handle = None;
            self.status.exhaust();
            return false;
        }
        match handle.read_u8() {
            Ok(byte) => {
                self.peeked = Some(byte);
                true
            }
            Err(e) => {
                self.handle = None;
                self.status.fail(NAME, e.into());
                false
            }
        }
    }

    fn read(&mut self) -> u8 {
        self.peeked.take().unwrap_or(0)
    }

    fn close(&mut self) {
        self.handle = None;
        self.peeked = None;
        self.status.close();
    }

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

    #[test]
    fn streams_the_window_only() {
        let backing = Backing::memory(b"xxHELLOyy".to_vec());
        let desc = SourceDescriptor::new(backing, 2, 5);
        let mut exporter = DirectExporter::new();
        assert_eq!(read_all(&mut exporter, &desc), b"HELLO");
        assert!(exporter.failure().is_none());
    }

    #[test]
    fn available_is_idempotent() {
        let desc = SourceDescriptor::memory(b"ab".to_vec());
        let mut exporter = DirectExporter::new();
        exporter.open(&desc);
        assert!(exporter.available());
        assert!(exporter.available());
        assert_eq!(exporter.read(), b'a');
        assert!(exporter.available());
        assert_eq!(exporter.read(), b'b');
        assert!(!exporter.available());
        assert!(!exporter.available());
        assert_eq!(exporter.state(), SessionState::Exhausted);
        exporter.close();
        assert_eq!(exporter.state(), SessionState::Closed);
    }

    #[test]
    fn out_of_range_open_is_empty() {
        let desc = SourceDescriptor::new(Backing::memory(vec![0u8; 4]), 2, 10);
        let mut exporter = DirectExporter::new();
        exporter.open(&desc);
        assert!(!exporter.available());
        assert_eq!(exporter.state(), SessionState::Exhausted);
        assert!(matches!(exporter.failure(), Some(ExportError::Source(_))));
    }

    #[test]
    fn missing_file_open_is_empty() {
        let desc = SourceDescriptor::new(Backing::file("/nonexistent/gxport/archive.bin"), 0, 16);
        let mut exporter = DirectExporter::new();
        assert!(read_all(&mut exporter, &desc).is_empty());
        assert!(exporter.failure().is_some());
    }

    #[test]
    fn reopen_clears_failure() {
        let mut exporter = DirectExporter::new();
        exporter.open(&SourceDescriptor::new(Backing::memory(vec![1u8]), 0, 5));
        assert!(exporter.failure().is_some());
        exporter.open(&SourceDescriptor::memory(vec![1u8]));
        assert!(exporter.failure().is_none());
        assert!(exporter.available());
    }

    #[test]
    fn pack_is_identity() {
        let mut exporter = DirectExporter::new();
        let mut out = Vec::new();
        let summary = exporter.pack(&mut &b"payload"[..], &mut out).unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(summary.bytes_in, 7);
        assert_eq!(summary.bytes_out, 7);
    }
}
