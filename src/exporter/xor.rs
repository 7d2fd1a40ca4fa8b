//! Repeating-key XOR over another exporter's decoded output.
//!
//! The key position starts at zero on every `open` and advances once per
//! emitted byte, wrapping at the key length.

use std::io::{self, Read, Write};

use super::{DirectExporter, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::descriptor::SourceDescriptor;

const NAME: &str = "xor";

pub struct XorExporter {
    key:        Vec<u8>,
    inner:      Box<dyn Exporter>,
    /// Key in effect for the current session; a descriptor key wins.
    active_key: Vec<u8>,
    key_pos:    usize,
    status:     Status,
}

impl XorExporter {
    /// XOR over the raw stored bytes.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self::with_inner(key, Box::new(DirectExporter::new()))
    }

    pub fn with_inner(key: impl Into<Vec<u8>>, inner: Box<dyn Exporter>) -> Self {
        Self {
            key: key.into(),
            inner,
            active_key: Vec::new(),
            key_pos: 0,
            status: Status::default(),
        }
    }
}

impl Exporter for XorExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();
        self.active_key = descriptor
            .params
            .xor_key
            .clone()
            .unwrap_or_else(|| self.key.clone());
        self.key_pos = 0;

        if self.active_key.is_empty() {
            self.status.fail(NAME, ExportError::InvalidParameter("empty XOR key".into()));
            return;
        }
        self.inner.open(descriptor);
        if let Some(err) = ExportError::from_inner(self.inner.as_ref()) {
            self.status.fail(NAME, err);
        }
    }

    fn available(&mut self) -> bool {
        if !self.status.is_open() {
            return false;
        }
        if self.inner.available() {
            return true;
        }
        match ExportError::from_inner(self.inner.as_ref()) {
            Some(err) => self.status.fail(NAME, err),
            None => self.status.exhaust(),
        }
        false
    }

    fn read(&mut self) -> u8 {
        // The key only advances over bytes the inner stream really yields.
        if !self.status.is_open() || !self.inner.available() {
            return 0;
        }
        let byte = self.inner.read() ^ self.active_key[self.key_pos];
        self.key_pos = (self.key_pos + 1) % self.active_key.len();
        byte
    }

    fn close(&mut self) {
        self.inner.close();
        self.status.close();
    }

    /// XOR is its own inverse: apply the configured key, then let the inner
    /// exporter encode the result.
    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
        if self.key.is_empty() {
            return Err(ExportError::InvalidParameter("empty XOR key".into()));
        }
        let mut keyed = XorReader { inner: input, key: &self.key, pos: 0 };
        self.inner.pack(&mut keyed, sink)
    }

    fn state(&self) -> SessionState { self.status.state() }

    fn failure(&self) -> Option<&ExportError> { self.status.failure() }
}

struct XorReader<'a> {
    inner: &'a mut dyn Read,
    key:   &'a [u8],
    pos:   usize,
}

impl Read for XorReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for byte in &mut buf[..n] {
            *byte ^= self.key[self.pos];
            self.pos = (self.pos + 1) % self.key.len();
        }
        Ok(n)
    }
}
