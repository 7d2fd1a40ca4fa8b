//! Output-side writers.
//!
//! [`WriteBuffer`] batches the byte-at-a-time output of an exporter session
//! into large writes and fingerprints everything that passes through it.
//! [`BlockWriter`] tracks offsets and CRC-32s while a block table is being
//! written.

use std::io::{self, Write};

/// Default batch size for extraction output.
pub const DEFAULT_WRITE_BUFFER: usize = 256 * 1024;

pub struct WriteBuffer<W: Write> {
    inner:             W,
    buf:               Vec<u8>,
    capacity:          usize,
    hasher:            blake3::Hasher,
    pub bytes_written: u64,
}

impl<W: Write> WriteBuffer<W> {
    pub fn new(inner: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
            hasher: blake3::Hasher::new(),
            bytes_written: 0,
        }
    }

    /// BLAKE3 of everything written so far, hex encoded.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.hasher.finalize().as_bytes())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn flush_if_full(&mut self) -> io::Result<()> {
        if self.buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Large writes bypass the buffer.
        if buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
            self.inner.write_all(buf)?;
        } else {
            self.buf.extend_from_slice(buf);
            self.flush_if_full()?;
        }
        self.hasher.update(buf);
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()
    }
}

/// Pass-through writer that knows its position and the CRC-32 of the bytes
/// written since the last [`BlockWriter::finish_block`].
pub struct BlockWriter<'a> {
    inner:    &'a mut dyn Write,
    position: u64,
    crc:      crc32fast::Hasher,
}

impl<'a> BlockWriter<'a> {
    pub fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, position: 0, crc: crc32fast::Hasher::new() }
    }

    pub fn position(&self) -> u64 { self.position }

    /// CRC-32 of the current block; starts the next one.
    pub fn finish_block(&mut self) -> u32 {
        std::mem::take(&mut self.crc).finalize()
    }
}

impl Write for BlockWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffer_batches_and_hashes() {
        let mut wb = WriteBuffer::new(Vec::new(), 8);
        wb.write_all(b"abc").unwrap();
        wb.write_all(b"defghijkl").unwrap();
        wb.write_all(b"m").unwrap();
        assert_eq!(wb.bytes_written, 13);
        let digest = wb.digest_hex();
        let out = wb.into_inner().unwrap();
        assert_eq!(out, b"abcdefghijklm");
        assert_eq!(digest, blake3::hash(b"abcdefghijklm").to_hex().to_string());
    }

    #[test]
    fn block_writer_tracks_blocks() {
        let mut out = Vec::new();
        let mut bw = BlockWriter::new(&mut out);
        bw.write_all(b"first").unwrap();
        assert_eq!(bw.finish_block(), crc32fast::hash(b"first"));
        bw.write_all(b"second").unwrap();
        assert_eq!(bw.position(), 11);
        assert_eq!(bw.finish_block(), crc32fast::hash(b"second"));
        assert_eq!(out, b"firstsecond");
    }
}
