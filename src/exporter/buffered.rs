//! Chunked decompression through a [`Codec`](crate::codec::Codec).
//!
//! Compressed data is consumed one chunk at a time.  Each chunk is decoded
//! into a bounded output buffer which `read()` then drains byte by byte.
//!
//! # Framing
//! ```text
//! whole            the entire range is one compressed chunk
//! fixed            back-to-back chunks of `size` compressed bytes
//! length_prefixed  [u32 LE compressed][payload] ...
//! size_prefixed    [u32 LE compressed][u32 LE decompressed][payload][pad] ...
//! ```
//! In `size_prefixed` streams a chunk whose compressed size equals its
//! decompressed size is stored verbatim, a compressed size of zero ends the
//! stream, and each record is padded to a multiple of `align` bytes measured
//! from the start of the range.  Fewer trailing bytes than a prefix needs are
//! treated as padding.
//!
//! # Output bound
//! A chunk may decode to at most its declared decompressed size when the
//! framing or the descriptor provides one, and to `payload × expansion`
//! otherwise.  Anything larger is corruption.  The whole session never
//! yields more than `descriptor.decompressed_length` bytes.  A `whole` chunk
//! takes its output bound from the descriptor, or from the frame header
//! when the codec records one.  A descriptor length is exact: a `whole`
//! chunk that decodes to less is malformed.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::{apply_fallback, read_chunk, ExportError, Exporter, PackSummary, SessionState, Status};
use crate::codec::{get_codec, get_codec_with, Codec, CodecError, CodecId};
use crate::descriptor::SourceDescriptor;
use crate::source::SourceHandle;

const NAME: &str = "buffered";

/// Decoded bytes per chunk written by `pack`.
pub const DEFAULT_PACK_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_LEVEL: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkFraming {
    #[default]
    Whole,
    Fixed { size: u32 },
    LengthPrefixed,
    SizePrefixed {
        #[serde(default)]
        align: u32,
    },
}

impl ChunkFraming {
    fn prefix_len(self) -> u64 {
        match self {
            ChunkFraming::Whole | ChunkFraming::Fixed { .. } => 0,
            ChunkFraming::LengthPrefixed => 4,
            ChunkFraming::SizePrefixed { .. } => 8,
        }
    }
}

pub struct BufferedTransformExporter {
    codec:           CodecId,
    framing:         ChunkFraming,
    expansion:       Option<u32>,
    level:           i32,
    pack_chunk_size: usize,
    session:         Option<ChunkSession>,
    status:          Status,
}

impl BufferedTransformExporter {
    pub fn new(codec: CodecId, framing: ChunkFraming) -> Self {
        Self {
            codec,
            framing,
            expansion: None,
            level: DEFAULT_LEVEL,
            pack_chunk_size: DEFAULT_PACK_CHUNK_SIZE,
            session: None,
            status: Status::default(),
        }
    }

    /// Override the codec's worst-case expansion factor.
    pub fn with_expansion(mut self, factor: u32) -> Self {
        self.expansion = Some(factor.max(1));
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_pack_chunk_size(mut self, size: usize) -> Self {
        self.pack_chunk_size = size.max(1);
        self
    }

    fn pack_whole(
        &self,
        codec: &dyn Codec,
        input: &mut dyn Read,
        sink:  &mut dyn Write,
    ) -> Result<PackSummary, ExportError> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        match codec.compress(&data, self.level) {
            Ok(encoded) => {
                sink.write_all(&encoded)?;
                Ok(PackSummary::encoded(data.len() as u64, encoded.len() as u64))
            }
            Err(CodecError::Unsupported(_)) => apply_fallback(codec.pack_fallback(), &mut data.as_slice(), sink),
            Err(e) => Err(e.into()),
        }
    }

    fn pack_chunked(
        &self,
        codec: &dyn Codec,
        input: &mut dyn Read,
        sink:  &mut dyn Write,
    ) -> Result<PackSummary, ExportError> {
        let mut summary = PackSummary::default();
        loop {
            let chunk = read_chunk(input, self.pack_chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            let encoded = match codec.compress(&chunk, self.level) {
                Ok(encoded) => encoded,
                Err(CodecError::Unsupported(_)) if summary.bytes_in == 0 => {
                    let mut rest = chunk.as_slice().chain(&mut *input);
                    return apply_fallback(codec.pack_fallback(), &mut rest, sink);
                }
                Err(e) => return Err(e.into()),
            };

            let written = match self.framing {
                ChunkFraming::SizePrefixed { align } => {
                    // A record that does not shrink is stored as is.
                    let payload = if encoded.len() >= chunk.len() { &chunk } else { &encoded };
                    sink.write_u32::<LittleEndian>(payload.len() as u32)?;
                    sink.write_u32::<LittleEndian>(chunk.len() as u32)?;
                    sink.write_all(payload)?;
                    let end = summary.bytes_out + 8 + payload.len() as u64;
                    let pad = padding(end, align);
                    sink.write_all(&vec![0u8; pad as usize])?;
                    8 + payload.len() as u64 + pad
                }
                _ => {
                    sink.write_u32::<LittleEndian>(encoded.len() as u32)?;
                    sink.write_all(&encoded)?;
                    4 + encoded.len() as u64
                }
            };
            tracing::trace!(decoded = chunk.len(), written, "chunk packed");
            summary.bytes_in += chunk.len() as u64;
            summary.bytes_out += written;
        }
        Ok(summary)
    }
}

fn padding(position: u64, align: u32) -> u64 {
    if align <= 1 {
        return 0;
    }
    let align = u64::from(align);
    (align - position % align) % align
}

fn to_usize(value: u64, offset: u64) -> Result<usize, ExportError> {
    usize::try_from(value).map_err(|_| ExportError::MalformedChunk {
        offset,
        reason: format!("size {value} does not fit in memory"),
    })
}

/// Per-session decode state.
struct ChunkSession {
    handle:    SourceHandle,
    codec:     Box<dyn Codec>,
    expansion: u32,
    checksum:  Option<u32>,
    limit:     Option<u64>,
    produced:  u64,
    buffer:    Vec<u8>,
    read_pos:  usize,
}

impl ChunkSession {
    /// Decode the next chunk into `buffer`.  `Ok(false)` is a normal end of
    /// stream.  A chunk may legitimately decode to nothing.
    fn next_chunk(&mut self, framing: ChunkFraming) -> Result<bool, ExportError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(false);
        }
        let remaining = self.handle.remaining();
        if remaining == 0 {
            return Ok(false);
        }
        if remaining < framing.prefix_len() {
            tracing::trace!(remaining, "trailing padding skipped");
            self.handle.skip(remaining)?;
            return Ok(false);
        }

        let offset = self.handle.position();
        let (payload, declared, stored) = match framing {
            ChunkFraming::Whole => {
                let payload = self.handle.read_vec(to_usize(remaining, offset)?)?;
                if let Some(expected) = self.checksum {
                    let computed = crc32fast::hash(&payload);
                    if computed != expected {
                        return Err(ExportError::ChecksumMismatch { expected, computed });
                    }
                }
                let declared = self.limit.or_else(|| self.codec.content_size(&payload));
                (payload, declared, false)
            }
            ChunkFraming::Fixed { size } => {
                let n = remaining.min(u64::from(size));
                (self.handle.read_vec(to_usize(n, offset)?)?, None, false)
            }
            ChunkFraming::LengthPrefixed => {
                let comp = u64::from(self.handle.read_u32::<LittleEndian>()?);
                if comp == 0 {
                    return Ok(false);
                }
                let payload = self.read_payload(comp, offset)?;
                (payload, None, false)
            }
            ChunkFraming::SizePrefixed { align } => {
                let comp = u64::from(self.handle.read_u32::<LittleEndian>()?);
                let decomp = u64::from(self.handle.read_u32::<LittleEndian>()?);
                if comp == 0 {
                    return Ok(false);
                }
                let payload = self.read_payload(comp, offset)?;
                let pad = padding(self.handle.position(), align).min(self.handle.remaining());
                self.handle.skip(pad)?;
                (payload, Some(decomp), comp == decomp)
            }
        };

        let capacity = match declared {
            Some(n) => to_usize(n, offset)?,
            None => payload.len().saturating_mul(self.expansion as usize),
        };
        let mut decoded = if stored {
            payload
        } else {
            self.codec.decompress(&payload, capacity)?
        };
        if framing == ChunkFraming::Whole && self.limit.is_some() && decoded.len() < capacity {
            return Err(ExportError::MalformedChunk {
                offset,
                reason: format!("decoded {} bytes, {capacity} declared", decoded.len()),
            });
        }

        if let Some(limit) = self.limit {
            let allowed = limit - self.produced;
            if decoded.len() as u64 > allowed {
                decoded.truncate(allowed as usize);
            }
        }
        tracing::trace!(offset, decoded = decoded.len(), capacity, "chunk decoded");

        self.produced += decoded.len() as u64;
        self.buffer = decoded;
        self.read_pos = 0;
        Ok(true)
    }

    fn read_payload(&mut self, comp: u64, offset: u64) -> Result<Vec<u8>, ExportError> {
        if comp > self.handle.remaining() {
            return Err(ExportError::MalformedChunk {
                offset,
                reason: format!("chunk claims {comp} bytes, {} remain", self.handle.remaining()),
            });
        }
        Ok(self.handle.read_vec(to_usize(comp, offset)?)?)
    }
}

impl Exporter for BufferedTransformExporter {
    fn name(&self) -> &'static str { NAME }

    fn open(&mut self, descriptor: &SourceDescriptor) {
        self.close();
        self.status.opened();

        if let ChunkFraming::Fixed { size: 0 } = self.framing {
            self.status.fail(NAME, ExportError::InvalidParameter("fixed chunk size of zero".into()));
            return;
        }

        let codec_id = descriptor.params.codec.unwrap_or(self.codec);
        let codec = get_codec_with(codec_id, &descriptor.params);
        let expansion = descriptor
            .params
            .expansion
            .or(self.expansion)
            .unwrap_or_else(|| codec.max_expansion())
            .max(1);

        match SourceHandle::open(&descriptor.backing, descriptor.offset, descriptor.length) {
            Ok(handle) => {
                tracing::debug!(
                    codec = %codec_id,
                    offset = descriptor.offset,
                    length = descriptor.length,
                    "buffered session opened"
                );
                self.session = Some(ChunkSession {
                    handle,
                    codec,
                    expansion,
                    checksum: descriptor.checksum,
                    limit: descriptor.decompressed_length,
                    produced: 0,
                    buffer: Vec::new(),
                    read_pos: 0,
                });
            }
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
        // Every pass consumes compressed bytes, so this ends.
        loop {
            if session.read_pos < session.buffer.len() {
                return true;
            }
            match session.next_chunk(self.framing) {
                Ok(true) => continue,
                Ok(false) => {
                    self.session = None;
                    self.status.exhaust();
                    return false;
                }
                Err(e) => {
                    self.session = None;
                    self.status.fail(NAME, e);
                    return false;
                }
            }
        }
    }

    fn read(&mut self) -> u8 {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        match session.buffer.get(session.read_pos) {
            Some(&byte) => {
                session.read_pos += 1;
                byte
            }
            None => 0,
        }
    }

    fn close(&mut self) {
        self.session = None;
        self.status.close();
    }

    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
        let codec = get_codec(self.codec);
        match self.framing {
            ChunkFraming::Whole => self.pack_whole(codec.as_ref(), input, sink),
            // Fixed-size records cannot be produced from arbitrary input.
            ChunkFraming::Fixed { .. } => apply_fallback(codec.pack_fallback(), input, sink),
            ChunkFraming::LengthPrefixed | ChunkFraming::SizePrefixed { .. } => {
                self.pack_chunked(codec.as_ref(), input, sink)
            }
        }
    }

    fn state(&self) -> SessionState { self.status.state() }

    fn failure(&self) -> Option<&ExportError> { self.status.failure() }
}
