//! Codec registry: the pluggable decompress/compress capability behind every
//! buffered exporter.
//!
//! # Bounded output
//! Every decode is given a `capacity`: the most bytes the caller is prepared
//! to accept.  A codec that would produce more MUST stop and report
//! [`CodecError::Overflow`] instead of growing without limit.  Callers size
//! the capacity from a declared decompressed length when the container has
//! one, and from [`Codec::max_expansion`] otherwise.
//!
//! # Encoding
//! Not every codec can encode.  Codecs without an encoder return
//! [`CodecError::Unsupported`] from [`Codec::compress`] and declare what the
//! exporter should do instead through [`Codec::pack_fallback`].

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::CodecParams;

pub mod lz77;
pub mod lzss;
pub mod rle;

pub use lz77::Lz77Codec;
pub use lzss::LzssCodec;
pub use rle::RleCodec;

// ── CodecId ──────────────────────────────────────────────────────────────────

/// Runtime codec discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    None,
    Zlib,
    Deflate,
    Lz4,
    Zstd,
    Brotli,
    Lzma,
    Rle,
    Lz77,
    Lzss,
}

impl CodecId {
    pub const ALL: [CodecId; 10] = [
        CodecId::None,
        CodecId::Zlib,
        CodecId::Deflate,
        CodecId::Lz4,
        CodecId::Zstd,
        CodecId::Brotli,
        CodecId::Lzma,
        CodecId::Rle,
        CodecId::Lz77,
        CodecId::Lzss,
    ];

    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None    => "none",
            CodecId::Zlib    => "zlib",
            CodecId::Deflate => "deflate",
            CodecId::Lz4     => "lz4",
            CodecId::Zstd    => "zstd",
            CodecId::Brotli  => "brotli",
            CodecId::Lzma    => "lzma",
            CodecId::Rle     => "rle",
            CodecId::Lz77    => "lz77",
            CodecId::Lzss    => "lzss",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.into_iter().find(|id| id.name() == s)
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Compressed data ends in the middle of a token at input offset {0}")]
    Truncated(usize),
    #[error("Back-reference distance {distance} exceeds the {available} bytes decoded so far")]
    InvalidBackReference { distance: usize, available: usize },
    #[error("Decoded output exceeds the {capacity}-byte bound")]
    Overflow { capacity: usize },
    #[error("Codec '{0}' cannot encode")]
    Unsupported(CodecId),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// What `pack` does when a codec has no encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFallback {
    /// Copy the decoded bytes to the sink unchanged.
    Passthrough,
    /// Write nothing.
    Skip,
}

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;

    /// Worst-case decoded-to-compressed size ratio.
    fn max_expansion(&self) -> u32;

    /// Decode `data`, producing at most `capacity` bytes.
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError>;

    fn compress(&self, _data: &[u8], _level: i32) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unsupported(self.codec_id()))
    }

    fn pack_fallback(&self) -> PackFallback {
        PackFallback::Passthrough
    }

    /// Decoded size recorded inside the compressed data, for formats that
    /// carry one.
    fn content_size(&self, _data: &[u8]) -> Option<u64> {
        None
    }
}

// ── Bounded output helpers ───────────────────────────────────────────────────

/// Drain `reader` into a vector, failing once more than `capacity` bytes
/// come out.
fn read_bounded<R: Read>(reader: R, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(capacity.min(1 << 20));
    reader
        .take(capacity as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    if out.len() > capacity {
        return Err(CodecError::Overflow { capacity });
    }
    Ok(out)
}

/// `Write` sink that refuses to grow past a fixed capacity.
struct BoundedWriter {
    out:        Vec<u8>,
    capacity:   usize,
    overflowed: bool,
}

impl BoundedWriter {
    fn new(capacity: usize) -> Self {
        Self { out: Vec::with_capacity(capacity.min(1 << 20)), capacity, overflowed: false }
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.out.len() + buf.len() > self.capacity {
            self.overflowed = true;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "output bound reached"));
        }
        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn max_expansion(&self) -> u32 { 1 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        if data.len() > capacity {
            return Err(CodecError::Overflow { capacity });
        }
        Ok(data.to_vec())
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zlib }
    fn max_expansion(&self) -> u32 { 1032 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        read_bounded(flate2::read::ZlibDecoder::new(data), capacity)
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let mut w = flate2::write::ZlibEncoder::new(Vec::new(), deflate_level(level));
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
}

/// Raw deflate without a zlib wrapper, as most console archives store it.
pub struct DeflateCodec;
impl Codec for DeflateCodec {
    fn codec_id(&self) -> CodecId { CodecId::Deflate }
    fn max_expansion(&self) -> u32 { 1032 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        read_bounded(flate2::read::DeflateDecoder::new(data), capacity)
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let mut w = flate2::write::DeflateEncoder::new(Vec::new(), deflate_level(level));
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
}

fn deflate_level(level: i32) -> flate2::Compression {
    flate2::Compression::new(level.clamp(0, 9) as u32)
}

/// Raw LZ4 block (no frame, no size prefix).
pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn max_expansion(&self) -> u32 { 255 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        // A raw block cannot expand past its ratio limit, whatever the caller
        // declared.
        let limit = data.len().saturating_mul(self.max_expansion() as usize).saturating_add(16);
        let mut out = vec![0u8; capacity.min(limit)];
        match lz4_flex::block::decompress_into(data, &mut out) {
            Ok(n) => {
                out.truncate(n);
                Ok(out)
            }
            Err(lz4_flex::block::DecompressError::OutputTooSmall { .. }) => {
                Err(CodecError::Overflow { capacity })
            }
            Err(e) => Err(CodecError::Decompression(format!("LZ4: {e}"))),
        }
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn max_expansion(&self) -> u32 { 4096 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        let decoder = zstd::stream::read::Decoder::new(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        read_bounded(decoder, capacity)
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        // The bulk API records the content size in the frame header.
        zstd::bulk::compress(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn content_size(&self, data: &[u8]) -> Option<u64> {
        zstd::zstd_safe::get_frame_content_size(data).ok().flatten()
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn codec_id(&self) -> CodecId { CodecId::Brotli }
    fn max_expansion(&self) -> u32 { 4096 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        read_bounded(brotli::Decompressor::new(data, 4096), capacity)
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzma }
    fn max_expansion(&self) -> u32 { 4096 }
    fn decompress(&self, data: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
        let mut sink = BoundedWriter::new(capacity);
        let result = lzma_rs::lzma_decompress(&mut io::Cursor::new(data), &mut sink);
        if sink.overflowed {
            return Err(CodecError::Overflow { capacity });
        }
        result.map_err(|e| CodecError::Decompression(format!("{e:?}")))?;
        Ok(sink.out)
    }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec with default parameters.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    get_codec_with(id, &CodecParams::default())
}

/// Resolve a CodecId to a built-in codec, applying the per-resource
/// parameters that affect decoding.
pub fn get_codec_with(id: CodecId, params: &CodecParams) -> Box<dyn Codec> {
    match id {
        CodecId::None    => Box::new(NoneCodec),
        CodecId::Zlib    => Box::new(ZlibCodec),
        CodecId::Deflate => Box::new(DeflateCodec),
        CodecId::Lz4     => Box::new(Lz4Codec),
        CodecId::Zstd    => Box::new(ZstdCodec),
        CodecId::Brotli  => Box::new(BrotliCodec),
        CodecId::Lzma    => Box::new(LzmaCodec),
        CodecId::Rle     => Box::new(RleCodec),
        CodecId::Lz77    => Box::new(Lz77Codec),
        CodecId::Lzss    => Box::new(match params.dictionary_fill {
            Some(fill) => LzssCodec::with_fill(fill),
            None       => LzssCodec::default(),
        }),
    }
}
