//! The exporter contract: a pull-based, lazily decoding byte stream.
//!
//! # Calling convention
//! ```text
//! exporter.open(&descriptor);
//! while exporter.available() {
//!     consume(exporter.read());
//! }
//! exporter.close();
//! ```
//! `available()` is where work happens: block and segment transitions, chunk
//! decoding and padding skips.  Calling it again without an intervening
//! `read()` returns the same answer and does not advance anything.
//!
//! # Failure policy
//! Exporters never return errors from the pull side.  A session that cannot
//! be opened, or that hits corrupt data, ends early: `available()` returns
//! `false` from then on.  The cause is logged through `tracing` and kept in
//! [`Exporter::failure`] until the next `open`, so a bulk extraction can
//! carry on with the next resource and still report what went wrong.
//!
//! # Session ownership
//! All cursor state lives inside the exporter instance.  One instance serves
//! one session at a time (every operation takes `&mut self`); build one
//! instance per concurrent session with [`ExporterSpec::build`].

use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, CodecId, PackFallback};
use crate::config::ExtractOptions;
use crate::descriptor::SourceDescriptor;
use crate::source::SourceError;
use crate::table::BlockTable;

pub mod block;
pub mod buffered;
pub mod direct;
pub mod header;
pub mod preload;
pub mod xor;

pub use block::BlockCompositeExporter;
pub use buffered::{BufferedTransformExporter, ChunkFraming};
pub use direct::DirectExporter;
pub use header::{HeaderPrefixExporter, HeaderTemplate};
pub use preload::SegmentedPreloadExporter;
pub use xor::XorExporter;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("Malformed chunk at offset {offset}: {reason}")]
    MalformedChunk { offset: u64, reason: String },
    #[error("{} block(s) skipped: {skipped:?}", skipped.len())]
    SkippedBlocks { skipped: Vec<usize> },
    #[error("Inner exporter '{exporter}' failed: {reason}")]
    Inner { exporter: &'static str, reason: String },
}

impl ExportError {
    /// Wrap the failure of a delegate exporter, if it has one.
    pub(crate) fn from_inner(inner: &dyn Exporter) -> Option<Self> {
        inner.failure().map(|e| ExportError::Inner {
            exporter: inner.name(),
            reason:   e.to_string(),
        })
    }
}

// ── Session state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
    /// Terminal until the next `open`.
    Exhausted,
}

/// State and failure bookkeeping shared by every exporter.
#[derive(Debug, Default)]
pub(crate) struct Status {
    state:   SessionState,
    failure: Option<ExportError>,
}

impl Status {
    pub(crate) fn state(&self) -> SessionState { self.state }

    pub(crate) fn is_open(&self) -> bool { self.state == SessionState::Open }

    pub(crate) fn failure(&self) -> Option<&ExportError> { self.failure.as_ref() }

    pub(crate) fn opened(&mut self) {
        self.state = SessionState::Open;
        self.failure = None;
    }

    /// Normal end of stream.
    pub(crate) fn exhaust(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Exhausted;
        }
    }

    /// Early end of stream.  Logged here so no call site can forget to.
    pub(crate) fn fail(&mut self, exporter: &'static str, error: ExportError) {
        tracing::warn!(exporter, error = %error, "session ended early");
        self.state = SessionState::Exhausted;
        self.failure = Some(error);
    }

    /// The failure survives `close` so callers can inspect it after draining.
    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

// ── Pack results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Decoded bytes consumed from the input.
    pub bytes_in:  u64,
    /// Encoded bytes written to the sink.
    pub bytes_out: u64,
    /// Block layout of the written data, for exporters that produce one.
    pub blocks:    Option<BlockTable>,
    /// Set when the encoder was unavailable and a fallback ran instead.
    pub fallback:  Option<PackFallback>,
}

impl PackSummary {
    pub(crate) fn encoded(bytes_in: u64, bytes_out: u64) -> Self {
        Self { bytes_in, bytes_out, blocks: None, fallback: None }
    }
}

/// Straight copy of the decoded input to the sink.
pub(crate) fn copy_through(input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError> {
    let n = io::copy(input, sink)?;
    Ok(PackSummary::encoded(n, n))
}

pub(crate) fn apply_fallback(
    fallback: PackFallback,
    input:    &mut dyn Read,
    sink:     &mut dyn Write,
) -> Result<PackSummary, ExportError> {
    tracing::debug!(?fallback, "encoder unavailable, applying pack fallback");
    let mut summary = match fallback {
        PackFallback::Passthrough => copy_through(input, sink)?,
        PackFallback::Skip        => PackSummary::default(),
    };
    summary.fallback = Some(fallback);
    Ok(summary)
}

/// Read up to `size` bytes, fewer only at end of input.
pub(crate) fn read_chunk(input: &mut dyn Read, size: usize) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size.min(1 << 20));
    (&mut *input).take(size as u64).read_to_end(&mut chunk)?;
    Ok(chunk)
}

// ── Exporter trait ───────────────────────────────────────────────────────────

pub trait Exporter: Send {
    /// Short identifier for logs and listings.
    fn name(&self) -> &'static str;

    /// Start a session.  Closes any session still open.  Never fails: a bad
    /// descriptor leaves the session exhausted with [`Exporter::failure`] set.
    fn open(&mut self, descriptor: &SourceDescriptor);

    /// Whether the next `read()` yields a decoded byte.
    fn available(&mut self) -> bool;

    /// Next decoded byte, or `0` when nothing is available.
    fn read(&mut self) -> u8;

    /// Release the backing handle and buffers.  Safe in every state.
    fn close(&mut self);

    /// Encode already-decoded bytes from `input` into this exporter's stored
    /// form.  Only I/O failures are errors; codecs without an encoder fall
    /// back as described by their [`PackFallback`].
    fn pack(&mut self, input: &mut dyn Read, sink: &mut dyn Write) -> Result<PackSummary, ExportError>;

    fn state(&self) -> SessionState;

    /// Why the current (or last) session ended early.
    fn failure(&self) -> Option<&ExportError>;
}

// ── Read adapter and drain helpers ───────────────────────────────────────────

/// `std::io::Read` view of one exporter session.  Opens on construction and
/// closes on drop.
pub struct ExportReader<'a> {
    exporter: &'a mut dyn Exporter,
}

impl<'a> ExportReader<'a> {
    pub fn open(exporter: &'a mut dyn Exporter, descriptor: &SourceDescriptor) -> Self {
        exporter.open(descriptor);
        Self { exporter }
    }

    pub fn failure(&self) -> Option<&ExportError> {
        self.exporter.failure()
    }
}

impl Read for ExportReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() && self.exporter.available() {
            buf[n] = self.exporter.read();
            n += 1;
        }
        Ok(n)
    }
}

impl Drop for ExportReader<'_> {
    fn drop(&mut self) {
        self.exporter.close();
    }
}

/// Decode a whole resource into `sink`.  Returns the bytes written; decode
/// failures simply end the stream and are left in `exporter.failure()`.
pub fn drain(
    exporter:   &mut dyn Exporter,
    descriptor: &SourceDescriptor,
    sink:       &mut dyn Write,
) -> io::Result<u64> {
    let mut reader = ExportReader::open(exporter, descriptor);
    io::copy(&mut reader, sink)
}

/// Decode a whole resource into memory.
pub fn read_all(exporter: &mut dyn Exporter, descriptor: &SourceDescriptor) -> Vec<u8> {
    read_prefix(exporter, descriptor, usize::MAX)
}

/// Decode at most `limit` bytes, then close the session early.
pub fn read_prefix(exporter: &mut dyn Exporter, descriptor: &SourceDescriptor, limit: usize) -> Vec<u8> {
    let mut out = Vec::new();
    exporter.open(descriptor);
    while out.len() < limit && exporter.available() {
        out.push(exporter.read());
    }
    exporter.close();
    out
}

/// Re-encode a resource decoded by `source` into `target`'s stored form.
pub fn pack_from(
    target:     &mut dyn Exporter,
    source:     &mut dyn Exporter,
    descriptor: &SourceDescriptor,
    sink:       &mut dyn Write,
) -> Result<PackSummary, ExportError> {
    let mut reader = ExportReader::open(source, descriptor);
    target.pack(&mut reader, sink)
}

// ── ExporterSpec ─────────────────────────────────────────────────────────────

/// Serializable exporter configuration.  An `ExporterSpec` holds no session state;
/// [`ExporterSpec::build`] returns a fresh instance every time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExporterSpec {
    #[default]
    Direct,
    Xor {
        key: Vec<u8>,
        #[serde(default)]
        inner: Option<Box<ExporterSpec>>,
    },
    Buffered {
        codec: CodecId,
        #[serde(default)]
        framing: ChunkFraming,
        #[serde(default)]
        expansion: Option<u32>,
        #[serde(default)]
        level: Option<i32>,
    },
    Blocks {
        table: Arc<BlockTable>,
        #[serde(default)]
        inner: Option<Box<ExporterSpec>>,
    },
    Preload {
        #[serde(default)]
        chunk_cap: Option<usize>,
    },
    Header {
        template: HeaderTemplate,
        #[serde(default)]
        inner: Option<Box<ExporterSpec>>,
    },
}

impl ExporterSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ExporterSpec::Direct           => "direct",
            ExporterSpec::Xor { .. }       => "xor",
            ExporterSpec::Buffered { .. }  => "buffered",
            ExporterSpec::Blocks { .. }    => "blocks",
            ExporterSpec::Preload { .. }   => "preload",
            ExporterSpec::Header { .. }    => "header",
        }
    }

    pub fn build(&self, options: &ExtractOptions) -> Box<dyn Exporter> {
        let build_inner = |inner: &Option<Box<ExporterSpec>>| match inner {
            Some(spec) => spec.build(options),
            None       => Box::new(DirectExporter::new()) as Box<dyn Exporter>,
        };

        match self {
            ExporterSpec::Direct => Box::new(DirectExporter::new()),
            ExporterSpec::Xor { key, inner } => {
                Box::new(XorExporter::with_inner(key.clone(), build_inner(inner)))
            }
            ExporterSpec::Buffered { codec, framing, expansion, level } => {
                let mut exporter = BufferedTransformExporter::new(*codec, *framing)
                    .with_level(level.unwrap_or(options.level))
                    .with_pack_chunk_size(options.pack_chunk_size);
                if let Some(factor) = expansion.or(options.default_expansion) {
                    exporter = exporter.with_expansion(factor);
                }
                Box::new(exporter)
            }
            ExporterSpec::Blocks { table, inner } => Box::new(
                BlockCompositeExporter::new(Arc::clone(table), build_inner(inner))
                    .with_pack_block_size(options.pack_block_size),
            ),
            ExporterSpec::Preload { chunk_cap } => Box::new(
                SegmentedPreloadExporter::with_chunk_cap(chunk_cap.unwrap_or(options.main_chunk_cap)),
            ),
            ExporterSpec::Header { template, inner } => {
                Box::new(HeaderPrefixExporter::new(template.clone(), build_inner(inner)))
            }
        }
    }
}
