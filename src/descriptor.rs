//! Resource descriptors handed to exporters by the archive layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::source::Backing;

/// A physically contiguous byte range inside a backing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub backing: Backing,
    pub offset:  u64,
    pub length:  u64,
}

impl Segment {
    pub fn new(backing: Backing, offset: u64, length: u64) -> Self {
        Self { backing, offset, length }
    }
}

/// Per-resource codec parameters.
///
/// Every field is optional; a set field overrides whatever the exporter was
/// configured with, for one session only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecParams {
    pub codec:           Option<CodecId>,
    pub xor_key:         Option<Vec<u8>>,
    /// Worst-case decoded/compressed ratio used to bound chunk buffers.
    pub expansion:       Option<u32>,
    /// Initial fill byte of a ring-buffer dictionary.
    pub dictionary_fill: Option<u8>,
}

/// Everything an exporter needs to decode one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub backing:             Backing,
    pub offset:              u64,
    pub length:              u64,
    #[serde(default)]
    pub decompressed_length: Option<u64>,
    /// Leading bytes stored apart from the main range.
    #[serde(default)]
    pub preload:             Option<Segment>,
    /// CRC-32 of the compressed range.
    #[serde(default)]
    pub checksum:            Option<u32>,
    #[serde(default)]
    pub params:              CodecParams,
}

impl SourceDescriptor {
    pub fn new(backing: Backing, offset: u64, length: u64) -> Self {
        Self {
            backing,
            offset,
            length,
            decompressed_length: None,
            preload:             None,
            checksum:            None,
            params:              CodecParams::default(),
        }
    }

    /// Descriptor covering an entire in-memory buffer.
    pub fn memory(bytes: impl Into<std::sync::Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let length = bytes.len() as u64;
        Self::new(Backing::Memory(bytes), 0, length)
    }

    pub fn with_decompressed_length(mut self, length: u64) -> Self {
        self.decompressed_length = Some(length);
        self
    }

    pub fn with_preload(mut self, preload: Segment) -> Self {
        self.preload = Some(preload);
        self
    }

    pub fn with_checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_params(mut self, params: CodecParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.params.codec = Some(codec);
        self
    }

    pub fn with_xor_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.params.xor_key = Some(key.into());
        self
    }

    /// A descriptor for a sub-range of the same backing, inheriting the codec
    /// parameters but none of the range-specific fields.
    pub fn sub_range(&self, offset: u64, length: u64) -> Self {
        Self {
            backing:             self.backing.clone(),
            offset,
            length,
            decompressed_length: None,
            preload:             None,
            checksum:            None,
            params:              self.params.clone(),
        }
    }

    /// Rebase relative file paths (main and preload) onto `base`.
    pub fn resolve(&mut self, base: &Path) {
        self.backing = self.backing.resolve(base);
        if let Some(preload) = &mut self.preload {
            preload.backing = preload.backing.resolve(base);
        }
    }
}
