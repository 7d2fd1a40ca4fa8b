//! Tunables shared by exporter construction, batch extraction and packing.

use crate::exporter::block::DEFAULT_PACK_BLOCK_SIZE;
use crate::exporter::buffered::{DEFAULT_LEVEL, DEFAULT_PACK_CHUNK_SIZE};
use crate::exporter::preload::DEFAULT_MAIN_CHUNK_CAP;

/// Configuration for [`ExporterSpec::build`](crate::exporter::ExporterSpec::build)
/// and [`extract_all`](crate::extract::extract_all).
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Read-buffer cap for the main segment of preload resources.
    pub main_chunk_cap:    usize,
    /// Expansion bound for buffered exporters that do not set their own.
    /// `None` uses each codec's worst case.
    pub default_expansion: Option<u32>,
    pub pack_block_size:   usize,
    pub pack_chunk_size:   usize,
    pub level:             i32,
    /// Record a BLAKE3 digest of every extracted resource.
    pub verify:            bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            main_chunk_cap:    DEFAULT_MAIN_CHUNK_CAP,
            default_expansion: None,
            pack_block_size:   DEFAULT_PACK_BLOCK_SIZE,
            pack_chunk_size:   DEFAULT_PACK_CHUNK_SIZE,
            level:             DEFAULT_LEVEL,
            verify:            false,
        }
    }
}
