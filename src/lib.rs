pub mod source;
pub mod codec;
pub mod descriptor;
pub mod table;
pub mod exporter;
pub mod sink;
pub mod config;
pub mod manifest;
pub mod extract;

pub use source::{Backing, SourceError, SourceHandle};
pub use codec::{CodecId, CodecError, get_codec};
pub use descriptor::{CodecParams, Segment, SourceDescriptor};
pub use table::{BlockEntry, BlockTable, TableError};
pub use exporter::{
    drain, pack_from, read_all, read_prefix, ExportError, ExportReader, Exporter, ExporterSpec,
    PackSummary, SessionState,
};
pub use config::ExtractOptions;
pub use manifest::{Manifest, ManifestError, ResourceEntry};
pub use extract::{extract_all, ExtractOutcome, ExtractReport};
