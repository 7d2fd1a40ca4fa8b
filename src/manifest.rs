//! JSON resource manifests.
//!
//! A manifest is what an archive-directory parser hands to the extractor:
//! ```json
//! { "resources": [
//!     { "name": "music/title.wav",
//!       "descriptor": { "backing": { "file": "sound.pak" }, "offset": 4096, "length": 88200 },
//!       "exporter": { "kind": "header",
//!                     "template": { "format": "wav", "channels": 2,
//!                                   "sample_rate": 22050, "bits_per_sample": 16 } } }
//! ] }
//! ```
//! Relative backing paths are resolved against the manifest's directory.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::SourceDescriptor;
use crate::exporter::{ExporterSpec, PackSummary};
use crate::source::Backing;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate resource name '{0}'")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Output path relative to the extraction root.
    pub name:       String,
    pub descriptor: SourceDescriptor,
    #[serde(default)]
    pub exporter:   ExporterSpec,
}

impl ResourceEntry {
    /// Entry for a file produced by `pack` with the `exporter` spec.  The
    /// block table and the decoded length come from the summary, so the
    /// entry reads back without relying on a codec's expansion bound.
    pub fn packed(name: impl Into<String>, backing: Backing, exporter: ExporterSpec, summary: &PackSummary) -> Self {
        let exporter = match &summary.blocks {
            Some(blocks) => ExporterSpec::Blocks {
                table: std::sync::Arc::new(blocks.clone()),
                inner: Some(Box::new(exporter)),
            },
            None => exporter,
        };
        let mut descriptor = SourceDescriptor::new(backing, 0, summary.bytes_out);
        if summary.fallback.is_none() {
            descriptor = descriptor.with_decompressed_length(summary.bytes_in);
        }
        Self { name: name.into(), descriptor, exporter }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub resources: Vec<ResourceEntry>,
}

impl Manifest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let mut manifest = Self::from_bytes(&std::fs::read(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut manifest.resources {
            entry.descriptor.resolve(base);
        }
        tracing::debug!(path = %path.display(), resources = manifest.resources.len(), "manifest loaded");
        Ok(manifest)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_slice(bytes)?;
        manifest.check_names()?;
        Ok(manifest)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceEntry> {
        self.resources.iter().find(|r| r.name == name)
    }

    fn check_names(&self) -> Result<(), ManifestError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.resources {
            if !seen.insert(entry.name.as_str()) {
                return Err(ManifestError::DuplicateName(entry.name.clone()));
            }
        }
        Ok(())
    }
}
