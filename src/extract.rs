//! Batch extraction of manifest resources into a directory.
//!
//! Every resource gets its own exporter instance built from its
//! [`ExporterSpec`](crate::exporter::ExporterSpec), so one bad resource
//! cannot disturb another and resources can be extracted concurrently
//! (enable the `parallel` feature).  A resource whose stream ends early is
//! still written with whatever decoded, and reported as failed.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ExtractOptions;
use crate::exporter::{drain, read_prefix, Exporter};
use crate::manifest::{Manifest, ResourceEntry};
use crate::sink::{WriteBuffer, DEFAULT_WRITE_BUFFER};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractOutcome {
    pub name:     String,
    pub exporter: &'static str,
    pub path:     Option<PathBuf>,
    /// Decoded bytes written.
    pub bytes:    u64,
    /// BLAKE3 of the written bytes, when verification was requested.
    pub digest:   Option<String>,
    pub error:    Option<String>,
}

impl ExtractOutcome {
    pub fn is_ok(&self) -> bool { self.error.is_none() }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub destination: PathBuf,
    pub started:     DateTime<Utc>,
    pub finished:    DateTime<Utc>,
    pub outcomes:    Vec<ExtractOutcome>,
}

impl ExtractReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Extract every resource of `manifest` under `dest`.  Only failing to
/// create `dest` itself is an error; per-resource failures are reported in
/// the outcomes and never stop the batch.
pub fn extract_all<P: AsRef<Path>>(
    manifest: &Manifest,
    dest:     P,
    options:  &ExtractOptions,
) -> io::Result<ExtractReport> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let started = Utc::now();

    #[cfg(feature = "parallel")]
    let outcomes: Vec<ExtractOutcome> = {
        use rayon::prelude::*;
        manifest
            .resources
            .par_iter()
            .map(|entry| extract_resource(entry, dest, options))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<ExtractOutcome> = manifest
        .resources
        .iter()
        .map(|entry| extract_resource(entry, dest, options))
        .collect();

    let report = ExtractReport {
        destination: dest.to_path_buf(),
        started,
        finished: Utc::now(),
        outcomes,
    };
    tracing::info!(
        resources = report.outcomes.len(),
        failed = report.failed(),
        bytes = report.total_bytes(),
        "extraction finished"
    );
    Ok(report)
}

/// Extract one resource to `dest/<name>`.
pub fn extract_resource(entry: &ResourceEntry, dest: &Path, options: &ExtractOptions) -> ExtractOutcome {
    let mut exporter = entry.exporter.build(options);
    let mut outcome = ExtractOutcome {
        name:     entry.name.clone(),
        exporter: exporter.name(),
        path:     None,
        bytes:    0,
        digest:   None,
        error:    None,
    };

    let Some(path) = output_path(dest, &entry.name) else {
        outcome.error = Some(format!("unsafe resource name '{}'", entry.name));
        tracing::warn!(name = %entry.name, "refusing to extract outside the destination");
        return outcome;
    };

    match write_resource(exporter.as_mut(), entry, &path) {
        Ok((bytes, digest)) => {
            outcome.bytes = bytes;
            outcome.digest = options.verify.then_some(digest);
            outcome.error = exporter.failure().map(|e| e.to_string());
        }
        Err(e) => outcome.error = Some(e.to_string()),
    }
    outcome.path = Some(path);

    match &outcome.error {
        None => tracing::info!(name = %entry.name, bytes = outcome.bytes, "resource extracted"),
        Some(error) => tracing::warn!(name = %entry.name, bytes = outcome.bytes, %error, "resource incomplete"),
    }
    outcome
}

fn write_resource(exporter: &mut dyn Exporter, entry: &ResourceEntry, path: &Path) -> io::Result<(u64, String)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = WriteBuffer::new(File::create(path)?, DEFAULT_WRITE_BUFFER);
    drain(exporter, &entry.descriptor, &mut out)?;
    let bytes = out.bytes_written;
    let digest = out.digest_hex();
    out.into_inner()?;
    Ok((bytes, digest))
}

/// `dest` joined with a relative resource name that stays inside `dest`.
fn output_path(dest: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let normal = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    let has_file = relative.components().any(|c| matches!(c, Component::Normal(_)));
    (normal && has_file).then(|| dest.join(relative))
}

/// First `limit` decoded bytes of a resource, plus the failure message if
/// the stream ended early.
pub fn preview(entry: &ResourceEntry, limit: usize, options: &ExtractOptions) -> (Vec<u8>, Option<String>) {
    let mut exporter = entry.exporter.build(options);
    let bytes = read_prefix(exporter.as_mut(), &entry.descriptor, limit);
    (bytes, exporter.failure().map(|e| e.to_string()))
}
