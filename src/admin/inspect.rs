use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::admin::{AdminError, Result};
use crate::storage::archive::{ArchiveOptions, ArchiveSource, Header, Metadata, StreamEntry};

/// Everything an archive reveals without loading element data.
#[derive(Clone, Debug, Serialize)]
pub struct InspectReport {
    /// Inspected file.
    pub path: PathBuf,
    /// File size in bytes.
    pub file_bytes: u64,
    /// Decoded header.
    pub header: Header,
    /// Metadata record.
    pub metadata: Metadata,
    /// Build time as RFC 3339, if representable.
    pub built_at: Option<String>,
    /// Stream table in name order.
    pub streams: Vec<StreamEntry>,
}

impl InspectReport {
    /// Summed payload size of all streams.
    pub fn payload_bytes(&self) -> u64 {
        self.streams.iter().map(|s| s.len).sum()
    }
}

/// Reads the header, metadata, and stream table of the archive at `path`.
pub fn inspect(path: impl AsRef<Path>) -> Result<InspectReport> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AdminError::missing_archive(path));
    }
    let file_bytes = fs::metadata(path)?.len();
    let source = ArchiveSource::open(path, &ArchiveOptions::default())?;
    let metadata = source.metadata().clone();
    Ok(InspectReport {
        path: path.to_path_buf(),
        file_bytes,
        header: source.header().clone(),
        built_at: metadata.built_at_rfc3339(),
        metadata,
        streams: source.streams().cloned().collect(),
    })
}
