use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::admin::AdminError;
use crate::staging::{RawNode, RevisionMeta, StagingOptions, StagingStore};
use crate::storage::archive::{ArchiveMode, ArchiveOptions, Descriptor, GraphArchive, Metadata};
use crate::types::{Point, RoadError};

/// Error type for CLI-driven operations.
#[derive(Debug, Error)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV parsing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Admin operation error.
    #[error(transparent)]
    Admin(#[from] AdminError),
    /// Storage layer error.
    #[error(transparent)]
    Storage(#[from] RoadError),
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Inputs of a node import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// CSV file with `id`, `lat`, `lon` and optional `tags`, `changeset`,
    /// `revision`, `timestamp`, `user_id`, `user` columns.
    pub nodes: PathBuf,
    /// Staging directory for this run; must not already hold data.
    pub staging: PathBuf,
    /// Archive to write.
    pub output: PathBuf,
    /// Keep the staging directory after a successful import.
    pub keep_staging: bool,
    /// Descriptor recorded in the archive metadata.
    pub descriptor: Descriptor,
    /// Staging settings.
    pub staging_options: StagingOptions,
    /// Archive settings.
    pub archive_options: ArchiveOptions,
}

impl ImportConfig {
    /// Config with default settings and a CSV descriptor.
    pub fn new(nodes: impl Into<PathBuf>, staging: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            nodes: nodes.into(),
            staging: staging.into(),
            output: output.into(),
            keep_staging: false,
            descriptor: Descriptor::new("unknown", "CSV", "roadstore"),
            staging_options: StagingOptions::default(),
            archive_options: ArchiveOptions::default(),
        }
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    /// Rows staged.
    pub nodes_imported: u64,
    /// Cells the rows were sharded into.
    pub cells: usize,
    /// Metadata of the written archive.
    pub metadata: Metadata,
}

struct Columns {
    id: usize,
    lat: usize,
    lon: usize,
    tags: Option<usize>,
    changeset: Option<usize>,
    revision: Option<usize>,
    timestamp: Option<usize>,
    user_id: Option<usize>,
    user: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Result<Self, CliError> {
        let optional = |name: &str| headers.iter().position(|h| h.trim() == name);
        let required = |name: &str| {
            optional(name).ok_or_else(|| CliError::Message(format!("column '{name}' not found in CSV header")))
        };
        Ok(Self {
            id: required("id")?,
            lat: required("lat")?,
            lon: required("lon")?,
            tags: optional("tags"),
            changeset: optional("changeset"),
            revision: optional("revision"),
            timestamp: optional("timestamp"),
            user_id: optional("user_id"),
            user: optional("user"),
        })
    }

    fn has_meta(&self) -> bool {
        self.changeset.is_some() || self.revision.is_some() || self.timestamp.is_some()
    }
}

/// Stages every CSV row, merges the staging store into a graph, and saves it.
pub fn run_import(cfg: &ImportConfig) -> Result<ImportSummary, CliError> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(&cfg.nodes)?;
    let headers = reader.headers()?.clone();
    let columns = Columns::resolve(&headers)?;

    let mut staging = StagingStore::create(&cfg.staging, cfg.staging_options.clone())?;
    let mut imported = 0u64;
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let node = parse_node(&record, &columns).map_err(|err| CliError::Message(format!(
            "{}:{line}: {err}",
            cfg.nodes.display()
        )))?;
        staging.add(&node)?;
        imported += 1;
    }
    staging.flush()?;
    let cells = staging.cells().len();

    if let Some(parent) = cfg.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut archive = GraphArchive::open(&cfg.output, ArchiveMode::Write, cfg.archive_options.clone())?;
    let metadata = staging.save_to(&mut archive, cfg.descriptor.clone())?;
    archive.close();
    if !cfg.keep_staging {
        staging.delete()?;
    }
    info!(nodes = imported, cells, output = %cfg.output.display(), "cli.import.finished");
    Ok(ImportSummary {
        nodes_imported: imported,
        cells,
        metadata,
    })
}

fn parse_node(record: &StringRecord, columns: &Columns) -> Result<RawNode, String> {
    let id: u64 = parse_field(record, columns.id, "id")?;
    let lat: f64 = parse_field(record, columns.lat, "lat")?;
    let lon: f64 = parse_field(record, columns.lon, "lon")?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("location ({lat}, {lon}) out of range"));
    }
    let mut node = RawNode::new(id, Point::from_degrees(lat, lon));
    if let Some(raw) = columns.tags.and_then(|i| record.get(i)) {
        node.tags = parse_tags(raw)?;
    }
    if columns.has_meta() {
        node.meta = Some(RevisionMeta {
            changeset: optional_field(record, columns.changeset, "changeset")?.unwrap_or(0),
            revision: optional_field(record, columns.revision, "revision")?.unwrap_or(0),
            timestamp: optional_field(record, columns.timestamp, "timestamp")?.unwrap_or(0),
            user_id: optional_field(record, columns.user_id, "user_id")?.unwrap_or(0),
            user_name: columns
                .user
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(node)
}

fn parse_field<T: std::str::FromStr>(record: &StringRecord, index: usize, name: &str) -> Result<T, String> {
    let raw = record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| format!("missing {name}"))?;
    raw.parse().map_err(|_| format!("invalid {name} '{raw}'"))
}

fn optional_field<T: std::str::FromStr>(
    record: &StringRecord,
    index: Option<usize>,
    name: &str,
) -> Result<Option<T>, String> {
    match index.and_then(|i| record.get(i)).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| format!("invalid {name} '{raw}'")),
    }
}

/// Parses `k=v|k=v`. An empty string means no tags.
pub fn parse_tags(raw: &str) -> Result<Vec<(String, String)>, String> {
    raw.split('|')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| format!("malformed tag '{pair}'"))
        })
        .collect()
}
