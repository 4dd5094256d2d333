use std::path::Path;

use serde::Serialize;

use crate::admin::{AdminError, Result};
use crate::storage::archive::{ArchiveMode, ArchiveOptions, ArchiveSource, GraphArchive, LoadPlan};
use crate::storage::schema;
use crate::types::{ElementKind, RoadError};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Header, metadata, and stream table only.
    Fast,
    /// Every stream checksum and decode, then graph validity.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Streams listed in the table.
    pub streams: u64,
    /// Streams whose payload was read and decoded.
    pub streams_decoded: u64,
    /// Payload bytes read.
    pub bytes_checked: u64,
    /// Vertices in the loaded graph.
    pub vertices: u64,
    /// Edges in the loaded graph.
    pub edges: u64,
    /// Places in the loaded graph.
    pub places: u64,
    /// Relations in the loaded graph.
    pub relations: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification found no errors. Warnings do not fail it.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the data examined.
    pub counts: VerifyCounts,
}

#[derive(Default)]
struct Findings(Vec<VerifyFinding>);

impl Findings {
    fn push(&mut self, severity: VerifySeverity, message: impl Into<String>) {
        if self.0.len() < MAX_FINDINGS {
            self.0.push(VerifyFinding {
                severity,
                message: message.into(),
            });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Error, message);
    }

    fn has_errors(&self) -> bool {
        self.0.iter().any(|f| f.severity == VerifySeverity::Error)
    }
}

/// Verifies the integrity of the archive at `path`.
///
/// Problems with the archive's content are returned as findings; only a
/// missing file or an I/O failure outside the archive is an `Err`.
pub fn verify(path: impl AsRef<Path>, level: VerifyLevel) -> Result<VerifyReport> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AdminError::missing_archive(path));
    }
    let mut findings = Findings::default();
    let mut counts = VerifyCounts::default();

    let opts = ArchiveOptions::default();
    match ArchiveSource::open(path, &opts) {
        Ok(source) => {
            check_table(&source, &mut findings, &mut counts);
            if level == VerifyLevel::Full {
                check_streams(&source, &mut findings, &mut counts);
                if !findings.has_errors() {
                    check_graph(path, &opts, &mut findings, &mut counts);
                }
            }
        }
        Err(RoadError::Io(err)) => return Err(err.into()),
        Err(err) => findings.error(format!("archive unreadable: {err}")),
    }

    Ok(VerifyReport {
        level,
        success: !findings.has_errors(),
        findings: findings.0,
        counts,
    })
}

fn check_table(source: &ArchiveSource, findings: &mut Findings, counts: &mut VerifyCounts) {
    let metadata = source.metadata();
    for kind in ElementKind::ALL {
        let expected = metadata.counts.get(kind);
        let id_stream = schema::id_stream(kind);
        match source.entry(id_stream) {
            Some(entry) if expected.exact && entry.element_count != expected.value => {
                findings.error(format!(
                    "{id_stream} holds {} entries but metadata counts {}",
                    entry.element_count, expected.value
                ));
            }
            Some(_) => {}
            None if expected.value > 0 => {
                findings.error(format!("{id_stream} missing for {} {kind:?} elements", expected.value));
            }
            None => {}
        }
    }

    for entry in source.streams() {
        counts.streams += 1;
        let Some(kind) = ElementKind::of_stream(&entry.name) else {
            findings.push(
                VerifySeverity::Warning,
                format!("stream {} belongs to no element kind", entry.name),
            );
            continue;
        };
        match schema::kind_of(&entry.name) {
            Some(declared) if declared != entry.kind => findings.error(format!(
                "stream {} encoded as {} but declared {}",
                entry.name,
                entry.kind.name(),
                declared.name()
            )),
            Some(_) => {}
            None => findings.push(
                VerifySeverity::Info,
                format!("stream {} is not part of the built-in schema", entry.name),
            ),
        }
        if let Some(ids) = source.entry(schema::id_stream(kind)) {
            if entry.element_count != ids.element_count {
                findings.error(format!(
                    "stream {} holds {} entries, {} has {}",
                    entry.name, entry.element_count, ids.name, ids.element_count
                ));
            }
        }
    }
}

fn check_streams(source: &ArchiveSource, findings: &mut Findings, counts: &mut VerifyCounts) {
    for entry in source.streams() {
        match source.read_column(&entry.name) {
            Ok(_) => {
                counts.streams_decoded += 1;
                counts.bytes_checked += entry.len;
            }
            Err(err) => findings.error(format!("stream {}: {err}", entry.name)),
        }
    }
}

fn check_graph(path: &Path, opts: &ArchiveOptions, findings: &mut Findings, counts: &mut VerifyCounts) {
    let graph = GraphArchive::open(path, ArchiveMode::Read, opts.clone())
        .and_then(|archive| archive.load(&mut LoadPlan::All));
    let graph = match graph {
        Ok(graph) => graph,
        Err(err) => {
            findings.error(format!("graph failed to load: {err}"));
            return;
        }
    };
    let loaded = graph.counts();
    counts.vertices = loaded.vertices.value;
    counts.edges = loaded.edges.value;
    counts.places = loaded.places.value;
    counts.relations = loaded.relations.value;
    if let Err(err) = graph.validate() {
        findings.error(format!("graph invalid: {err}"));
    }
}
