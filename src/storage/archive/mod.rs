//! The persisted, versioned container of a graph.
//!
//! An archive holds a metadata record plus one independently addressable
//! stream per attribute. It is never updated in place: every save produces a
//! complete new file through [`write_atomically`], so readers of the previous
//! version never observe a half-written archive.

mod format;
mod metadata;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::primitives::io::{write_atomically, FileIo, StdFileIo};
use crate::storage::column::{Column, ColumnKind};
use crate::storage::graph::Graph;
use crate::types::{stream_crc32, ElementKind, Result, RoadError, StreamDigest};

pub use format::{Header, StreamEntry, ARCHIVE_FORMAT_VERSION, ARCHIVE_MAGIC, HEADER_LEN};
pub use metadata::{Count, Descriptor, ElementCounts, Metadata};

const COPY_CHUNK: usize = 256 * 1024;

/// Options controlling archive reads and writes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Whether to fsync the temporary file before it replaces the target.
    pub sync_on_save: bool,
    /// Whether to verify stream checksums on every load.
    pub verify_checksums: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            sync_on_save: true,
            verify_checksums: true,
        }
    }
}

impl ArchiveOptions {
    /// Sets whether saves are synced before the rename.
    pub fn sync_on_save(mut self, sync: bool) -> Self {
        self.sync_on_save = sync;
        self
    }

    /// Sets whether stream checksums are verified on load.
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Shared read handle on one archive file.
///
/// Cloning is cheap; every clone reads through the same positioned file
/// handle, so many lazy stream loads can proceed concurrently.
#[derive(Clone)]
pub struct ArchiveSource {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    path: PathBuf,
    io: StdFileIo,
    header: Header,
    metadata: Metadata,
    streams: BTreeMap<String, StreamEntry>,
    verify: bool,
}

impl ArchiveSource {
    /// Opens an archive, reading only the header, metadata, and stream table.
    pub fn open(path: impl AsRef<Path>, opts: &ArchiveOptions) -> Result<Self> {
        let path = path.as_ref();
        let io = StdFileIo::open_read(path)?;
        let file_len = io.len()?;
        if file_len < HEADER_LEN as u64 {
            return Err(RoadError::corruption("archive shorter than its header"));
        }
        let mut header_buf = [0u8; HEADER_LEN];
        io.read_at(0, &mut header_buf)?;
        let header = Header::decode(&header_buf)?;

        let meta_bytes = read_region(&io, file_len, header.meta_offset, header.meta_len as u64)?;
        let metadata = Metadata::decode(&meta_bytes)?;

        let table_bytes =
            read_region(&io, file_len, header.table_offset, header.table_len as u64)?;
        let entries = format::decode_table(&table_bytes, header.stream_count, file_len)?;
        let mut streams = BTreeMap::new();
        for entry in entries {
            if streams.insert(entry.name.clone(), entry).is_some() {
                return Err(RoadError::corruption("duplicate stream name in archive"));
            }
        }
        debug!(
            path = %path.display(),
            streams = streams.len(),
            bytes = file_len,
            "archive.source.opened"
        );
        Ok(Self {
            inner: Arc::new(SourceInner {
                path: path.to_path_buf(),
                io,
                header,
                metadata,
                streams,
                verify: opts.verify_checksums,
            }),
        })
    }

    /// Path the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Decoded header.
    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    /// Metadata record.
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// All stream table entries in name order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamEntry> + '_ {
        self.inner.streams.values()
    }

    /// Stream table entry by name.
    pub fn entry(&self, name: &str) -> Option<&StreamEntry> {
        self.inner.streams.get(name)
    }

    /// Reads one stream's raw payload, verifying its checksum when enabled.
    pub fn read_stream(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entry(name)
            .ok_or_else(|| RoadError::NotFound(format!("stream {name}")))?;
        let len = usize::try_from(entry.len)
            .map_err(|_| RoadError::corruption("stream length overflow"))?;
        let mut buf = vec![0u8; len];
        self.inner.io.read_at(entry.offset, &mut buf)?;
        if self.inner.verify && stream_crc32(name, &buf) != entry.crc32 {
            return Err(RoadError::corruption(format!("stream {name} checksum mismatch")));
        }
        debug!(stream = name, bytes = len, "archive.stream.read");
        Ok(buf)
    }

    /// Reads and decodes one stream.
    pub fn read_column(&self, name: &str) -> Result<Column> {
        let payload = self.read_stream(name)?;
        let entry = self
            .entry(name)
            .ok_or_else(|| RoadError::NotFound(format!("stream {name}")))?;
        let count = usize::try_from(entry.element_count)
            .map_err(|_| RoadError::corruption("element count overflow"))?;
        Column::decode(entry.kind, &payload, count)
    }
}

impl fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("path", &self.inner.path)
            .field("streams", &self.inner.streams.len())
            .finish()
    }
}

fn read_region(io: &StdFileIo, file_len: u64, offset: u64, len: u64) -> Result<Vec<u8>> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| RoadError::corruption("archive region overflow"))?;
    if offset < HEADER_LEN as u64 || end > file_len {
        return Err(RoadError::corruption("archive region outside file"));
    }
    let mut buf = vec![0u8; len as usize];
    io.read_at(offset, &mut buf)?;
    Ok(buf)
}

/// Sequential writer used while an archive is being produced.
///
/// The header is written last, so a file missing its header is never
/// mistaken for a complete archive.
pub struct ArchiveWriter<'a> {
    io: &'a StdFileIo,
    offset: u64,
    meta: Option<(u64, u32)>,
    entries: Vec<StreamEntry>,
    names: HashSet<String>,
}

impl<'a> ArchiveWriter<'a> {
    /// Starts an archive in a freshly created file.
    pub fn begin(io: &'a StdFileIo) -> Result<Self> {
        io.write_at(0, &[0u8; HEADER_LEN])?;
        Ok(Self {
            io,
            offset: HEADER_LEN as u64,
            meta: None,
            entries: Vec::new(),
            names: HashSet::new(),
        })
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let at = self.offset;
        self.io.write_at(at, bytes)?;
        self.offset += bytes.len() as u64;
        Ok(at)
    }

    /// Writes the metadata block. Must precede every stream.
    pub fn write_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        if self.meta.is_some() || !self.entries.is_empty() {
            return Err(RoadError::invalid_state(
                "metadata must be written once, before any stream",
            ));
        }
        let bytes = metadata.encode();
        let at = self.append(&bytes)?;
        self.meta = Some((at, bytes.len() as u32));
        Ok(())
    }

    /// Writes one encoded stream payload.
    pub fn write_stream(
        &mut self,
        name: &str,
        kind: ColumnKind,
        element_count: u64,
        payload: &[u8],
    ) -> Result<()> {
        if self.meta.is_none() {
            return Err(RoadError::invalid_state("stream written before metadata"));
        }
        if !self.names.insert(name.to_owned()) {
            return Err(RoadError::invalid_state(format!("stream {name} written twice")));
        }
        let offset = self.append(payload)?;
        self.entries.push(StreamEntry {
            name: name.to_owned(),
            kind,
            element_count,
            offset,
            len: payload.len() as u64,
            crc32: stream_crc32(name, payload),
        });
        Ok(())
    }

    /// Encodes and writes a column.
    pub fn write_column(&mut self, name: &str, column: &Column) -> Result<()> {
        let mut payload = Vec::new();
        column.encode(&mut payload);
        self.write_stream(name, column.kind(), column.len() as u64, &payload)
    }

    /// Copies a stream verbatim from another archive without decoding it.
    ///
    /// The payload moves in fixed-size chunks and its checksum is always
    /// verified, whatever the source's verification setting.
    pub fn copy_stream(&mut self, source: &ArchiveSource, name: &str) -> Result<()> {
        let entry = source
            .entry(name)
            .ok_or_else(|| RoadError::NotFound(format!("stream {name}")))?
            .clone();
        if self.meta.is_none() {
            return Err(RoadError::invalid_state("stream written before metadata"));
        }
        if !self.names.insert(name.to_owned()) {
            return Err(RoadError::invalid_state(format!("stream {name} written twice")));
        }
        let offset = self.offset;
        let mut digest = StreamDigest::new(name);
        let mut chunk = vec![0u8; COPY_CHUNK.min(entry.len as usize)];
        while digest.payload_bytes() < entry.len {
            let n = (entry.len - digest.payload_bytes()).min(chunk.len() as u64) as usize;
            source
                .inner
                .io
                .read_at(entry.offset + digest.payload_bytes(), &mut chunk[..n])?;
            self.append(&chunk[..n])?;
            digest.update(&chunk[..n]);
        }
        if digest.finish() != entry.crc32 {
            return Err(RoadError::corruption(format!("stream {name} checksum mismatch")));
        }
        debug!(stream = name, bytes = entry.len, "archive.stream.copied");
        self.entries.push(StreamEntry { offset, ..entry });
        Ok(())
    }

    /// Writes the stream table and then the header.
    pub fn finish(self) -> Result<()> {
        let (meta_offset, meta_len) = self
            .meta
            .ok_or_else(|| RoadError::invalid_state("archive finished without metadata"))?;
        let table = format::encode_table(&self.entries);
        let table_offset = self.offset;
        self.io.write_at(table_offset, &table)?;
        let header = Header {
            format_version: ARCHIVE_FORMAT_VERSION,
            flags: 0,
            meta_offset,
            meta_len,
            table_offset,
            table_len: table.len() as u32,
            stream_count: self.entries.len() as u32,
        };
        self.io.write_at(0, &header.encode())?;
        Ok(())
    }
}

/// How an archive is opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArchiveMode {
    /// The archive must exist; saving is refused.
    Read,
    /// The archive may be missing; saves replace it atomically.
    Write,
}

/// Which attribute streams to force-load when a graph is loaded.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum LoadPlan {
    /// Load nothing up front; streams load on first access.
    #[default]
    Lazy,
    /// Load every stream.
    All,
    /// Load every stream except the named ones.
    AllExcept(BTreeSet<String>),
}

impl LoadPlan {
    /// Plan that skips the named streams.
    pub fn all_except<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LoadPlan::AllExcept(names.into_iter().map(Into::into).collect())
    }
}

/// Observes an archive load and decides what to force-load.
pub trait LoadListener {
    /// Called once with the metadata before any element data is read.
    fn plan(&mut self, _metadata: &Metadata) -> LoadPlan {
        LoadPlan::Lazy
    }

    /// Called after each element store finished loading.
    fn store_loaded(&mut self, _kind: ElementKind, _streams_loaded: usize) {}
}

impl LoadListener for LoadPlan {
    fn plan(&mut self, _metadata: &Metadata) -> LoadPlan {
        self.clone()
    }
}

/// A graph archive file.
#[derive(Debug)]
pub struct GraphArchive {
    path: PathBuf,
    mode: ArchiveMode,
    opts: ArchiveOptions,
    source: Option<ArchiveSource>,
}

impl GraphArchive {
    /// Opens an archive.
    ///
    /// In [`ArchiveMode::Read`] the file must exist and pass its header,
    /// metadata, and stream-table checks. In [`ArchiveMode::Write`] a missing
    /// or unreadable file is tolerated because the next save replaces it.
    pub fn open(path: impl AsRef<Path>, mode: ArchiveMode, opts: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source = match mode {
            ArchiveMode::Read => Some(ArchiveSource::open(&path, &opts)?),
            ArchiveMode::Write if path.exists() => match ArchiveSource::open(&path, &opts) {
                Ok(source) => Some(source),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "archive.open.existing_unreadable");
                    None
                }
            },
            ArchiveMode::Write => None,
        };
        info!(path = %path.display(), mode = ?mode, "archive.open");
        Ok(Self {
            path,
            mode,
            opts,
            source,
        })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the archive was opened in.
    pub fn mode(&self) -> ArchiveMode {
        self.mode
    }

    /// Metadata of the current archive contents, if any exist.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.source.as_ref().map(ArchiveSource::metadata)
    }

    /// Read handle on the current contents.
    pub fn source(&self) -> Option<&ArchiveSource> {
        self.source.as_ref()
    }

    /// Stream table of the current contents.
    pub fn streams(&self) -> Vec<&StreamEntry> {
        self.source
            .as_ref()
            .map(|s| s.streams().collect())
            .unwrap_or_default()
    }

    /// Reads one stream's raw payload.
    pub fn read_stream(&self, name: &str) -> Result<Vec<u8>> {
        self.require_source()?.read_stream(name)
    }

    fn require_source(&self) -> Result<&ArchiveSource> {
        self.source.as_ref().ok_or_else(|| {
            RoadError::invalid_state(format!("archive {} has no contents", self.path.display()))
        })
    }

    /// Loads a new graph from the archive.
    pub fn load(&self, listener: &mut dyn LoadListener) -> Result<Graph> {
        let source = self.require_source()?;
        let mut graph = Graph::new(source.metadata().descriptor.clone());
        graph.attach_archive(source, listener)?;
        Ok(graph)
    }

    /// Loads the archive into an existing, empty graph.
    pub fn load_into(&self, graph: &mut Graph, listener: &mut dyn LoadListener) -> Result<()> {
        let source = self.require_source()?;
        if !graph.is_empty() {
            return Err(RoadError::invalid_state(
                "cannot load an archive into a non-empty graph",
            ));
        }
        graph.attach_archive(source, listener)
    }

    /// Saves `graph`, replacing the archive contents.
    ///
    /// The graph is validated first; a failing check is returned as
    /// [`RoadError::Problem`] and nothing is written. On success every element
    /// store is re-attached to the new file so that unloaded attributes reload
    /// from it.
    pub fn save(&mut self, graph: &mut Graph) -> Result<Metadata> {
        self.require_writable()?;
        graph.validate()?;
        let metadata = graph.metadata()?;
        write_atomically(&self.path, self.opts.sync_on_save, |io| {
            let mut writer = ArchiveWriter::begin(io)?;
            writer.write_metadata(&metadata)?;
            graph.save_streams(&mut writer)?;
            writer.finish()
        })?;
        let source = ArchiveSource::open(&self.path, &self.opts)?;
        graph.saved(&source)?;
        info!(
            path = %self.path.display(),
            vertices = metadata.counts.vertices.value,
            edges = metadata.counts.edges.value,
            "archive.saved"
        );
        self.source = Some(source);
        Ok(metadata)
    }

    /// Replaces the metadata record, keeping every stream as-is.
    pub fn save_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        self.require_writable()?;
        let previous = self.require_source()?.clone();
        write_atomically(&self.path, self.opts.sync_on_save, |io| {
            let mut writer = ArchiveWriter::begin(io)?;
            writer.write_metadata(metadata)?;
            for entry in previous.streams() {
                writer.copy_stream(&previous, &entry.name)?;
            }
            writer.finish()
        })?;
        self.source = Some(ArchiveSource::open(&self.path, &self.opts)?);
        info!(path = %self.path.display(), "archive.metadata_saved");
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if self.mode != ArchiveMode::Write {
            return Err(RoadError::invalid_state(format!(
                "archive {} opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Closes the archive. Graphs loaded from it keep their own read handle.
    pub fn close(self) {
        debug!(path = %self.path.display(), "archive.closed");
    }
}
