use std::path::{Path, PathBuf};

use tracing::debug;

use super::reference::Loader;
use crate::storage::archive::{ArchiveMode, ArchiveOptions, GraphArchive, LoadPlan};
use crate::storage::graph::Graph;
use crate::types::Result;

/// Loads a [`Graph`] from an archive file, e.g. one per world cell.
///
/// A missing file is "nothing to load" rather than an error.
#[derive(Clone, Debug)]
pub struct ArchiveLoader {
    path: PathBuf,
    opts: ArchiveOptions,
    plan: LoadPlan,
}

impl ArchiveLoader {
    /// Loader reading `path` lazily.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            opts: ArchiveOptions::default(),
            plan: LoadPlan::Lazy,
        }
    }

    /// Sets the streams to force-load.
    pub fn with_plan(mut self, plan: LoadPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Sets the archive options.
    pub fn with_options(mut self, opts: ArchiveOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Archive path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Loader<Graph> for ArchiveLoader {
    fn load(&self) -> Result<Option<Graph>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "cache.archive.missing");
            return Ok(None);
        }
        let archive = GraphArchive::open(&self.path, ArchiveMode::Read, self.opts.clone())?;
        let mut plan = self.plan.clone();
        let graph = archive.load(&mut plan)?;
        archive.close();
        Ok(Some(graph))
    }

    fn weight(&self, graph: &Graph) -> u64 {
        graph.heap_bytes() as u64
    }
}
