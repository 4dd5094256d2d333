//! Road-network graph storage.
//!
//! `roadstore` keeps a routable graph as per-attribute column streams that
//! can be loaded and unloaded independently, persists it in a single
//! checksummed archive file written atomically, caches archive-backed graphs
//! behind memory-bounded references, and stages raw nodes on disk during bulk
//! ingestion.
//!
//! ```no_run
//! use roadstore::storage::archive::{ArchiveMode, ArchiveOptions, Descriptor, GraphArchive, LoadPlan};
//! use roadstore::storage::graph::{EdgeSpec, Graph};
//! use roadstore::types::Point;
//!
//! # fn main() -> roadstore::types::Result<()> {
//! let mut graph = Graph::new(Descriptor::new("OpenStreetMap", "PBF", "roadstore"));
//! let a = graph.add_vertex(1, Point::from_degrees(47.37, 8.54))?;
//! let b = graph.add_vertex(2, Point::from_degrees(47.38, 8.55))?;
//! graph.add_edge(EdgeSpec::new(10, a, b))?;
//!
//! let mut archive = GraphArchive::open("zurich.rga", ArchiveMode::Write, ArchiveOptions::default())?;
//! archive.save(&mut graph)?;
//!
//! let archive = GraphArchive::open("zurich.rga", ArchiveMode::Read, ArchiveOptions::default())?;
//! let lazy = archive.load(&mut LoadPlan::Lazy)?;
//! assert_eq!(lazy.out_edges(a)?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod primitives;
pub mod staging;
pub mod storage;
pub mod types;
