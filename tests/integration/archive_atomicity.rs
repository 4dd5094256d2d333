#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use roadstore::{
    primitives::io::temp_path,
    storage::{
        schema::edge, ArchiveMode, ArchiveOptions, ArchiveSource, Descriptor, EdgeSpec, Graph,
        GraphArchive, LoadPlan,
    },
    types::{ElementIndex, Point, Result, RoadError},
};
use tempfile::tempdir;

fn named_path(label: &str, vertices: u32) -> Result<Graph> {
    let mut graph = Graph::new(Descriptor::new("test", "synthetic", "roadstore").with_name(label));
    let mut previous = None;
    for i in 0..vertices {
        let v = graph.add_vertex(u64::from(i) + 1, Point::from_degrees(f64::from(i) * 0.01, 0.0))?;
        if let Some(p) = previous {
            graph.add_edge(EdgeSpec::new(u64::from(i) + 1000, p, v).with_name(format!("{label} {i}")))?;
        }
        previous = Some(v);
    }
    Ok(graph)
}

fn save_new(path: &Path, graph: &mut Graph) -> Result<()> {
    let mut archive = GraphArchive::open(path, ArchiveMode::Write, ArchiveOptions::default())?;
    archive.save(graph)?;
    Ok(())
}

fn flip_payload_byte(path: &Path, stream: &str) -> Result<()> {
    let offset = ArchiveSource::open(path, &ArchiveOptions::default())?
        .entry(stream)
        .expect("stream present")
        .offset;
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&[0x5A])?;
    file.sync_all()?;
    Ok(())
}

#[test]
fn failure_while_writing_leaves_previous_archive_intact() -> Result<()> {
    let dir = tempdir()?;
    let target = dir.path().join("target.rga");
    let donor = dir.path().join("donor.rga");
    save_new(&target, &mut named_path("original", 3)?)?;
    save_new(&donor, &mut named_path("replacement", 5)?)?;
    let before = fs::read(&target)?;

    // The donor graph stays lazily bound to its file, so the save copies its
    // unloaded streams raw. Damaging one of them makes the copy fail after the
    // temporary file has been partly written.
    let mut replacement = GraphArchive::open(&donor, ArchiveMode::Read, ArchiveOptions::default())?
        .load(&mut LoadPlan::Lazy)?;
    flip_payload_byte(&donor, edge::NAME)?;

    let mut archive = GraphArchive::open(&target, ArchiveMode::Write, ArchiveOptions::default())?;
    let err = archive.save(&mut replacement).unwrap_err();
    assert!(matches!(err, RoadError::Corruption(_)), "{err}");

    assert_eq!(fs::read(&target)?, before, "target bytes unchanged");
    assert!(!temp_path(&target).exists(), "temporary file removed");

    let survivor = GraphArchive::open(&target, ArchiveMode::Read, ArchiveOptions::default())?;
    let metadata = survivor.metadata().expect("metadata present");
    assert_eq!(metadata.descriptor.name.as_deref(), Some("original"));
    assert_eq!(metadata.counts.vertices.value, 3);
    let graph = survivor.load(&mut LoadPlan::All)?;
    graph.validate()?;
    Ok(())
}

#[test]
fn invalid_graph_is_reported_before_anything_is_written() -> Result<()> {
    let dir = tempdir()?;
    let target = dir.path().join("target.rga");
    save_new(&target, &mut named_path("original", 2)?)?;
    let before = fs::read(&target)?;

    let mut hub = Graph::new(Descriptor::new("test", "synthetic", "roadstore"));
    let centre = hub.add_vertex(1, Point::from_degrees(0.0, 0.0))?;
    let rim = hub.add_vertex(2, Point::from_degrees(0.0, 0.001))?;
    for i in 0..256u64 {
        hub.add_edge(EdgeSpec::new(10 + i, centre, rim))?;
    }

    let mut archive = GraphArchive::open(&target, ArchiveMode::Write, ArchiveOptions::default())?;
    assert!(matches!(archive.save(&mut hub), Err(RoadError::Problem(_))));
    assert_eq!(fs::read(&target)?, before);
    assert!(!temp_path(&target).exists());
    Ok(())
}

#[test]
fn stale_temporary_file_does_not_block_a_save() -> Result<()> {
    let dir = tempdir()?;
    let target = dir.path().join("target.rga");
    fs::write(temp_path(&target), b"left behind by a crashed writer")?;

    save_new(&target, &mut named_path("fresh", 4)?)?;
    assert!(!temp_path(&target).exists());
    let graph = GraphArchive::open(&target, ArchiveMode::Read, ArchiveOptions::default())?
        .load(&mut LoadPlan::Lazy)?;
    assert_eq!(graph.out_edges(ElementIndex(0))?, vec![ElementIndex(0)]);
    Ok(())
}

#[test]
fn unreadable_target_is_replaced_in_write_mode() -> Result<()> {
    let dir = tempdir()?;
    let target = dir.path().join("target.rga");
    fs::write(&target, b"not an archive")?;
    assert!(GraphArchive::open(&target, ArchiveMode::Read, ArchiveOptions::default()).is_err());

    let mut archive = GraphArchive::open(&target, ArchiveMode::Write, ArchiveOptions::default())?;
    assert!(archive.metadata().is_none());
    archive.save(&mut named_path("rebuilt", 2)?)?;
    assert_eq!(archive.metadata().map(|m| m.counts.edges.value), Some(1));
    Ok(())
}
