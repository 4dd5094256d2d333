#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use roadstore::{
    storage::{
        schema::{edge, vertex},
        AdjacencyLists, ArchiveMode, ArchiveOptions, Descriptor, EdgeFlags, EdgeSpec, Graph,
        GraphArchive, LoadPlan, PlaceSpec, TurnRelation, TurnRestriction, Value,
    },
    types::{ElementId, ElementIndex, ElementKind, ListId, Point, Rect, Result, RoadError},
};
use tempfile::tempdir;

fn descriptor() -> Descriptor {
    Descriptor::new("OpenStreetMap", "PBF", "roadstore").with_name("unit-square")
}

fn unit_square() -> Result<Graph> {
    let mut graph = Graph::new(descriptor());
    let sw = graph.add_vertex(100, Point::from_degrees(0.0, 0.0))?;
    let mid = graph.add_vertex(101, Point::from_degrees(0.5, 0.5))?;
    let ne = graph.add_vertex(102, Point::from_degrees(1.0, 1.0))?;
    graph.add_edge(
        EdgeSpec::new(200, sw, mid)
            .with_name("Diagonal")
            .with_flags(EdgeFlags::ONEWAY | EdgeFlags::BRIDGE)
            .with_shape(vec![
                Point::from_degrees(0.0, 0.0),
                Point::from_degrees(0.2, 0.3),
                Point::from_degrees(0.5, 0.5),
            ]),
    )?;
    graph.add_edge(EdgeSpec::new(201, mid, ne))?;
    Ok(graph)
}

fn save(path: &Path, graph: &mut Graph) -> Result<()> {
    let mut archive = GraphArchive::open(path, ArchiveMode::Write, ArchiveOptions::default())?;
    archive.save(graph)?;
    archive.close();
    Ok(())
}

#[test]
fn adjacency_and_metadata_end_to_end() -> Result<()> {
    let mut lists = AdjacencyLists::new();
    let first = lists.append(&[5, 6])?;
    let second = lists.append(&[7])?;
    assert_eq!(lists.len(), 2);
    assert_eq!(first, ListId(1));
    assert_eq!(lists.get(first)?, &[5, 6]);
    assert_eq!(lists.get(second)?, &[7]);

    let dir = tempdir()?;
    let path = dir.path().join("square.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let archive = GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default())?;
    let metadata = archive.metadata().expect("metadata present");
    assert_eq!(metadata.counts.edges.value, 2);
    assert!(metadata.counts.edges.exact);
    assert_eq!(
        metadata.bounds,
        Some(Rect::new(
            Point::from_degrees(0.0, 0.0),
            Point::from_degrees(1.0, 1.0)
        ))
    );
    assert_eq!(metadata.descriptor, descriptor());

    let lazy = archive.load(&mut LoadPlan::Lazy)?;
    assert_eq!(lazy.counts().edges.value, 2);
    assert_eq!(lazy.bounds()?, metadata.bounds);
    for kind in ElementKind::ALL {
        let attributes = lazy.store(kind).attributes();
        assert!(
            attributes.names().all(|name| !attributes.is_loaded(name)),
            "{kind:?} streams stay unloaded"
        );
    }
    Ok(())
}

#[test]
fn every_attribute_survives_a_save() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("full.rga");
    let mut graph = unit_square()?;
    let first = ElementIndex(0);
    graph.set_attribute(
        ElementKind::Vertex,
        first,
        vertex::TAGS,
        Value::Tags(vec![("highway".into(), "traffic_signals".into())]),
    )?;
    graph.set_attribute(ElementKind::Edge, ElementIndex(1), edge::SPEED, Value::Int(50))?;
    graph.set_attribute(ElementKind::Edge, ElementIndex(1), edge::GRADE, Value::Percent(7))?;
    graph.add_place(PlaceSpec {
        id: ElementId(300),
        location: Point::from_degrees(0.9, 0.1),
        name: Some("Hamlet".into()),
        population: Some(120),
        tags: vec![("place".into(), "hamlet".into())],
    })?;
    graph.add_relation(TurnRelation {
        id: ElementId(400),
        kind: TurnRestriction::NoUTurn,
        from: ElementIndex(0),
        via: ElementIndex(1),
        to: ElementIndex(1),
    })?;
    save(&path, &mut graph)?;

    let archive = GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default())?;
    let loaded = archive.load(&mut LoadPlan::Lazy)?;
    assert_eq!(loaded.id(ElementKind::Vertex, ElementIndex(2))?, ElementId(102));
    assert_eq!(
        loaded.vertex_location(ElementIndex(1))?,
        Some(Point::from_degrees(0.5, 0.5))
    );
    assert_eq!(
        loaded.attribute(ElementKind::Vertex, first, vertex::TAGS)?,
        Some(Value::Tags(vec![("highway".into(), "traffic_signals".into())]))
    );
    assert_eq!(
        loaded.edge_endpoints(ElementIndex(1))?,
        (ElementIndex(1), ElementIndex(2))
    );
    assert_eq!(loaded.edge_shape(ElementIndex(0))?.map(|s| s.len()), Some(3));
    assert!(loaded.edge_flags(ElementIndex(0))?.contains(EdgeFlags::BRIDGE));
    assert!(!loaded.edge_flags(ElementIndex(1))?.contains(EdgeFlags::ONEWAY));
    assert_eq!(
        loaded.attribute(ElementKind::Edge, ElementIndex(0), edge::NAME)?,
        Some(Value::Text("Diagonal".into()))
    );
    assert_eq!(
        loaded.attribute(ElementKind::Edge, ElementIndex(1), edge::GRADE)?,
        Some(Value::Percent(7))
    );
    assert_eq!(loaded.attribute(ElementKind::Edge, ElementIndex(0), edge::SPEED)?, None);
    assert_eq!(loaded.relation(ElementIndex(0))?.kind, TurnRestriction::NoUTurn);
    assert_eq!(loaded.out_edges(ElementIndex(1))?, vec![ElementIndex(1)]);
    assert_eq!(loaded.in_edges(ElementIndex(1))?, vec![ElementIndex(0)]);
    Ok(())
}

#[test]
fn resaving_a_lazily_loaded_graph_keeps_unloaded_streams() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("resave.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let mut archive = GraphArchive::open(&path, ArchiveMode::Write, ArchiveOptions::default())?;
    let mut loaded = archive.load(&mut LoadPlan::Lazy)?;
    let extra = loaded.add_vertex(103, Point::from_degrees(2.0, 2.0))?;
    let metadata = archive.save(&mut loaded)?;
    assert_eq!(metadata.counts.vertices.value, 4);
    assert_eq!(
        metadata.bounds.map(|b| b.max),
        Some(Point::from_degrees(2.0, 2.0))
    );

    let reread = GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default())?
        .load(&mut LoadPlan::Lazy)?;
    assert_eq!(reread.vertex_location(extra)?, Some(Point::from_degrees(2.0, 2.0)));
    assert_eq!(
        reread.attribute(ElementKind::Edge, ElementIndex(0), edge::NAME)?,
        Some(Value::Text("Diagonal".into()))
    );
    Ok(())
}

#[test]
fn metadata_can_be_rewritten_without_touching_streams() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("meta.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let mut archive = GraphArchive::open(&path, ArchiveMode::Write, ArchiveOptions::default())?;
    let mut metadata = archive.metadata().cloned().expect("metadata present");
    metadata.descriptor = metadata.descriptor.with_version("2026-10");
    let before: Vec<_> = archive.streams().into_iter().cloned().collect();
    archive.save_metadata(&metadata)?;
    assert_eq!(
        archive.metadata().and_then(|m| m.descriptor.version.clone()),
        Some("2026-10".to_string())
    );
    let after: Vec<_> = archive.streams().into_iter().cloned().collect();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((&b.name, b.crc32, b.element_count), (&a.name, a.crc32, a.element_count));
    }
    Ok(())
}

#[test]
fn loading_into_a_populated_graph_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("busy.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let archive = GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default())?;
    let mut target = unit_square()?;
    assert!(matches!(
        archive.load_into(&mut target, &mut LoadPlan::Lazy),
        Err(RoadError::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn newer_format_versions_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("future.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let mut file = OpenOptions::new().write(true).open(&path)?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&99u16.to_le_bytes())?;
    drop(file);

    match GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default()) {
        Err(RoadError::UnsupportedVersion { found: 99, .. }) => Ok(()),
        other => panic!("expected UnsupportedVersion, got {other:?}"),
    }
}

#[test]
fn read_mode_refuses_to_save() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ro.rga");
    let mut graph = unit_square()?;
    save(&path, &mut graph)?;

    let mut archive = GraphArchive::open(&path, ArchiveMode::Read, ArchiveOptions::default())?;
    assert!(matches!(
        archive.save(&mut unit_square()?),
        Err(RoadError::InvalidState(_))
    ));
    Ok(())
}
