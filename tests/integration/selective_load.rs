#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;

use roadstore::{
    storage::{
        schema::{self, edge, vertex},
        ArchiveMode, ArchiveOptions, Descriptor, EdgeSpec, Graph, GraphArchive, LoadListener,
        LoadPlan, Metadata, StoreState, Value,
    },
    types::{ElementIndex, ElementKind, Point, Result, RoadError},
};
use tempfile::tempdir;

fn write_grid(path: &Path) -> Result<()> {
    let mut graph = Graph::new(Descriptor::new("test", "synthetic", "roadstore"));
    let mut rows = Vec::new();
    for i in 0..4u32 {
        let lat = f64::from(i) * 0.001;
        rows.push(graph.add_vertex(u64::from(i) + 1, Point::from_degrees(lat, 0.0))?);
    }
    for (n, pair) in rows.windows(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        let shape = vec![
            graph.vertex_location(a)?.expect("located"),
            Point::from_degrees(0.0005 + n as f64 * 0.001, 0.0002),
            graph.vertex_location(b)?.expect("located"),
        ];
        graph.add_edge(EdgeSpec::new(100 + n as u64, a, b).with_shape(shape).with_name("Main"))?;
    }
    let mut archive = GraphArchive::open(path, ArchiveMode::Write, ArchiveOptions::default())?;
    archive.save(&mut graph)?;
    Ok(())
}

fn open(path: &Path) -> Result<GraphArchive> {
    GraphArchive::open(path, ArchiveMode::Read, ArchiveOptions::default())
}

fn resident(graph: &Graph, name: &str) -> bool {
    let kind = ElementKind::of_stream(name).expect("known prefix");
    graph.store(kind).attributes().is_loaded(name)
}

#[test]
fn skipped_stream_stays_unloaded_until_read() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.rga");
    write_grid(&path)?;

    let graph = open(&path)?.load(&mut LoadPlan::all_except([edge::SHAPE]))?;
    assert!(!resident(&graph, edge::SHAPE));
    for kind in ElementKind::ALL {
        for (name, _) in schema::declared(kind) {
            if *name != edge::SHAPE {
                assert!(resident(&graph, name), "{name} loaded up front");
            }
        }
    }

    let shape = graph.edge_shape(ElementIndex(2))?.expect("shape present");
    assert_eq!(shape.len(), 3);
    assert!(resident(&graph, edge::SHAPE), "read triggers the load");
    Ok(())
}

#[test]
fn graph_level_load_all_except_after_lazy_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.rga");
    write_grid(&path)?;

    let graph = open(&path)?.load(&mut LoadPlan::Lazy)?;
    assert!(!resident(&graph, vertex::LOCATION));
    let loaded = graph.load_all_except(&[edge::SHAPE, edge::NAME])?;
    assert!(loaded > 0);
    assert!(resident(&graph, vertex::LOCATION));
    assert!(!resident(&graph, edge::SHAPE));
    assert!(!resident(&graph, edge::NAME));
    assert_eq!(graph.load_all_except(&[edge::SHAPE, edge::NAME])?, 0, "nothing left to load");
    Ok(())
}

#[derive(Default)]
struct Recorder {
    seen_vertices: Option<u64>,
    per_kind: BTreeMap<String, usize>,
}

impl LoadListener for Recorder {
    fn plan(&mut self, metadata: &Metadata) -> LoadPlan {
        self.seen_vertices = Some(metadata.counts.vertices.value);
        if metadata.counts.vertices.value > 100 {
            LoadPlan::Lazy
        } else {
            LoadPlan::All
        }
    }

    fn store_loaded(&mut self, kind: ElementKind, streams_loaded: usize) {
        self.per_kind.insert(kind.prefix().to_string(), streams_loaded);
    }
}

#[test]
fn listener_chooses_plan_from_metadata() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.rga");
    write_grid(&path)?;

    let mut recorder = Recorder::default();
    let graph = open(&path)?.load(&mut recorder)?;
    assert_eq!(recorder.seen_vertices, Some(4));
    assert_eq!(recorder.per_kind.len(), ElementKind::ALL.len());
    assert_eq!(
        recorder.per_kind.get(ElementKind::Edge.prefix()).copied(),
        Some(schema::declared(ElementKind::Edge).len())
    );
    assert!(resident(&graph, edge::SHAPE));
    Ok(())
}

#[test]
fn unload_then_reload_from_archive() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.rga");
    write_grid(&path)?;

    let graph = open(&path)?.load(&mut LoadPlan::All)?;
    let before = graph.attribute(ElementKind::Edge, ElementIndex(1), edge::NAME)?;
    assert!(graph.unload()? > 0);
    assert!(graph.is_unloaded());
    assert_eq!(graph.store(ElementKind::Vertex).state(), StoreState::Unloaded);
    assert_eq!(graph.heap_bytes(), 0);

    assert_eq!(graph.attribute(ElementKind::Edge, ElementIndex(1), edge::NAME)?, before);
    assert_eq!(graph.out_edges(ElementIndex(1))?, vec![ElementIndex(1)]);
    graph.load_all()?;
    assert_eq!(graph.store(ElementKind::Edge).state(), StoreState::Loaded);
    Ok(())
}

#[test]
fn unsaved_changes_survive_unload() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grid.rga");
    write_grid(&path)?;

    let mut graph = open(&path)?.load(&mut LoadPlan::Lazy)?;
    graph.set_attribute(
        ElementKind::Vertex,
        ElementIndex(0),
        vertex::TAGS,
        Value::Tags(vec![("barrier".into(), "gate".into())]),
    )?;
    graph.unload()?;
    assert!(!graph.is_unloaded(), "modified stream stays resident");
    assert!(resident(&graph, vertex::TAGS));
    assert!(matches!(
        graph.store(ElementKind::Vertex).attributes().unload_stream(vertex::TAGS),
        Err(RoadError::InvalidState(_))
    ));
    assert!(matches!(
        graph.add_vertex(99, Point::from_degrees(1.0, 1.0)),
        Err(RoadError::InvalidState(_))
    ));
    Ok(())
}
