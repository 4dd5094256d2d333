#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roadstore::{
    staging::{CellKey, RawNode, RevisionMeta, StagingOptions, StagingStore},
    storage::{
        schema::vertex, ArchiveMode, ArchiveOptions, Descriptor, Graph, GraphArchive, LoadPlan,
        Value,
    },
    types::{ElementIndex, ElementKind, Point, Result},
};
use tempfile::tempdir;

const SUB_STORES: [&str; 4] = ["ids", "tags", "meta", "spatial"];

fn random_nodes(seed: u64, count: u64) -> Vec<RawNode> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (1..=count)
        .map(|id| {
            let lat = rng.gen_range(45.0..48.0);
            let lon = rng.gen_range(5.0..11.0);
            let mut node = RawNode::new(id, Point::from_degrees(lat, lon));
            if id % 3 == 0 {
                node = node.with_tag("highway", "crossing");
            }
            if id % 2 == 0 {
                node = node.with_meta(meta(1_000 + id as i64, (id % 4) as i64, "mapper"));
            }
            node
        })
        .collect()
}

fn meta(changeset: i64, user_id: i64, name: &str) -> RevisionMeta {
    RevisionMeta {
        changeset,
        revision: 1,
        timestamp: 1_700_000_000 + changeset * 7,
        user_id,
        user_name: format!("{name}{user_id}"),
    }
}

fn ids_by_cell(store: &mut StagingStore) -> Result<BTreeMap<CellKey, BTreeSet<u64>>> {
    let mut out = BTreeMap::new();
    for key in store.cells() {
        let ids = store.read_cell(key)?.into_iter().map(|n| n.id.0).collect();
        out.insert(key, ids);
    }
    Ok(out)
}

fn cell_files(dir: &Path, sub: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir.join(sub))? {
        names.insert(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[test]
fn cell_assignment_ignores_insertion_order() -> Result<()> {
    let dir = tempdir()?;
    let nodes = random_nodes(7, 400);
    let mut shuffled = nodes.clone();
    shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(99));

    let mut forward = StagingStore::create(dir.path().join("a"), StagingOptions::default())?;
    let mut mixed = StagingStore::create(dir.path().join("b"), StagingOptions::default())?;
    for node in &nodes {
        forward.add(node)?;
    }
    for node in &shuffled {
        mixed.add(node)?;
    }
    forward.flush()?;
    mixed.flush()?;

    assert_eq!(forward.cells(), mixed.cells());
    assert_eq!(ids_by_cell(&mut forward)?, ids_by_cell(&mut mixed)?);
    let files = cell_files(forward.dir(), "ids")?;
    assert_eq!(files.len(), forward.cells().len());
    for sub in SUB_STORES {
        assert_eq!(cell_files(forward.dir(), sub)?, files, "{sub} in lock-step");
        assert_eq!(cell_files(mixed.dir(), sub)?, files);
    }
    Ok(())
}

#[test]
fn records_read_back_in_insertion_order() -> Result<()> {
    let dir = tempdir()?;
    let mut store = StagingStore::create(dir.path(), StagingOptions::default())?;
    let nodes = vec![
        RawNode::new(10, Point::from_degrees(47.1, 8.1))
            .with_tag("name", "Bahnhofstrasse")
            .with_meta(meta(500, 1, "u")),
        RawNode::new(11, Point::from_degrees(47.2, 8.2)).with_meta(meta(501, 1, "u")),
        RawNode::new(12, Point::from_degrees(47.3, 8.3)),
        RawNode::new(13, Point::from_degrees(47.4, 8.4)).with_meta(meta(480, 2, "v")),
    ];
    for node in &nodes {
        assert_eq!(store.add(node)?, CellKey::new(47, 8));
    }
    assert_eq!(store.record_count(), 4);
    assert_eq!(store.read_cell(CellKey::new(47, 8))?, nodes);
    assert!(store.read_cell(CellKey::new(0, 0))?.is_empty());
    Ok(())
}

#[test]
fn same_user_runs_take_less_space() -> Result<()> {
    let dir = tempdir()?;
    let mut one_editor = StagingStore::create(dir.path().join("one"), StagingOptions::default())?;
    let mut many_editors = StagingStore::create(dir.path().join("many"), StagingOptions::default())?;
    for i in 0..100i64 {
        let location = Point::from_degrees(10.5, 10.5);
        one_editor.add(&RawNode::new(i as u64 + 1, location).with_meta(meta(9_000 + i, 42, "solo")))?;
        many_editors.add(&RawNode::new(i as u64 + 1, location).with_meta(meta(9_000 + i, i, "crowd")))?;
    }
    one_editor.flush()?;
    many_editors.flush()?;
    let file = CellKey::new(10, 10).file_name();
    let small = fs::metadata(one_editor.dir().join("meta").join(&file))?.len();
    let large = fs::metadata(many_editors.dir().join("meta").join(&file))?.len();
    assert!(small * 2 < large, "{small} vs {large}");
    Ok(())
}

#[test]
fn evicted_writers_reopen_without_changing_bytes() -> Result<()> {
    let dir = tempdir()?;
    let nodes = random_nodes(21, 300);
    let mut bounded = StagingStore::create(
        dir.path().join("bounded"),
        StagingOptions::default().max_open_cells(1).write_buffer_bytes(64),
    )?;
    let mut roomy = StagingStore::create(dir.path().join("roomy"), StagingOptions::default())?;
    for node in &nodes {
        bounded.add(node)?;
        roomy.add(node)?;
    }
    bounded.flush()?;
    roomy.flush()?;
    assert!(bounded.cells().len() > 1);

    for sub in SUB_STORES {
        for name in cell_files(roomy.dir(), sub)? {
            let a = fs::read(bounded.dir().join(sub).join(&name))?;
            let b = fs::read(roomy.dir().join(sub).join(&name))?;
            assert_eq!(a, b, "{sub}/{name}");
        }
    }
    for key in roomy.cells() {
        assert_eq!(bounded.read_cell(key)?, roomy.read_cell(key)?);
    }
    Ok(())
}

#[test]
fn reopened_store_continues_delta_chains() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("run");
    let location = Point::from_degrees(-33.9, 18.4);
    let first = RawNode::new(1, location).with_meta(meta(70, 5, "cape"));
    let second = RawNode::new(2, location).with_meta(meta(71, 5, "cape"));
    {
        let mut store = StagingStore::create(&path, StagingOptions::default())?;
        store.add(&first)?;
        store.flush()?;
    }
    assert!(StagingStore::create(&path, StagingOptions::default()).is_err());

    let mut store = StagingStore::open(&path, StagingOptions::default())?;
    assert!(store.contains_data());
    let key = store.add(&second)?;
    assert_eq!(key, CellKey::new(-34, 18));
    assert_eq!(store.read_cell(key)?, vec![first, second]);
    Ok(())
}

#[test]
fn merged_archive_carries_tags_and_history() -> Result<()> {
    let dir = tempdir()?;
    let staging_dir = dir.path().join("staging");
    let archive_path = dir.path().join("nodes.rga");
    let nodes = random_nodes(3, 120);

    let mut store = StagingStore::create(&staging_dir, StagingOptions::default().cell_degrees(0.5))?;
    for node in &nodes {
        store.add(node)?;
    }
    let mut archive = GraphArchive::open(&archive_path, ArchiveMode::Write, ArchiveOptions::default())?;
    let metadata = store.save_to(&mut archive, Descriptor::new("test", "CSV", "roadstore"))?;
    assert_eq!(metadata.counts.vertices.value, 120);
    store.delete()?;
    assert!(!staging_dir.exists());

    let graph = GraphArchive::open(&archive_path, ArchiveMode::Read, ArchiveOptions::default())?
        .load(&mut LoadPlan::Lazy)?;
    let mut by_id = BTreeMap::new();
    for i in 0..graph.store(ElementKind::Vertex).len() as u32 {
        let index = ElementIndex(i);
        by_id.insert(graph.id(ElementKind::Vertex, index)?.0, index);
    }
    for node in &nodes {
        let index = by_id[&node.id.0];
        assert_eq!(graph.vertex_location(index)?, Some(node.location));
        let tags = graph.attribute(ElementKind::Vertex, index, vertex::TAGS)?;
        let expected = (!node.tags.is_empty()).then(|| Value::Tags(node.tags.clone()));
        assert_eq!(tags, expected);
        let changeset = graph.attribute(ElementKind::Vertex, index, vertex::CHANGESET)?;
        assert_eq!(changeset, node.meta.as_ref().map(|m| Value::Long(m.changeset)));
    }
    Ok(())
}

#[test]
fn merge_walks_cells_in_sorted_order() -> Result<()> {
    let dir = tempdir()?;
    let mut store = StagingStore::create(dir.path(), StagingOptions::default())?;
    store.add(&RawNode::new(1, Point::from_degrees(5.5, 5.5)))?;
    store.add(&RawNode::new(2, Point::from_degrees(-5.5, 5.5)))?;
    store.add(&RawNode::new(3, Point::from_degrees(5.5, -5.5)))?;

    let mut graph = Graph::new(Descriptor::default());
    assert_eq!(store.merge_into(&mut graph)?, 3);
    let ids: Vec<u64> = (0..3)
        .map(|i| graph.id(ElementKind::Vertex, ElementIndex(i)).map(|id| id.0))
        .collect::<Result<_>>()?;
    assert_eq!(ids, vec![2, 3, 1]);
    Ok(())
}
