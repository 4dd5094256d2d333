#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use roadstore::{
    cache::{
        ArchiveLoader, FixedMemory, ReferenceTracker, RetryPolicy, Strength, TrackerOptions,
        VirtualReference, Watermark,
    },
    storage::{ArchiveMode, ArchiveOptions, Descriptor, Graph, GraphArchive, LoadPlan},
    types::{Point, Result, RoadError},
};
use tempfile::tempdir;

type Counter = Arc<AtomicUsize>;

fn counting(tracker: &Arc<ReferenceTracker>, value: u64) -> (VirtualReference<u64>, Counter) {
    let calls = Counter::default();
    let seen = calls.clone();
    let reference = VirtualReference::new(tracker.clone(), move || -> Result<Option<u64>> {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Some(value))
    });
    (reference, calls)
}

fn loads(counter: &Counter) -> usize {
    counter.load(Ordering::SeqCst)
}

#[test]
fn least_recently_loaded_is_evicted_first() {
    const K: usize = 3;
    let tracker = Arc::new(ReferenceTracker::new(
        TrackerOptions::default()
            .watermark(Watermark::StrongCount { max: K })
            .soften_to(Strength::Discardable),
    ));
    let refs: Vec<_> = (0..=K as u64).map(|v| counting(&tracker, v)).collect();

    for (reference, _) in &refs[..K] {
        assert!(reference.get().is_some());
    }
    // Frequent reads of the first reference do not protect it.
    for _ in 0..10 {
        assert_eq!(refs[0].0.get().as_deref(), Some(&0));
    }
    assert_eq!(loads(&refs[0].1), 1);

    assert!(refs[K].0.get().is_some());
    assert!(!refs[0].0.is_resident(), "oldest load softened and collected");
    for (reference, _) in &refs[1..] {
        assert_eq!(reference.strength(), Some(Strength::Strong));
    }

    assert_eq!(refs[0].0.get().as_deref(), Some(&0));
    assert_eq!(loads(&refs[0].1), 2, "exactly one reload");
    assert!(!refs[1].0.is_resident(), "next oldest goes when the first returns");

    let stats = tracker.stats();
    assert_eq!(stats.loads, K as u64 + 2);
    assert_eq!(stats.softened, 2);
    assert_eq!(stats.strong, K);
}

#[test]
fn reclaimable_values_survive_until_reclaimed() {
    let tracker = Arc::new(ReferenceTracker::new(
        TrackerOptions::default().watermark(Watermark::StrongCount { max: 1 }),
    ));
    let (first, first_loads) = counting(&tracker, 1);
    let (second, _) = counting(&tracker, 2);
    first.get();
    second.get();

    assert_eq!(first.strength(), Some(Strength::Reclaimable));
    assert_eq!(first.get().as_deref(), Some(&1));
    assert_eq!(loads(&first_loads), 1, "softened value is still served");

    assert_eq!(tracker.reclaim(), 1);
    assert!(!first.is_resident());
    assert_eq!(first.get().as_deref(), Some(&1));
    assert_eq!(loads(&first_loads), 2);
}

#[test]
fn concurrent_gets_run_the_loader_once() {
    const THREADS: usize = 8;
    let tracker = Arc::new(ReferenceTracker::new(
        TrackerOptions::default().watermark(Watermark::StrongCount { max: 16 }),
    ));
    let calls = Counter::default();
    let seen = calls.clone();
    let loader = move || -> Result<Option<Vec<u32>>> {
        seen.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(25));
        Ok(Some((0..1024).collect()))
    };
    let reference: VirtualReference<Vec<u32>> = VirtualReference::new(tracker, loader);
    let barrier = Barrier::new(THREADS);

    let results: Vec<Arc<Vec<u32>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    reference.get().expect("value loaded")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for value in &results[1..] {
        assert!(Arc::ptr_eq(value, &results[0]));
    }
}

#[test]
fn failing_loader_is_retried_once_then_left_alone() {
    let tracker = Arc::new(ReferenceTracker::new(TrackerOptions::default()));
    assert_eq!(tracker.options().retry, RetryPolicy { max_attempts: 2 });
    let calls = Counter::default();
    let seen = calls.clone();
    let loader = move || -> Result<Option<u8>> {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(RoadError::Corruption("loader always fails".into()))
    };
    let reference: VirtualReference<u8> = VirtualReference::new(tracker, loader);

    for _ in 0..5 {
        assert!(reference.get().is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(reference.failures(), 2);

    reference.reset_failures();
    assert!(reference.get().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn free_memory_watermark_follows_the_probe() {
    let probe = Arc::new(FixedMemory::new(8 << 20));
    let tracker = Arc::new(ReferenceTracker::with_probe(
        TrackerOptions::default().watermark(Watermark::FreeMemory { min_free_bytes: 1 << 20 }),
        Box::new(probe.clone()),
    ));
    let refs: Vec<_> = (0..3).map(|v| counting(&tracker, v)).collect();
    refs[0].0.get();
    refs[1].0.get();
    assert_eq!(tracker.stats().strong, 2);

    probe.set(512 << 10);
    assert_eq!(refs[2].0.get().as_deref(), Some(&2), "caller still gets its value");
    let stats = tracker.stats();
    assert_eq!(stats.softened, 3);
    assert_eq!(stats.resident, 0);

    probe.set(8 << 20);
    refs[0].0.get();
    assert!(refs[0].0.is_resident());
    assert_eq!(loads(&refs[0].1), 2);
}

fn write_archive(path: &std::path::Path, vertices: u32) -> Result<()> {
    let mut graph = Graph::new(Descriptor::new("test", "synthetic", "roadstore"));
    for i in 0..vertices {
        graph.add_vertex(u64::from(i) + 1, Point::from_degrees(f64::from(i) * 1e-4, 0.0))?;
    }
    let mut archive = GraphArchive::open(path, ArchiveMode::Write, ArchiveOptions::default())?;
    archive.save(&mut graph)?;
    Ok(())
}

#[test]
fn archive_cells_share_a_byte_budget() -> Result<()> {
    let dir = tempdir()?;
    let west = dir.path().join("cell_w.rga");
    let east = dir.path().join("cell_e.rga");
    write_archive(&west, 500)?;
    write_archive(&east, 500)?;

    let weight = GraphArchive::open(&west, ArchiveMode::Read, ArchiveOptions::default())?
        .load(&mut LoadPlan::All)?
        .heap_bytes() as u64;
    assert!(weight > 0);

    let tracker = Arc::new(ReferenceTracker::new(
        TrackerOptions::default()
            .watermark(Watermark::ResidentBytes { max_bytes: weight + weight / 2 })
            .soften_to(Strength::Discardable),
    ));
    let cell = |path: &std::path::Path| -> VirtualReference<Graph> {
        VirtualReference::new(tracker.clone(), ArchiveLoader::new(path).with_plan(LoadPlan::All))
    };
    let west_ref = cell(&west);
    let east_ref = cell(&east);
    let missing = cell(&dir.path().join("none.rga"));

    assert_eq!(west_ref.get().map(|g| g.counts().vertices.value), Some(500));
    assert_eq!(tracker.stats().resident_bytes, weight);
    assert!(east_ref.get().is_some());
    assert!(!west_ref.is_resident());
    assert!(east_ref.is_resident());
    assert_eq!(tracker.stats().resident_bytes, weight);

    assert!(missing.get().is_none());
    assert_eq!(missing.failures(), 1);
    Ok(())
}
