//! Integration tests: batch writes, index readiness, range queries and
//! replication against on-disk stores in temporary directories.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use geo_core::types::{BoundingBox, Node};
use geobench_store::db::QUERY_PAGE;
use geobench_store::{
    BatchOp, CounterSource, GeoDb, GeoStore, ReplicationEndpoint, StorePaths,
};
use tempfile::TempDir;

const WAIT: Option<Duration> = Some(Duration::from_secs(30));

fn open_store(dir: &TempDir, name: &str) -> GeoDb {
    GeoDb::open(StorePaths::under(dir.path().join(name))).expect("open store")
}

fn grid_ops(n: usize) -> Vec<BatchOp> {
    (0..n)
        .map(|i| BatchOp::put(i.to_string(), Node::point(i as f64 * 0.01, i as f64 * 0.02)))
        .collect()
}

fn count(store: &GeoDb, bbox: BoundingBox) -> usize {
    store
        .query(bbox)
        .map(|r| r.expect("query row"))
        .count()
}

#[test]
fn batch_then_ready_indexes_every_put() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");

    store.batch(grid_ops(250)).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 250);
    assert_eq!(store.log_len().unwrap(), 250);
    assert_eq!(count(&store, BoundingBox::world()), 250);
}

#[test]
fn empty_store_is_ready_and_empty() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");

    store.ready(WAIT).unwrap();
    assert!(store.is_empty().unwrap());
    assert_eq!(count(&store, BoundingBox::world()), 0);
}

#[test]
fn query_bounds_are_inclusive_and_exact() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    store
        .batch(vec![
            BatchOp::put("edge", Node::point(1.0, 1.0)),
            BatchOp::put("inside", Node::point(0.5, 0.5)),
            BatchOp::put("just-outside", Node::point(1.000001, 0.5)),
            BatchOp::put("far", Node::point(-45.0, 120.0)),
        ])
        .unwrap();
    store.ready(WAIT).unwrap();

    let hits: Vec<Node> = store
        .query(BoundingBox::new(0.0, 1.0, 0.0, 1.0))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&Node::point(1.0, 1.0)));
    assert!(hits.contains(&Node::point(0.5, 0.5)));
}

#[test]
fn query_pages_past_the_first_page() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    let n = QUERY_PAGE * 2 + 17;
    let ops = (0..n)
        .map(|i| BatchOp::put(i.to_string(), Node::point(10.0, 20.0)))
        .collect();
    store.batch(ops).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(count(&store, BoundingBox::new(9.0, 11.0, 19.0, 21.0)), n);
}

#[test]
fn later_put_supersedes_earlier_version() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    store
        .batch(vec![BatchOp::put("k", Node::point(5.0, 5.0))])
        .unwrap();
    store
        .batch(vec![BatchOp::put("k", Node::point(-5.0, -5.0))])
        .unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.log_len().unwrap(), 2);
    assert_eq!(count(&store, BoundingBox::new(4.0, 6.0, 4.0, 6.0)), 0);
    assert_eq!(count(&store, BoundingBox::new(-6.0, -4.0, -6.0, -4.0)), 1);
}

#[test]
fn delete_removes_document_from_index() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    store.batch(grid_ops(3)).unwrap();
    store.batch(vec![BatchOp::del("1")]).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(count(&store, BoundingBox::world()), 2);
}

#[test]
fn invalid_batch_is_rejected_as_a_whole() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    let mut ops = grid_ops(3);
    ops.push(BatchOp::put("bad", Node::point(0.0, 181.0)));

    assert!(store.batch(ops).is_err());
    store.ready(WAIT).unwrap();
    assert_eq!(store.log_len().unwrap(), 0);
}

#[test]
fn reopening_over_an_existing_log_rebuilds_the_index() {
    let dataset = TempDir::new().unwrap();
    {
        let store = GeoDb::open(StorePaths::under(dataset.path())).unwrap();
        store.batch(grid_ops(40)).unwrap();
        store.ready(WAIT).unwrap();
    }

    let work = TempDir::new().unwrap();
    let store = GeoDb::open(StorePaths::for_dataset(dataset.path(), work.path())).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 40);
    assert_eq!(count(&store, BoundingBox::world()), 40);
}

#[test]
fn index_built_from_another_log_is_rebuilt() {
    let work = TempDir::new().unwrap();
    {
        let store = GeoDb::open(StorePaths::under(work.path())).unwrap();
        store.batch(grid_ops(40)).unwrap();
        store.ready(WAIT).unwrap();
    }

    let dataset = TempDir::new().unwrap();
    {
        let store = GeoDb::open(StorePaths::under(dataset.path())).unwrap();
        let ops = (0..60)
            .map(|i| BatchOp::put(format!("d{i}"), Node::point(-10.0 - i as f64 * 0.1, 5.0)))
            .collect();
        store.batch(ops).unwrap();
        store.ready(WAIT).unwrap();
    }

    let store = GeoDb::open(StorePaths::for_dataset(dataset.path(), work.path())).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 60);
    assert_eq!(count(&store, BoundingBox::world()), 60);
    assert_eq!(count(&store, BoundingBox::new(0.0, 1.0, 0.0, 2.0)), 0);
}

#[test]
fn index_ahead_of_a_shorter_log_is_rebuilt() {
    let work = TempDir::new().unwrap();
    {
        let store = GeoDb::open(StorePaths::under(work.path())).unwrap();
        store.batch(grid_ops(80)).unwrap();
        store.ready(WAIT).unwrap();
    }

    let dataset = TempDir::new().unwrap();
    {
        let store = GeoDb::open(StorePaths::under(dataset.path())).unwrap();
        store.batch(grid_ops(30)).unwrap();
        store.ready(WAIT).unwrap();
    }

    let store = GeoDb::open(StorePaths::for_dataset(dataset.path(), work.path())).unwrap();
    store.ready(WAIT).unwrap();

    assert_eq!(store.len().unwrap(), 30);
    assert_eq!(count(&store, BoundingBox::world()), 30);
}

#[test]
fn counters_track_log_and_chunk_io() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "a");
    let before = store.io_stats();

    store.batch(grid_ops(10)).unwrap();
    store.ready(WAIT).unwrap();
    count(&store, BoundingBox::world());

    let after = store.io_stats();
    assert_eq!(after.log_writes - before.log_writes, 10);
    assert!(after.log_reads >= 10);
    assert!(after.chunk_writes > before.chunk_writes);
    assert!(after.chunk_reads > before.chunk_reads);

    let names: Vec<&str> = store.counter_snapshot().iter().map(|(k, _)| *k).collect();
    assert_eq!(names, ["log_reads", "log_writes", "chunk_reads", "chunk_writes"]);
}

#[test]
fn duplex_replication_merges_both_logs() {
    let dir = TempDir::new().unwrap();
    let a = open_store(&dir, "a");
    let b = open_store(&dir, "b");

    a.batch(grid_ops(30)).unwrap();
    b.batch(vec![
        BatchOp::put("b-only-1", Node::point(-10.0, -10.0)),
        BatchOp::put("b-only-2", Node::point(-11.0, -11.0)),
    ])
    .unwrap();

    let (a_out, b_in) = mpsc::channel();
    let (b_out, a_in) = mpsc::channel();
    let (stats_a, stats_b) = thread::scope(|s| {
        let ha = s.spawn(|| a.replicate(a_out, a_in));
        let hb = s.spawn(|| b.replicate(b_out, b_in));
        (ha.join().unwrap().unwrap(), hb.join().unwrap().unwrap())
    });

    assert_eq!(stats_a.sent, 30);
    assert_eq!(stats_a.received, 2);
    assert_eq!(stats_b.sent, 2);
    assert_eq!(stats_b.applied, 30);

    a.ready(WAIT).unwrap();
    b.ready(WAIT).unwrap();
    assert_eq!(a.len().unwrap(), 32);
    assert_eq!(b.len().unwrap(), 32);
}

#[test]
fn replicating_identical_stores_moves_nothing() {
    let dir = TempDir::new().unwrap();
    let a = open_store(&dir, "a");
    let b = open_store(&dir, "b");
    a.batch(grid_ops(5)).unwrap();
    b.batch(grid_ops(5)).unwrap();

    let (a_out, b_in) = mpsc::channel();
    let (b_out, a_in) = mpsc::channel();
    let (stats_a, stats_b) = thread::scope(|s| {
        let ha = s.spawn(|| a.replicate(a_out, a_in));
        let hb = s.spawn(|| b.replicate(b_out, b_in));
        (ha.join().unwrap().unwrap(), hb.join().unwrap().unwrap())
    });

    assert_eq!(stats_a.sent + stats_b.sent, 0);
    assert_eq!(a.log_len().unwrap(), 5);
}

#[test]
fn replication_fails_when_peer_hangs_up() {
    let dir = TempDir::new().unwrap();
    let a = open_store(&dir, "a");
    a.batch(grid_ops(2)).unwrap();

    let (a_out, _peer_in) = mpsc::channel();
    let (peer_out, a_in) = mpsc::channel();
    drop(peer_out);

    assert!(a.replicate(a_out, a_in).is_err());
}
