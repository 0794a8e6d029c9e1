mod common;

use bson::{doc, Document};
use common::{oplog_entry, MemSource, Rollover};
use mongo_dump::blocking::mongo_dumper::oplog_dump::OplogDump;
use mongo_dump::intents::{Intent, Namespace, Output};
use mongo_dump::oplog::OplogTs;
use mongo_dump::source::{FindQuery, ScanMode, Source};
use mongo_dump::{DumpConf, DumpError, MongoDump};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn oplog_conf(out: &Path) -> DumpConf {
    DumpConf::new("mongodb://localhost:27017".to_string(), out.to_path_buf()).with_oplog(true)
}

fn encoded(docs: &[Document]) -> Vec<u8> {
    docs.iter().flat_map(|d| bson::to_vec(d).unwrap()).collect()
}

fn collection() -> Vec<Document> {
    vec![doc! {"_id": 1}, doc! {"_id": 2}]
}

fn run(conf: DumpConf, source: MemSource) -> mongo_dump::Result<()> {
    MongoDump::new(conf, Box::new(source))?.dump()
}

#[test]
fn test_oplog_captures_writes_during_dump() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_oplog(&[(1, 0), (2, 0)])
        .with_collection("test", "c", collection())
        .with_writes_during_dump(vec![oplog_entry(3, 0)]);
    run(oplog_conf(tmp.path()), source).unwrap();

    assert_eq!(
        fs::read(tmp.path().join("oplog.bson")).unwrap(),
        encoded(&[oplog_entry(3, 0)])
    );
    assert_eq!(
        fs::read(tmp.path().join("test").join("c.bson")).unwrap(),
        encoded(&collection())
    );
}

#[test]
fn test_oplog_without_writes_is_empty() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_oplog(&[(1, 0), (2, 0)])
        .with_collection("test", "c", collection());
    run(oplog_conf(tmp.path()), source).unwrap();

    assert!(fs::read(tmp.path().join("oplog.bson")).unwrap().is_empty());
}

#[test]
fn test_oplog_rollover_while_dumping_collections() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_oplog(&[(1, 0), (2, 0)])
        .with_collection("test", "c", collection())
        .with_writes_during_dump(vec![oplog_entry(3, 0), oplog_entry(4, 0)])
        .with_rollover(Rollover::DuringCollections);

    let err = run(oplog_conf(tmp.path()), source).unwrap_err();
    match &err {
        DumpError::OplogOverflow { start, oldest } => {
            assert_eq!(*start, OplogTs::new(2, 0));
            assert_eq!(*oldest, OplogTs::new(4, 0));
        }
        other => panic!("expect oplog overflow, get {:?}", other),
    }
    assert!(err.is_consistency_error());
    // the first check fails before anything is copied.
    assert!(!tmp.path().join("oplog.bson").exists());
}

#[test]
fn test_oplog_rollover_while_copying_oplog() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_oplog(&[(1, 0), (2, 0)])
        .with_collection("test", "c", collection())
        .with_writes_during_dump(vec![oplog_entry(3, 0), oplog_entry(4, 0)])
        .with_rollover(Rollover::DuringOplogCopy);

    let err = run(oplog_conf(tmp.path()), source).unwrap_err();
    assert!(err.is_consistency_error());
    assert!(matches!(err, DumpError::OplogOverflow { .. }));
    assert_eq!(
        fs::read(tmp.path().join("oplog.bson")).unwrap(),
        encoded(&[oplog_entry(3, 0), oplog_entry(4, 0)])
    );
}

#[test]
fn test_oplog_requires_master() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_is_master(doc! {"ismaster": false})
        .with_oplog(&[(1, 0)])
        .with_collection("test", "c", collection());

    assert!(matches!(
        run(oplog_conf(tmp.path()), source),
        Err(DumpError::NotPrimary)
    ));
}

#[test]
fn test_oplog_master_slave_location() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_is_master(doc! {"ismaster": true})
        .with_collection("local", "oplog.$main", vec![oplog_entry(5, 0)])
        .with_collection("test", "c", collection());
    let oplog_ns = Namespace::new("local", "oplog.$main");

    let found = OplogDump::determine(&source).unwrap();
    assert_eq!(found.namespace(), &oplog_ns);
    assert_eq!(found.capture().unwrap().start(), OplogTs::new(5, 0));

    run(oplog_conf(tmp.path()), source).unwrap();
    assert!(fs::read(tmp.path().join("oplog.bson")).unwrap().is_empty());
}

#[test]
fn test_oplog_replica_set_location() {
    let source = MemSource::new().with_oplog(&[(7, 1), (7, 2)]);
    let captured = OplogDump::determine(&source).unwrap().capture().unwrap();

    assert_eq!(captured.namespace(), &Namespace::new("local", "oplog.rs"));
    assert_eq!(captured.start(), OplogTs::new(7, 2));
}

#[test]
fn test_empty_oplog_has_no_start_point() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new().with_collection("test", "c", collection());

    assert!(matches!(
        run(oplog_conf(tmp.path()), source),
        Err(DumpError::EmptyOplog)
    ));
}

#[test]
fn test_oplog_only_on_full_dump() {
    let tmp = TempDir::new().unwrap();
    let conf = oplog_conf(tmp.path()).with_db("test");
    match MongoDump::new(conf, Box::new(MemSource::new())) {
        Err(DumpError::Config(msg)) => assert_eq!(msg, "--oplog mode only supported on full dumps"),
        other => panic!("expect config error, get {:?}", other.err()),
    }
}

#[test]
fn test_oplog_steps_report_copied_entries() {
    let tmp = TempDir::new().unwrap();
    let source = MemSource::new()
        .with_oplog(&[(1, 0), (2, 0)])
        .with_collection("test", "c", collection())
        .with_writes_during_dump(vec![oplog_entry(3, 0)]);

    let captured = OplogDump::determine(&source)
        .unwrap()
        .capture()
        .unwrap();
    // reading a collection lets the scripted write land in the oplog.
    let _ = source
        .find(&Namespace::new("test", "c"), &FindQuery::new(None, ScanMode::Snapshot))
        .unwrap()
        .count();

    let path = tmp.path().join("oplog.bson");
    let intent = Intent::new(Namespace::new("local", "oplog.rs"), Output::File(path.clone()));
    let copied = captured.verify().unwrap().copy(&intent).unwrap();
    assert_eq!(copied.copied(), 1);
    assert_eq!(copied.verify().unwrap(), OplogTs::new(2, 0));
    assert_eq!(fs::read(path).unwrap(), encoded(&[oplog_entry(3, 0)]));
}
