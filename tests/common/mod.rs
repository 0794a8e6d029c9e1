#![allow(dead_code)]

use bson::{doc, Bson, Document, Timestamp};
use mongo_dump::intents::Namespace;
use mongo_dump::source::{FindQuery, Natural, RawCursor, Source};
use mongo_dump::{DumpError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const OPLOG_DB: &str = "local";
pub const OPLOG_COLL: &str = "oplog.rs";

/// when the oplog gets truncated down to its newest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    Never,
    /// while the first regular collection is read.
    DuringCollections,
    /// while the oplog itself is read.
    DuringOplogCopy,
}

#[derive(Default)]
struct State {
    dbs: BTreeMap<String, BTreeMap<String, Vec<Document>>>,
    /// oplog entries appended when the first regular collection is read.
    pending_writes: Vec<Document>,
}

/// every `find` call, in call order.
pub type FindLog = Arc<Mutex<Vec<(Namespace, FindQuery)>>>;

/// A mongodb deployment held in memory.
pub struct MemSource {
    state: Mutex<State>,
    is_master: Document,
    rollover: Rollover,
    /// reading this collection fails after its first document.
    failing: Option<Namespace>,
    finds: FindLog,
}

impl MemSource {
    /// an empty replica set member.
    pub fn new() -> Self {
        MemSource {
            state: Mutex::new(State::default()),
            is_master: doc! {"ismaster": true, "hosts": ["localhost:27017"], "setName": "rs0"},
            rollover: Rollover::Never,
            failing: None,
            finds: FindLog::default(),
        }
    }

    pub fn with_is_master(mut self, reply: Document) -> Self {
        self.is_master = reply;
        self
    }

    pub fn with_rollover(mut self, rollover: Rollover) -> Self {
        self.rollover = rollover;
        self
    }

    pub fn with_failing(mut self, db: &str, coll: &str) -> Self {
        self.failing = Some(Namespace::new(db, coll));
        self
    }

    /// create database `db` and collection `coll` holding `docs`.
    pub fn with_collection(self, db: &str, coll: &str, docs: Vec<Document>) -> Self {
        self.state
            .lock()
            .unwrap()
            .dbs
            .entry(db.to_string())
            .or_default()
            .insert(coll.to_string(), docs);
        self
    }

    /// create an oplog holding one entry per timestamp.
    pub fn with_oplog(self, timestamps: &[(u32, u32)]) -> Self {
        let entries = timestamps.iter().map(|(t, i)| oplog_entry(*t, *i)).collect();
        self.with_collection(OPLOG_DB, OPLOG_COLL, entries)
    }

    /// oplog entries which show up once the dump starts reading collections.
    pub fn with_writes_during_dump(self, entries: Vec<Document>) -> Self {
        self.state.lock().unwrap().pending_writes = entries;
        self
    }

    /// a handle to the find calls, which stays usable after the source is moved.
    pub fn find_log(&self) -> FindLog {
        self.finds.clone()
    }

    fn oplog_mut(state: &mut State) -> Option<&mut Vec<Document>> {
        state.dbs.get_mut(OPLOG_DB)?.get_mut(OPLOG_COLL)
    }

    fn truncate_oplog(state: &mut State) {
        if let Some(oplog) = Self::oplog_mut(state) {
            if oplog.len() > 1 {
                oplog.drain(..oplog.len() - 1);
            }
        }
    }

    fn docs(state: &State, ns: &Namespace, filter: Option<&Document>) -> Vec<Document> {
        state
            .dbs
            .get(&ns.db)
            .and_then(|colls| colls.get(&ns.coll))
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.map_or(true, |f| matches(d, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn oplog_entry(time: u32, increment: u32) -> Document {
    doc! {
        "ts": Timestamp { time, increment },
        "op": "i",
        "ns": "test.c",
        "o": {"_id": time as i64 * 100 + increment as i64},
    }
}

fn ts_key(value: &Bson) -> Option<(u32, u32)> {
    match value {
        Bson::Timestamp(ts) => Some((ts.time, ts.increment)),
        _ => None,
    }
}

/// supports equality and `{"$gt": Timestamp}`.
fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match expected {
        Bson::Document(op) if op.contains_key("$gt") => {
            match (doc.get(key).and_then(ts_key), op.get("$gt").and_then(ts_key)) {
                (Some(actual), Some(bound)) => actual > bound,
                _ => false,
            }
        }
        _ => doc.get(key) == Some(expected),
    })
}

fn encode(docs: Vec<Document>) -> Vec<Result<Vec<u8>>> {
    docs.iter()
        .map(|d| bson::to_vec(d).map_err(DumpError::from))
        .collect()
}

impl Source for MemSource {
    fn database_names(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().dbs.keys().cloned().collect())
    }

    fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .dbs
            .get(db)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, ns: &Namespace, filter: Option<&Document>) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(Self::docs(&state, ns, filter).len() as u64)
    }

    fn find(&self, ns: &Namespace, query: &FindQuery) -> Result<RawCursor> {
        let mut state = self.state.lock().unwrap();
        self.finds.lock().unwrap().push((ns.clone(), query.clone()));
        let is_oplog = ns.db == OPLOG_DB;

        if !is_oplog {
            let writes = std::mem::take(&mut state.pending_writes);
            if let Some(oplog) = Self::oplog_mut(&mut state) {
                oplog.extend(writes);
            }
            if self.rollover == Rollover::DuringCollections {
                Self::truncate_oplog(&mut state);
            }
        }

        let mut items = encode(Self::docs(&state, ns, query.filter.as_ref()));
        if is_oplog && self.rollover == Rollover::DuringOplogCopy {
            Self::truncate_oplog(&mut state);
        }
        if self.failing.as_ref() == Some(ns) {
            items.truncate(1);
            items.push(Err(DumpError::Config(format!("lost connection reading {}", ns))));
        }
        Ok(Box::new(items.into_iter()))
    }

    fn repair(&self, ns: &Namespace) -> Result<RawCursor> {
        let state = self.state.lock().unwrap();
        Ok(Box::new(encode(Self::docs(&state, ns, None)).into_iter()))
    }

    fn check_repair_cursor(&self, _ns: &Namespace) -> Result<()> {
        Ok(())
    }

    fn find_one(
        &self,
        ns: &Namespace,
        filter: Option<Document>,
        natural: Natural,
    ) -> Result<Option<Document>> {
        let state = self.state.lock().unwrap();
        let mut docs = Self::docs(&state, ns, filter.as_ref());
        Ok(match natural {
            Natural::Earliest => docs.into_iter().next(),
            Natural::Latest => docs.pop(),
        })
    }

    fn collection_metadata(&self, ns: &Namespace) -> Result<Document> {
        Ok(doc! {
            "options": {},
            "indexes": [{"v": 2, "key": {"_id": 1}, "name": "_id_", "ns": ns.to_string()}],
        })
    }

    fn run_admin_command(&self, cmd: Document) -> Result<Document> {
        if cmd.contains_key("isMaster") {
            return Ok(self.is_master.clone());
        }
        Err(DumpError::Config(format!("unsupported command {}", cmd)))
    }
}
