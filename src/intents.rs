//! Dump work items and their scheduler.
//!
//! An [Intent] describes one collection (or one special artifact like the oplog) to dump.
//! Every intent is owned by the [IntentManager], which hands them out to dump routines in
//! a fixed order after [finalize](IntentManager::finalize) is called.

use crate::error::{DumpError, Result};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

const SYSTEM_INDEXES_COLL: &str = "system.indexes";

/// database and collection name pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Where dumped bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    File(PathBuf),
    Stdout,
}

impl Output {
    /// Open the destination for writing.
    ///
    /// Files are created (or truncated) here and closed when the returned handle is dropped.
    pub fn open(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            Output::File(path) => {
                let f = File::create(path).map_err(|e| DumpError::CreateFile {
                    path: path.clone(),
                    source: e,
                })?;
                Ok(Box::new(f))
            }
            Output::Stdout => Ok(Box::new(std::io::stdout())),
        }
    }

    /// file path, or None for stdout.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Output::File(p) => Some(p),
            Output::Stdout => None,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::File(p) => write!(f, "{}", p.display()),
            Output::Stdout => f.write_str("stdout"),
        }
    }
}

/// One unit of dump work.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub ns: Namespace,
    /// estimated document count, only used for scheduling.
    pub size: u64,
    pub data: Output,
    /// None for system indexes, which have no metadata.
    pub metadata: Option<Output>,
}

impl Intent {
    pub fn new(ns: Namespace, data: Output) -> Self {
        Intent {
            ns,
            size: 0,
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Output) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn namespace(&self) -> String {
        self.ns.to_string()
    }

    /// Return true if this intent is the legacy `system.indexes` collection.
    pub fn is_system_indexes(&self) -> bool {
        self.ns.coll == SYSTEM_INDEXES_COLL
    }
}

/// Pop order of the intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// discovery order.
    Legacy,
    /// biggest collections first, so they don't end up running alone at the end of a
    /// parallel dump.
    LongestTaskFirst,
}

/// Intents which live outside of the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    Oplog = 0,
    Users = 1,
    Roles = 2,
    AuthVersion = 3,
}

const SPECIAL_SLOTS: usize = 4;

#[derive(Default)]
struct ManagerInner {
    /// regular intents in discovery order.
    intents: Vec<Arc<Intent>>,
    /// pop queue, only filled by finalize.
    queue: VecDeque<Arc<Intent>>,
    finalized: bool,
    known: HashSet<Namespace>,
    specials: [Option<Arc<Intent>>; SPECIAL_SLOTS],
    system_indexes: BTreeMap<String, Arc<Intent>>,
    in_progress: HashSet<Namespace>,
    finished: Vec<Namespace>,
}

/// Owner of every intent in a dump run.
///
/// All methods take `&self` and are safe to call from many dump routines at once.
#[derive(Default)]
pub struct IntentManager {
    inner: Mutex<ManagerInner>,
}

impl IntentManager {
    pub fn new() -> Self {
        IntentManager::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        // the lock is never held across user code, a poisoned state is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `intent`, fails if an intent for the same namespace already exists.
    ///
    /// `system.indexes` collections and `admin.system.{users,roles,version}` are kept aside
    /// from the work queue, they are dumped in their own phase.
    pub fn put(&self, intent: Intent) -> Result<()> {
        if intent.is_system_indexes() {
            let mut inner = self.lock();
            Self::remember(&mut inner, &intent.ns)?;
            debug!(ns = %intent.ns, "put system indexes intent");
            inner
                .system_indexes
                .insert(intent.ns.db.clone(), Arc::new(intent));
            return Ok(());
        }

        if intent.ns.db == crate::ADMIN_DB_NAME {
            let special = match intent.ns.coll.as_str() {
                "system.users" => Some(Special::Users),
                "system.roles" => Some(Special::Roles),
                "system.version" => Some(Special::AuthVersion),
                _ => None,
            };
            if let Some(special) = special {
                return self.put_special(special, intent);
            }
        }

        let mut inner = self.lock();
        Self::remember(&mut inner, &intent.ns)?;
        inner.intents.push(Arc::new(intent));
        Ok(())
    }

    /// Put `intent` into the named `slot`.
    pub fn put_special(&self, slot: Special, intent: Intent) -> Result<()> {
        let mut inner = self.lock();
        if let Some(existed) = &inner.specials[slot as usize] {
            return Err(DumpError::DuplicateIntent(existed.namespace()));
        }
        Self::remember(&mut inner, &intent.ns)?;
        debug!(ns = %intent.ns, ?slot, "put special intent");
        inner.specials[slot as usize] = Some(Arc::new(intent));
        Ok(())
    }

    fn remember(inner: &mut ManagerInner, ns: &Namespace) -> Result<()> {
        if !inner.known.insert(ns.clone()) {
            return Err(DumpError::DuplicateIntent(ns.to_string()));
        }
        Ok(())
    }

    /// Fix the pop order with `policy`.  Must be called once, before any pop.
    pub fn finalize(&self, policy: SchedulePolicy) {
        let mut inner = self.lock();
        if inner.finalized {
            warn!(?policy, "intent manager is already finalized, ignore.");
            return;
        }
        let mut ordered = inner.intents.clone();
        if policy == SchedulePolicy::LongestTaskFirst {
            // stable sort, equal sizes keep discovery order.
            ordered.sort_by(|a, b| b.size.cmp(&a.size));
        }
        inner.queue = ordered.into_iter().collect();
        inner.finalized = true;
    }

    /// Take the next intent, or None when every intent has been handed out.
    pub fn pop(&self) -> Option<Arc<Intent>> {
        let mut inner = self.lock();
        if !inner.finalized {
            warn!("pop intent before finalize, nothing returned.");
            return None;
        }
        let intent = inner.queue.pop_front()?;
        inner.in_progress.insert(intent.ns.clone());
        Some(intent)
    }

    /// Mark `intent` as dumped.
    pub fn finish(&self, intent: &Intent) {
        let mut inner = self.lock();
        if !inner.in_progress.remove(&intent.ns) {
            warn!(ns = %intent.ns, "finish an intent which is not in progress.");
        }
        inner.finished.push(intent.ns.clone());
    }

    /// Look at the first intent without removing it.
    pub fn peek(&self) -> Option<Arc<Intent>> {
        self.lock().intents.first().cloned()
    }

    pub fn special(&self, slot: Special) -> Option<Arc<Intent>> {
        self.lock().specials[slot as usize].clone()
    }

    pub fn oplog(&self) -> Option<Arc<Intent>> {
        self.special(Special::Oplog)
    }

    pub fn users(&self) -> Option<Arc<Intent>> {
        self.special(Special::Users)
    }

    pub fn roles(&self) -> Option<Arc<Intent>> {
        self.special(Special::Roles)
    }

    pub fn auth_version(&self) -> Option<Arc<Intent>> {
        self.special(Special::AuthVersion)
    }

    /// system indexes intent of database `db`.
    pub fn system_indexes(&self, db: &str) -> Option<Arc<Intent>> {
        self.lock().system_indexes.get(db).cloned()
    }

    /// databases which have a system indexes intent, in name order.
    pub fn system_index_dbs(&self) -> Vec<String> {
        self.lock().system_indexes.keys().cloned().collect()
    }

    /// Every intent: regular ones, specials, then system indexes.
    pub fn intents(&self) -> Vec<Arc<Intent>> {
        let inner = self.lock();
        inner
            .intents
            .iter()
            .chain(inner.specials.iter().flatten())
            .chain(inner.system_indexes.values())
            .cloned()
            .collect()
    }

    /// namespaces finished so far, in finish order.
    pub fn finished(&self) -> Vec<Namespace> {
        self.lock().finished.clone()
    }

    /// count of intents which are popped but not finished.
    pub fn in_progress(&self) -> usize {
        self.lock().in_progress.len()
    }
}
