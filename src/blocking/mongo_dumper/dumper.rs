use super::metadata;
use super::oplog_dump::OplogDump;
use super::oplog_helper;
use super::pipeline::dump_iter_to_writer;
use super::prepare::IntentBuilder;
use super::progress::Counter;
use crate::blocking::connection::Connection;
use crate::config::DumpConf;
use crate::error::{DumpError, Result};
use crate::intents::{Intent, IntentManager, Namespace, SchedulePolicy};
use crate::source::{FindQuery, Natural, ScanMode, Source};
use crate::ADMIN_DB_NAME;
use bson::document::ValueAccessError;
use bson::{doc, Bson, Document};
use crossbeam::channel;
use rayon::ThreadPoolBuilder;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// The lowest auth schema version which keeps users in `admin.system.users`.
const MIN_AUTH_VERSION_FOR_DB_USERS: i32 = 3;

/// Dump mongodb collections into bson files.
pub struct MongoDump {
    conf: DumpConf,
    source: Box<dyn Source>,
}

impl MongoDump {
    /// Create a dumper for `conf` reading from `source`, fails on invalid configuration.
    pub fn new(conf: DumpConf, source: Box<dyn Source>) -> Result<MongoDump> {
        conf.validate()?;
        Ok(MongoDump { conf, source })
    }

    /// Validate `conf` and connect to its source uri.
    pub fn connect(conf: DumpConf) -> Result<MongoDump> {
        conf.validate()?;
        let conn = Connection::new(conf.get_src_uri())?;
        Self::new(conf, Box::new(conn))
    }

    pub fn get_conf(&self) -> &DumpConf {
        &self.conf
    }

    /// Run the whole dump.
    pub fn dump(&self) -> Result<()> {
        let manager = DumpManager::init(&self.conf, self.source.as_ref())?;
        manager.dump()
    }
}

/// Outcome of one dump routine.
pub enum WorkerStatus {
    Done,
    Failed(DumpError),
}

/// State of a single dump run.
struct DumpManager<'a> {
    conf: &'a DumpConf,
    source: &'a dyn Source,
    intents: IntentManager,
    query: Option<Document>,
    /// set by the first failed dump routine, others stop taking new intents.
    aborted: AtomicBool,
}

impl<'a> DumpManager<'a> {
    fn init(conf: &'a DumpConf, source: &'a dyn Source) -> Result<DumpManager<'a>> {
        let query = conf.parse_query()?;
        if conf.is_repair() && oplog_helper::is_mongos(source)? {
            return Err(DumpError::Config(
                "--repair flag cannot be used on a mongos".to_string(),
            ));
        }
        Ok(DumpManager {
            conf,
            source,
            intents: IntentManager::new(),
            query,
            aborted: AtomicBool::new(false),
        })
    }

    fn dump(&self) -> Result<()> {
        if self.conf.is_dump_db_users_and_roles() {
            let auth_version = self.get_auth_version()?;
            debug!(auth_version, "using auth schema version");
            if auth_version < MIN_AUTH_VERSION_FOR_DB_USERS {
                return Err(DumpError::AuthVersion(auth_version));
            }
        }

        let builder = IntentBuilder::new(self.conf, self.source, &self.intents);
        builder.create_intents()?;

        let determined = if self.conf.is_oplog() {
            let determined = OplogDump::determine(self.source)?;
            builder.create_oplog_intent(determined.namespace().clone())?;
            Some(determined)
        } else {
            None
        };

        let db = self.conf.get_db();
        if self.conf.is_dump_db_users_and_roles() && db != Some(ADMIN_DB_NAME) {
            if let Some(db) = db {
                builder.create_users_roles_version_intents_for_db(db)?;
            }
        }

        if self.conf.is_repair() {
            debug!("verifying that the connected server supports repairCursor");
            if let Some(example) = self.intents.peek() {
                self.source.check_repair_cursor(&example.ns).map_err(|e| {
                    DumpError::UnsupportedRepair {
                        ns: example.namespace(),
                        detail: Box::new(e),
                    }
                })?;
            }
        }

        debug!("dump phase I: metadata, indexes, users, roles, version");
        self.dump_metadata()?;
        self.dump_system_indexes()?;
        if db.is_none() || db == Some(ADMIN_DB_NAME) {
            self.dump_users_and_roles()?;
        }
        if self.conf.is_dump_db_users_and_roles() {
            match db {
                Some(ADMIN_DB_NAME) => {
                    info!("skipping users/roles dump, already dumped admin database")
                }
                Some(db) => {
                    info!(%db, "dumping users and roles");
                    self.dump_users_and_roles_for_db(db)?;
                }
                None => {}
            }
        }

        // remember the newest oplog entry, everything after it is copied at the end, which
        // makes the dump a point-in-time snapshot.
        let captured = match determined {
            Some(d) => Some(d.capture()?),
            None => None,
        };

        debug!("dump phase II: regular collections");
        self.dump_intents()?;

        if let Some(captured) = captured {
            debug!("dump phase III: the oplog");
            // `determined` is only set when the oplog intent was created.
            if let Some(oplog_intent) = self.intents.oplog() {
                let start = captured
                    .verify()?
                    .copy(&oplog_intent)?
                    .verify()?;
                info!(%start, "oplog captured");
            }
        }

        info!("done");
        Ok(())
    }

    /// Dump every queued intent with a pool of dump routines.
    ///
    /// Always waits for all routines, the first failure is returned.
    fn dump_intents(&self) -> Result<()> {
        let jobs = self.conf.get_jobs();
        if jobs > 1 {
            self.intents.finalize(SchedulePolicy::LongestTaskFirst);
        } else {
            self.intents.finalize(SchedulePolicy::Legacy);
        }
        info!(jobs, "dumping with job threads");

        let pool = ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|id| format!("dump-routine-{}", id))
            .build()?;
        let (sender, receiver) = channel::bounded(jobs);
        pool.scope(|s| {
            for id in 0..jobs {
                let sender = sender.clone();
                s.spawn(move |_| {
                    let _ = sender.send(self.dump_routine(id));
                });
            }
        });
        drop(sender);

        let mut result = Ok(());
        for status in receiver.iter() {
            if let WorkerStatus::Failed(e) = status {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    warn!(error = %e, "dump routine failed after the run was aborted");
                }
            }
        }
        result
    }

    fn dump_routine(&self, id: usize) -> WorkerStatus {
        debug!(id, "starting dump routine");
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                debug!(id, "ending dump routine, another routine failed");
                return WorkerStatus::Done;
            }
            let intent = match self.intents.pop() {
                Some(i) => i,
                None => {
                    debug!(id, "ending dump routine, no more work to do");
                    return WorkerStatus::Done;
                }
            };
            if let Err(e) = self.dump_intent(&intent) {
                self.aborted.store(true, Ordering::SeqCst);
                return WorkerStatus::Failed(e);
            }
            self.intents.finish(&intent);
        }
    }

    /// How documents of `intent` are read.
    fn find_query(&self, intent: &Intent) -> FindQuery {
        match &self.query {
            Some(q) => FindQuery::new(Some(q.clone()), ScanMode::TableScan),
            // system collections have no `_id` index to walk.
            None if self.conf.is_force_table_scan() || intent.ns.coll.starts_with("system.") => {
                FindQuery::new(None, ScanMode::TableScan)
            }
            None => FindQuery::new(None, ScanMode::Snapshot),
        }
    }

    /// Dump one collection into its data output.
    fn dump_intent(&self, intent: &Intent) -> Result<()> {
        let ns = intent.namespace();
        let res = intent.data.open().and_then(|out| {
            if self.conf.use_stdout() {
                info!(%ns, "writing to stdout");
                self.dump_query_to_writer(intent, &self.find_query(intent), out)
            } else if !self.conf.is_repair() {
                info!(%ns, path = %intent.data, "writing");
                self.dump_query_to_writer(intent, &self.find_query(intent), out)
            } else {
                // repair cursors can't be counted.
                info!(%ns, path = %intent.data, "writing repair");
                self.dump_repair_to_writer(intent, out)
            }
        });
        res.map_err(|e| e.in_collection(&ns))?;
        info!(%ns, "done dumping");
        Ok(())
    }

    fn dump_repair_to_writer<W: Write>(&self, intent: &Intent, out: W) -> Result<()> {
        let cursor = self
            .source
            .repair(&intent.ns)
            .map_err(|e| DumpError::Repair(Box::new(e)))?;
        // this counter is ignored.
        let counter = Counter::new(1);
        dump_iter_to_writer(cursor, out, &counter).map_err(|e| DumpError::Repair(Box::new(e)))?;
        info!(found = counter.current(), ns = %intent.ns, "repair cursor found documents");
        Ok(())
    }

    fn dump_query_to_writer<W: Write>(
        &self,
        intent: &Intent,
        query: &FindQuery,
        out: W,
    ) -> Result<()> {
        let total = self
            .source
            .count(&intent.ns, query.filter.as_ref())
            .map_err(|e| DumpError::Count {
                ns: intent.namespace(),
                detail: Box::new(e),
            })?;
        info!(ns = %intent.ns, total, "documents");

        let counter = Counter::new(total);
        let cursor = self.source.find(&intent.ns, query)?;
        dump_iter_to_writer(cursor, out, &counter)
    }

    /// Write metadata of every intent which has a metadata output.
    fn dump_metadata(&self) -> Result<()> {
        for intent in self.intents.intents() {
            if intent.metadata.is_some() {
                metadata::dump_metadata(self.source, &intent)
                    .map_err(|e| e.in_collection(format!("metadata of {}", intent.ns)))?;
            }
        }
        Ok(())
    }

    fn dump_system_indexes(&self) -> Result<()> {
        for db in self.intents.system_index_dbs() {
            if let Some(intent) = self.intents.system_indexes(&db) {
                self.dump_intent(&intent)?;
            }
        }
        Ok(())
    }

    /// Dump `admin.system.{users,roles,version}` discovered while creating intents.
    fn dump_users_and_roles(&self) -> Result<()> {
        let specials = [
            self.intents.users(),
            self.intents.roles(),
            self.intents.auth_version(),
        ];
        for intent in specials.iter().flatten() {
            self.dump_intent(intent)?;
        }
        Ok(())
    }

    /// Dump users and roles tied to database `db`, needs auth schema version >= 3.
    fn dump_users_and_roles_for_db(&self, db: &str) -> Result<()> {
        let db_filter = doc! {"db": db};
        let jobs = [
            (self.intents.users(), Some(db_filter.clone())),
            (self.intents.roles(), Some(db_filter)),
            (self.intents.auth_version(), None),
        ];
        for (intent, filter) in jobs.iter() {
            if let Some(intent) = intent {
                let query = FindQuery::new(filter.clone(), ScanMode::TableScan);
                intent
                    .data
                    .open()
                    .and_then(|out| self.dump_query_to_writer(intent, &query, out))
                    .map_err(|e| e.in_collection(intent.namespace()))?;
            }
        }
        Ok(())
    }

    fn get_auth_version(&self) -> Result<i32> {
        let version_doc = self.source.find_one(
            &Namespace::new(ADMIN_DB_NAME, "system.version"),
            Some(doc! {"_id": "authSchema"}),
            Natural::Earliest,
        )?;
        // no version document means the oldest schema.
        let version = match version_doc {
            None => return Ok(1),
            Some(d) => d.get("currentVersion").cloned(),
        };
        match version {
            Some(Bson::Int32(v)) => Ok(v),
            Some(Bson::Int64(v)) => Ok(v as i32),
            Some(Bson::Double(v)) => Ok(v as i32),
            None => Err(ValueAccessError::NotPresent.into()),
            Some(_) => Err(ValueAccessError::UnexpectedType.into()),
        }
    }
}
