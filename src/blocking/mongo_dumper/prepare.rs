//! Build dump intents from configuration.

use crate::config::DumpConf;
use crate::intents::{Intent, IntentManager, Namespace, Output, Special};
use crate::source::Source;
use crate::{DumpError, Result, ADMIN_DB_NAME, DATA_EXTENSION, METADATA_EXTENSION, OPLOG_DB};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Creates intents for one dump run.
pub struct IntentBuilder<'a> {
    conf: &'a DumpConf,
    source: &'a dyn Source,
    manager: &'a IntentManager,
}

impl<'a> IntentBuilder<'a> {
    pub fn new(conf: &'a DumpConf, source: &'a dyn Source, manager: &'a IntentManager) -> Self {
        IntentBuilder {
            conf,
            source,
            manager,
        }
    }

    /// create intents for whatever the configuration selects.
    pub fn create_intents(&self) -> Result<()> {
        match (self.conf.get_db(), self.conf.get_collection()) {
            (Some(db), Some(coll)) => self.create_intent_for_collection(db, coll),
            (Some(db), None) => self.create_intents_for_database(db),
            _ => self.create_all_intents(),
        }
    }

    /// output path of a collection, without extension.
    fn output_path(&self, db: &str, coll: &str) -> PathBuf {
        self.conf.get_out().join(db).join(coll)
    }

    fn with_extension(path: PathBuf, ext: &str) -> PathBuf {
        let mut path = path.into_os_string();
        path.push(ext);
        PathBuf::from(path)
    }

    /// Iterate through all databases except `local` and their collections.
    pub fn create_all_intents(&self) -> Result<()> {
        if !self.conf.use_stdout() {
            let out = self.conf.get_out();
            fs::create_dir_all(out).map_err(|e| DumpError::CreateFile {
                path: out.to_path_buf(),
                source: e,
            })?;
        }
        let dbs = self.source.database_names()?;
        debug!(?dbs, "found databases");
        for db in dbs.iter() {
            // local can only be explicitly dumped
            if db == OPLOG_DB {
                continue;
            }
            self.create_intents_for_database(db)?;
        }
        Ok(())
    }

    /// create intents for each collection in database `db`.
    pub fn create_intents_for_database(&self, db: &str) -> Result<()> {
        // folders of empty databases are still created.
        if !self.conf.use_stdout() {
            let db_folder = self.conf.get_out().join(db);
            fs::create_dir_all(&db_folder).map_err(|e| DumpError::CreateFile {
                path: db_folder,
                source: e,
            })?;
        }
        let colls = self.source.collection_names(db)?;
        debug!(%db, ?colls, "found collections");
        for coll in colls.iter() {
            self.create_intent_for_collection(db, coll)?;
        }
        Ok(())
    }

    /// create one intent for `db.coll`, unless it's excluded.
    ///
    /// A stdout intent carries documents only, it has no metadata output, so the bson
    /// stream stays readable by a restore.
    pub fn create_intent_for_collection(&self, db: &str, coll: &str) -> Result<()> {
        let ns = Namespace::new(db, coll);
        if self.conf.should_skip_collection(coll) {
            debug!(%ns, "skipping dump, it is excluded");
            return Ok(());
        }

        let mut intent = if self.conf.use_stdout() {
            Intent::new(ns, Output::Stdout)
        } else {
            let db_folder = self.conf.get_out().join(db);
            fs::create_dir_all(&db_folder).map_err(|e| DumpError::CreateFile {
                path: db_folder,
                source: e,
            })?;
            let base = self.output_path(db, coll);
            let intent = Intent::new(
                ns,
                Output::File(Self::with_extension(base.clone(), DATA_EXTENSION)),
            );
            if intent.is_system_indexes() {
                intent
            } else {
                intent.with_metadata(Output::File(Self::with_extension(base, METADATA_EXTENSION)))
            }
        };

        // document count is for scheduling only.
        intent.size = self
            .source
            .count(&intent.ns, None)
            .map_err(|e| DumpError::Count {
                ns: intent.namespace(),
                detail: Box::new(e),
            })?;
        debug!(ns = %intent.ns, size = intent.size, "enqueued collection");
        self.manager.put(intent)
    }

    /// create the intent which receives captured oplog entries from `oplog_ns`.
    pub fn create_oplog_intent(&self, oplog_ns: Namespace) -> Result<()> {
        let path = self.conf.get_out().join(format!("oplog{}", DATA_EXTENSION));
        self.manager
            .put_special(Special::Oplog, Intent::new(oplog_ns, Output::File(path)))
    }

    /// create intents for users, roles and auth version of database `db`.
    pub fn create_users_roles_version_intents_for_db(&self, db: &str) -> Result<()> {
        let out_dir = self.conf.get_out().join(db);
        fs::create_dir_all(&out_dir).map_err(|e| DumpError::CreateFile {
            path: out_dir.clone(),
            source: e,
        })?;

        let slots = [
            (Special::Users, "system.users"),
            (Special::Roles, "system.roles"),
            (Special::AuthVersion, "system.version"),
        ];
        for (slot, coll) in slots.iter() {
            let path = out_dir.join(format!("${}.{}{}", ADMIN_DB_NAME, coll, DATA_EXTENSION));
            self.manager.put_special(
                *slot,
                Intent::new(Namespace::new(ADMIN_DB_NAME, *coll), Output::File(path)),
            )?;
        }
        Ok(())
    }
}
