//! mongo_dump basic configuration, express in toml.
//!
//! Basic configuration file example:
//! ```toml
//! [src]
//! # source db url.
//! uri = "mongodb://localhost:27017"
//! # dump only one database, or one collection of it.
//! db = "bb"
//! collection = "a"
//!
//! [input]
//! query = '{"a": {"$gt": 1}}'
//!
//! [output]
//! out = "dump"
//! oplog = false
//! jobs = 4
//! ```
use crate::error::{DumpError, Result};
use crate::STDOUT_SENTINEL;
use bson::{Bson, Document};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Global mongo dump configuration.
///
/// It's immutable once a dump starts, everything which changes during a run lives in the
/// dumper itself.
#[derive(Deserialize, Debug, Clone)]
pub struct DumpConf {
    src: Src,
    #[serde(default)]
    input: Input,
    #[serde(default)]
    output: Output,
}

/// Source database configuration.
#[derive(Deserialize, Debug, Clone)]
struct Src {
    /// Source database url, begins with 'mongodb://'
    uri: String,
    /// database to dump, default is None, which means dump all databases except `local`.
    #[serde(default)]
    db: Option<String>,
    /// collection to dump, needs `db`.
    #[serde(default)]
    collection: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
struct Input {
    /// query filter in extended json.
    #[serde(default)]
    query: Option<String>,
    /// read collections without snapshot.
    #[serde(default)]
    force_table_scan: bool,
}

#[derive(Deserialize, Debug, Clone)]
struct Output {
    /// output directory, or "-" for stdout.
    #[serde(default = "default_out")]
    out: PathBuf,
    #[serde(default)]
    exclude_collections: Vec<String>,
    #[serde(default)]
    exclude_collection_prefixes: Vec<String>,
    /// capture oplog to make a point-in-time snapshot.
    #[serde(default)]
    oplog: bool,
    #[serde(default)]
    repair: bool,
    #[serde(default)]
    dump_db_users_and_roles: bool,
    /// how many collections will be dumped concurrently.
    #[serde(default = "default_jobs")]
    jobs: usize,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            out: default_out(),
            exclude_collections: vec![],
            exclude_collection_prefixes: vec![],
            oplog: false,
            repair: false,
            dump_db_users_and_roles: false,
            jobs: default_jobs(),
        }
    }
}

fn default_out() -> PathBuf {
    PathBuf::from("dump")
}

fn default_jobs() -> usize {
    1
}

impl DumpConf {
    /// create a configuration which dumps everything from `uri` into `out`.
    pub fn new(uri: String, out: PathBuf) -> Self {
        DumpConf {
            src: Src {
                uri,
                db: None,
                collection: None,
            },
            input: Input::default(),
            output: Output {
                out,
                ..Output::default()
            },
        }
    }

    /// load configuration from toml file in `path`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    /// load configuration from toml content.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// only dump database `db`.
    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.src.db = Some(db.into());
        self
    }

    /// only dump collection `coll`.
    pub fn with_collection(mut self, coll: impl Into<String>) -> Self {
        self.src.collection = Some(coll.into());
        self
    }

    /// dump only documents matching extended json `query`.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.input.query = Some(query.into());
        self
    }

    /// skip snapshot mode when reading collections.
    pub fn with_force_table_scan(mut self, force: bool) -> Self {
        self.input.force_table_scan = force;
        self
    }

    /// skip collections named exactly like one of `colls`.
    pub fn with_exclude_collections(mut self, colls: Vec<String>) -> Self {
        self.output.exclude_collections = colls;
        self
    }

    /// skip collections whose name starts with one of `prefixes`.
    pub fn with_exclude_collection_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.output.exclude_collection_prefixes = prefixes;
        self
    }

    /// capture oplog during the dump.
    pub fn with_oplog(mut self, oplog: bool) -> Self {
        self.output.oplog = oplog;
        self
    }

    /// read through repair cursors.
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.output.repair = repair;
        self
    }

    /// dump users and roles defined on the selected database.
    pub fn with_dump_db_users_and_roles(mut self, dump: bool) -> Self {
        self.output.dump_db_users_and_roles = dump;
        self
    }

    /// dump `jobs` collections concurrently.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.output.jobs = jobs;
        self
    }

    /// get source mongodb uri.
    pub fn get_src_uri(&self) -> &str {
        &self.src.uri
    }

    /// get database to dump.
    pub fn get_db(&self) -> Option<&str> {
        self.src.db.as_deref()
    }

    /// get collection to dump.
    pub fn get_collection(&self) -> Option<&str> {
        self.src.collection.as_deref()
    }

    pub fn is_force_table_scan(&self) -> bool {
        self.input.force_table_scan
    }

    /// get output root.
    pub fn get_out(&self) -> &Path {
        &self.output.out
    }

    /// is output redirected to stdout?
    pub fn use_stdout(&self) -> bool {
        self.output.out.as_os_str() == STDOUT_SENTINEL
    }

    pub fn is_oplog(&self) -> bool {
        self.output.oplog
    }

    pub fn is_repair(&self) -> bool {
        self.output.repair
    }

    pub fn is_dump_db_users_and_roles(&self) -> bool {
        self.output.dump_db_users_and_roles
    }

    /// get concurrent job count, it's at least 1.
    pub fn get_jobs(&self) -> usize {
        self.output.jobs.max(1)
    }

    /// Check for any incompatible sets of options.
    pub fn validate(&self) -> Result<()> {
        let has_db = self.src.db.is_some();
        let has_coll = self.src.collection.is_some();
        let has_query = self.input.query.is_some();
        let has_excludes = !self.output.exclude_collections.is_empty();
        let has_prefix_excludes = !self.output.exclude_collection_prefixes.is_empty();

        let msg = if self.use_stdout() && !has_coll {
            "can only dump a single collection to stdout"
        } else if !has_db && has_coll {
            "cannot dump a collection without a specified database"
        } else if has_query && !has_coll {
            "cannot dump using a query without a specified collection"
        } else if self.output.dump_db_users_and_roles && !has_db {
            "must specify a database when running with dumpDbUsersAndRoles"
        } else if self.output.dump_db_users_and_roles && has_coll {
            "cannot specify a collection when running with dumpDbUsersAndRoles"
        } else if self.output.oplog && has_db {
            "--oplog mode only supported on full dumps"
        } else if has_excludes && has_coll {
            "--collection is not allowed when --excludeCollection is specified"
        } else if has_prefix_excludes && has_coll {
            "--collection is not allowed when --excludeCollectionsWithPrefix is specified"
        } else if has_excludes && !has_db {
            "--db is required when --excludeCollection is specified"
        } else if has_prefix_excludes && !has_db {
            "--db is required when --excludeCollectionsWithPrefix is specified"
        } else if self.output.repair && has_query {
            "cannot run a query with --repair enabled"
        } else {
            return Ok(());
        };
        Err(DumpError::Config(msg.to_string()))
    }

    /// Parse the configured query from extended json into a filter document.
    pub fn parse_query(&self) -> Result<Option<Document>> {
        let raw = match &self.input.query {
            None => return Ok(None),
            Some(q) => q,
        };
        let value: serde_json::Value = serde_json::from_str(raw)?;
        match Bson::try_from(value)? {
            Bson::Document(d) => Ok(Some(d)),
            other => Err(DumpError::Config(format!(
                "query is not in proper format, expect a document, get {}",
                other
            ))),
        }
    }

    /// Return true if collection `coll_name` is excluded by configuration.
    pub fn should_skip_collection(&self, coll_name: &str) -> bool {
        self.output
            .exclude_collections
            .iter()
            .any(|excluded| excluded == coll_name)
            || self
                .output
                .exclude_collection_prefixes
                .iter()
                .any(|prefix| coll_name.starts_with(prefix.as_str()))
    }
}
