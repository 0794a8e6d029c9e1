//! Mongo dump lib, which copies mongodb collections into flat bson files.
//!
//! The entry point is [MongoDump]: it enumerates collections into [intents](intents::Intent),
//! dumps them with a pool of worker threads, and optionally brackets the whole run with an
//! oplog capture, which makes the output a consistent point-in-time snapshot.
//!
//! # MongoDump example:
//! ```no_run
//! use mongo_dump::{DumpConf, MongoDump};
//!
//! let conf = DumpConf::new("mongodb://localhost:27017".to_string(), "dump".into())
//!     .with_oplog(true)
//!     .with_jobs(4);
//! let dumper = MongoDump::connect(conf).unwrap();
//! dumper.dump().unwrap();
//! ```

#![warn(missing_docs)]

#[doc(hidden)]
pub mod blocking;
mod config;
mod error;
pub mod intents;
pub mod oplog;
pub mod source;

/// mongodb internal database for admin.
const ADMIN_DB_NAME: &str = "admin";
/// mongodb internal database which saves oplogs.
const OPLOG_DB: &str = "local";
/// oplog collection on replica set members.
const OPLOG_COLL: &str = "oplog.rs";
/// oplog collection on legacy master/slave deployments.
const LEGACY_OPLOG_COLL: &str = "oplog.$main";

/// oplog timestamp key name.
const TIMESTAMP_KEY: &str = "ts";

/// extension of dumped document files.
const DATA_EXTENSION: &str = ".bson";
/// extension of dumped metadata files.
const METADATA_EXTENSION: &str = ".metadata.json";
/// output path which means "write the collection to stdout".
pub const STDOUT_SENTINEL: &str = "-";

pub use blocking::{Connection, MongoDump};
pub use config::DumpConf;
pub use error::{DumpError, Result};
