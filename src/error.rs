use crate::oplog::OplogTs;
use bson::document::ValueAccessError;
use mongodb::error::Error as MongoError;
use std::path::PathBuf;
use std::result::Result as StdResult;
use thiserror::Error;

/// Every way a dump run can fail.
///
/// None of these are retried, the first one reaching the top level ends the run.
#[derive(Error, Debug)]
pub enum DumpError {
    /// Conflicting or invalid options, found before touching the network.
    #[error("bad option: {0}")]
    Config(String),
    #[error("can't create session for {uri:?}: {detail}")]
    Connection { uri: String, detail: MongoError },
    #[error("Mongodb error: {0}")]
    MongoError(#[from] MongoError),
    #[error("Bson value access error: {0}")]
    BsonError(#[from] ValueAccessError),
    #[error("Bson serialize error: {0}")]
    BsonSerError(#[from] bson::ser::Error),
    #[error("error converting query to bson: {0}")]
    ExtJsonError(#[from] bson::extjson::de::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("error parsing configuration file: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error creating {path:?}: {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error building worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Failure attached to the collection which caused it.
    #[error("error dumping {ns}: {source}")]
    Collection {
        ns: String,
        source: Box<DumpError>,
    },
    #[error("error counting {ns}: {detail}")]
    Count { ns: String, detail: Box<DumpError> },
    #[error("error reading collection: {0}")]
    ReadCursor(Box<DumpError>),
    #[error("error writing to file: {0}")]
    Write(std::io::Error),
    #[error("error flushing file writer: {0}")]
    Flush(std::io::Error),
    #[error("repair error: {0}")]
    Repair(Box<DumpError>),
    #[error("repairCursor is not supported for {ns}: {detail}")]
    UnsupportedRepair { ns: String, detail: Box<DumpError> },
    #[error("a dump routine panicked")]
    WorkerPanicked,

    #[error("intent for {0} already exists")]
    DuplicateIntent(String),
    #[error("backing up users and roles is only supported for deployments with auth schema versions >= 3, found: {0}")]
    AuthVersion(i32),

    #[error("not connected to master")]
    NotPrimary,
    #[error("oplog is empty, can't determine a start point")]
    EmptyOplog,
    /// The oplog rolled over while dumping, the output is not a consistent snapshot.
    #[error("oplog overflow: mongodump was unable to capture all new oplog entries during execution (start: {start}, oldest entry: {oldest})")]
    OplogOverflow { start: OplogTs, oldest: OplogTs },
}

impl DumpError {
    /// wrap `self` with the namespace it failed on.
    pub fn in_collection(self, ns: impl ToString) -> DumpError {
        DumpError::Collection {
            ns: ns.to_string(),
            source: Box::new(self),
        }
    }

    /// Return true if produced output can't be trusted as a point-in-time snapshot.
    pub fn is_consistency_error(&self) -> bool {
        match self {
            DumpError::OplogOverflow { .. } => true,
            DumpError::Collection { source, .. } => source.is_consistency_error(),
            _ => false,
        }
    }
}

pub type Result<T> = StdResult<T, DumpError>;
