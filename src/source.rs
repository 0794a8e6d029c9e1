//! What the dumper needs from a source server.
//!
//! [Connection](crate::Connection) implements [Source] against a real mongodb deployment.

use crate::intents::Namespace;
use crate::Result;
use bson::Document;

/// A cursor over raw encoded documents.
///
/// Every item is an independently owned buffer, so the driver is free to reuse its own.
pub type RawCursor = Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>;

/// How a collection is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Walk the `_id` index, so a document moved during the dump is never returned twice.
    Snapshot,
    /// Plain unfiltered scan without snapshot.
    TableScan,
    /// Natural order oplog read.
    OplogReplay,
}

/// A find request against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Option<Document>,
    pub mode: ScanMode,
}

impl FindQuery {
    pub fn new(filter: Option<Document>, mode: ScanMode) -> Self {
        FindQuery { filter, mode }
    }
}

/// Sort direction for [Source::find_one].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Natural {
    /// the oldest record.
    Earliest,
    /// the most recent record.
    Latest,
}

/// Connection collaborator used by the dumper.
///
/// Implementations are shared by every dump routine, so they must be thread safe.
pub trait Source: Send + Sync {
    /// list database names.
    fn database_names(&self) -> Result<Vec<String>>;

    /// list collection names in database `db`.
    fn collection_names(&self, db: &str) -> Result<Vec<String>>;

    /// count documents in `ns` matching `filter`.
    fn count(&self, ns: &Namespace, filter: Option<&Document>) -> Result<u64>;

    /// open a cursor for `query` on `ns`.
    fn find(&self, ns: &Namespace, query: &FindQuery) -> Result<RawCursor>;

    /// open a repair cursor on `ns`, which skips corrupted records.
    fn repair(&self, ns: &Namespace) -> Result<RawCursor>;

    /// Check that the server can open a repair cursor on `ns`.
    fn check_repair_cursor(&self, ns: &Namespace) -> Result<()>;

    /// find one document in natural order.
    fn find_one(
        &self,
        ns: &Namespace,
        filter: Option<Document>,
        natural: Natural,
    ) -> Result<Option<Document>>;

    /// collection options and index specifications of `ns`, as `{options, indexes}`.
    fn collection_metadata(&self, ns: &Namespace) -> Result<Document>;

    /// run `cmd` against the admin database.
    fn run_admin_command(&self, cmd: Document) -> Result<Document>;
}
