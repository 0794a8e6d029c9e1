//! Oplog capture around a dump.
//!
//! The oplog is a capped collection, entries we need can roll off while collections are
//! being dumped.  So the capture goes through these steps, each one consuming the previous:
//!
//! 1. [OplogDump::determine]: find the oplog collection.
//! 2. [DeterminedOplog::capture]: remember the newest entry before dumping anything.
//! 3. [CapturedOplog::verify]: after collections are dumped, make sure the oldest entry
//!    is not newer than the captured one.
//! 4. [VerifiedOplog::copy]: dump every entry after the captured one.
//! 5. [CopiedOplog::verify]: check again, the oplog may have rolled over during the copy.

use super::oplog_helper;
use super::pipeline::dump_iter_to_writer;
use super::progress::Counter;
use crate::intents::{Intent, Namespace};
use crate::oplog::OplogTs;
use crate::source::{FindQuery, ScanMode, Source};
use crate::{DumpError, Result, TIMESTAMP_KEY};
use bson::{doc, Timestamp};
use tracing::{debug, info};

/// Entry point of the oplog capture.
pub struct OplogDump;

impl OplogDump {
    /// Find the oplog collection of `source`.
    pub fn determine(source: &dyn Source) -> Result<DeterminedOplog<'_>> {
        let reply = oplog_helper::is_master(source)?;
        let ns = oplog_helper::oplog_namespace(&reply)?;
        Ok(DeterminedOplog { source, ns })
    }
}

/// Oplog location is known.
pub struct DeterminedOplog<'a> {
    source: &'a dyn Source,
    ns: Namespace,
}

impl<'a> DeterminedOplog<'a> {
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Record the most recent oplog entry as the start of the snapshot.
    pub fn capture(self) -> Result<CapturedOplog<'a>> {
        info!("getting most recent oplog timestamp");
        let start = oplog_helper::get_latest_ts(self.source, &self.ns)?;
        info!(%start, start_time = %start.to_datetime(), "oplog start captured");
        Ok(CapturedOplog {
            source: self.source,
            ns: self.ns,
            start,
        })
    }
}

fn check_not_overflow(source: &dyn Source, ns: &Namespace, start: OplogTs) -> Result<()> {
    debug!(%start, "checking if oplog entry still exists");
    let oldest = oplog_helper::get_earliest_ts(source, ns)?;
    debug!(%oldest, "oldest oplog entry");
    if oldest > start {
        info!(%oldest, %start, "oldest oplog entry is newer than the start point");
        return Err(DumpError::OplogOverflow { start, oldest });
    }
    debug!(%start, "oplog entry still exists");
    Ok(())
}

/// Snapshot start is known, collections can be dumped.
pub struct CapturedOplog<'a> {
    source: &'a dyn Source,
    ns: Namespace,
    start: OplogTs,
}

impl<'a> CapturedOplog<'a> {
    pub fn start(&self) -> OplogTs {
        self.start
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// First overflow check, before copying the oplog.
    pub fn verify(self) -> Result<VerifiedOplog<'a>> {
        check_not_overflow(self.source, &self.ns, self.start)?;
        Ok(VerifiedOplog {
            source: self.source,
            ns: self.ns,
            start: self.start,
        })
    }
}

/// No entry after the start point is lost yet.
pub struct VerifiedOplog<'a> {
    source: &'a dyn Source,
    ns: Namespace,
    start: OplogTs,
}

impl<'a> VerifiedOplog<'a> {
    /// Dump every entry newer than the start point into `intent`'s data output.
    pub fn copy(self, intent: &Intent) -> Result<CopiedOplog<'a>> {
        let filter = doc! {TIMESTAMP_KEY: {"$gt": Timestamp::from(self.start)}};
        let total = self
            .source
            .count(&self.ns, Some(&filter))
            .map_err(|e| DumpError::Count {
                ns: self.ns.to_string(),
                detail: Box::new(e),
            })?;
        info!(ns = %self.ns, output = %intent.data, total, "writing captured oplog");

        let counter = Counter::new(total);
        let cursor = self
            .source
            .find(&self.ns, &FindQuery::new(Some(filter), ScanMode::OplogReplay))?;
        let out = intent.data.open()?;
        dump_iter_to_writer(cursor, out, &counter)?;
        info!(copied = counter.current(), "oplog entries dumped");

        Ok(CopiedOplog {
            source: self.source,
            ns: self.ns,
            start: self.start,
            copied: counter.current(),
        })
    }
}

/// Oplog entries are written.
pub struct CopiedOplog<'a> {
    source: &'a dyn Source,
    ns: Namespace,
    start: OplogTs,
    copied: u64,
}

impl CopiedOplog<'_> {
    pub fn copied(&self) -> u64 {
        self.copied
    }

    /// Final overflow check, catches a roll over during the copy itself.
    pub fn verify(self) -> Result<OplogTs> {
        check_not_overflow(self.source, &self.ns, self.start)?;
        Ok(self.start)
    }
}
