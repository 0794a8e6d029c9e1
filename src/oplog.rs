//! Oplog position.
//!
//! Mongodb saves an oplog entry position in field `ts` as a bson Timestamp: epoch seconds
//! plus an increment inside that second.  We collapse both parts into one `u64` (seconds in
//! the high 32 bits), so positions are only ever compared as a whole.

use bson::Timestamp;
use chrono::{DateTime, Local, TimeZone};
use std::fmt;

/// A totally ordered oplog position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OplogTs(u64);

impl OplogTs {
    /// build from epoch seconds `time` and in-second counter `increment`.
    pub fn new(time: u32, increment: u32) -> Self {
        OplogTs(((time as u64) << 32) | increment as u64)
    }

    /// epoch seconds part.
    pub fn time(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// in-second counter part.
    pub fn increment(&self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// wall clock time of this position, only used for log.
    pub fn to_datetime(&self) -> DateTime<Local> {
        Local.timestamp(self.time() as i64, 0)
    }
}

impl From<Timestamp> for OplogTs {
    fn from(ts: Timestamp) -> Self {
        OplogTs::new(ts.time, ts.increment)
    }
}

impl From<OplogTs> for Timestamp {
    fn from(ts: OplogTs) -> Self {
        Timestamp {
            time: ts.time(),
            increment: ts.increment(),
        }
    }
}

impl fmt::Display for OplogTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.time(), self.increment())
    }
}
