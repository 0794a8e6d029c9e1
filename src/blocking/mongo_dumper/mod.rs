mod dumper;
#[doc(hidden)]
pub mod metadata;
#[doc(hidden)]
pub mod oplog_dump;
#[doc(hidden)]
pub mod oplog_helper;
#[doc(hidden)]
pub mod pipeline;
#[doc(hidden)]
pub mod prepare;
#[doc(hidden)]
pub mod progress;

pub use dumper::{MongoDump, WorkerStatus};
