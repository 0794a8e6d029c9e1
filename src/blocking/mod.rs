/// provide mongo dump blocking apis.
mod connection;
#[doc(hidden)]
pub mod mongo_dumper;

pub use connection::Connection;
pub use mongo_dumper::{MongoDump, WorkerStatus};
