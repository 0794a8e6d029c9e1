use crate::intents::Intent;
use crate::source::Source;
use crate::Result;
use bson::Bson;
use std::io::{BufWriter, Write};
use tracing::debug;

/// Write collection options and indexes of `intent` into its metadata output.
///
/// Does nothing for intents without metadata output.
pub fn dump_metadata(source: &dyn Source, intent: &Intent) -> Result<()> {
    let output = match &intent.metadata {
        Some(o) => o,
        None => return Ok(()),
    };
    debug!(ns = %intent.ns, %output, "writing metadata");
    let meta = source.collection_metadata(&intent.ns)?;
    let json = Bson::Document(meta).into_relaxed_extjson();

    let mut out = BufWriter::new(output.open()?);
    serde_json::to_writer(&mut out, &json)?;
    out.flush()?;
    Ok(())
}
