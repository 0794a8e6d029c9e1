//! Copy documents from a cursor into a writer.
//!
//! Reading runs in its own thread and hands every document to the writing side through a
//! channel which holds one document, so the next network fetch overlaps with the current
//! disk write while memory stays bounded.

use super::progress::Progress;
use crate::error::{DumpError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::io::{BufWriter, Write};
use tracing::debug;

/// writer buffer size, documents are not flushed one by one.
const WRITE_BUF_SIZE: usize = 32 * 1024;

/// Write every document from `cursor` into `writer` in cursor order, then flush.
///
/// A write failure wins over a cursor failure, and a cursor failure wins over success.
/// `writer` is flushed on every path.
pub fn dump_iter_to_writer<I, W, P>(cursor: I, writer: W, progress: &P) -> Result<()>
where
    I: Iterator<Item = Result<Vec<u8>>> + Send,
    W: Write,
    P: Progress + ?Sized,
{
    let (sender, receiver) = channel::bounded(1);
    let mut out = BufWriter::with_capacity(WRITE_BUF_SIZE, writer);

    let copied = crossbeam::thread::scope(|s| {
        let reader = s.spawn(move |_| read_stage(cursor, sender));
        let written = write_stage(&receiver, &mut out, progress);
        // unblock the reader if writing stopped early.
        drop(receiver);
        let read = reader.join().unwrap_or(Err(DumpError::WorkerPanicked));
        written.and(read)
    })
    .unwrap_or(Err(DumpError::WorkerPanicked));

    let flushed = out.flush().map_err(DumpError::Flush);
    copied.and(flushed)
}

fn read_stage<I>(cursor: I, sender: Sender<Vec<u8>>) -> Result<()>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    for doc in cursor {
        let doc = doc.map_err(|e| DumpError::ReadCursor(Box::new(e)))?;
        if sender.send(doc).is_err() {
            debug!("writer is gone, stop reading.");
            break;
        }
    }
    // the channel closes when `sender` drops here.
    Ok(())
}

fn write_stage<W, P>(receiver: &Receiver<Vec<u8>>, out: &mut W, progress: &P) -> Result<()>
where
    W: Write,
    P: Progress + ?Sized,
{
    for buf in receiver.iter() {
        out.write_all(&buf).map_err(DumpError::Write)?;
        progress.inc(1);
    }
    Ok(())
}
