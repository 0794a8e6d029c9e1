use crate::error::{DumpError, Result};
use crate::intents::Namespace;
use crate::source::{FindQuery, Natural, RawCursor, ScanMode, Source};
use crate::ADMIN_DB_NAME;
use bson::{doc, Bson, Document, RawDocumentBuf};
use mongodb::options::{FindOneOptions, FindOptions, Hint};
use mongodb::sync::{Client, Collection, Database};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Clone)]
/// A source connection backed by the mongodb sync driver.
///
/// The inner client is a connection pool, cloning is cheap and every dump routine shares it.
pub struct Connection {
    client: Client,
}

impl Connection {
    /// connect to mongodb at `uri`.
    pub fn new(uri: &str) -> Result<Connection> {
        let client = Client::with_uri_str(uri).map_err(|e| DumpError::Connection {
            uri: uri.to_string(),
            detail: e,
        })?;
        Ok(Connection { client })
    }

    fn database(&self, ns: &Namespace) -> Database {
        self.client.database(&ns.db)
    }

    fn raw_coll(&self, ns: &Namespace) -> Collection<RawDocumentBuf> {
        self.database(ns).collection(&ns.coll)
    }

    fn doc_coll(&self, ns: &Namespace) -> Collection<Document> {
        self.database(ns).collection(&ns.coll)
    }

    /// run a cursor returning `command` against the database of `ns`, later batches are
    /// fetched with `getMore`.
    fn command_cursor(
        &self,
        ns: &Namespace,
        command: Document,
    ) -> Result<CommandCursor<impl FnMut(i64) -> Result<Document> + Send>> {
        let db = self.database(ns);
        let reply = db.run_command(command, None)?;
        let coll = ns.coll.clone();
        CommandCursor::new(&reply, move |id| {
            Ok(db.run_command(doc! {"getMore": id, "collection": coll.as_str()}, None)?)
        })
    }
}

/// find options for each scan mode.
#[allow(deprecated)]
fn find_options(mode: ScanMode) -> FindOptions {
    match mode {
        // walk `_id` index, same as legacy `$snapshot`.
        ScanMode::Snapshot => FindOptions::builder()
            .hint(Hint::Keys(doc! {"_id": 1}))
            .build(),
        ScanMode::TableScan => FindOptions::default(),
        ScanMode::OplogReplay => FindOptions::builder()
            .sort(doc! {"$natural": 1})
            .oplog_replay(true)
            .build(),
    }
}

impl Source for Connection {
    fn database_names(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names(None, None)?)
    }

    fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        Ok(self.client.database(db).list_collection_names(None)?)
    }

    fn count(&self, ns: &Namespace, filter: Option<&Document>) -> Result<u64> {
        Ok(self.doc_coll(ns).count_documents(filter.cloned(), None)?)
    }

    fn find(&self, ns: &Namespace, query: &FindQuery) -> Result<RawCursor> {
        debug!(%ns, ?query, "open cursor");
        let cursor = self
            .raw_coll(ns)
            .find(query.filter.clone(), find_options(query.mode))?;
        Ok(Box::new(cursor.map(|doc| {
            doc.map(RawDocumentBuf::into_bytes)
                .map_err(DumpError::from)
        })))
    }

    fn repair(&self, ns: &Namespace) -> Result<RawCursor> {
        let cursor = self.command_cursor(ns, doc! {"repairCursor": ns.coll.as_str()})?;
        Ok(Box::new(cursor.map(|doc| -> Result<Vec<u8>> {
            let mut buf = vec![];
            doc?.to_writer(&mut buf)?;
            Ok(buf)
        })))
    }

    fn check_repair_cursor(&self, ns: &Namespace) -> Result<()> {
        let db = self.database(ns);
        let reply = db.run_command(doc! {"repairCursor": ns.coll.as_str()}, None)?;
        // don't leave the check's cursor open on server.
        let cursor_id = reply.get_document("cursor")?.get_i64("id")?;
        if cursor_id != 0 {
            db.run_command(
                doc! {"killCursors": ns.coll.as_str(), "cursors": [cursor_id]},
                None,
            )?;
        }
        Ok(())
    }

    fn find_one(
        &self,
        ns: &Namespace,
        filter: Option<Document>,
        natural: Natural,
    ) -> Result<Option<Document>> {
        let sort = match natural {
            Natural::Earliest => doc! {"$natural": 1},
            Natural::Latest => doc! {"$natural": -1},
        };
        Ok(self
            .doc_coll(ns)
            .find_one(filter, FindOneOptions::builder().sort(sort).build())?)
    }

    fn collection_metadata(&self, ns: &Namespace) -> Result<Document> {
        let mut colls = self.command_cursor(
            ns,
            doc! {"listCollections": 1, "filter": {"name": ns.coll.as_str()}},
        )?;
        let options = match colls.next().transpose()? {
            Some(info) => info.get_document("options").ok().cloned(),
            None => None,
        }
        .unwrap_or_default();

        let indexes = self
            .command_cursor(ns, doc! {"listIndexes": ns.coll.as_str()})?
            .map(|index| index.map(Bson::Document))
            .collect::<Result<Vec<Bson>>>()?;
        Ok(doc! {"options": options, "indexes": indexes})
    }

    fn run_admin_command(&self, cmd: Document) -> Result<Document> {
        Ok(self.client.database(ADMIN_DB_NAME).run_command(cmd, None)?)
    }
}

/// Iterates a server side command cursor, `get_more` fetches the batch after cursor `id`.
struct CommandCursor<F> {
    id: i64,
    batch: VecDeque<Bson>,
    get_more: F,
}

impl<F> CommandCursor<F>
where
    F: FnMut(i64) -> Result<Document>,
{
    /// start from the `{cursor: {id, firstBatch}}` reply of a command.
    fn new(reply: &Document, get_more: F) -> Result<Self> {
        let cursor = reply.get_document("cursor")?;
        Ok(CommandCursor {
            id: cursor.get_i64("id")?,
            batch: cursor.get_array("firstBatch")?.iter().cloned().collect(),
            get_more,
        })
    }

    fn fetch_next_batch(&mut self) -> Result<()> {
        let reply = (self.get_more)(self.id)?;
        let cursor = reply.get_document("cursor")?;
        self.id = cursor.get_i64("id")?;
        self.batch = cursor.get_array("nextBatch")?.iter().cloned().collect();
        Ok(())
    }

    fn next_doc(&mut self) -> Result<Option<Document>> {
        loop {
            while self.batch.is_empty() {
                if self.id == 0 {
                    return Ok(None);
                }
                self.fetch_next_batch()?;
            }
            // command cursors only return documents, anything else is skipped.
            if let Some(Bson::Document(d)) = self.batch.pop_front() {
                return Ok(Some(d));
            }
        }
    }
}

impl<F> Iterator for CommandCursor<F>
where
    F: FnMut(i64) -> Result<Document>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_doc() {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => None,
            Err(e) => {
                // stop after an error.
                self.id = 0;
                self.batch.clear();
                Some(Err(e))
            }
        }
    }
}
