use crate::intents::Namespace;
use crate::oplog::OplogTs;
use crate::source::{Natural, Source};
use crate::{DumpError, Result, LEGACY_OPLOG_COLL, OPLOG_COLL, OPLOG_DB, TIMESTAMP_KEY};
use bson::{doc, Bson, Document};
use tracing::{debug, info};

pub fn get_earliest_ts(source: &dyn Source, oplog_ns: &Namespace) -> Result<OplogTs> {
    get_one_oplog_ts(source, oplog_ns, Natural::Earliest)
}

pub fn get_latest_ts(source: &dyn Source, oplog_ns: &Namespace) -> Result<OplogTs> {
    get_one_oplog_ts(source, oplog_ns, Natural::Latest)
}

fn get_one_oplog_ts(source: &dyn Source, oplog_ns: &Namespace, natural: Natural) -> Result<OplogTs> {
    source
        .find_one(oplog_ns, None, natural)?
        .map(|d| {
            d.get_timestamp(TIMESTAMP_KEY)
                .map(OplogTs::from)
                .map_err(DumpError::BsonError)
        })
        .unwrap_or(Err(DumpError::EmptyOplog))
}

/// Figure out where the oplog lives from an `isMaster` reply.
pub fn oplog_namespace(is_master: &Document) -> Result<Namespace> {
    if is_master.contains_key("hosts") {
        debug!("determined cluster to be a replica set, oplog located in local.oplog.rs");
        return Ok(Namespace::new(OPLOG_DB, OPLOG_COLL));
    }
    if is_falsy(is_master.get("ismaster")) {
        info!("mongodump is not connected to a master");
        return Err(DumpError::NotPrimary);
    }
    debug!("not connected to a replica set, assuming master/slave, oplog located in local.oplog.$main");
    Ok(Namespace::new(OPLOG_DB, LEGACY_OPLOG_COLL))
}

/// Return true if `value` is missing, null, false or a zero number.
pub fn is_falsy(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => true,
        Some(Bson::Boolean(b)) => !b,
        Some(Bson::Int32(i)) => *i == 0,
        Some(Bson::Int64(i)) => *i == 0,
        Some(Bson::Double(f)) => *f == 0.0,
        Some(_) => false,
    }
}

/// run `isMaster` against `source`.
pub fn is_master(source: &dyn Source) -> Result<Document> {
    source.run_admin_command(doc! {"isMaster": 1})
}

/// Return true if `source` is a mongos router.
pub fn is_mongos(source: &dyn Source) -> Result<bool> {
    let reply = is_master(source)?;
    Ok(matches!(reply.get_str("msg"), Ok("isdbgrid")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oplog_namespace_replica_set() {
        let reply = doc! {"hosts": ["a:27017", "b:27017"], "ismaster": false};
        assert_eq!(
            oplog_namespace(&reply).unwrap(),
            Namespace::new("local", "oplog.rs")
        );
    }

    #[test]
    fn test_oplog_namespace_not_master() {
        assert!(matches!(
            oplog_namespace(&doc! {"ismaster": false}),
            Err(DumpError::NotPrimary)
        ));
        assert!(matches!(
            oplog_namespace(&doc! {}),
            Err(DumpError::NotPrimary)
        ));
    }

    #[test]
    fn test_oplog_namespace_master_slave() {
        assert_eq!(
            oplog_namespace(&doc! {"ismaster": true}).unwrap(),
            Namespace::new("local", "oplog.$main")
        );
        assert_eq!(
            oplog_namespace(&doc! {"ismaster": 1}).unwrap(),
            Namespace::new("local", "oplog.$main")
        );
    }

    #[test]
    fn test_is_falsy() {
        assert!(is_falsy(None));
        assert!(is_falsy(Some(&Bson::Null)));
        assert!(is_falsy(Some(&Bson::Boolean(false))));
        assert!(is_falsy(Some(&Bson::Int32(0))));
        assert!(is_falsy(Some(&Bson::Double(0.0))));
        assert!(!is_falsy(Some(&Bson::Boolean(true))));
        assert!(!is_falsy(Some(&Bson::Int64(2))));
        assert!(!is_falsy(Some(&Bson::String("".to_string()))));
    }
}
