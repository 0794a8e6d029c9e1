use clap::Parser;
use mongo_dump::{DumpConf, MongoDump};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// source database uri.
    #[clap(short, long, default_value = "mongodb://localhost:27017")]
    uri: String,
    /// output directory, or "-" to write one collection to stdout.
    #[clap(short, long, default_value = "dump")]
    out: PathBuf,
    /// database to dump.
    #[clap(short, long)]
    db: Option<String>,
    /// collection to dump.
    #[clap(short, long)]
    collection: Option<String>,
    /// query filter, as a json document.
    #[clap(short, long)]
    query: Option<String>,
    /// collection to exclude from the dump, can be given many times.
    #[clap(long = "exclude-collection")]
    exclude_collections: Vec<String>,
    /// exclude all collections with the given prefix, can be given many times.
    #[clap(long = "exclude-collections-with-prefix")]
    exclude_collection_prefixes: Vec<String>,
    /// capture oplog entries written during the dump, for a point-in-time snapshot.
    #[clap(long)]
    oplog: bool,
    /// read collections without snapshot.
    #[clap(long)]
    force_table_scan: bool,
    /// dump through repair cursors, which skip corrupted records.
    #[clap(long)]
    repair: bool,
    /// dump users and roles defined on the given database.
    #[clap(long)]
    dump_db_users_and_roles: bool,
    /// number of collections dumped in parallel.
    #[clap(short, long, default_value = "1")]
    jobs: usize,
    /// toml configuration file, other dump options are ignored when given.
    #[clap(long)]
    conf: Option<PathBuf>,
    /// log file path, if not specified, all log information will be output to stderr.
    #[clap(long)]
    log_path: Option<String>,
    /// log debug messages.
    #[clap(short, long)]
    verbose: bool,
}

impl Opts {
    fn into_conf(self) -> mongo_dump::Result<DumpConf> {
        if let Some(path) = self.conf {
            return DumpConf::from_toml_file(path);
        }
        let mut conf = DumpConf::new(self.uri, self.out)
            .with_force_table_scan(self.force_table_scan)
            .with_exclude_collections(self.exclude_collections)
            .with_exclude_collection_prefixes(self.exclude_collection_prefixes)
            .with_oplog(self.oplog)
            .with_repair(self.repair)
            .with_dump_db_users_and_roles(self.dump_db_users_and_roles)
            .with_jobs(self.jobs);
        if let Some(db) = self.db {
            conf = conf.with_db(db);
        }
        if let Some(coll) = self.collection {
            conf = conf.with_collection(coll);
        }
        if let Some(query) = self.query {
            conf = conf.with_query(query);
        }
        Ok(conf)
    }
}

fn main() {
    let opts: Opts = Opts::parse();
    let level = if opts.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let collector = tracing_subscriber::fmt().with_max_level(level);
    // stdout may carry dumped documents, so logs never go there.
    let (non_blocking, guard) = match &opts.log_path {
        Some(path) => {
            let path = Path::new(path);
            let dir_name = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            let file_appender = tracing_appender::rolling::daily(dir_name, file_name);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    collector.with_writer(non_blocking).init();

    let result = opts
        .into_conf()
        .and_then(MongoDump::connect)
        .and_then(|dumper| dumper.dump());
    match result {
        Ok(()) => info!("dump finished"),
        Err(e) if e.is_consistency_error() => {
            error!(error = %e, "oplog rolled over during the dump, the dump is not a consistent snapshot, try again with a larger oplog");
            drop(guard);
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "dump failed");
            drop(guard);
            std::process::exit(1);
        }
    }
}
