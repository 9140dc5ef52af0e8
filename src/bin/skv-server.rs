//! this binary starts the skv server
//! to see the list of options, type: `skv-server --help`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, App, Arg};
use skv::{Result, SharedQueueThreadPool, SkvError, SkvServer, ThreadPool};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
const DEFAULT_DATA_DIR: &str = "skv-data";
const DEFAULT_SWEEP_SECS: &str = "1";
const DEFAULT_THREADS: &str = "4";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the ip:port the server listens on
    addr: SocketAddr,
    /// root directory for snapshot datasets
    data_dir: PathBuf,
    /// how often expired sessions are swept
    sweep_interval: Duration,
    /// connection-serving threads in the pool
    threads: u32,
}

impl Opt {
    /// validates the command line parameters
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`SkvError::Parsing`] if one of the parameters is invalid
    ///
    fn build(addr: &str, data_dir: &str, sweep_secs: &str, threads: &str) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            SkvError::Parsing(format!(
                "could not parse {} into an IP address and port",
                &addr
            ))
        })?;

        let sweep_secs: u64 = sweep_secs.parse().map_err(|_| {
            SkvError::Parsing(format!("sweep interval {} is not a number of seconds", sweep_secs))
        })?;
        if sweep_secs == 0 {
            return Err(SkvError::Parsing(
                "sweep interval must be at least one second".to_string(),
            ));
        }

        let threads: u32 = threads.parse().map_err(|_| {
            SkvError::Parsing(format!("thread count {} is not a number", threads))
        })?;
        if threads == 0 {
            return Err(SkvError::Parsing(
                "the pool needs at least one thread".to_string(),
            ));
        }

        Ok(Opt {
            addr,
            data_dir: PathBuf::from(data_dir),
            sweep_interval: Duration::from_secs(sweep_secs),
            threads,
        })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("skv-server")
        .version(crate_version!())
        .about("a multi-threaded, in-memory session/document store")
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT that the server listens on")
                .default_value(DEFAULT_ADDRESS),
        )
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("sets the directory that snapshots are saved to and loaded from")
                .default_value(DEFAULT_DATA_DIR),
        )
        .arg(
            Arg::with_name("sweep-interval")
                .long("sweep-interval")
                .value_name("SECONDS")
                .help("sets how often expired sessions are swept")
                .default_value(DEFAULT_SWEEP_SECS),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .value_name("COUNT")
                .help("sets the number of connection-serving threads")
                .default_value(DEFAULT_THREADS),
        )
        .get_matches();

    // validate command line options, store them in Opt
    let opt = match Opt::build(
        matches.value_of("addr").unwrap(),
        matches.value_of("data-dir").unwrap(),
        matches.value_of("sweep-interval").unwrap(),
        matches.value_of("threads").unwrap(),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("skv-server {}", env!("CARGO_PKG_VERSION"));
    info!("Snapshot directory: {}", opt.data_dir.display());
    info!("Listening on {}", opt.addr);

    let pool = SharedQueueThreadPool::new(opt.threads)?;
    let server = SkvServer::new(pool, opt.data_dir, opt.sweep_interval);
    server.run(opt.addr)
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::TRACE)
        // log to stderr instrad of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
