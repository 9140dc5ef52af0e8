//! The skv-client executable talks to a running skv-server. Every wire command has a
//! subcommand; to see the full list, type: `skv-client --help`
//!
//! `skv-client new [--name NAME] [--shared] [--ttl SECONDS] [--delete-on-expire] [--addr IP-PORT]`
//!
//!     Create a session and print its token. A named session derives a deterministic token,
//!     so other clients that know the name can open it (if --shared was given). A non-zero
//!     --ttl makes the session expire; --delete-on-expire removes it on expiry instead of
//!     clearing it.
//!
//! `skv-client open <NAME> [--addr IP-PORT]`
//!
//!     Attach to an existing shared session by name and print its token.
//!
//! `skv-client set --tkn <TOKEN> <KEY> <VALUE> [--addr IP-PORT]`
//!
//!     Store a document under a key. VALUE is parsed as JSON; anything that does not parse
//!     is stored as a JSON string.
//!
//! `skv-client find --tkn <TOKEN> <PATH> [--keys KEY...] [--rsp keys|paths|kv] [--addr IP-PORT]`
//!
//!     Evaluate a JSONPath expression against the session's documents.
//!
//! The remaining subcommands (`end`, `info`, `info-all`, `exists`, `end-all`, `add`, `get`,
//! `rm`, `clear`, `clear-set`, `count`, `keys`, `contains`, `update`, `save`, `load`) mirror
//! the wire protocol one to one.
//!
//! All subcommands accept `--addr IP-PORT` (default 127.0.0.1:4000) and print an error with a
//! non-zero exit code on server error, or if IP-PORT does not parse as an address.

use std::net::SocketAddr;

use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use serde_json::Map;
use skv::{Document, FindRsp, Request, Result, SessionToken, SkvClient, SkvError};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    /// validates the `addr` parameter is a valid IP address and PORT
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`SkvError::Parsing`] if one of the parameters is invalid
    ///
    fn build(addr: &str, req: Request) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            SkvError::Parsing(format!(
                "could not parse {} into an IP address and port",
                &addr
            ))
        })?;

        Ok(Opt { addr, req })
    }
}

fn main() -> Result<()> {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("skv-client")
        .version(crate_version!())
        .about("client for the skv session/document store")
        .subcommands(vec![
            SubCommand::with_name("new")
                .about("Create a session and print its token")
                .arg(
                    Arg::with_name("name")
                        .long("name")
                        .value_name("NAME")
                        .help("derive the session token from this name")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("shared")
                        .long("shared")
                        .help("let other clients open the session by name"),
                )
                .arg(
                    Arg::with_name("ttl")
                        .long("ttl")
                        .value_name("SECONDS")
                        .help("seconds until the session expires; 0 never expires")
                        .default_value("0"),
                )
                .arg(
                    Arg::with_name("delete-on-expire")
                        .long("delete-on-expire")
                        .help("remove the session on expiry instead of clearing it"),
                ),
            SubCommand::with_name("open")
                .about("Attach to an existing shared session by name")
                .arg(Arg::with_name("NAME").required(true).index(1)),
            SubCommand::with_name("end")
                .about("End a session")
                .arg(token_arg()),
            SubCommand::with_name("info")
                .about("Print a session's flags, key count and expiry")
                .arg(token_arg()),
            SubCommand::with_name("info-all").about("Print totals across every live session"),
            SubCommand::with_name("exists")
                .about("Print which of the given tokens are live")
                .arg(Arg::with_name("TOKEN").required(true).multiple(true)),
            SubCommand::with_name("end-all").about("End every session"),
            SubCommand::with_name("set")
                .about("Store a document under a key")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("add")
                .about("Store a document only if the key is absent")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("get")
                .about("Fetch documents by key")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).multiple(true)),
            SubCommand::with_name("rm")
                .about("Remove documents by key")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).multiple(true)),
            SubCommand::with_name("clear")
                .about("Empty the session's store")
                .arg(token_arg()),
            SubCommand::with_name("clear-set")
                .about("Empty the session's store, then store a document")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("count")
                .about("Count the session's documents")
                .arg(token_arg()),
            SubCommand::with_name("keys")
                .about("List the session's keys")
                .arg(token_arg()),
            SubCommand::with_name("contains")
                .about("Print which of the given keys are present")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).multiple(true)),
            SubCommand::with_name("find")
                .about("Evaluate a JSONPath expression against the session's documents")
                .arg(token_arg())
                .arg(Arg::with_name("PATH").required(true).index(1))
                .arg(
                    Arg::with_name("keys")
                        .long("keys")
                        .value_name("KEY")
                        .help("restrict the query to these keys")
                        .multiple(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("rsp")
                        .long("rsp")
                        .value_name("MODE")
                        .help("what to print: keys, paths or kv")
                        .possible_values(&["keys", "paths", "kv"])
                        .default_value("keys"),
                ),
            SubCommand::with_name("update")
                .about("Replace every node a JSONPath expression selects within one document")
                .arg(token_arg())
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("PATH").required(true).index(2))
                .arg(Arg::with_name("VALUE").required(true).index(3)),
            SubCommand::with_name("save")
                .about("Snapshot the registry to disk")
                .arg(Arg::with_name("NAME").required(true).index(1))
                .arg(
                    Arg::with_name("tkn")
                        .long("tkn")
                        .value_name("TOKEN")
                        .help("restrict the save to these sessions")
                        .multiple(true)
                        .takes_value(true),
                ),
            SubCommand::with_name("load")
                .about("Restore sessions from the most recent completed snapshot")
                .arg(Arg::with_name("NAME").required(true).index(1)),
        ])
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT of the server to connect to")
                .default_value(DEFAULT_ADDRESS),
        )
        .get_matches();

    // parse commands into an Opt struct
    match parse_options(matches) {
        Ok(opt) => run(opt),
        Err(e) => Err(e),
    }
}

/// runs the specified request against a connected [`SkvClient`] and prints the result
/// `opt` contains the server address and the request type to execute
fn run(opt: Opt) -> Result<()> {
    let mut client = SkvClient::connect(opt.addr)?;

    match opt.req {
        Request::SessionNew {
            name,
            shared,
            duration_secs,
            delete_on_expire,
        } => {
            let token = client.session_new(name, shared, duration_secs, delete_on_expire)?;
            println!("{}", token);
        }
        Request::SessionOpen { name } => {
            let token = client.session_open(name)?;
            println!("{}", token);
        }
        Request::SessionEnd { token } => {
            client.session_end(token)?;
        }
        Request::SessionInfo { token } => {
            let info = client.session_info(token)?;
            println!("token: {}", info.token);
            println!("shared: {}", info.shared);
            println!("keys: {}", info.key_count);
            match info.expiry {
                Some(expiry) => println!(
                    "expires in: {}s of {}s ({} on expiry)",
                    expiry.remaining_secs,
                    expiry.duration_secs,
                    if expiry.delete_on_expire {
                        "deleted"
                    } else {
                        "cleared"
                    }
                ),
                None => println!("expires: never"),
            }
        }
        Request::SessionInfoAll => {
            let (sessions, keys) = client.session_info_all()?;
            println!("sessions: {}", sessions);
            println!("keys: {}", keys);
        }
        Request::SessionExists { tokens } => {
            for token in client.session_exists(tokens)? {
                println!("{}", token);
            }
        }
        Request::SessionEndAll => {
            println!("{}", client.session_end_all()?);
        }
        Request::Set { token, keys } => {
            client.set(token, keys)?;
        }
        Request::Add { token, keys } => {
            client.add(token, keys)?;
        }
        Request::Get { token, keys } => {
            let found = client.get(token, keys)?;
            if found.is_empty() {
                println!("Key not found");
            }
            for (key, doc) in found {
                println!("{} = {}", key, doc);
            }
        }
        Request::Remove { token, keys } => {
            println!("{}", client.remove(token, keys)?);
        }
        Request::Clear { token } => {
            println!("{}", client.clear(token)?);
        }
        Request::ClearSet { token, keys } => {
            println!("{}", client.clear_set(token, keys)?);
        }
        Request::Count { token } => {
            println!("{}", client.count(token)?);
        }
        Request::Contains { token, keys } => {
            for key in client.contains(token, keys)? {
                println!("{}", key);
            }
        }
        Request::Keys { token } => {
            for key in client.keys(token)? {
                println!("{}", key);
            }
        }
        Request::Find {
            token,
            path,
            keys,
            rsp: FindRsp::Kv,
        } => {
            for (key, doc) in client.find_kv(token, path, keys)? {
                println!("{} = {}", key, doc);
            }
        }
        Request::Find {
            token,
            path,
            keys,
            rsp,
        } => {
            for matched in client.find(token, path, keys, rsp)? {
                println!("{}", matched);
            }
        }
        Request::Update {
            token,
            key,
            path,
            value,
        } => {
            let (existed, count) = client.update(token, key, path, value)?;
            if existed {
                println!("{}", count);
            } else {
                println!("Key not found");
            }
        }
        Request::Save { name, tokens } => {
            let (sessions, keys) = client.save(name, tokens)?;
            println!("saved {} sessions, {} keys", sessions, keys);
        }
        Request::Load { name } => {
            let (sessions, keys) = client.load(name)?;
            println!("loaded {} sessions, {} keys", sessions, keys);
        }
    }
    Ok(())
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: ArgMatches) -> Result<Opt> {
    let addr = matches.value_of("addr").unwrap();
    match matches.subcommand() {
        ("new", Some(args)) => {
            let name = args.value_of("name").map(String::from);
            let duration_secs = parse_secs(args.value_of("ttl").unwrap())?;
            Opt::build(
                addr,
                Request::SessionNew {
                    name,
                    shared: args.is_present("shared"),
                    duration_secs,
                    delete_on_expire: args.is_present("delete-on-expire"),
                },
            )
        }
        ("open", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            Opt::build(addr, Request::SessionOpen { name })
        }
        ("end", Some(args)) => Opt::build(
            addr,
            Request::SessionEnd {
                token: parse_token(args)?,
            },
        ),
        ("info", Some(args)) => Opt::build(
            addr,
            Request::SessionInfo {
                token: parse_token(args)?,
            },
        ),
        ("info-all", Some(_)) => Opt::build(addr, Request::SessionInfoAll),
        ("exists", Some(args)) => {
            let tokens = args
                .values_of("TOKEN")
                .unwrap()
                .map(parse_token_str)
                .collect::<Result<Vec<SessionToken>>>()?;
            Opt::build(addr, Request::SessionExists { tokens })
        }
        ("end-all", Some(_)) => Opt::build(addr, Request::SessionEndAll),
        ("set", Some(args)) => Opt::build(
            addr,
            Request::Set {
                token: parse_token(args)?,
                keys: parse_pair(args),
            },
        ),
        ("add", Some(args)) => Opt::build(
            addr,
            Request::Add {
                token: parse_token(args)?,
                keys: parse_pair(args),
            },
        ),
        ("get", Some(args)) => Opt::build(
            addr,
            Request::Get {
                token: parse_token(args)?,
                keys: key_list(args),
            },
        ),
        ("rm", Some(args)) => Opt::build(
            addr,
            Request::Remove {
                token: parse_token(args)?,
                keys: key_list(args),
            },
        ),
        ("clear", Some(args)) => Opt::build(
            addr,
            Request::Clear {
                token: parse_token(args)?,
            },
        ),
        ("clear-set", Some(args)) => Opt::build(
            addr,
            Request::ClearSet {
                token: parse_token(args)?,
                keys: parse_pair(args),
            },
        ),
        ("count", Some(args)) => Opt::build(
            addr,
            Request::Count {
                token: parse_token(args)?,
            },
        ),
        ("keys", Some(args)) => Opt::build(
            addr,
            Request::Keys {
                token: parse_token(args)?,
            },
        ),
        ("contains", Some(args)) => Opt::build(
            addr,
            Request::Contains {
                token: parse_token(args)?,
                keys: key_list(args),
            },
        ),
        ("find", Some(args)) => {
            let path = args.value_of("PATH").map(String::from).unwrap();
            let keys = args
                .values_of("keys")
                .map(|keys| keys.map(String::from).collect());
            let rsp = match args.value_of("rsp").unwrap() {
                "paths" => FindRsp::Paths,
                "kv" => FindRsp::Kv,
                _ => FindRsp::Keys,
            };
            Opt::build(
                addr,
                Request::Find {
                    token: parse_token(args)?,
                    path,
                    keys,
                    rsp,
                },
            )
        }
        ("update", Some(args)) => {
            let key = args.value_of("KEY").map(String::from).unwrap();
            let path = args.value_of("PATH").map(String::from).unwrap();
            let value = parse_doc(args.value_of("VALUE").unwrap());
            Opt::build(
                addr,
                Request::Update {
                    token: parse_token(args)?,
                    key,
                    path,
                    value,
                },
            )
        }
        ("save", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            let tokens = match args.values_of("tkn") {
                Some(tokens) => Some(
                    tokens
                        .map(parse_token_str)
                        .collect::<Result<Vec<SessionToken>>>()?,
                ),
                None => None,
            };
            Opt::build(addr, Request::Save { name, tokens })
        }
        ("load", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            Opt::build(addr, Request::Load { name })
        }
        _ => Err(SkvError::Parsing(
            "no subcommand given, try --help".to_string(),
        )),
    }
}

// the --tkn argument every document subcommand carries
fn token_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("tkn")
        .long("tkn")
        .value_name("TOKEN")
        .help("the token of the session to operate on")
        .required(true)
        .takes_value(true)
}

fn parse_token(args: &ArgMatches) -> Result<SessionToken> {
    parse_token_str(args.value_of("tkn").unwrap())
}

fn parse_token_str(raw: &str) -> Result<SessionToken> {
    raw.parse()
        .map_err(|_| SkvError::Parsing(format!("{} is not a session token", raw)))
}

fn parse_secs(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| SkvError::Parsing(format!("{} is not a number of seconds", raw)))
}

// a document given on the command line is JSON; anything that does not parse
// is taken as a plain string
fn parse_doc(raw: &str) -> Document {
    serde_json::from_str(raw).unwrap_or_else(|_| Document::String(raw.to_string()))
}

fn parse_pair(args: &ArgMatches) -> Map<String, Document> {
    let key = args.value_of("KEY").map(String::from).unwrap();
    let value = parse_doc(args.value_of("VALUE").unwrap());
    let mut keys = Map::new();
    keys.insert(key, value);
    keys
}

fn key_list(args: &ArgMatches) -> Vec<String> {
    args.values_of("KEY")
        .unwrap()
        .map(String::from)
        .collect()
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
