use std::collections::HashSet;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use serde_json::{Deserializer, Map};
use tracing::{debug, error};

use crate::command::{ExpiryInfo, FindRsp, Request, Response, SessionInfo};
use crate::error::{Result, SkvError};
use crate::session::{named_token, random_token, ExpirySpec, SessionRegistry, SessionToken};
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::store::DocStore;
use crate::thread_pool::ThreadPool;

/// how often the worker sweeps expired sessions unless configured otherwise
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// a decoded request paired with the channel its response goes back on
struct Job {
    req: Request,
    rsp_tx: Sender<Response>,
}

/// A TCP server over a [`SessionRegistry`].
///
/// The registry and the snapshot machinery are owned by a single worker
/// thread; that thread is the only one that ever mutates them, which is what
/// makes the lock-free registry sound. Connection threads (drawn from a
/// [`ThreadPool`]) decode [`Request`]s from the socket, marshal them to the
/// worker with a reply channel, and write the [`Response`] back. A ticker in
/// the worker's receive loop runs the expiry sweep between commands, never
/// concurrently with one.
///
/// # Example
/// Serve on "127.0.0.1:4000" with 4 connection threads, snapshots under
/// "./snapshots", sweeping every second:
/// ```text
/// let pool = SharedQueueThreadPool::new(4)?;
/// let server = SkvServer::new(pool, "snapshots", DEFAULT_SWEEP_INTERVAL);
/// server.run("127.0.0.1:4000")?;
/// ```
///
/// [`SessionRegistry`]: ./struct.SessionRegistry.html
/// [`ThreadPool`]: ./thread_pool/trait.ThreadPool.html
/// [`Request`]: ./enum.Request.html
/// [`Response`]: ./enum.Response.html
pub struct SkvServer<P: ThreadPool> {
    /// serves client connections
    pool: P,
    /// hands decoded requests to the owner worker
    jobs_tx: Sender<Job>,
}

impl<P: ThreadPool> SkvServer<P> {
    /// creates a server whose worker saves and loads snapshots under
    /// `data_dir` and sweeps expired sessions every `sweep_interval`
    pub fn new(pool: P, data_dir: impl Into<PathBuf>, sweep_interval: Duration) -> SkvServer<P> {
        let (jobs_tx, jobs_rx) = channel::unbounded::<Job>();
        let worker = Worker::new(data_dir.into());
        thread::spawn(move || worker.run(jobs_rx, sweep_interval));

        SkvServer { pool, jobs_tx }
    }

    /// starts the server listening on `addr`.
    /// Each connection is serviced on a pool thread until the peer hangs up
    ///
    /// # Errors
    /// returns an [`SkvError::Io`] if the listener could not be bound
    ///
    /// [`SkvError::Io`]: ./enum.SkvError.html#variant.Io
    pub fn run<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let jobs_tx = self.jobs_tx.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(jobs_tx, stream) {
                            error!("error serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// decodes [`Request`]s from `tcp`, marshals each to the owner worker, and
/// writes the [`Response`] back on the same stream
///
/// [`Request`]: ./enum.Request.html
/// [`Response`]: ./enum.Response.html
fn serve(jobs_tx: Sender<Job>, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let reader = BufReader::new(&tcp);
    let mut writer = BufWriter::new(&tcp);
    let requests = Deserializer::from_reader(reader).into_iter::<Request>();

    for req in requests {
        let req = req?;
        debug!("request from {}: {:?}", peer_addr, req);

        let (rsp_tx, rsp_rx) = channel::bounded(1);
        jobs_tx
            .send(Job { req, rsp_tx })
            .map_err(|_| SkvError::Remote("store worker is gone".to_string()))?;
        let rsp = rsp_rx
            .recv()
            .map_err(|_| SkvError::Remote("store worker dropped the request".to_string()))?;

        serde_json::to_writer(&mut writer, &rsp)?;
        writer.flush()?;
        debug!("response sent to {}: {:?}", peer_addr, rsp);
    }
    Ok(())
}

// Exclusively owns the registry and the snapshot writer/reader. Requests
// arrive over the job channel and execute here in arrival order; the sweep
// ticker fires in the same receive loop, so it can never observe a
// half-applied command.
struct Worker {
    registry: SessionRegistry,
    writer: SnapshotWriter,
    reader: SnapshotReader,
}

impl Worker {
    fn new(data_dir: PathBuf) -> Worker {
        Worker {
            registry: SessionRegistry::new(),
            writer: SnapshotWriter::new(&data_dir),
            reader: SnapshotReader::new(&data_dir),
        }
    }

    fn run(mut self, jobs: Receiver<Job>, sweep_interval: Duration) {
        let sweeper = channel::tick(sweep_interval);
        loop {
            select! {
                recv(jobs) -> job => match job {
                    Ok(Job { req, rsp_tx }) => {
                        let rsp = self.execute(req);
                        // a client that hung up before its response is not
                        // the worker's problem
                        let _ = rsp_tx.send(rsp);
                    }
                    // every sender is gone, the server was dropped
                    Err(_) => break,
                },
                recv(sweeper) -> _ => {
                    self.registry.sweep();
                }
            }
        }
        debug!("store worker stopped");
    }

    fn execute(&mut self, req: Request) -> Response {
        match req {
            Request::SessionNew {
                name,
                shared,
                duration_secs,
                delete_on_expire,
            } => {
                let token = match &name {
                    Some(name) => named_token(name),
                    None => random_token(),
                };
                let expiry = if duration_secs > 0 {
                    Some(ExpirySpec {
                        duration: Duration::from_secs(duration_secs),
                        delete_on_expire,
                    })
                } else {
                    None
                };
                match self.registry.start(token, shared, expiry) {
                    Some(_) => Response::Token { token },
                    None => fail(SkvError::SessionExists(token)),
                }
            }
            Request::SessionOpen { name } => {
                let token = named_token(&name);
                match self.registry.open_shared(token) {
                    (true, true) => Response::Token { token },
                    (true, false) => fail(SkvError::SessionNotShared(token)),
                    (false, _) => fail(SkvError::SessionNotFound(token)),
                }
            }
            Request::SessionEnd { token } => {
                if self.registry.end(token) {
                    Response::Done
                } else {
                    fail(SkvError::SessionNotFound(token))
                }
            }
            Request::SessionInfo { token } => {
                // touch-on-access: inspecting a session renews it
                self.registry.renew(token);
                match self.registry.session(token) {
                    Some(session) => Response::Info(SessionInfo {
                        token,
                        shared: session.shared(),
                        key_count: session.store().count(),
                        expiry: session.expiry().map(|spec| ExpiryInfo {
                            duration_secs: spec.duration.as_secs(),
                            remaining_secs: session
                                .remaining(Instant::now())
                                .unwrap_or_default()
                                .as_secs(),
                            delete_on_expire: spec.delete_on_expire,
                        }),
                    }),
                    None => fail(SkvError::SessionNotFound(token)),
                }
            }
            Request::SessionInfoAll => Response::InfoAll {
                sessions: self.registry.count_sessions(),
                keys: self.registry.count_keys(),
            },
            Request::SessionExists { tokens } => Response::Exists {
                tokens: tokens
                    .into_iter()
                    .filter(|token| self.registry.contains(*token))
                    .collect(),
            },
            Request::SessionEndAll => Response::Cleared {
                count: self.registry.end_all(),
            },
            Request::Set { token, keys } => self.with_store(token, |store| {
                for (key, doc) in keys {
                    store.set(key, doc);
                }
                Response::Done
            }),
            Request::Add { token, keys } => self.with_store(token, |store| {
                for (key, doc) in keys {
                    store.add(key, doc);
                }
                Response::Done
            }),
            Request::Get { token, keys } => self.with_store(token, |store| {
                let mut found = Map::new();
                for key in keys {
                    if let Some(doc) = store.get(&key) {
                        found.insert(key, doc.clone());
                    }
                }
                Response::Documents { keys: found }
            }),
            Request::Remove { token, keys } => self.with_store(token, |store| {
                let mut removed = 0;
                for key in keys {
                    if store.remove(&key) {
                        removed += 1;
                    }
                }
                Response::Count { count: removed }
            }),
            Request::Clear { token } => self.with_store(token, |store| {
                let (_, count) = store.clear();
                Response::Cleared { count }
            }),
            Request::ClearSet { token, keys } => self.with_store(token, |store| {
                let (_, count) = store.clear();
                for (key, doc) in keys {
                    store.set(key, doc);
                }
                Response::Cleared { count }
            }),
            Request::Count { token } => self.with_store(token, |store| Response::Count {
                count: store.count(),
            }),
            Request::Contains { token, keys } => self.with_store(token, |store| {
                Response::Contains {
                    keys: keys.into_iter().filter(|key| store.contains(key)).collect(),
                }
            }),
            Request::Keys { token } => self.with_store(token, |store| Response::Keys {
                keys: store.keys().into_iter().map(String::from).collect(),
            }),
            Request::Find {
                token,
                path,
                keys,
                rsp,
            } => {
                let filter: Option<HashSet<String>> = keys.map(|keys| keys.into_iter().collect());
                match self.registry.get_store(token) {
                    None => fail(SkvError::SessionNotFound(token)),
                    Some(store) => {
                        match store.find(&path, filter.as_ref(), rsp == FindRsp::Paths) {
                            Err(e) => fail(e),
                            Ok(matches) => match rsp {
                                FindRsp::Kv => {
                                    // return the matching documents like a get
                                    let mut found = Map::new();
                                    for key in matches {
                                        if let Some(doc) = store.get(&key) {
                                            found.insert(key, doc.clone());
                                        }
                                    }
                                    Response::Documents { keys: found }
                                }
                                _ => Response::Found { matches },
                            },
                        }
                    }
                }
            }
            Request::Update {
                token,
                key,
                path,
                value,
            } => self.with_store(token, |store| match store.update(&key, &path, value) {
                Ok((existed, count)) => Response::Updated { existed, count },
                Err(e) => fail(e),
            }),
            Request::Save { name, tokens } => {
                let selection: Option<HashSet<SessionToken>> =
                    tokens.map(|tokens| tokens.into_iter().collect());
                match self
                    .writer
                    .save_registry(&self.registry, &name, selection.as_ref())
                {
                    Ok(snapshot) => Response::Saved {
                        name,
                        sessions: snapshot.sessions,
                        keys: snapshot.keys,
                        duration_ms: snapshot.duration.as_millis() as u64,
                    },
                    Err(e) => fail(e),
                }
            }
            Request::Load { name } => match self.reader.load_registry(&name, &mut self.registry) {
                Ok(result) => Response::Loaded {
                    name,
                    sessions: result.sessions,
                    keys: result.keys,
                    duration_ms: result.duration.as_millis() as u64,
                },
                Err(e) => fail(e),
            },
        }
    }

    // runs `op` against the store of the session holding `token`, or reports
    // the unknown token
    fn with_store<F>(&mut self, token: SessionToken, op: F) -> Response
    where
        F: FnOnce(&mut DocStore) -> Response,
    {
        match self.registry.get_store(token) {
            Some(store) => op(store),
            None => fail(SkvError::SessionNotFound(token)),
        }
    }
}

fn fail(e: SkvError) -> Response {
    Response::Err(e.to_string())
}
