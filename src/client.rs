use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};

use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::{Deserializer, Map};

use crate::command::{FindRsp, Request, Response, SessionInfo};
use crate::session::SessionToken;
use crate::store::Document;
use crate::{Result, SkvError};

/// `SkvClient` contains the functionality for communication with an [`SkvServer`].
///
/// Each method sends one [`Request`] and blocks until its [`Response`] arrives; a
/// [`Response::Err`] from the server is re-thrown as [`SkvError::Remote`].
///
/// [`SkvServer`]: ./struct.SkvServer.html
/// [`Request`]: ./enum.Request.html
/// [`Response`]: ./enum.Response.html
/// [`Response::Err`]: ./enum.Response.html#variant.Err
/// [`SkvError::Remote`]: ./enum.SkvError.html#variant.Remote
pub struct SkvClient {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl SkvClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;

        Ok(SkvClient {
            reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
            writer: BufWriter::new(tcp_writer),
        })
    }

    /// creates a session and returns its token.
    /// A `name` makes the token deterministic so other callers can open the session by the
    /// same name; `shared` controls whether they may. A zero `duration_secs` never expires
    pub fn session_new(
        &mut self,
        name: Option<String>,
        shared: bool,
        duration_secs: u64,
        delete_on_expire: bool,
    ) -> Result<SessionToken> {
        match self.roundtrip(Request::SessionNew {
            name,
            shared,
            duration_secs,
            delete_on_expire,
        })? {
            Response::Token { token } => Ok(token),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// attaches to an existing shared session by the name it was created with
    pub fn session_open(&mut self, name: String) -> Result<SessionToken> {
        match self.roundtrip(Request::SessionOpen { name })? {
            Response::Token { token } => Ok(token),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// ends the session held by `token`
    pub fn session_end(&mut self, token: SessionToken) -> Result<()> {
        match self.roundtrip(Request::SessionEnd { token })? {
            Response::Done => Ok(()),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// reports a session's flags, key count and expiry settings.
    /// Reading the info renews an expiring session
    pub fn session_info(&mut self, token: SessionToken) -> Result<SessionInfo> {
        match self.roundtrip(Request::SessionInfo { token })? {
            Response::Info(info) => Ok(info),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// reports `(sessions, keys)` totals across every live session
    pub fn session_info_all(&mut self) -> Result<(usize, usize)> {
        match self.roundtrip(Request::SessionInfoAll)? {
            Response::InfoAll { sessions, keys } => Ok((sessions, keys)),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// returns the subset of `tokens` that are live
    pub fn session_exists(&mut self, tokens: Vec<SessionToken>) -> Result<Vec<SessionToken>> {
        match self.roundtrip(Request::SessionExists { tokens })? {
            Response::Exists { tokens } => Ok(tokens),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// ends every session, returning how many were ended
    pub fn session_end_all(&mut self) -> Result<usize> {
        match self.roundtrip(Request::SessionEndAll)? {
            Response::Cleared { count } => Ok(count),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// inserts or overwrites the given key/document pairs in the session's store
    pub fn set(&mut self, token: SessionToken, keys: Map<String, Document>) -> Result<()> {
        match self.roundtrip(Request::Set { token, keys })? {
            Response::Done => Ok(()),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// inserts the given key/document pairs only where the key is absent
    pub fn add(&mut self, token: SessionToken, keys: Map<String, Document>) -> Result<()> {
        match self.roundtrip(Request::Add { token, keys })? {
            Response::Done => Ok(()),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// fetches documents from the session's store; absent keys are omitted
    pub fn get(
        &mut self,
        token: SessionToken,
        keys: Vec<String>,
    ) -> Result<Map<String, Document>> {
        match self.roundtrip(Request::Get { token, keys })? {
            Response::Documents { keys } => Ok(keys),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// removes the given keys, returning how many documents were removed
    pub fn remove(&mut self, token: SessionToken, keys: Vec<String>) -> Result<usize> {
        match self.roundtrip(Request::Remove { token, keys })? {
            Response::Count { count } => Ok(count),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// empties the session's store, returning how many documents were cleared
    pub fn clear(&mut self, token: SessionToken) -> Result<usize> {
        match self.roundtrip(Request::Clear { token })? {
            Response::Cleared { count } => Ok(count),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// empties the session's store and then inserts the given pairs,
    /// returning how many documents the clear dropped
    pub fn clear_set(
        &mut self,
        token: SessionToken,
        keys: Map<String, Document>,
    ) -> Result<usize> {
        match self.roundtrip(Request::ClearSet { token, keys })? {
            Response::Cleared { count } => Ok(count),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// counts the documents in the session's store
    pub fn count(&mut self, token: SessionToken) -> Result<usize> {
        match self.roundtrip(Request::Count { token })? {
            Response::Count { count } => Ok(count),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// returns the subset of `keys` present in the session's store
    pub fn contains(&mut self, token: SessionToken, keys: Vec<String>) -> Result<Vec<String>> {
        match self.roundtrip(Request::Contains { token, keys })? {
            Response::Contains { keys } => Ok(keys),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// lists the session's keys, in no particular order
    pub fn keys(&mut self, token: SessionToken) -> Result<Vec<String>> {
        match self.roundtrip(Request::Keys { token })? {
            Response::Keys { keys } => Ok(keys),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// evaluates a JSONPath expression against the session's documents and returns the
    /// matching top-level keys ([`FindRsp::Keys`]) or matched path strings
    /// ([`FindRsp::Paths`]); `keys` restricts the query to those documents
    ///
    /// [`FindRsp::Keys`]: ./enum.FindRsp.html#variant.Keys
    /// [`FindRsp::Paths`]: ./enum.FindRsp.html#variant.Paths
    pub fn find(
        &mut self,
        token: SessionToken,
        path: String,
        keys: Option<Vec<String>>,
        rsp: FindRsp,
    ) -> Result<Vec<String>> {
        match self.roundtrip(Request::Find {
            token,
            path,
            keys,
            rsp,
        })? {
            Response::Found { matches } => Ok(matches),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// like [`find`], but returns the matching documents themselves, keyed like a get
    ///
    /// [`find`]: ./struct.SkvClient.html#method.find
    pub fn find_kv(
        &mut self,
        token: SessionToken,
        path: String,
        keys: Option<Vec<String>>,
    ) -> Result<Map<String, Document>> {
        match self.roundtrip(Request::Find {
            token,
            path,
            keys,
            rsp: FindRsp::Kv,
        })? {
            Response::Documents { keys } => Ok(keys),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// replaces every node the JSONPath expression selects within the document at `key`,
    /// returning `(existed, replacements)`
    pub fn update(
        &mut self,
        token: SessionToken,
        key: String,
        path: String,
        value: Document,
    ) -> Result<(bool, usize)> {
        match self.roundtrip(Request::Update {
            token,
            key,
            path,
            value,
        })? {
            Response::Updated { existed, count } => Ok((existed, count)),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// snapshots the registry to disk under `name`, optionally restricted to the sessions in
    /// `tokens`. Returns `(sessions, keys)` written
    pub fn save(
        &mut self,
        name: String,
        tokens: Option<Vec<SessionToken>>,
    ) -> Result<(usize, usize)> {
        match self.roundtrip(Request::Save { name, tokens })? {
            Response::Saved { sessions, keys, .. } => Ok((sessions, keys)),
            rsp => Err(unexpected(rsp)),
        }
    }

    /// restores sessions from the most recent completed snapshot saved under `name`.
    /// Returns `(sessions, keys)` reconstructed
    pub fn load(&mut self, name: String) -> Result<(usize, usize)> {
        match self.roundtrip(Request::Load { name })? {
            Response::Loaded { sessions, keys, .. } => Ok((sessions, keys)),
            rsp => Err(unexpected(rsp)),
        }
    }

    // sends one request and reads back its response, re-throwing a server-side
    // error as SkvError::Remote
    fn roundtrip(&mut self, req: Request) -> Result<Response> {
        serde_json::to_writer(&mut self.writer, &req)?;
        self.writer.flush()?;

        match Response::deserialize(&mut self.reader)? {
            Response::Err(msg) => Err(SkvError::Remote(msg)),
            rsp => Ok(rsp),
        }
    }
}

fn unexpected(rsp: Response) -> SkvError {
    SkvError::Remote(format!("unexpected response from server: {:?}", rsp))
}
