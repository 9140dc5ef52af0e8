use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::session::SessionToken;
use crate::store::Document;

/// How [`Request::Find`] results are returned.
///
/// [`Request::Find`]: ./enum.Request.html#variant.Find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindRsp {
    /// the top-level keys whose document matched
    Keys,
    /// the normalized path string of every matching node
    Paths,
    /// the matching documents themselves, keyed like a get
    Kv,
}

/// The requests a client can make against the store.
///
/// Every document operation carries the token of the session it runs in;
/// tokens are handed out by [`SessionNew`] and [`SessionOpen`].
///
/// [`SessionNew`]: ./enum.Request.html#variant.SessionNew
/// [`SessionOpen`]: ./enum.Request.html#variant.SessionOpen
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    /// create a session
    SessionNew {
        /// optional human name; named sessions derive a deterministic token
        /// so other callers can rendezvous on them
        name: Option<String>,
        /// whether other connections may attach by name
        shared: bool,
        /// seconds until the session expires; 0 means it never expires
        duration_secs: u64,
        /// remove the session on expiry instead of clearing its store
        delete_on_expire: bool,
    },
    /// attach to an existing shared session by name
    SessionOpen {
        /// the name the session was created with
        name: String,
    },
    /// explicitly end a session
    SessionEnd {
        /// the session to end
        token: SessionToken,
    },
    /// report a session's flags, key count and expiry; reading the info
    /// renews an expiring session (touch-on-access)
    SessionInfo {
        /// the session to inspect
        token: SessionToken,
    },
    /// report totals across every live session
    SessionInfoAll,
    /// report which of the given tokens are live
    SessionExists {
        /// the tokens to check
        tokens: Vec<SessionToken>,
    },
    /// end every session
    SessionEndAll,
    /// insert or overwrite documents
    Set {
        /// the session to operate on
        token: SessionToken,
        /// key/document pairs to store
        keys: Map<String, Document>,
    },
    /// insert documents only where the key is absent
    Add {
        /// the session to operate on
        token: SessionToken,
        /// key/document pairs to store
        keys: Map<String, Document>,
    },
    /// fetch documents; absent keys are omitted from the response
    Get {
        /// the session to operate on
        token: SessionToken,
        /// the keys to fetch
        keys: Vec<String>,
    },
    /// remove documents
    Remove {
        /// the session to operate on
        token: SessionToken,
        /// the keys to remove
        keys: Vec<String>,
    },
    /// empty the session's store
    Clear {
        /// the session to operate on
        token: SessionToken,
    },
    /// empty the session's store, then insert the given documents
    ClearSet {
        /// the session to operate on
        token: SessionToken,
        /// key/document pairs stored after the clear
        keys: Map<String, Document>,
    },
    /// count the session's documents
    Count {
        /// the session to operate on
        token: SessionToken,
    },
    /// report which of the given keys are present
    Contains {
        /// the session to operate on
        token: SessionToken,
        /// the keys to check
        keys: Vec<String>,
    },
    /// list the session's keys
    Keys {
        /// the session to operate on
        token: SessionToken,
    },
    /// evaluate a structured path query against the session's documents
    Find {
        /// the session to operate on
        token: SessionToken,
        /// the JSONPath expression to evaluate
        path: String,
        /// restrict the query to these keys, when given
        keys: Option<Vec<String>>,
        /// what the response carries
        rsp: FindRsp,
    },
    /// replace every node a structured path selects within one document
    Update {
        /// the session to operate on
        token: SessionToken,
        /// the key of the document to patch
        key: String,
        /// the JSONPath expression selecting the nodes to replace
        path: String,
        /// the replacement value
        value: Document,
    },
    /// snapshot the registry to disk
    Save {
        /// the name to save under
        name: String,
        /// restrict the save to these sessions, when given
        tokens: Option<Vec<SessionToken>>,
    },
    /// restore sessions from the most recent completed snapshot under `name`
    Load {
        /// the name that was saved under
        name: String,
    },
}

/// Expiry details reported by [`Response::Info`].
///
/// [`Response::Info`]: ./enum.Response.html#variant.Info
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExpiryInfo {
    /// the configured duration, in seconds
    pub duration_secs: u64,
    /// seconds until a sweep processes the session
    pub remaining_secs: u64,
    /// whether expiry removes the session instead of clearing it
    pub delete_on_expire: bool,
}

/// Session details reported by [`Response::Info`].
///
/// [`Response::Info`]: ./enum.Response.html#variant.Info
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    /// the session's token
    pub token: SessionToken,
    /// whether the session is shared
    pub shared: bool,
    /// the number of documents in the session's store
    pub key_count: usize,
    /// the expiry settings, absent for a session that never expires
    pub expiry: Option<ExpiryInfo>,
}

/// The responses returned for any [`Request`].
///
/// Expected failures (unknown token, duplicate session, bad query path,
/// save/load errors) arrive as the [`Err`] variant carrying a description.
///
/// [`Request`]: ./enum.Request.html
/// [`Err`]: ./enum.Response.html#variant.Err
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// the token of a created or opened session
    Token {
        /// the session token to present with subsequent requests
        token: SessionToken,
    },
    /// details of one session
    Info(SessionInfo),
    /// totals across the registry
    InfoAll {
        /// live sessions
        sessions: usize,
        /// documents across every session
        keys: usize,
    },
    /// the subset of queried tokens that are live
    Exists {
        /// the live tokens
        tokens: Vec<SessionToken>,
    },
    /// documents returned by a get or a kv-mode find
    Documents {
        /// the found key/document pairs
        keys: Map<String, Document>,
    },
    /// the session's keys
    Keys {
        /// the keys, in no particular order
        keys: Vec<String>,
    },
    /// the subset of queried keys that are present
    Contains {
        /// the present keys
        keys: Vec<String>,
    },
    /// a count of documents or removals
    Count {
        /// the count
        count: usize,
    },
    /// how many sessions or documents a clear dropped
    Cleared {
        /// the number cleared
        count: usize,
    },
    /// keys or paths matched by a find
    Found {
        /// the matches, deduplicated
        matches: Vec<String>,
    },
    /// outcome of an update
    Updated {
        /// whether the document existed
        existed: bool,
        /// how many nodes were replaced
        count: usize,
    },
    /// outcome of a save
    Saved {
        /// the snapshot name
        name: String,
        /// sessions written
        sessions: usize,
        /// documents written
        keys: usize,
        /// how long the save took, in milliseconds
        duration_ms: u64,
    },
    /// outcome of a load
    Loaded {
        /// the snapshot name
        name: String,
        /// sessions reconstructed
        sessions: usize,
        /// documents reconstructed
        keys: usize,
        /// how long the load took, in milliseconds
        duration_ms: u64,
    },
    /// the request succeeded and carries no data
    Done,
    /// the request failed; contains a description of the error
    Err(String),
}
