use thiserror::Error;

/// type alias for all operations in this crate that can fail with an [`SkvError`]
pub type Result<T> = std::result::Result<T, SkvError>;

/// The error variants produced by the store, registry, snapshot and network
/// components.
///
/// Expected conditions on the hot path (a missing key, an unknown token) are
/// reported through return values rather than this type; see the individual
/// operations on [`DocStore`] and [`SessionRegistry`].
///
/// [`DocStore`]: ../struct.DocStore.html
/// [`SessionRegistry`]: ../struct.SessionRegistry.html
#[derive(Error, Debug)]
pub enum SkvError {
    /// variant for errors caused by file or socket IO
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// variant for errors while serializing or deserializing documents,
    /// snapshot files or wire messages
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// a structured path expression could not be compiled
    #[error("invalid query path {path:?}: {source}")]
    Query {
        /// the offending path expression
        path: String,
        /// the underlying parse failure
        source: serde_json_path::ParseError,
    },

    /// no live session holds this token
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// a session with this token is already live
    #[error("session already exists: {0}")]
    SessionExists(u64),

    /// the session exists but was not started as shared
    #[error("session is not shared: {0}")]
    SessionNotShared(u64),

    /// a snapshot could not be written
    #[error("save failed: {0}")]
    Save(String),

    /// a snapshot could not be read back
    #[error("load failed: {0}")]
    Load(String),

    /// variant for command line and argument parsing failures
    #[error("{0}")]
    Parsing(String),

    /// an error message returned by the server to a client
    #[error("{0}")]
    Remote(String),
}
