#![deny(missing_docs)]
//! A multithreaded, in-memory document store (skv) organized around sessions: isolated,
//! independently expiring namespaces that map [`String`] keys to JSON [`Document`]s.
//!
//! This crate provides the storage core itself ([`DocStore`], [`SessionRegistry`] and the
//! snapshot machinery) as well as a [`skv-client`] and [`skv-server`] executable that can be
//! used to interact with it. Data is sent between the client and server using synchronous
//! networking over a custom protocol.
//!
//! ## Sessions
//! Every document lives inside a session, created with [`Request::SessionNew`]. A session is
//! identified by an opaque token and may be given a time-to-live; when the TTL passes, a
//! periodic sweep either removes the session outright or clears its store and restarts the
//! clock, depending on how it was started. Sessions created with a human-chosen name derive
//! their token deterministically from that name, so independent connections that know the name
//! (and only those) can rendezvous on the same store via [`Request::SessionOpen`], provided
//! the session was started as shared.
//!
//! The [`SessionRegistry`] keeps every live session plus a time-ordered expiry index, so the
//! sweep is a single range scan over the expired prefix rather than a walk of every session.
//!
//! ## Document Store
//! Each session exclusively owns one [`DocStore`]: a key to document map supporting the usual
//! set/add/get/remove/clear operations, plus structured path queries. [`DocStore::find`]
//! locates documents (or the nested paths within them) matching a JSONPath expression, and
//! [`DocStore::update`] patches every node a path selects in place, so clients never have to
//! round-trip whole documents to read or edit one field.
//!
//! ## Snapshots
//! [`SnapshotWriter`] serializes a registry (or a bare store) into a timestamp-named dataset
//! directory: a metadata file whose status moves Pending -> Complete (or Error), and a `data/`
//! directory of size-capped chunk files, each a complete JSON array of records.
//! [`SnapshotReader`] restores the most recent completed dataset saved under a name,
//! rejecting anything whose metadata is not marked complete.
//!
//! ## Client / Server
//! Client and server logic is contained in the [`client`] and [`server`] structs. They are
//! responsible for the networking portion of this application, but also handle the
//! deserialization/serialization of data to/from the custom protocol. The server hands every
//! decoded request to a single worker thread that exclusively owns the registry; that
//! ownership is what lets the registry and stores run without any locking.
//!
//! ## Custom Protocol
//! The custom protocol is a [`Request`] encoded to/from a JSON string, and then sent over the
//! wire using Rust's TcpStream library. If the server was able to service a [`Request`], a
//! typed [`Response`] is returned containing the result. If an error occurred, an [`Err`]
//! response is returned, containing a description of the error.
//!
//! ### Client / Server executables
//! As mentioned previously, client and server command line executables are provided that can
//! be used to interact with the store. They are implemented by the [`skv-client`] and
//! [`skv-server`] files.
//!
//! [`String`]: https://doc.rust-lang.org/std/string/struct.String.html
//! [`serde`]: https://serde.rs
//! [`client`]: ./struct.SkvClient.html
//! [`server`]: ./struct.SkvServer.html
//! [`Request`]: ./enum.Request.html
//! [`Response`]: ./enum.Response.html
//! [`Request::SessionNew`]: ./enum.Request.html#variant.SessionNew
//! [`Request::SessionOpen`]: ./enum.Request.html#variant.SessionOpen
//! [`DocStore::find`]: ./struct.DocStore.html#method.find
//! [`DocStore::update`]: ./struct.DocStore.html#method.update
//! [`skv-server`]: ./skv-server.rs
//! [`skv-client`]: /skv-client.rs

pub use client::SkvClient;
pub use command::{ExpiryInfo, FindRsp, Request, Response, SessionInfo};
pub use error::{Result, SkvError};
pub use server::{SkvServer, DEFAULT_SWEEP_INTERVAL};
pub use session::{
    named_token, random_token, ExpirySpec, Session, SessionRegistry, SessionToken,
};
pub use snapshot::{
    LoadResult, SaveDataType, SaveStatus, Snapshot, SnapshotReader, SnapshotWriter,
    DEFAULT_CHUNK_LIMIT, METADATA_VERSION,
};
pub use store::{DocStore, Document};
pub use thread_pool::{NaiveThreadPool, SharedQueueThreadPool, ThreadPool};

mod client;
mod command;
mod error;
mod server;
mod session;
mod snapshot;
mod store;
pub mod thread_pool;
