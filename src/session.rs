use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use rustc_hash::FxHasher;
use tracing::debug;
use uuid::Uuid;

use crate::store::DocStore;

/// An opaque session identifier, unique across the registry while the
/// session is live.
pub type SessionToken = u64;

// OR'd into every name-derived token. Fixed so that the same name maps to the
// same token in any process, which keeps saved snapshots attachable after a
// restart.
const SHARED_TOKEN_SEED: u64 = 99_194_853_094_755_497;

/// derives the session token for a human-chosen name.
///
/// The same name always produces the same token, in this process and any
/// future one. This is how two independent callers that open a session by the
/// same name converge on the same store; see
/// [`SessionRegistry::open_shared`].
///
/// [`SessionRegistry::open_shared`]: ./struct.SessionRegistry.html#method.open_shared
pub fn named_token(name: &str) -> SessionToken {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish() | SHARED_TOKEN_SEED
}

/// generates a random token for an anonymous session.
/// Anonymous tokens are not derivable from any name, so the session cannot be
/// discovered by other connections, only used by a caller that already holds
/// the token.
pub fn random_token() -> SessionToken {
    let (hi, lo) = Uuid::new_v4().as_u64_pair();
    hi ^ lo
}

/// Requested expiry behaviour for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySpec {
    /// how long the session lives before a sweep processes it
    pub duration: Duration,
    /// `true` removes the session entirely on expiry; `false` clears its
    /// store and restarts the clock, keeping the session alive
    pub delete_on_expire: bool,
}

// Value half of the expiry index; the expiry instant lives in the key.
#[derive(Debug, Clone, Copy)]
struct ExpiryEntry {
    duration: Duration,
    delete_on_expire: bool,
}

// Expiry settings plus the session's current deadline. The deadline always
// matches exactly one key in the registry's index; the two are written
// together, never independently.
#[derive(Debug)]
struct ExpiryState {
    duration: Duration,
    delete_on_expire: bool,
    expires_at: Instant,
}

/// One session: an exclusively owned [`DocStore`] plus expiry metadata.
#[derive(Debug)]
pub struct Session {
    token: SessionToken,
    store: DocStore,
    shared: bool,
    expiry: Option<ExpiryState>,
}

impl Session {
    /// the session's token
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// whether a second caller that derives the same token may attach
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// read access to the session's store
    pub fn store(&self) -> &DocStore {
        &self.store
    }

    /// write access to the session's store
    pub fn store_mut(&mut self) -> &mut DocStore {
        &mut self.store
    }

    /// whether this session expires
    pub fn expires(&self) -> bool {
        self.expiry.is_some()
    }

    /// the session's expiry settings, if it expires
    pub fn expiry(&self) -> Option<ExpirySpec> {
        self.expiry.as_ref().map(|state| ExpirySpec {
            duration: state.duration,
            delete_on_expire: state.delete_on_expire,
        })
    }

    /// time left until a sweep at or after the deadline processes this
    /// session; `None` if the session never expires
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expiry
            .as_ref()
            .map(|state| state.expires_at.saturating_duration_since(now))
    }
}

/// Owns every live session and the time-ordered index used to expire them.
///
/// The index is ordered by expiry instant, so a [`sweep`] is a single range
/// scan over the expired prefix rather than a walk of every session: O(log n)
/// plus the number of sessions actually expiring. Sessions and index entries
/// are created, relocated and removed strictly as a pair.
///
/// The registry contains no locking; exactly one thread owns an instance and
/// all mutation happens there (see [`SkvServer`]). Multiple registries may
/// coexist in a process but are never shared.
///
/// [`sweep`]: ./struct.SessionRegistry.html#method.sweep
/// [`SkvServer`]: ./struct.SkvServer.html
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionToken, Session>,
    // ordered by instant; the token half keeps same-instant entries distinct
    // so one exact entry can be removed without disturbing its neighbours
    expiry: BTreeMap<(Instant, SessionToken), ExpiryEntry>,
}

impl SessionRegistry {
    /// creates an empty registry
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// creates a session for `token` and returns its store.
    ///
    /// Returns `None` if the token is already live; the existing session is
    /// never overwritten. A zero `duration` in `expiry` means the session
    /// never expires, the same as passing no expiry at all.
    pub fn start(
        &mut self,
        token: SessionToken,
        shared: bool,
        expiry: Option<ExpirySpec>,
    ) -> Option<&mut DocStore> {
        self.start_at(token, shared, expiry, Instant::now())
    }

    /// [`start`] with the clock supplied by the caller
    ///
    /// [`start`]: ./struct.SessionRegistry.html#method.start
    pub fn start_at(
        &mut self,
        token: SessionToken,
        shared: bool,
        expiry: Option<ExpirySpec>,
        now: Instant,
    ) -> Option<&mut DocStore> {
        let spec = expiry.filter(|spec| !spec.duration.is_zero());

        match self.sessions.entry(token) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let state = spec.map(|spec| ExpiryState {
                    duration: spec.duration,
                    delete_on_expire: spec.delete_on_expire,
                    expires_at: now + spec.duration,
                });

                let session = slot.insert(Session {
                    token,
                    store: DocStore::new(),
                    shared,
                    expiry: state,
                });

                if let Some(state) = &session.expiry {
                    self.expiry.insert(
                        (state.expires_at, token),
                        ExpiryEntry {
                            duration: state.duration,
                            delete_on_expire: state.delete_on_expire,
                        },
                    );
                }

                Some(&mut session.store)
            }
        }
    }

    /// ends the session held by `token`, dropping its store and, for an
    /// expiring session, its index entry.
    /// returns `false` if the token is not live
    pub fn end(&mut self, token: SessionToken) -> bool {
        match self.sessions.remove(&token) {
            Some(session) => {
                if let Some(state) = session.expiry {
                    self.expiry.remove(&(state.expires_at, token));
                }
                true
            }
            None => false,
        }
    }

    /// returns a mutable handle to the session held by `token`.
    /// Callers applying touch-on-access semantics follow up with [`renew`]
    ///
    /// [`renew`]: ./struct.SessionRegistry.html#method.renew
    pub fn get(&mut self, token: SessionToken) -> Option<&mut Session> {
        self.sessions.get_mut(&token)
    }

    /// returns a read-only view of the session held by `token`
    pub fn session(&self, token: SessionToken) -> Option<&Session> {
        self.sessions.get(&token)
    }

    /// returns the store of the session held by `token`
    pub fn get_store(&mut self, token: SessionToken) -> Option<&mut DocStore> {
        self.sessions.get_mut(&token).map(Session::store_mut)
    }

    /// pushes an expiring session's deadline forward to `now + duration`,
    /// relocating its index entry under the new instant.
    /// returns `false` if the token is not live or the session never expires
    pub fn renew(&mut self, token: SessionToken) -> bool {
        self.renew_at(token, Instant::now())
    }

    /// [`renew`] with the clock supplied by the caller
    ///
    /// [`renew`]: ./struct.SessionRegistry.html#method.renew
    pub fn renew_at(&mut self, token: SessionToken, now: Instant) -> bool {
        let state = match self.sessions.get_mut(&token) {
            Some(session) => match session.expiry.as_mut() {
                Some(state) => state,
                None => return false,
            },
            None => return false,
        };

        // the sort key of an indexed entry is never mutated in place:
        // remove the exact old entry, insert under the new instant
        let old_key = (state.expires_at, token);
        state.expires_at = now + state.duration;
        let new_key = (state.expires_at, token);
        let entry = ExpiryEntry {
            duration: state.duration,
            delete_on_expire: state.delete_on_expire,
        };

        self.expiry.remove(&old_key);
        self.expiry.insert(new_key, entry);
        true
    }

    /// processes every session whose deadline has passed.
    /// returns the number of sessions processed
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`] with the clock supplied by the caller.
    ///
    /// Every index entry with `expires_at <= now` is handled in this one
    /// call: delete-on-expire sessions are removed outright, the rest have
    /// their store cleared and their deadline pushed to `now + duration`.
    ///
    /// [`sweep`]: ./struct.SessionRegistry.html#method.sweep
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        if self.expiry.is_empty() {
            return 0;
        }

        // one range scan over the expired prefix, not a per-session walk
        let expired: Vec<((Instant, SessionToken), ExpiryEntry)> = self
            .expiry
            .range(..=(now, SessionToken::MAX))
            .map(|(key, entry)| (*key, *entry))
            .collect();

        for ((expires_at, token), entry) in &expired {
            self.expiry.remove(&(*expires_at, *token));

            if entry.delete_on_expire {
                self.sessions.remove(token);
            } else if let Some(session) = self.sessions.get_mut(token) {
                // the session survives, only its data is dropped
                session.store.clear();
                let next = now + entry.duration;
                if let Some(state) = session.expiry.as_mut() {
                    state.expires_at = next;
                }
                self.expiry.insert((next, *token), *entry);
            }
        }

        if !expired.is_empty() {
            debug!(expired = expired.len(), "swept expired sessions");
        }
        expired.len()
    }

    /// returns whether `token` is live
    pub fn contains(&self, token: SessionToken) -> bool {
        self.sessions.contains_key(&token)
    }

    /// reports `(exists, shared)` for `token`, letting an anonymous second
    /// connection attach to a session it can name but not to one it can only
    /// guess
    pub fn open_shared(&self, token: SessionToken) -> (bool, bool) {
        match self.sessions.get(&token) {
            Some(session) => (true, session.shared),
            None => (false, false),
        }
    }

    /// the number of live sessions
    pub fn count_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// the number of documents across every live session's store
    pub fn count_keys(&self) -> usize {
        self.sessions.values().map(|s| s.store.count()).sum()
    }

    /// the number of sessions currently scheduled to expire
    pub fn count_expiring(&self) -> usize {
        self.expiry.len()
    }

    /// ends every session and drops the whole expiry index.
    /// returns the number of sessions ended
    pub fn end_all(&mut self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        self.expiry.clear();
        count
    }

    /// iterates over every live session, in no particular order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}
