use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde_json_path::JsonPath;

use crate::error::{Result, SkvError};

/// A document held by a [`DocStore`]: any JSON value (null, bool, number,
/// string, array, or object of string to document).
pub type Document = serde_json::Value;

/// A key/document map owned by exactly one session.
///
/// Keys are unique and unordered. Besides the usual map operations, the store
/// evaluates structured path queries against its documents: [`find`] locates
/// documents (or nested paths) matching a JSONPath expression, and [`update`]
/// patches every node a path selects without the caller round-tripping the
/// whole document.
///
/// The store contains no locking. It is mutated only by the one thread that
/// owns its session; see [`SkvServer`] for how that ownership is enforced.
///
/// [`find`]: ./struct.DocStore.html#method.find
/// [`update`]: ./struct.DocStore.html#method.update
/// [`SkvServer`]: ./struct.SkvServer.html
#[derive(Debug, Default)]
pub struct DocStore {
    map: HashMap<String, Document>,
}

impl DocStore {
    /// creates an empty store
    pub fn new() -> DocStore {
        DocStore::default()
    }

    /// inserts or overwrites the document at `key`.
    /// returns `true` if the key was newly created, `false` if an existing
    /// document was overwritten (callers use this to report "set" vs "updated")
    pub fn set(&mut self, key: String, doc: Document) -> bool {
        self.map.insert(key, doc).is_none()
    }

    /// inserts the document at `key` only if the key is absent; an existing
    /// document is never overwritten.
    /// returns `true` if the document was inserted
    pub fn add(&mut self, key: String, doc: Document) -> bool {
        // single map operation, no contains-then-insert
        match self.map.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(doc);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// returns the document stored at `key`, if any
    pub fn get(&self, key: &str) -> Option<&Document> {
        self.map.get(key)
    }

    /// removes `key` and its document.
    /// returns `true` if a document was removed
    pub fn remove(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// empties the store, reporting `(ok, previous_count)`.
    ///
    /// Clearing a map cannot fail here, so `ok` is always `true`; the flag is
    /// kept so callers report the same contract the wire protocol promises.
    pub fn clear(&mut self) -> (bool, usize) {
        let count = self.map.len();
        self.map.clear();
        (true, count)
    }

    /// the number of documents in the store
    pub fn count(&self) -> usize {
        self.map.len()
    }

    /// returns whether a document is stored at `key`
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// the keys currently stored, in no particular order
    pub fn keys(&self) -> Vec<&str> {
        self.map.keys().map(String::as_str).collect()
    }

    /// iterates over every `(key, document)` pair, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Document)> {
        self.map.iter()
    }

    /// evaluates the JSONPath expression `path` against every stored document,
    /// or only those named in `keys` when a filter is given.
    ///
    /// With `want_paths` unset the result is the top-level keys whose document
    /// matched at least once; with it set, the result is the normalized path
    /// string of every matching node, deduplicated across documents.
    ///
    /// # Errors
    /// returns [`SkvError::Query`] if `path` does not compile
    pub fn find(
        &self,
        path: &str,
        keys: Option<&HashSet<String>>,
        want_paths: bool,
    ) -> Result<Vec<String>> {
        let query = compile(path)?;

        let mut matches = Vec::new();
        let mut seen = HashSet::new();

        for (key, doc) in &self.map {
            if let Some(filter) = keys {
                if !filter.contains(key) {
                    continue;
                }
            }

            if want_paths {
                for location in query.query_located(doc).locations() {
                    let found = location.to_string();
                    if seen.insert(found.clone()) {
                        matches.push(found);
                    }
                }
            } else if !query.query(doc).is_empty() {
                matches.push(key.clone());
            }
        }

        Ok(matches)
    }

    /// replaces every node of the document at `key` that the JSONPath
    /// expression `path` selects with a clone of `value`.
    ///
    /// returns `(existed, replacements)`: `(false, 0)` if `key` is absent
    /// (not an error), otherwise `true` and the number of nodes replaced.
    ///
    /// # Errors
    /// returns [`SkvError::Query`] if `path` does not compile
    pub fn update(&mut self, key: &str, path: &str, value: Document) -> Result<(bool, usize)> {
        let query = compile(path)?;

        let doc = match self.map.get_mut(key) {
            Some(doc) => doc,
            None => return Ok((false, 0)),
        };

        // the query borrows the document, so resolve every match to a JSON
        // pointer before mutating
        let pointers: Vec<String> = query
            .query_located(doc)
            .locations()
            .map(|location| location.to_json_pointer())
            .collect();

        let mut replaced = 0;
        for pointer in &pointers {
            if let Some(node) = doc.pointer_mut(pointer) {
                *node = value.clone();
                replaced += 1;
            }
        }

        Ok((true, replaced))
    }
}

/// compiles a JSONPath expression, attaching the offending path on failure
fn compile(path: &str) -> Result<JsonPath> {
    JsonPath::parse(path).map_err(|source| SkvError::Query {
        path: path.to_string(),
        source,
    })
}
