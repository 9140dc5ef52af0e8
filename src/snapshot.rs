use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{info, warn};

use crate::error::{Result, SkvError};
use crate::session::{ExpirySpec, SessionRegistry, SessionToken};
use crate::store::{DocStore, Document};

/// format version written into every dataset's metadata file
pub const METADATA_VERSION: u16 = 2;

/// default cap on a chunk file's buffered size, in bytes
pub const DEFAULT_CHUNK_LIMIT: usize = 10 * 1024 * 1024;

/// Completion state recorded in a dataset's metadata file.
///
/// The status is the sole durability contract of a snapshot: a reader never
/// loads a dataset whose status is not [`Complete`].
///
/// [`Complete`]: ./enum.SaveStatus.html#variant.Complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// metadata written, data files still being written (or the writer died)
    Pending,
    /// every data file was written and the metadata was finalized
    Complete,
    /// the writer hit an error partway; the data files are not trustworthy
    Error,
}

impl SaveStatus {
    fn as_u8(self) -> u8 {
        match self {
            SaveStatus::Pending => 0,
            SaveStatus::Complete => 1,
            SaveStatus::Error => 2,
        }
    }

    fn from_u8(raw: u8) -> Option<SaveStatus> {
        match raw {
            0 => Some(SaveStatus::Pending),
            1 => Some(SaveStatus::Complete),
            2 => Some(SaveStatus::Error),
            _ => None,
        }
    }
}

/// Discriminates what a dataset's records hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDataType {
    /// bare key/document records from a single [`DocStore`]
    ///
    /// [`DocStore`]: ./struct.DocStore.html
    RawKv,
    /// session records (token, shared flag, expiry settings and documents)
    /// from a whole [`SessionRegistry`]
    ///
    /// [`SessionRegistry`]: ./struct.SessionRegistry.html
    SessionKv,
}

impl SaveDataType {
    fn as_u8(self) -> u8 {
        match self {
            SaveDataType::RawKv => 0,
            SaveDataType::SessionKv => 1,
        }
    }

    fn from_u8(raw: u8) -> Option<SaveDataType> {
        match raw {
            0 => Some(SaveDataType::RawKv),
            1 => Some(SaveDataType::SessionKv),
            _ => None,
        }
    }
}

// md/md.json. Field names and integer encodings are part of the on-disk
// format and interoperate with other implementations of it.
#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    name: String,
    version: u16,
    status: u8,
    start: u64,
    complete: u64,
    #[serde(rename = "saveDataType")]
    save_data_type: u8,
}

// one session in a data chunk:
// {"sh":{"tkn":..,"shared":..,"expiry":{"duration":..,"deleteSession":..}},"keys":{..}}
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    sh: SessionHeader,
    keys: Map<String, Document>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    tkn: SessionToken,
    shared: bool,
    expiry: ExpiryRecord,
}

// duration is in seconds; zero means the session never expires
#[derive(Debug, Serialize, Deserialize)]
struct ExpiryRecord {
    duration: u64,
    #[serde(rename = "deleteSession")]
    delete_session: bool,
}

// one raw-store record in a data chunk: {"keys":{..}}
#[derive(Debug, Serialize, Deserialize)]
struct RawRecord {
    keys: Map<String, Document>,
}

/// A completed save: where the dataset landed and what went into it.
#[derive(Debug)]
pub struct Snapshot {
    /// the name the dataset was saved under
    pub name: String,
    /// the dataset directory, `<root>/<name>/<timestamp>`
    pub dir: PathBuf,
    /// sessions written (zero for raw store saves)
    pub sessions: usize,
    /// documents written
    pub keys: usize,
    /// wall time the save took
    pub duration: Duration,
}

/// Counts reported by a successful load.
#[derive(Debug)]
pub struct LoadResult {
    /// sessions reconstructed (zero for raw store loads)
    pub sessions: usize,
    /// documents reconstructed
    pub keys: usize,
    /// wall time the load took
    pub duration: Duration,
}

// Buffers serialized records and flushes them as numerically named files
// under data/, each a complete JSON array. A new file opens once the buffer
// reaches the cap, which bounds peak memory during a save and keeps every
// chunk independently parseable.
struct ChunkWriter {
    dir: PathBuf,
    limit: usize,
    buffer: String,
    next_chunk: u64,
}

impl ChunkWriter {
    fn new(dir: PathBuf, limit: usize) -> ChunkWriter {
        ChunkWriter {
            dir,
            limit,
            buffer: String::new(),
            next_chunk: 0,
        }
    }

    fn push(&mut self, record: &str) -> Result<()> {
        if self.buffer.is_empty() {
            self.buffer.push('[');
        } else {
            self.buffer.push(',');
        }
        self.buffer.push_str(record);

        // a chunk may exceed the cap by at most the record that tipped it over
        if self.buffer.len() >= self.limit {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        self.buffer.push(']');
        fs::write(self.dir.join(self.next_chunk.to_string()), &self.buffer)?;
        self.buffer.clear();
        self.next_chunk += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.flush_chunk()?;
        }
        Ok(())
    }
}

/// Writes status-tracked, chunked snapshots of a registry or a raw store.
///
/// A save allocates a fresh timestamp-named dataset directory under
/// `<root>/<name>/`, writes the metadata file with [`SaveStatus::Pending`]
/// *before* any data so a crash mid-save is distinguishable from a save that
/// never started, streams records into size-capped chunk files under `data/`,
/// and finally rewrites the metadata with [`SaveStatus::Complete`], or
/// [`SaveStatus::Error`] if anything failed partway.
///
/// [`SaveStatus::Pending`]: ./enum.SaveStatus.html#variant.Pending
/// [`SaveStatus::Complete`]: ./enum.SaveStatus.html#variant.Complete
/// [`SaveStatus::Error`]: ./enum.SaveStatus.html#variant.Error
#[derive(Debug)]
pub struct SnapshotWriter {
    root: PathBuf,
    chunk_limit: usize,
}

impl SnapshotWriter {
    /// creates a writer that stores datasets under `root`
    pub fn new(root: impl Into<PathBuf>) -> SnapshotWriter {
        SnapshotWriter {
            root: root.into(),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
        }
    }

    /// creates a writer with a custom chunk size cap
    pub fn with_chunk_limit(root: impl Into<PathBuf>, chunk_limit: usize) -> SnapshotWriter {
        SnapshotWriter {
            root: root.into(),
            chunk_limit,
        }
    }

    /// serializes `registry` under `name`. When `selection` is given, only
    /// sessions whose token is in the set are written.
    ///
    /// # Errors
    /// IO and serialization failures end the save; the dataset's metadata is
    /// still finalized with an error status so readers reject it
    pub fn save_registry(
        &self,
        registry: &SessionRegistry,
        name: &str,
        selection: Option<&HashSet<SessionToken>>,
    ) -> Result<Snapshot> {
        self.save(name, SaveDataType::SessionKv, |chunks| {
            let mut sessions = 0;
            let mut keys = 0;

            for session in registry.sessions() {
                if let Some(tokens) = selection {
                    if !tokens.contains(&session.token()) {
                        continue;
                    }
                }

                let expiry = session.expiry();
                let record = SessionRecord {
                    sh: SessionHeader {
                        tkn: session.token(),
                        shared: session.shared(),
                        expiry: ExpiryRecord {
                            duration: expiry.map_or(0, |spec| spec.duration.as_secs()),
                            delete_session: expiry.map_or(false, |spec| spec.delete_on_expire),
                        },
                    },
                    keys: session
                        .store()
                        .iter()
                        .map(|(key, doc)| (key.clone(), doc.clone()))
                        .collect(),
                };

                keys += record.keys.len();
                sessions += 1;
                chunks.push(&serde_json::to_string(&record)?)?;
            }

            Ok((sessions, keys))
        })
    }

    /// serializes a raw `store` (no session envelope) under `name`
    ///
    /// # Errors
    /// same contract as [`save_registry`]
    ///
    /// [`save_registry`]: ./struct.SnapshotWriter.html#method.save_registry
    pub fn save_store(&self, store: &DocStore, name: &str) -> Result<Snapshot> {
        let chunk_limit = self.chunk_limit;
        self.save(name, SaveDataType::RawKv, |chunks| {
            let mut keys = 0;
            let mut pending: Map<String, Document> = Map::new();
            let mut pending_bytes = 0;

            for (key, doc) in store.iter() {
                pending_bytes += key.len() + serde_json::to_string(doc)?.len();
                pending.insert(key.clone(), doc.clone());
                keys += 1;

                if pending_bytes >= chunk_limit {
                    let record = RawRecord {
                        keys: std::mem::take(&mut pending),
                    };
                    chunks.push(&serde_json::to_string(&record)?)?;
                    pending_bytes = 0;
                }
            }

            if !pending.is_empty() {
                chunks.push(&serde_json::to_string(&RawRecord { keys: pending })?)?;
            }

            Ok((0, keys))
        })
    }

    fn save<F>(&self, name: &str, data_type: SaveDataType, write_records: F) -> Result<Snapshot>
    where
        F: FnOnce(&mut ChunkWriter) -> Result<(usize, usize)>,
    {
        let started = Instant::now();

        let dataset = self.root.join(name).join(unix_nanos()?.to_string());
        let data_dir = dataset.join("data");
        let md_path = dataset.join("md").join("md.json");
        fs::create_dir_all(dataset.join("md"))?;
        fs::create_dir_all(&data_dir)?;

        let mut metadata = Metadata {
            name: name.to_string(),
            version: METADATA_VERSION,
            status: SaveStatus::Pending.as_u8(),
            start: unix_millis()?,
            complete: 0,
            save_data_type: data_type.as_u8(),
        };
        // Pending hits the disk before any data
        fs::write(&md_path, serde_json::to_string(&metadata)?)?;

        let mut chunks = ChunkWriter::new(data_dir, self.chunk_limit);
        let outcome = match write_records(&mut chunks) {
            Ok(counts) => chunks.finish().map(|_| counts),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((sessions, keys)) => {
                metadata.status = SaveStatus::Complete.as_u8();
                metadata.complete = unix_millis()?;
                fs::write(&md_path, serde_json::to_string(&metadata)?)?;

                info!(name, sessions, keys, "snapshot complete");
                Ok(Snapshot {
                    name: name.to_string(),
                    dir: dataset,
                    sessions,
                    keys,
                    duration: started.elapsed(),
                })
            }
            Err(e) => {
                // always finalize the status so a reader can reject the
                // dataset without inspecting data files
                metadata.status = SaveStatus::Error.as_u8();
                metadata.complete = unix_millis().unwrap_or(0);
                match serde_json::to_string(&metadata) {
                    Ok(json) => {
                        if let Err(md_err) = fs::write(&md_path, json) {
                            warn!("failed to finalize snapshot metadata: {}", md_err);
                        }
                    }
                    Err(md_err) => warn!("failed to serialize snapshot metadata: {}", md_err),
                }
                Err(e)
            }
        }
    }
}

// paths of the dataset chosen for a load
struct DatasetPaths {
    root: PathBuf,
    md: PathBuf,
    data: PathBuf,
}

/// Reads datasets written by [`SnapshotWriter`].
///
/// A load resolves the most recent save attempt under a name (the largest
/// numeric dataset directory), validates the metadata before touching any
/// data file, then replays every chunk into the target registry or store.
///
/// [`SnapshotWriter`]: ./struct.SnapshotWriter.html
#[derive(Debug)]
pub struct SnapshotReader {
    root: PathBuf,
}

impl SnapshotReader {
    /// creates a reader that resolves datasets under `root`
    pub fn new(root: impl Into<PathBuf>) -> SnapshotReader {
        SnapshotReader { root: root.into() }
    }

    /// reconstructs sessions and their documents from the most recent
    /// completed dataset saved under `name`.
    ///
    /// Sessions are recreated through [`SessionRegistry::start`], so a token
    /// already live in `registry` keeps its existing session and the record
    /// is skipped. A malformed chunk aborts the load; sessions loaded from
    /// earlier chunks are left in place.
    ///
    /// # Errors
    /// [`SkvError::Load`] if the dataset is missing, incomplete, of the wrong
    /// payload type, or malformed
    ///
    /// [`SessionRegistry::start`]: ./struct.SessionRegistry.html#method.start
    /// [`SkvError::Load`]: ./enum.SkvError.html#variant.Load
    pub fn load_registry(&self, name: &str, registry: &mut SessionRegistry) -> Result<LoadResult> {
        let started = Instant::now();
        let dataset = self.resolve(name)?;
        validate_metadata(&dataset, SaveDataType::SessionKv)?;

        let mut sessions = 0;
        let mut keys = 0;

        for chunk in chunk_files(&dataset.data)? {
            let records: Vec<SessionRecord> = read_records(&chunk)?;
            for record in records {
                let duration = record.sh.expiry.duration;
                let expiry = if duration > 0 {
                    Some(ExpirySpec {
                        duration: Duration::from_secs(duration),
                        delete_on_expire: record.sh.expiry.delete_session,
                    })
                } else {
                    None
                };

                if let Some(store) = registry.start(record.sh.tkn, record.sh.shared, expiry) {
                    for (key, doc) in record.keys {
                        store.set(key, doc);
                        keys += 1;
                    }
                    sessions += 1;
                }
            }
        }

        info!(name, sessions, keys, "snapshot loaded");
        Ok(LoadResult {
            sessions,
            keys,
            duration: started.elapsed(),
        })
    }

    /// reconstructs documents from the most recent completed raw-store
    /// dataset saved under `name`, setting them into `store`
    ///
    /// # Errors
    /// same contract as [`load_registry`]
    ///
    /// [`load_registry`]: ./struct.SnapshotReader.html#method.load_registry
    pub fn load_store(&self, name: &str, store: &mut DocStore) -> Result<LoadResult> {
        let started = Instant::now();
        let dataset = self.resolve(name)?;
        validate_metadata(&dataset, SaveDataType::RawKv)?;

        let mut keys = 0;
        for chunk in chunk_files(&dataset.data)? {
            let records: Vec<RawRecord> = read_records(&chunk)?;
            for record in records {
                for (key, doc) in record.keys {
                    store.set(key, doc);
                    keys += 1;
                }
            }
        }

        info!(name, keys, "raw snapshot loaded");
        Ok(LoadResult {
            sessions: 0,
            keys,
            duration: started.elapsed(),
        })
    }

    // several saves may exist under one name; the dataset directories are
    // named by timestamp, so the largest numeric name is the most recent
    fn resolve(&self, name: &str) -> Result<DatasetPaths> {
        let load_root = self.root.join(name);
        if !load_root.is_dir() {
            return Err(SkvError::Load(format!(
                "no dataset named {:?} under {:?}",
                name, self.root
            )));
        }

        let mut latest: Option<u128> = None;
        for entry in fs::read_dir(&load_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(stamp) = entry
                .file_name()
                .to_str()
                .and_then(|stem| stem.parse::<u128>().ok())
            {
                latest = Some(latest.map_or(stamp, |current| current.max(stamp)));
            }
        }

        match latest {
            Some(stamp) => {
                let root = load_root.join(stamp.to_string());
                Ok(DatasetPaths {
                    md: root.join("md").join("md.json"),
                    data: root.join("data"),
                    root,
                })
            }
            None => Err(SkvError::Load(format!(
                "dataset {:?} has no save attempts",
                name
            ))),
        }
    }
}

// rejects the dataset before any data file is touched
fn validate_metadata(paths: &DatasetPaths, expected: SaveDataType) -> Result<Metadata> {
    if !paths.md.is_file() {
        return Err(SkvError::Load(format!(
            "metadata file missing in {:?}",
            paths.root
        )));
    }

    let metadata: Metadata = serde_json::from_reader(BufReader::new(File::open(&paths.md)?))
        .map_err(|e| SkvError::Load(format!("metadata unreadable: {}", e)))?;

    match SaveStatus::from_u8(metadata.status) {
        Some(SaveStatus::Complete) => {}
        Some(SaveStatus::Pending) => {
            return Err(SkvError::Load("save is incomplete".to_string()));
        }
        Some(SaveStatus::Error) => {
            return Err(SkvError::Load("save finished with an error".to_string()));
        }
        None => {
            return Err(SkvError::Load(format!(
                "metadata status {} is invalid",
                metadata.status
            )));
        }
    }

    match SaveDataType::from_u8(metadata.save_data_type) {
        Some(actual) if actual == expected => {}
        Some(SaveDataType::SessionKv) => {
            return Err(SkvError::Load(
                "dataset holds session data, not raw keys".to_string(),
            ));
        }
        Some(SaveDataType::RawKv) => {
            return Err(SkvError::Load(
                "dataset holds raw keys, not session data".to_string(),
            ));
        }
        None => {
            return Err(SkvError::Load(format!(
                "metadata saveDataType {} is invalid",
                metadata.save_data_type
            )));
        }
    }

    if !paths.data.is_dir() {
        return Err(SkvError::Load("data directory missing".to_string()));
    }

    Ok(metadata)
}

// chunk files are numerically named; read them in order
fn chunk_files(data: &Path) -> Result<Vec<PathBuf>> {
    let mut chunks: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(data)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match entry
            .file_name()
            .to_str()
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            Some(number) => chunks.push((number, entry.path())),
            None => {
                return Err(SkvError::Load(format!(
                    "unexpected file in data directory: {:?}",
                    entry.file_name()
                )));
            }
        }
    }
    chunks.sort_unstable_by_key(|(number, _)| *number);
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SkvError::Load(format!("malformed chunk {}: {}", path.display(), e)))
}

fn unix_nanos() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SkvError::Save(e.to_string()))?
        .as_nanos())
}

fn unix_millis() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SkvError::Save(e.to_string()))?
        .as_millis() as u64)
}
