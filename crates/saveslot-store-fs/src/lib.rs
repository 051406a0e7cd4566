use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use saveslot_core::{integrity, CodecError, RecordCodec, SaveRecord};
use tracing::{info, warn};

/// Id assigned when a save request carries an empty or blank id.
pub const DEFAULT_RECORD_ID: &str = "record";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid record id {0:?}: ids must not contain path separators")]
    InvalidId(String),
}

/// Ids become filenames, so anything that would resolve outside the save
/// directory is rejected up front.
fn id_is_safe(id: &str) -> bool {
    !id.contains(['/', '\\']) && id != "." && id != ".."
}

/// File-level CRUD over a flat namespace of record entries. Thin by design;
/// the store owns all policy, the backend only moves bytes.
pub trait StorageBackend: Send {
    /// Create the backing directory if absent. Returns whether it was created.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    fn ensure_dir(&self) -> Result<bool, StoreError>;

    /// List the record names currently stored.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the directory cannot be read.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Read the bytes stored under `name`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the entry cannot be read.
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `bytes` under `name`, replacing any previous content.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the entry cannot be written.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete the entry under `name`. Returns whether anything existed.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when an existing entry cannot be removed.
    fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// One file per record in a single directory, filename = record id plus a
/// configurable (normally empty) extension suffix.
pub struct DirBackend {
    dir: PathBuf,
    extension: String,
}

impl DirBackend {
    #[must_use]
    pub fn new(dir: PathBuf, extension: String) -> Self {
        Self { dir, extension }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{}", self.extension))
    }
}

fn io_err(path: PathBuf, source: io::Error) -> StoreError {
    StoreError::Io { path, source }
}

impl StorageBackend for DirBackend {
    fn ensure_dir(&self) -> Result<bool, StoreError> {
        if self.dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).map_err(|err| io_err(self.dir.clone(), err))?;
        info!(dir = %self.dir.display(), "created save directory");
        Ok(true)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(self.dir.clone(), err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_err(self.dir.clone(), err))?;
            if !entry.path().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if self.extension.is_empty() {
                names.push(file_name);
            } else if let Some(stem) = file_name.strip_suffix(&self.extension) {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.entry_path(name);
        fs::read(&path).map_err(|err| io_err(path, err))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(name);
        fs::write(&path, bytes).map_err(|err| io_err(path, err))
    }

    fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(path, err)),
        }
    }
}

/// What the store does with integrity digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrityMode {
    /// Never stamp, never check.
    Off,
    /// Stamp on save, ignore stored digests on load.
    Stamp,
    /// Stamp on save; on load recompute over the digest-cleared encoding and
    /// skip entries that do not match. Records without a digest always pass.
    #[default]
    Verify,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    pub extension: String,
    pub integrity: IntegrityMode,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), extension: String::new(), integrity: IntegrityMode::default() }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.integrity = integrity;
        self
    }
}

/// The authoritative in-memory collection of save records, keyed by id, kept
/// consistent with a [`StorageBackend`].
///
/// Constructed explicitly and shared by reference; there is no process-wide
/// instance. All mutating operations serialize through one mutex, so
/// concurrent savers cannot race collision-suffix selection or interleave a
/// half-written entry with a load.
pub struct SaveStore {
    backend: Box<dyn StorageBackend>,
    codec: RecordCodec,
    integrity: IntegrityMode,
    records: Mutex<HashMap<String, SaveRecord>>,
}

impl SaveStore {
    /// Open a store over the configured directory. No filesystem access
    /// happens here; the directory is created lazily on first use.
    #[must_use]
    pub fn open(config: StoreConfig, codec: RecordCodec) -> Self {
        let backend = Box::new(DirBackend::new(config.dir, config.extension));
        Self::with_backend(backend, codec, config.integrity)
    }

    #[must_use]
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        codec: RecordCodec,
        integrity: IntegrityMode,
    ) -> Self {
        Self { backend, codec, integrity, records: Mutex::new(HashMap::new()) }
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, SaveRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn digest_is_valid(&self, record: &SaveRecord) -> Result<bool, CodecError> {
        let Some(stored) = record.integrity_digest() else {
            // Pre-digest files are legitimate; only a present digest is checked.
            return Ok(true);
        };
        let mut cleared = record.clone();
        cleared.set_integrity_digest(None);
        let bytes = self.codec.encode(&cleared)?;
        Ok(integrity::digest(&bytes) == stored)
    }

    /// Load every decodable entry from storage into the collection.
    ///
    /// Idempotent and safe to call again: the listing is re-merged into the
    /// existing collection, later same-id entries overwriting earlier ones.
    /// Entries that fail to decode or fail digest verification are skipped
    /// with a warning; a single bad entry never fails initialization.
    ///
    /// Returns the number of records loaded by this pass.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] only when the directory itself cannot be
    /// created or listed.
    pub fn initialize(&self) -> Result<usize, StoreError> {
        self.backend.ensure_dir()?;
        let names = self.backend.list()?;

        let mut records = self.lock_records();
        let mut loaded = 0;
        for name in names {
            let bytes = match self.backend.read(&name) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(entry = %name, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let record = match self.codec.decode(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    warn!(entry = %name, error = %err, "skipping undecodable entry");
                    continue;
                }
            };
            if self.integrity == IntegrityMode::Verify {
                match self.digest_is_valid(&record) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(entry = %name, id = %record.id(), "skipping entry with integrity digest mismatch");
                        continue;
                    }
                    Err(err) => {
                        warn!(entry = %name, error = %err, "skipping entry that cannot be verified");
                        continue;
                    }
                }
            }
            info!(id = %record.id(), type_tag = %record.type_tag(), "loaded record");
            records.insert(record.id().to_owned(), record);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Persist a copy of `record` under a collision-free id and install it in
    /// the collection. The caller's record is never mutated; the returned
    /// copy carries the final (possibly suffixed or defaulted) id.
    ///
    /// With `overwrite` false an occupied id is probed as `{id}_0`, `{id}_1`,
    /// … until free; with `overwrite` true the existing entry is replaced.
    /// On any encode or I/O failure neither the collection nor the entry for
    /// the final id is changed.
    ///
    /// # Errors
    /// Returns [`StoreError::Codec`] when the record cannot be encoded,
    /// [`StoreError::Io`] when the file cannot be written, and
    /// [`StoreError::InvalidId`] for an id that cannot name a file.
    pub fn save_new(&self, record: &SaveRecord, overwrite: bool) -> Result<SaveRecord, StoreError> {
        let mut stored = record.clone();
        if stored.id().trim().is_empty() {
            stored.set_id(DEFAULT_RECORD_ID);
        }
        if !id_is_safe(stored.id()) {
            return Err(StoreError::InvalidId(stored.id().to_owned()));
        }

        let mut records = self.lock_records();

        if records.contains_key(stored.id()) {
            if overwrite {
                info!(id = %stored.id(), "overwriting existing record");
            } else {
                let requested = stored.id().to_owned();
                let mut probe = 0usize;
                let mut candidate = format!("{requested}_{probe}");
                while records.contains_key(&candidate) {
                    probe += 1;
                    candidate = format!("{requested}_{probe}");
                }
                warn!(
                    requested = %requested,
                    assigned = %candidate,
                    "record id already exists, saving under suffixed id"
                );
                stored.set_id(candidate);
            }
        }

        let bytes = match self.integrity {
            IntegrityMode::Off => self.codec.encode(&stored)?,
            IntegrityMode::Stamp | IntegrityMode::Verify => {
                // Digest covers the encoding without the digest field, then
                // the stamped record is re-encoded for the actual write.
                stored.set_integrity_digest(None);
                let unstamped = self.codec.encode(&stored)?;
                stored.set_integrity_digest(Some(integrity::digest(&unstamped)));
                self.codec.encode(&stored)?
            }
        };

        self.backend.ensure_dir()?;
        if let Err(err) = self.backend.write(stored.id(), &bytes) {
            warn!(id = %stored.id(), error = %err, "failed to write record");
            return Err(err);
        }

        info!(id = %stored.id(), type_tag = %stored.type_tag(), "record saved");
        records.insert(stored.id().to_owned(), stored.clone());
        Ok(stored)
    }

    /// Look up a record by id. Absence is a normal outcome, not an error.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<SaveRecord> {
        self.lock_records().get(id).cloned()
    }

    /// Remove a record from the collection and its backing file. Returns
    /// whether anything was removed; deleting an unknown id is a logged
    /// no-op, safe to repeat.
    ///
    /// The backing file goes first: if its removal fails, the collection
    /// entry stays, so a failed call leaves no partial state.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when an existing file cannot be removed,
    /// and [`StoreError::InvalidId`] for an id that cannot name a file.
    pub fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        if !id_is_safe(id) {
            return Err(StoreError::InvalidId(id.to_owned()));
        }

        let mut records = self.lock_records();
        let on_disk = self.backend.delete(id)?;
        let in_memory = records.remove(id).is_some();

        if in_memory || on_disk {
            info!(id = %id, "record deleted");
            Ok(true)
        } else {
            warn!(id = %id, "delete requested for unknown record id");
            Ok(false)
        }
    }

    /// A defensive copy of the id → record mapping; mutating it never affects
    /// the store.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, SaveRecord> {
        self.lock_records().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }
}
