//! File-backed postal code → coordinates cache.
//!
//! The whole JSON object is read once per enrichment batch into a
//! [`CacheSnapshot`], and rewritten once at the end of the batch. Writes go
//! to a temp file in the same directory that is then renamed over the
//! cache, so readers only ever see a complete file. The read-modify-write
//! span of a persist holds a process-wide lock and re-reads the file, so
//! entries written by a concurrent batch since our snapshot are kept.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::domain::{Coordinates, normalize_postal_code};
use crate::error::{Result, ShelterError};

static PERSIST_LOCK: Mutex<()> = Mutex::new(());

/// One cache entry as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedCoordinates {
    #[serde(deserialize_with = "number_or_string")]
    pub lat: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub lng: f64,
}

impl From<Coordinates> for CachedCoordinates {
    fn from(c: Coordinates) -> Self {
        Self {
            lat: c.lat(),
            lng: c.lng(),
        }
    }
}

/// Bulk-seeded files carry coordinates as strings
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub type CacheStore = BTreeMap<String, CachedCoordinates>;

/// Combine two stores. On a key collision the `existing` value is kept.
pub fn merge_preferring_existing(existing: CacheStore, fresh: CacheStore) -> CacheStore {
    let mut merged = existing;
    for (key, value) in fresh {
        merged.entry(key).or_insert(value);
    }
    merged
}

/// The cache contents as read at the start of a batch
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: CacheStore,
    readable: bool,
}

impl CacheSnapshot {
    pub fn lookup(&self, postal_code: &str) -> Option<Coordinates> {
        let key = normalize_postal_code(postal_code)?;
        let entry = self.entries.get(&key)?;
        Coordinates::new(entry.lat, entry.lng).ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// False when the file existed but could not be parsed
    pub fn is_readable(&self) -> bool {
        self.readable
    }
}

pub struct GeoCache {
    path: PathBuf,
}

impl GeoCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole store. A missing file is an empty store; an unreadable
    /// one is logged and treated as empty, and blocks persisting so it is not
    /// overwritten.
    pub fn load(&self) -> CacheSnapshot {
        match read_store(&self.path) {
            Ok(entries) => {
                log::debug!(
                    "Loaded {} cached postal codes from {}",
                    entries.len(),
                    self.path.display()
                );
                CacheSnapshot {
                    entries,
                    readable: true,
                }
            }
            Err(e) => {
                log::error!("{}", e);
                CacheSnapshot {
                    entries: CacheStore::new(),
                    readable: false,
                }
            }
        }
    }

    /// Merge `fresh` entries into the store and rewrite it once.
    ///
    /// Precedence, highest first: what is on disk now, the batch snapshot,
    /// the freshly resolved entries. Returns the number of entries written,
    /// or 0 if there was nothing new.
    pub fn bulk_persist(&self, snapshot: &CacheSnapshot, fresh: CacheStore) -> Result<usize> {
        if fresh.is_empty() {
            return Ok(0);
        }
        if !snapshot.readable {
            return Err(ShelterError::CachePersistFailure(format!(
                "{} could not be read at batch start, not overwriting it",
                self.path.display()
            )));
        }

        let _guard = PERSIST_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let on_disk = read_store(&self.path)?;
        let existing = merge_preferring_existing(on_disk, snapshot.entries.clone());
        let merged = merge_preferring_existing(existing, fresh);

        write_store(&self.path, &merged)?;
        log::info!(
            "Persisted {} postal codes to {}",
            merged.len(),
            self.path.display()
        );
        Ok(merged.len())
    }
}

fn read_store(path: &Path) -> Result<CacheStore> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheStore::new()),
        Err(e) => {
            return Err(ShelterError::CachePersistFailure(format!(
                "failed to open {}: {}",
                path.display(),
                e
            )));
        }
    };

    let raw: BTreeMap<String, CachedCoordinates> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| {
            ShelterError::CachePersistFailure(format!("failed to parse {}: {}", path.display(), e))
        })?;

    // Normalize keys from hand-edited or older files; out-of-range entries
    // are dropped so a fresh resolution can replace them
    let mut store = CacheStore::new();
    for (key, value) in raw {
        if let Err(e) = Coordinates::new(value.lat, value.lng) {
            log::warn!("Dropping invalid cache entry for {}: {}", key, e);
            continue;
        }
        if let Some(key) = normalize_postal_code(&key) {
            store.entry(key).or_insert(value);
        }
    }
    Ok(store)
}

fn write_store(path: &Path, store: &CacheStore) -> Result<()> {
    let persist_err = |e: String| ShelterError::CachePersistFailure(e);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| persist_err(format!("failed to create {}: {}", dir.display(), e)))?;

    let tmp = NamedTempFile::new_in(&dir)
        .map_err(|e| persist_err(format!("failed to create temp file: {}", e)))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, store)
            .map_err(|e| persist_err(format!("failed to serialize cache: {}", e)))?;
        writer
            .flush()
            .map_err(|e| persist_err(format!("failed to write cache: {}", e)))?;
    }

    tmp.persist(path)
        .map_err(|e| persist_err(format!("failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}
