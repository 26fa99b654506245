use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Format tag written into every stored record; other versions are discarded.
pub const STATE_FORMAT_VERSION: &str = "1.0";

const STORAGE_KEY_PREFIX: &str = "coloring-state-";

/// Region id → CSS-style hex color.
pub type RegionMap = BTreeMap<String, String>;

pub fn storage_key(drawing_id: &str) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, drawing_id)
}

// ============================================================================
// STORES
// ============================================================================

/// Key/value persistence behind the state manager.
///
/// All methods may fail; callers treat every failure as "no stored state".
pub trait StateStore: Send {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&mut self, key: &str) -> io::Result<()>;
}

/// In-memory store with an optional byte quota, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push the total stored bytes past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        if let Some(quota) = self.quota {
            if self.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(io::Error::other("storage quota exceeded"));
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per record inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// STORED RECORD
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    pub version: String,
    pub regions: RegionMap,
    #[serde(default)]
    pub undo_stack: Vec<RegionMap>,
    #[serde(default)]
    pub redo_stack: Vec<RegionMap>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl StoredState {
    pub fn new(
        regions: RegionMap,
        undo_stack: Vec<RegionMap>,
        redo_stack: Vec<RegionMap>,
        timestamp: i64,
    ) -> Self {
        Self {
            version: STATE_FORMAT_VERSION.to_string(),
            regions,
            undo_stack,
            redo_stack,
            timestamp,
        }
    }
}

/// Why a stored record was thrown away on load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    Unreadable,
    TooLarge,
    Corrupt,
    VersionMismatch,
    Expired,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Missing,
    Loaded(StoredState),
    Discarded(DiscardReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The full record was too large; regions were kept, history dropped.
    SavedWithoutHistory,
    /// Even the trimmed record was too large; the stored record was removed.
    Dropped,
    Failed,
}

/// Read the record under `key`. Stale or broken records are removed.
pub fn load_record(
    store: &mut dyn StateStore,
    key: &str,
    now_ms: i64,
    ttl_ms: i64,
    max_bytes: usize,
) -> LoadOutcome {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return LoadOutcome::Missing,
        Err(e) => {
            warn!("state: cannot read {}: {}", key, e);
            return LoadOutcome::Discarded(DiscardReason::Unreadable);
        }
    };

    let verdict = if raw.len() > max_bytes {
        Err(DiscardReason::TooLarge)
    } else {
        match serde_json::from_str::<StoredState>(&raw) {
            Err(_) => Err(DiscardReason::Corrupt),
            Ok(rec) if rec.version != STATE_FORMAT_VERSION => Err(DiscardReason::VersionMismatch),
            Ok(rec) if now_ms.saturating_sub(rec.timestamp) > ttl_ms => Err(DiscardReason::Expired),
            Ok(rec) => Ok(rec),
        }
    };

    match verdict {
        Ok(rec) => LoadOutcome::Loaded(rec),
        Err(reason) => {
            debug!("state: discarding {} ({:?})", key, reason);
            if let Err(e) = store.remove(key) {
                warn!("state: cannot remove {}: {}", key, e);
            }
            LoadOutcome::Discarded(reason)
        }
    }
}

/// Write `record` under `key`, shedding history when it exceeds `max_bytes`.
pub fn save_record(
    store: &mut dyn StateStore,
    key: &str,
    record: &StoredState,
    max_bytes: usize,
) -> SaveOutcome {
    let full = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!("state: cannot serialize {}: {}", key, e);
            return SaveOutcome::Failed;
        }
    };
    if full.len() <= max_bytes {
        return if write_payload(store, key, &full) {
            SaveOutcome::Saved
        } else {
            SaveOutcome::Failed
        };
    }

    let trimmed = StoredState {
        undo_stack: Vec::new(),
        redo_stack: Vec::new(),
        ..record.clone()
    };
    match serde_json::to_string(&trimmed) {
        Ok(json) if json.len() <= max_bytes => {
            warn!("state: {} over {} bytes, saved without history", key, max_bytes);
            if write_payload(store, key, &json) {
                SaveOutcome::SavedWithoutHistory
            } else {
                SaveOutcome::Failed
            }
        }
        _ => {
            warn!("state: {} over {} bytes even without history, removing", key, max_bytes);
            if let Err(e) = store.remove(key) {
                warn!("state: cannot remove {}: {}", key, e);
            }
            SaveOutcome::Dropped
        }
    }
}

fn write_payload(store: &mut dyn StateStore, key: &str, payload: &str) -> bool {
    match store.set(key, payload) {
        Ok(()) => true,
        Err(e) => {
            warn!("state: cannot write {}: {}", key, e);
            false
        }
    }
}
