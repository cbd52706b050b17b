//! Durable key/value flags that outlive a page reload.
//!
//! [`FlagStore`] is deliberately dumb: string keys, string values, no
//! business logic. [`SequenceStore`] layers the typed scheduling records on
//! top of it. Every store operation is synchronous so the controller can
//! finish its writes before it asks for a reload.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use tracing::{debug, warn};

use loginpush_core::{LoginPushError, PushRecord, SequenceState};

pub const KEY_IN_SEQUENCE: &str = "short-term-sequence";
pub const KEY_PUSH_COUNT: &str = "short-term-push-count";
pub const KEY_PENDING_RELOAD: &str = "pending-reload";
pub const KEY_LAST_PUSH_MILLIS: &str = "last-push-epoch-millis";
pub const KEY_LAST_PUSH_DATE: &str = "last-push-date";

/// Durable string flags.
///
/// Implementations never fail loudly: when the backing medium is gone,
/// `get` returns `None` and writes are dropped.
pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── In-memory store ──────────────────────────────────────────────────

/// Shared map that survives any number of controller rebuilds within one
/// process, but not a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlagStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored flag.
    pub fn dump(&self) -> HashMap<String, String> {
        lock(&self.inner).clone()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.inner).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        lock(&self.inner).insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        lock(&self.inner).remove(key);
    }
}

// ── File-backed store ────────────────────────────────────────────────

/// Flags persisted as one JSON object, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    flags: HashMap<String, String>,
    available: bool,
}

impl FileFlagStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store. Any other read or parse failure
    /// puts the store into degraded mode for the rest of its life.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match Self::load(&path) {
            Ok(flags) => FileState {
                flags,
                available: true,
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "flag store unavailable, using defaults");
                FileState {
                    flags: HashMap::new(),
                    available: false,
                }
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        lock(&self.state).available
    }

    fn load(path: &Path) -> Result<HashMap<String, String>, LoginPushError> {
        match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(LoginPushError::PersistenceUnavailable(e.to_string())),
        }
    }

    fn flush(&self, state: &mut FileState) {
        if let Err(e) = write_atomically(&self.path, &state.flags) {
            warn!(path = %self.path.display(), error = %e, "flag store write failed, degrading to defaults");
            state.available = false;
            state.flags.clear();
        }
    }
}

fn write_atomically(path: &Path, flags: &HashMap<String, String>) -> Result<(), LoginPushError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(flags)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        let state = lock(&self.state);
        if !state.available {
            return None;
        }
        state.flags.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut state = lock(&self.state);
        if !state.available {
            return;
        }
        if state.flags.get(key).map(String::as_str) == Some(value) {
            return;
        }
        state.flags.insert(key.to_string(), value.to_string());
        self.flush(&mut state);
    }

    fn remove(&self, key: &str) {
        let mut state = lock(&self.state);
        if !state.available || state.flags.remove(key).is_none() {
            return;
        }
        self.flush(&mut state);
    }
}

// ── Typed records ────────────────────────────────────────────────────

/// Typed access to [`SequenceState`] and [`PushRecord`] over any store.
#[derive(Clone)]
pub struct SequenceStore {
    flags: Arc<dyn FlagStore>,
    max_short_term_push: u32,
}

impl SequenceStore {
    pub fn new(flags: Arc<dyn FlagStore>, max_short_term_push: u32) -> Self {
        Self {
            flags,
            max_short_term_push,
        }
    }

    /// Load the persisted sequence, repairing broken invariants.
    pub fn load_sequence(&self) -> SequenceState {
        let raw = SequenceState {
            in_short_term_sequence: self.flag(KEY_IN_SEQUENCE),
            short_term_push_count: self.parsed(KEY_PUSH_COUNT).unwrap_or(0),
            pending_reload: self.flag(KEY_PENDING_RELOAD),
        };
        let state = raw.normalized(self.max_short_term_push);
        if state != raw {
            debug!(?raw, repaired = ?state, "repaired persisted sequence state");
        }
        state
    }

    /// Persist `state`. Absent keys mean "false"/zero, so cleared fields are
    /// removed rather than written.
    pub fn save_sequence(&self, state: &SequenceState) {
        self.write_flag(KEY_IN_SEQUENCE, state.in_short_term_sequence);
        if state.in_short_term_sequence {
            self.flags
                .set(KEY_PUSH_COUNT, &state.short_term_push_count.to_string());
        } else {
            self.flags.remove(KEY_PUSH_COUNT);
        }
        self.write_flag(KEY_PENDING_RELOAD, state.pending_reload);
    }

    pub fn clear_sequence(&self) {
        self.save_sequence(&SequenceState::default());
    }

    pub fn pending_reload(&self) -> bool {
        self.flag(KEY_PENDING_RELOAD)
    }

    pub fn load_push_record(&self) -> PushRecord {
        PushRecord {
            last_push_epoch_millis: self.parsed(KEY_LAST_PUSH_MILLIS),
            last_push_date: self.parsed::<NaiveDate>(KEY_LAST_PUSH_DATE),
        }
    }

    pub fn save_push_record(&self, record: &PushRecord) {
        match record.last_push_epoch_millis {
            Some(ms) => self.flags.set(KEY_LAST_PUSH_MILLIS, &ms.to_string()),
            None => self.flags.remove(KEY_LAST_PUSH_MILLIS),
        }
        match record.last_push_date {
            Some(date) => self.flags.set(KEY_LAST_PUSH_DATE, &date.to_string()),
            None => self.flags.remove(KEY_LAST_PUSH_DATE),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.flags.get(key).as_deref() == Some("true")
    }

    fn write_flag(&self, key: &str, value: bool) {
        if value {
            self.flags.set(key, "true");
        } else {
            self.flags.remove(key);
        }
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.flags.get(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable persisted flag");
                None
            }
        }
    }
}
