//! Per-installation instance ids used to isolate on-disk state.
//!
//! The id is generated once, written to a marker file in the state
//! directory and reused by every later start until the marker is removed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LoginPushError;

const MARKER_FILE: &str = "loginpush-current-instance.txt";
const ID_PREFIX: &str = "instance_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(format!("{ID_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    /// Reuse the id recorded in `state_dir`, or create and record a new one.
    ///
    /// A marker that cannot be written is not fatal: the fresh id is still
    /// returned, it just won't be reused next time.
    pub fn load_or_create(state_dir: &Path) -> Self {
        let marker = state_dir.join(MARKER_FILE);
        match fs::read_to_string(&marker) {
            Ok(stored) if stored.trim().starts_with(ID_PREFIX) => {
                debug!(path = %marker.display(), "reusing stored instance id");
                return Self(stored.trim().to_string());
            }
            Ok(_) => warn!(path = %marker.display(), "ignoring malformed instance marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %marker.display(), error = %e, "failed to read instance marker"),
        }

        let id = Self::generate();
        if let Err(e) = fs::create_dir_all(state_dir).and_then(|_| fs::write(&marker, &id.0)) {
            warn!(path = %marker.display(), error = %e, "failed to store instance id");
        }
        id
    }

    /// Directory holding this instance's isolated state.
    pub fn state_dir(&self, base: &Path) -> PathBuf {
        base.join(format!("loginpush-{}", self.0))
    }

    /// Remove this instance's directory and marker.
    pub fn cleanup(&self, base: &Path) -> Result<(), LoginPushError> {
        let dir = self.state_dir(base);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let marker = base.join(MARKER_FILE);
        if marker.exists() {
            fs::remove_file(marker)?;
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
