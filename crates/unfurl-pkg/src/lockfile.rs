//! Lock file (`pack.lock`) state: resolved package lists and the manifest
//! integrity hash.
//!
//! The lock is machine-maintained, so unlike the manifest it is rewritten
//! whole on save. Entry order and every opaque member of each entry are
//! preserved; only the package lists and the content hash are touched here.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// The lock file name next to the default manifest.
pub const LOCK_FILE: &str = "pack.lock";

/// Root member holding the ordered runtime package entries.
const PACKAGES_KEY: &str = "packages";

/// Root member holding the ordered development package entries.
const PACKAGES_DEV_KEY: &str = "packages-dev";

/// Root member tying the lock to the manifest's content.
const CONTENT_HASH_KEY: &str = "content-hash";

/// Errors that can occur when reading or writing the lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("failed to read lock file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse lock file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("lock file root is not a JSON object")]
    NotAnObject,

    #[error("failed to persist lock file: {0}")]
    Persist(String),
}

/// In-memory lock state.
///
/// Root members other than the package lists and the content hash are opaque
/// and survive a read-modify-write cycle untouched.
#[derive(Debug, Clone)]
pub struct Lockfile {
    root: Value,
}

impl Lockfile {
    /// Load the lock from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse lock state from raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn parse(content: &str) -> Result<Self, LockError> {
        let root: Value = serde_json::from_str(content)?;
        if !root.is_object() {
            return Err(LockError::NotAnObject);
        }
        Ok(Self { root })
    }

    /// The ordered runtime package entries.
    #[must_use]
    pub fn packages(&self) -> &[Value] {
        self.entries(PACKAGES_KEY)
    }

    /// The ordered development package entries.
    #[must_use]
    pub fn packages_dev(&self) -> &[Value] {
        self.entries(PACKAGES_DEV_KEY)
    }

    fn entries(&self, key: &str) -> &[Value] {
        self.root
            .get(key)
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    /// True when any entry in either list carries `name`.
    #[must_use]
    pub fn has_package(&self, name: &str) -> bool {
        let matches = |entry: &Value| entry.get("name").and_then(Value::as_str) == Some(name);
        self.packages().iter().any(matches) || self.packages_dev().iter().any(matches)
    }

    /// Drop every entry named `name` from both package lists, preserving the
    /// relative order of the remaining entries. Returns the number of
    /// entries removed.
    pub fn remove_package(&mut self, name: &str) -> usize {
        let mut removed = 0;
        for key in [PACKAGES_KEY, PACKAGES_DEV_KEY] {
            if let Some(list) = self.root.get_mut(key).and_then(Value::as_array_mut) {
                let before = list.len();
                list.retain(|entry| entry.get("name").and_then(Value::as_str) != Some(name));
                removed += before - list.len();
            }
        }
        removed
    }

    /// The stored manifest content hash, if any.
    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        self.root.get(CONTENT_HASH_KEY).and_then(Value::as_str)
    }

    /// Store a freshly computed manifest content hash.
    pub fn set_content_hash(&mut self, hash: impl Into<String>) {
        if let Some(map) = self.root.as_object_mut() {
            map.insert(CONTENT_HASH_KEY.to_string(), Value::String(hash.into()));
        }
    }

    /// Serialize the lock to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String, LockError> {
        let mut out = serde_json::to_string_pretty(&self.root)?;
        out.push('\n');
        Ok(out)
    }

    /// Write the lock to `path`, replacing any prior content.
    ///
    /// The write is staged through a temporary file in the same directory and
    /// committed by rename, so a failure never leaves a truncated lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), LockError> {
        let content = self.to_json_string()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), content)?;
        tmp.persist(path)
            .map_err(|e| LockError::Persist(e.to_string()))?;
        Ok(())
    }
}

/// Deterministic integrity hash of the manifest's raw bytes: hex-encoded
/// SHA-256.
#[must_use]
pub fn manifest_content_hash(manifest_content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest_content);
    hex::encode(hasher.finalize())
}
