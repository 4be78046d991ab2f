//! Project manifest (`pack.json`) reading and inspection.
//!
//! The manifest is a human-edited JSON document. This module provides a
//! read-only parsed view used for lookups; all writes go through the
//! byte-preserving [`crate::editor::ManifestEditor`] so that unrelated
//! content survives untouched.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The manifest file name.
pub const MANIFEST_FILE: &str = "pack.json";

/// Extension of the lock file sitting next to the manifest.
pub const LOCK_EXT: &str = "lock";

/// Errors that can occur when reading a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest root is not a JSON object")]
    NotAnObject,
}

/// The dependency section a name can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Direct, always-installed dependencies (`"require"`).
    Require,
    /// Dependencies only needed for contributing or testing (`"require-dev"`).
    RequireDev,
}

impl Section {
    /// The JSON member name of this section.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Require => "require",
            Self::RequireDev => "require-dev",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A parsed, read-only view of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    raw: String,
    root: Value,
}

impl Manifest {
    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(content)
    }

    /// Parse a manifest from its raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn parse(content: impl Into<String>) -> Result<Self, ManifestError> {
        let raw = content.into();
        let root: Value = serde_json::from_str(&raw)?;
        if !root.is_object() {
            return Err(ManifestError::NotAnObject);
        }
        Ok(Self { raw, root })
    }

    /// The raw manifest text this view was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// An editor over this manifest's raw text.
    #[must_use]
    pub fn editor(&self) -> crate::editor::ManifestEditor {
        crate::editor::ManifestEditor::from_validated(self.raw.clone())
    }

    /// Name → constraint entries of a dependency section.
    ///
    /// A missing section reads as empty; constraint values that are not
    /// strings are skipped.
    #[must_use]
    pub fn section(&self, section: Section) -> BTreeMap<String, String> {
        let mut deps = BTreeMap::new();
        if let Some(map) = self.root.get(section.key()).and_then(Value::as_object) {
            for (name, constraint) in map {
                if let Some(constraint) = constraint.as_str() {
                    deps.insert(name.clone(), constraint.to_string());
                }
            }
        }
        deps
    }

    /// True when `name` is declared in `section`.
    #[must_use]
    pub fn has_dependency(&self, section: Section, name: &str) -> bool {
        self.root
            .get(section.key())
            .and_then(Value::as_object)
            .is_some_and(|map| map.contains_key(name))
    }

    /// The constraint declared for `name` in `section`, if any.
    #[must_use]
    pub fn constraint(&self, section: Section, name: &str) -> Option<&str> {
        self.root
            .get(section.key())?
            .get(name)?
            .as_str()
    }

    /// The project-level `config.sort-packages` setting, defaulting to false.
    #[must_use]
    pub fn sort_packages(&self) -> bool {
        self.root
            .get("config")
            .and_then(|config| config.get("sort-packages"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The lock path for a manifest path: same location, extension swapped to
/// [`LOCK_EXT`].
#[must_use]
pub fn lock_path(manifest_path: &Path) -> PathBuf {
    manifest_path.with_extension(LOCK_EXT)
}
