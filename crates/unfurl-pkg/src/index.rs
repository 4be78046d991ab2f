//! Installed package index: lookup of already-installed packages and their
//! declared dependency lists.
//!
//! The engine only depends on the [`InstalledIndex`] trait. The default
//! implementation reads the vendor state file written at install time
//! (`packs/installed.json`); tests use the in-memory variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Project-relative path of the vendor state file.
pub const INSTALLED_FILE: &str = "packs/installed.json";

/// Errors that can occur when reading the installed index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to read installed index: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse installed index: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One installed package record.
///
/// Dependency maps keep their declared order; downstream unpacking is
/// order-sensitive when sorting is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Package name.
    pub name: String,

    /// Pinned, installed version.
    pub version: String,

    /// Declared runtime dependencies: name → constraint.
    #[serde(default)]
    pub require: Map<String, Value>,

    /// Declared development dependencies: name → constraint.
    #[serde(default, rename = "require-dev")]
    pub require_dev: Map<String, Value>,
}

impl InstalledPackage {
    /// Declared runtime dependencies as (name, constraint) pairs, in
    /// declared order.
    pub fn runtime_dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        dependency_pairs(&self.require)
    }

    /// Declared development dependencies as (name, constraint) pairs, in
    /// declared order.
    pub fn dev_dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        dependency_pairs(&self.require_dev)
    }
}

fn dependency_pairs(map: &Map<String, Value>) -> impl Iterator<Item = (&str, &str)> {
    map.iter()
        .filter_map(|(name, constraint)| constraint.as_str().map(|c| (name.as_str(), c)))
}

/// Exact-name lookup of installed packages.
pub trait InstalledIndex {
    /// Find an installed package by exact name.
    fn find_package(&self, name: &str) -> Option<&InstalledPackage>;
}

/// Installed index backed by the vendor state file.
#[derive(Debug, Default)]
pub struct InstalledFile {
    packages: Vec<InstalledPackage>,
}

impl InstalledFile {
    /// Load the index from a file path.
    ///
    /// The file is either a bare array of package records or an object with
    /// a `"packages"` array member.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the index from raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not match either supported shape.
    pub fn parse(content: &str) -> Result<Self, IndexError> {
        let value: Value = serde_json::from_str(content)?;
        let list = match value {
            Value::Object(mut map) => map.remove("packages").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        let packages: Vec<InstalledPackage> = serde_json::from_value(list)?;
        Ok(Self { packages })
    }

    /// All installed package records.
    #[must_use]
    pub fn packages(&self) -> &[InstalledPackage] {
        &self.packages
    }
}

impl InstalledIndex for InstalledFile {
    fn find_package(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// In-memory installed index for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    packages: Vec<InstalledPackage>,
}

impl MemoryIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package record, replacing any prior record of the same name.
    pub fn add(&mut self, package: InstalledPackage) {
        self.packages.retain(|p| p.name != package.name);
        self.packages.push(package);
    }
}

impl InstalledIndex for MemoryIndex {
    fn find_package(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.iter().find(|p| p.name == name)
    }
}
