//! Manifest and lock reconciliation for unpacking meta-packages.
//!
//! This crate provides:
//! - Parsing and inspection of `pack.json` manifests
//! - Byte-preserving edits of the manifest's dependency sections
//! - Lock file (`pack.lock`) state with manifest integrity hashing
//! - Installed package index lookup
//! - The unpack engine that merges a package's dependencies into the
//!   project's own manifest and retracts the package from the lock

mod editor;
mod index;
mod lockfile;
mod manifest;
mod requirement;
mod unpack;

pub use editor::{EditorError, ManifestEditor};
pub use index::{IndexError, InstalledFile, InstalledIndex, InstalledPackage, MemoryIndex, INSTALLED_FILE};
pub use lockfile::{manifest_content_hash, LockError, Lockfile, LOCK_FILE};
pub use manifest::{lock_path, Manifest, ManifestError, Section, LOCK_EXT, MANIFEST_FILE};
pub use requirement::{Requirement, RequirementSet};
pub use unpack::{
    unpack_package, update_lock, update_manifest, MergeReport, UnpackError, UnpackOutcome,
};
