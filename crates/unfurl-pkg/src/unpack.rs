//! The reconciliation engine: merge a requirement set into the manifest and
//! bring the lock back in line with the rewritten text.
//!
//! Unpacking replaces an indirect dependency on a meta-package with direct
//! declarations of the meta-package's own constituents. The manifest merge
//! and the lock update are separate operations; the lock update hashes the
//! manifest as it exists after the merge was written.

use crate::editor::EditorError;
use crate::index::InstalledIndex;
use crate::lockfile::{manifest_content_hash, LockError, Lockfile};
use crate::manifest::{self, Manifest, ManifestError, Section, MANIFEST_FILE};
use crate::requirement::RequirementSet;
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors that can occur during an unpack operation.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// The requested package is absent from the installed index. Nothing was
    /// modified.
    #[error("package {0} is not installed")]
    PackageNotFound(String),

    /// The manifest could not be read or parsed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The manifest manipulator could not represent a required edit. The
    /// persisted manifest is untouched.
    #[error("unable to unpack package \"{package}\": {reason}")]
    ManifestWrite {
        package: String,
        #[source]
        reason: EditorError,
    },

    /// The rewritten manifest could not be written to disk.
    #[error("failed to write manifest: {0}")]
    ManifestIo(#[from] std::io::Error),

    /// The lock could not be read or written. The manifest may already have
    /// been committed; [`unpack_package`] rolls it back.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The lock step failed and the manifest could not be restored to its
    /// pre-operation content. The two files are inconsistent on disk.
    #[error("{original}; additionally, restoring the manifest failed: {restore}")]
    Rollback {
        #[source]
        original: Box<UnpackError>,
        restore: std::io::Error,
    },
}

/// What the manifest merge did, per requirement name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Names newly inserted into the runtime section.
    pub inserted: Vec<String>,

    /// Names skipped because they were already direct runtime requirements.
    pub skipped: Vec<String>,

    /// Subset of `inserted` that was moved out of the development section,
    /// with constraints accumulated.
    pub moved_from_dev: Vec<String>,
}

/// The result of a successful unpack: the refreshed lock state plus the
/// merge report.
#[derive(Debug)]
pub struct UnpackOutcome {
    /// Lock state as persisted, re-read for subsequent operations.
    pub lock: Lockfile,

    /// What the manifest merge did.
    pub report: MergeReport,
}

/// Merge a requirement set into the manifest at `manifest_path`.
///
/// Every requirement targets the runtime section, including the source
/// package's dev dependencies. A name already present in the runtime section
/// is skipped; a name present in the development section is moved, with its
/// existing constraint accumulated onto the incoming one. All edits are
/// applied to one in-memory manipulator and written once at the end, so no
/// failure commits a partial edit.
///
/// The installed index resolves a dependency's pinned version when the
/// incoming constraint carries no version information.
///
/// # Errors
///
/// Returns [`UnpackError::ManifestWrite`] when an edit cannot be
/// represented, and IO/parse errors when the manifest cannot be read or the
/// final text cannot be written.
pub fn update_manifest(
    set: &RequirementSet,
    index: &dyn InstalledIndex,
    manifest_path: &Path,
) -> Result<MergeReport, UnpackError> {
    let mut report = MergeReport::default();
    if !set.should_unpack() || set.is_empty() {
        return Ok(report);
    }

    let manifest = Manifest::from_path(manifest_path)?;
    let mut editor = manifest.editor();

    // Names inserted during this run, so a duplicate in the set resolves
    // first-write-wins.
    let mut inserted: BTreeSet<String> = BTreeSet::new();

    for req in set.requirements() {
        // Unpacked dependencies always land in the runtime section, dev or
        // not.
        if manifest.has_dependency(Section::Require, &req.name) || inserted.contains(&req.name) {
            report.skipped.push(req.name.clone());
            continue;
        }

        let mut constraint = effective_constraint(req.constraint.as_str(), &req.name, index);

        if let Some(dev_constraint) = manifest.constraint(Section::RequireDev, &req.name) {
            // Accumulate, never replace: both constraints stay in force.
            constraint = merge_constraints(dev_constraint, &constraint);
            editor
                .remove_sub_node(Section::RequireDev, &req.name)
                .map_err(|e| manifest_write(&req.name, e))?;
            report.moved_from_dev.push(req.name.clone());
        }

        editor
            .add_link(Section::Require, &req.name, &constraint, set.should_sort())
            .map_err(|e| manifest_write(&req.name, e))?;
        inserted.insert(req.name.clone());
        report.inserted.push(req.name.clone());
    }

    write_atomic(manifest_path, editor.contents())?;
    Ok(report)
}

/// Retract `package` from the manifest's dependency sections and from the
/// lock, then recompute the lock's integrity hash over the manifest as
/// written.
///
/// Returns the refreshed lock state so callers observe the committed
/// content; the lock is never cached across operations.
///
/// # Errors
///
/// Returns an error if the manifest or lock cannot be read or written. The
/// manifest removal may already be committed when a lock error surfaces;
/// [`unpack_package`] handles the rollback.
pub fn update_lock(
    package: &str,
    manifest_path: &Path,
    lock_path: &Path,
) -> Result<Lockfile, UnpackError> {
    let manifest = Manifest::from_path(manifest_path)?;
    let mut editor = manifest.editor();

    // At most one of these matches; the package was required through exactly
    // one section.
    let removed_dev = editor
        .remove_sub_node(Section::RequireDev, package)
        .map_err(|e| manifest_write(package, e))?;
    let removed = editor
        .remove_sub_node(Section::Require, package)
        .map_err(|e| manifest_write(package, e))?;
    if removed_dev || removed {
        write_atomic(manifest_path, editor.contents())?;
    }

    let mut lock = Lockfile::from_path(lock_path)?;
    lock.remove_package(package);

    let manifest_bytes = std::fs::read(manifest_path).map_err(ManifestError::Io)?;
    lock.set_content_hash(manifest_content_hash(&manifest_bytes));
    lock.write_to(lock_path)?;

    // Commit and refresh: hand back the state as persisted.
    Ok(lock)
}

/// Unpack one installed package into the project at `project_root`.
///
/// Builds the requirement set from the package's declared runtime and dev
/// dependency lists, merges it into the manifest, then retracts the package
/// from the manifest and lock. Sorting applies when `sort` is requested or
/// the manifest's `config.sort-packages` is set.
///
/// If the lock step fails after the manifest was committed, the manifest is
/// restored to its pre-operation content before the error propagates, so the
/// two files never end up observably inconsistent. A restore that itself
/// fails surfaces as [`UnpackError::Rollback`], carrying both errors.
///
/// # Errors
///
/// Returns [`UnpackError::PackageNotFound`] when the package is not
/// installed, and the per-step errors otherwise.
pub fn unpack_package(
    project_root: &Path,
    package: &str,
    index: &dyn InstalledIndex,
    sort: bool,
) -> Result<UnpackOutcome, UnpackError> {
    let manifest_path = project_root.join(MANIFEST_FILE);
    let lock_path = manifest::lock_path(&manifest_path);

    let pkg = index
        .find_package(package)
        .ok_or_else(|| UnpackError::PackageNotFound(package.to_string()))?;

    let manifest = Manifest::from_path(&manifest_path)?;
    let sort = sort || manifest.sort_packages();

    let mut set = RequirementSet::new(true, sort);
    for (name, constraint) in pkg.runtime_dependencies() {
        set.add(name, constraint, false);
    }
    for (name, constraint) in pkg.dev_dependencies() {
        set.add(name, constraint, true);
    }

    // Snapshot for rollback if the lock step fails after the manifest write.
    let snapshot = manifest.raw().to_string();

    let report = update_manifest(&set, index, &manifest_path)?;
    match update_lock(package, &manifest_path, &lock_path) {
        Ok(lock) => Ok(UnpackOutcome { lock, report }),
        Err(err) => match write_atomic(&manifest_path, &snapshot) {
            Ok(()) => Err(err),
            Err(restore) => Err(UnpackError::Rollback {
                original: Box::new(err),
                restore,
            }),
        },
    }
}

/// Accumulated constraint text: the pre-existing constraint and the incoming
/// one, both kept in force.
fn merge_constraints(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        existing.to_string()
    } else if existing.is_empty() {
        incoming.to_string()
    } else {
        format!("{existing},{incoming}")
    }
}

/// Resolve a constraint that carries no version information against the
/// installed pinned version, falling back to a wildcard.
fn effective_constraint(constraint: &str, name: &str, index: &dyn InstalledIndex) -> String {
    if !constraint.is_empty() && constraint != "*" {
        return constraint.to_string();
    }
    if let Some(installed) = index.find_package(name) {
        if semver::Version::parse(&installed.version).is_ok() {
            return format!("^{}", installed.version);
        }
    }
    "*".to_string()
}

fn manifest_write(package: &str, reason: EditorError) -> UnpackError {
    UnpackError::ManifestWrite {
        package: package.to_string(),
        reason,
    }
}

/// Write `content` to `path` through a staged temporary file and rename.
fn write_atomic(path: &Path, content: &str) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InstalledPackage, MemoryIndex};
    use crate::lockfile::LOCK_FILE;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn installed(name: &str, version: &str, require: serde_json::Value) -> InstalledPackage {
        serde_json::from_value(json!({
            "name": name,
            "version": version,
            "require": require,
        }))
        .unwrap()
    }

    fn write_project(dir: &TempDir, manifest: &str, lock: &str) -> (PathBuf, PathBuf) {
        let manifest_path = dir.path().join(MANIFEST_FILE);
        let lock_path = dir.path().join(LOCK_FILE);
        fs::write(&manifest_path, manifest).unwrap();
        fs::write(&lock_path, lock).unwrap();
        (manifest_path, lock_path)
    }

    const MANIFEST: &str = r#"{
    "name": "example/project",
    "require": {
        "a/b": "^1.0"
    },
    "require-dev": {
        "meta/pkg": "^2.0",
        "c/d": "^3.0"
    }
}"#;

    const LOCK: &str = r#"{
    "content-hash": "stale",
    "packages": [
        {"name": "a/b", "version": "1.2.0"},
        {"name": "c/d", "version": "3.2.1"}
    ],
    "packages-dev": [
        {"name": "meta/pkg", "version": "2.0.1", "extra": {"kind": "meta"}}
    ]
}"#;

    fn meta_index() -> MemoryIndex {
        let mut index = MemoryIndex::new();
        index.add(installed("meta/pkg", "2.0.1", json!({"c/d": "^3.2"})));
        index.add(installed("c/d", "3.2.1", json!({})));
        index
    }

    #[test]
    fn moves_dev_dependency_and_merges_constraints() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, lock_path) = write_project(&dir, MANIFEST, LOCK);
        let index = meta_index();

        let outcome = unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();

        let manifest = Manifest::from_path(&manifest_path).unwrap();
        assert_eq!(manifest.constraint(Section::Require, "a/b"), Some("^1.0"));
        assert_eq!(
            manifest.constraint(Section::Require, "c/d"),
            Some("^3.0,^3.2")
        );
        assert!(!manifest.has_dependency(Section::RequireDev, "c/d"));
        assert!(!manifest.has_dependency(Section::RequireDev, "meta/pkg"));
        assert!(manifest.section(Section::RequireDev).is_empty());

        assert_eq!(outcome.report.moved_from_dev, vec!["c/d".to_string()]);

        // Lock: source package gone from both lists, hash recomputed over
        // the final manifest bytes.
        let lock = Lockfile::from_path(&lock_path).unwrap();
        assert!(!lock.has_package("meta/pkg"));
        let bytes = fs::read(&manifest_path).unwrap();
        assert_eq!(lock.content_hash(), Some(manifest_content_hash(&bytes).as_str()));
    }

    #[test]
    fn appends_non_overlapping_dependencies() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, _) = write_project(&dir, MANIFEST, LOCK);

        let mut index = MemoryIndex::new();
        index.add(installed(
            "meta/pkg",
            "2.0.1",
            json!({"z/z": "^9.0", "e/f": "^4.0"}),
        ));

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();

        let content = fs::read_to_string(&manifest_path).unwrap();
        // Appended after the pre-existing key, declared order preserved.
        let a = content.find("\"a/b\"").unwrap();
        let z = content.find("\"z/z\"").unwrap();
        let e = content.find("\"e/f\"").unwrap();
        assert!(a < z && z < e);
    }

    #[test]
    fn sorted_insert_keeps_section_lexicographic() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, _) = write_project(&dir, MANIFEST, LOCK);

        let mut index = MemoryIndex::new();
        index.add(installed("meta/pkg", "2.0.1", json!({"z/z": "^9.0", "aa/a": "^4.0"})));

        unpack_package(dir.path(), "meta/pkg", &index, true).unwrap();

        let content = fs::read_to_string(&manifest_path).unwrap();
        let a = content.find("\"a/b\"").unwrap();
        let aa = content.find("\"aa/a\"").unwrap();
        let z = content.find("\"z/z\"").unwrap();
        assert!(a < aa && aa < z);
    }

    #[test]
    fn sort_packages_config_enables_sorting() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
    "require": {
        "m/m": "^1.0"
    },
    "require-dev": {},
    "config": {
        "sort-packages": true
    }
}"#;
        let (manifest_path, _) = write_project(&dir, manifest, LOCK);

        let mut index = MemoryIndex::new();
        index.add(installed("meta/pkg", "2.0.1", json!({"b/b": "^2.0"})));

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();

        let content = fs::read_to_string(&manifest_path).unwrap();
        let b = content.find("\"b/b\"").unwrap();
        let m = content.find("\"m/m\"").unwrap();
        assert!(b < m);
    }

    #[test]
    fn unpack_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, lock_path) = write_project(&dir, MANIFEST, LOCK);
        let index = meta_index();

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();
        let manifest_once = fs::read_to_string(&manifest_path).unwrap();
        let lock_once = fs::read_to_string(&lock_path).unwrap();

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), manifest_once);
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), lock_once);
    }

    #[test]
    fn existing_runtime_constraint_never_changes() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, _) = write_project(&dir, MANIFEST, LOCK);

        let mut index = MemoryIndex::new();
        // The meta-package wants a different a/b than the project pins.
        index.add(installed("meta/pkg", "2.0.1", json!({"a/b": "^1.5"})));

        let outcome = unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();
        assert_eq!(outcome.report.skipped, vec!["a/b".to_string()]);

        let manifest = Manifest::from_path(&manifest_path).unwrap();
        assert_eq!(manifest.constraint(Section::Require, "a/b"), Some("^1.0"));
    }

    #[test]
    fn unrelated_manifest_content_is_byte_preserved() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
    "name": "example/project",
    "description": "text with \"quotes\" and    spacing",
    "require": {
        "a/b": "^1.0"
    },
    "require-dev": {
        "meta/pkg": "^2.0"
    },
    "extra": {
        "nested": [1, 2, {"deep": true}]
    }
}"#;
        let (manifest_path, _) = write_project(&dir, manifest, LOCK);
        let index = meta_index();

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();

        let content = fs::read_to_string(&manifest_path).unwrap();
        assert!(content.contains("\"description\": \"text with \\\"quotes\\\" and    spacing\""));
        assert!(content.contains("\"nested\": [1, 2, {\"deep\": true}]"));
        assert!(content.contains("\"require-dev\": {}"));
    }

    #[test]
    fn missing_package_reports_not_found_and_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, lock_path) = write_project(&dir, MANIFEST, LOCK);

        let index = MemoryIndex::new();
        let err = unpack_package(dir.path(), "ghost/pkg", &index, false).unwrap_err();
        assert!(matches!(err, UnpackError::PackageNotFound(name) if name == "ghost/pkg"));

        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), MANIFEST);
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), LOCK);
    }

    #[test]
    fn lock_failure_rolls_back_the_manifest() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, lock_path) = write_project(&dir, MANIFEST, "not json at all");
        let index = meta_index();

        let err = unpack_package(dir.path(), "meta/pkg", &index, false).unwrap_err();
        assert!(matches!(err, UnpackError::Lock(_)));

        // The merge was committed and then restored.
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), MANIFEST);
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), "not json at all");
    }

    #[test]
    fn failed_rollback_reports_both_errors() {
        let original = UnpackError::Lock(LockError::NotAnObject);
        let err = UnpackError::Rollback {
            original: Box::new(original),
            restore: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };

        let message = err.to_string();
        assert!(message.contains("lock file root is not a JSON object"));
        assert!(message.contains("restoring the manifest failed"));
        assert!(message.contains("read-only"));
    }

    #[test]
    fn update_lock_retracts_manifest_entry_and_repacks_lists() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, lock_path) = write_project(&dir, MANIFEST, LOCK);

        let lock = update_lock("meta/pkg", &manifest_path, &lock_path).unwrap();
        assert!(!lock.has_package("meta/pkg"));
        assert_eq!(lock.packages().len(), 2);
        assert!(lock.packages_dev().is_empty());

        let manifest = Manifest::from_path(&manifest_path).unwrap();
        assert!(!manifest.has_dependency(Section::RequireDev, "meta/pkg"));
    }

    #[test]
    fn wildcard_constraint_resolves_to_pinned_version() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
    "require": {},
    "require-dev": {}
}"#;
        let (manifest_path, _) = write_project(&dir, manifest, LOCK);

        let mut index = MemoryIndex::new();
        index.add(installed("meta/pkg", "2.0.1", json!({"c/d": "*"})));
        index.add(installed("c/d", "3.2.1", json!({})));

        unpack_package(dir.path(), "meta/pkg", &index, false).unwrap();

        let manifest = Manifest::from_path(&manifest_path).unwrap();
        assert_eq!(manifest.constraint(Section::Require, "c/d"), Some("^3.2.1"));
    }

    #[test]
    fn duplicate_set_entries_resolve_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
    "require": {},
    "require-dev": {}
}"#;
        let (manifest_path, _) = write_project(&dir, manifest, LOCK);

        let mut set = RequirementSet::new(true, false);
        set.add("x/y", "^1.0", false);
        set.add("x/y", "^2.0", false);

        let index = MemoryIndex::new();
        let report = update_manifest(&set, &index, &manifest_path).unwrap();
        assert_eq!(report.inserted, vec!["x/y".to_string()]);
        assert_eq!(report.skipped, vec!["x/y".to_string()]);

        let manifest = Manifest::from_path(&manifest_path).unwrap();
        assert_eq!(manifest.constraint(Section::Require, "x/y"), Some("^1.0"));
    }

    #[test]
    fn failed_edit_leaves_persisted_manifest_untouched() {
        let dir = TempDir::new().unwrap();
        // A runtime section that cannot hold name/constraint entries.
        let manifest = r#"{
    "require": [],
    "require-dev": {}
}"#;
        let (manifest_path, _) = write_project(&dir, manifest, LOCK);

        let mut set = RequirementSet::new(true, false);
        set.add("x/y", "^1.0", false);

        let index = MemoryIndex::new();
        let err = update_manifest(&set, &index, &manifest_path).unwrap_err();
        assert!(matches!(err, UnpackError::ManifestWrite { .. }));

        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), manifest);
    }

    #[test]
    fn disabled_unpack_flag_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let (manifest_path, _) = write_project(&dir, MANIFEST, LOCK);

        let mut set = RequirementSet::new(false, false);
        set.add("x/y", "^1.0", false);

        let index = MemoryIndex::new();
        let report = update_manifest(&set, &index, &manifest_path).unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), MANIFEST);
    }

    #[test]
    fn empty_set_never_touches_the_manifest() {
        let dir = TempDir::new().unwrap();
        // Unparseable on purpose: an empty set must return before any read.
        let manifest_path = dir.path().join(MANIFEST_FILE);
        fs::write(&manifest_path, "not a manifest").unwrap();

        let set = RequirementSet::new(true, false);
        let index = MemoryIndex::new();
        let report = update_manifest(&set, &index, &manifest_path).unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), "not a manifest");
    }
}
