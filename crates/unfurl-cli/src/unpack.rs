//! Implementation of the `unfurl unpack` command.

use anyhow::{Context, Result};
use std::path::Path;
use unfurl_pkg::{unpack_package, InstalledFile, INSTALLED_FILE, MANIFEST_FILE};

/// Options for unpacking a package.
#[derive(Debug)]
pub struct UnpackOptions {
    /// Package names given on the command line. Only the first is acted
    /// upon.
    pub packages: Vec<String>,

    /// Keep the [require] section alphabetically sorted.
    pub sort_packages: bool,
}

/// Unpack a package in the current directory.
pub fn unpack(options: UnpackOptions) -> Result<()> {
    unpack_at(Path::new("."), options)
}

/// Unpack a package in a project rooted at `project_root`.
pub fn unpack_at(project_root: &Path, options: UnpackOptions) -> Result<()> {
    let manifest_path = project_root.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(anyhow::anyhow!(
            "No {} found in {}",
            MANIFEST_FILE,
            project_root.display()
        ));
    }

    let package = options
        .packages
        .first()
        .context("No package name given")?;

    let index_path = project_root.join(INSTALLED_FILE);
    let index = InstalledFile::from_path(&index_path).with_context(|| {
        format!("Failed to read installed index at {}", index_path.display())
    })?;

    let outcome = unpack_package(project_root, package, &index, options.sort_packages)?;

    let report = &outcome.report;
    println!(
        "Unpacked `{package}` into [require] ({} added, {} moved from [require-dev], {} already present)",
        report.inserted.len(),
        report.moved_from_dev.len(),
        report.skipped.len()
    );

    Ok(())
}
