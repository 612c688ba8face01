//! Readers for on-disk package state.
//!
//! Two directories are inspected: a package cache (`pkgs_dir`) holding
//! fetched archives and their extracted trees, and an environment prefix whose
//! `conda-meta` directory records every linked package. Nothing is cached;
//! every call reads the filesystem again. Missing directories read as empty.

#![deny(clippy::all)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use cx_domain::{Dist, IndexEntry, InstalledRecord};
use tracing::warn;

/// Directory under an environment prefix holding linked-package records.
pub const META_DIR: &str = "conda-meta";
const RECORD_SUFFIX: &str = ".json";

/// Dists of the archives directly under `pkgs_dir`.
pub fn fetched(pkgs_dir: &Path) -> BTreeSet<Dist> {
    list_file_names(pkgs_dir)
        .filter_map(|name| Dist::from_filename(&name))
        .collect()
}

pub fn is_fetched(pkgs_dir: &Path, dist: &Dist) -> bool {
    pkgs_dir.join(dist.filename()).is_file()
}

/// Dists whose extracted tree has both `info/files` and `info/index.json`.
pub fn extracted(pkgs_dir: &Path) -> BTreeSet<Dist> {
    list_file_names(pkgs_dir)
        .map(Dist::new)
        .filter(|dist| is_extracted(pkgs_dir, dist))
        .collect()
}

pub fn is_extracted(pkgs_dir: &Path, dist: &Dist) -> bool {
    let info = pkgs_dir.join(dist.as_str()).join("info");
    info.join("files").is_file() && info.join("index.json").is_file()
}

/// Read the `info/index.json` of an extracted package.
pub fn extracted_index(pkgs_dir: &Path, dist: &Dist) -> Result<IndexEntry> {
    let path = pkgs_dir.join(dist.as_str()).join("info").join("index.json");
    let contents =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Dists with a metadata record under `<prefix>/conda-meta`.
pub fn linked(prefix: &Path) -> BTreeSet<Dist> {
    list_file_names(&meta_dir(prefix))
        .filter_map(|name| {
            name.strip_suffix(RECORD_SUFFIX)
                .filter(|stem| !stem.is_empty())
                .map(Dist::new)
        })
        .collect()
}

/// Parse every linked-package record under `prefix`.
///
/// Records that cannot be read or parsed are left out and logged; a partially
/// corrupt metadata directory still yields every readable record.
pub fn linked_data(prefix: &Path) -> BTreeMap<Dist, InstalledRecord> {
    linked(prefix)
        .into_iter()
        .filter_map(|dist| {
            let path = record_path(prefix, &dist);
            match read_record(&path) {
                Ok(record) => Some((dist, record)),
                Err(err) => {
                    warn!(path = %path.display(), error = %format!("{err:#}"), "skipping unreadable package record");
                    None
                }
            }
        })
        .collect()
}

/// Whether `dist` is linked into `prefix` with a readable record.
pub fn is_linked(prefix: &Path, dist: &Dist) -> bool {
    load_linked_record(prefix, dist).is_some()
}

/// The metadata record of a linked package, if present and readable.
pub fn load_linked_record(prefix: &Path, dist: &Dist) -> Option<InstalledRecord> {
    read_record(&record_path(prefix, dist)).ok()
}

pub fn meta_dir(prefix: &Path) -> PathBuf {
    prefix.join(META_DIR)
}

fn record_path(prefix: &Path, dist: &Dist) -> PathBuf {
    meta_dir(prefix).join(format!("{dist}{RECORD_SUFFIX}"))
}

fn read_record(path: &Path) -> Result<InstalledRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn list_file_names(dir: &Path) -> impl Iterator<Item = String> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
}
