//! Lock file model and I/O for `methods.lock`.
//!
//! The lock file is the pinned, reproducible record of a resolved graph:
//! a manifest fingerprint (staleness detection) plus one entry per address,
//! sorted by address for clean VCS diffs.
//!
//! ```toml
//! fingerprint = "blake3:..."
//!
//! [[package]]
//! address = "github.com/org/geo-utils"
//! alias = "geo"
//! version = "1.2.4"
//! reference = "blake3:..."
//! requires = []
//! ```
//!
//! Writes go to `<path>.tmp` followed by an atomic rename, so a crash
//! mid-write never leaves a truncated lock file behind.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PackageError, Result};
use crate::hash;
use crate::manifest::{serialize_manifest, PackageManifest};
use crate::resolve::{ResolvedDependency, ResolvedGraph, ResolvedReference};
use crate::version;

mod manager;

pub use manager::{diff_locks, install, lock, update, InstallLayout, LockChange, LockChangeKind, LockDiff};


/// Name of the lock file at a package root.
pub const LOCK_FILENAME: &str = "methods.lock";

const PATH_PREFIX: &str = "path:";

// ─── Model ─────────────────────────────────────────────────────────

/// The `methods.lock` contents: fingerprint + entries sorted by address.
#[derive(Clone, Debug, Default)]
pub struct LockFile {
    pub fingerprint: String,
    pub packages: Vec<ResolvedDependency>,
}

impl LockFile {
    /// Build a lock file from a freshly resolved graph.
    pub fn from_graph(manifest: &PackageManifest, graph: &ResolvedGraph) -> Self {
        Self {
            fingerprint: fingerprint(manifest),
            packages: graph.nodes.values().cloned().collect(),
        }
    }

    /// Entry for an address, if locked.
    pub fn get(&self, address: &str) -> Option<&ResolvedDependency> {
        self.packages.iter().find(|p| p.address == address)
    }

    /// True when `manifest` no longer matches the manifest this lock file
    /// was generated from.
    pub fn is_stale(&self, manifest: &PackageManifest) -> bool {
        self.fingerprint != fingerprint(manifest)
    }
}

/// Fingerprint of a manifest: the hash of its canonical serialization, so
/// formatting-only edits do not invalidate the lock.
pub fn fingerprint(manifest: &PackageManifest) -> String {
    hash::hash_bytes(serialize_manifest(manifest).as_bytes())
}

// ─── Parse / Serialize ─────────────────────────────────────────────

#[derive(Deserialize)]
struct RawLock {
    fingerprint: String,
    #[serde(default, rename = "package")]
    packages: Vec<RawPackage>,
}

#[derive(Deserialize)]
struct RawPackage {
    address: String,
    alias: String,
    version: String,
    reference: String,
    #[serde(default)]
    requires: Vec<String>,
}

/// Parse lock file content. `path` is only used for error context.
pub fn parse_lock(content: &str, path: &Path) -> Result<LockFile> {
    let corrupt = |reason: String| PackageError::LockFileCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let raw: RawLock = toml::from_str(content).map_err(|e| corrupt(e.to_string()))?;

    if !hash::is_valid_reference(&raw.fingerprint) {
        return Err(corrupt(format!("invalid fingerprint '{}'", raw.fingerprint)));
    }

    let mut packages = Vec::with_capacity(raw.packages.len());
    let mut seen = BTreeSet::new();
    for entry in raw.packages {
        if !seen.insert(entry.address.clone()) {
            return Err(corrupt(format!("duplicate entry for address '{}'", entry.address)));
        }
        let version = version::parse_version(&entry.version)
            .map_err(|_| corrupt(format!("invalid version '{}' for '{}'", entry.version, entry.address)))?;
        let reference = if let Some(p) = entry.reference.strip_prefix(PATH_PREFIX) {
            ResolvedReference::Path {
                path: PathBuf::from(p),
            }
        } else if hash::is_valid_reference(&entry.reference) {
            ResolvedReference::Registry {
                hash: entry.reference.clone(),
            }
        } else {
            return Err(corrupt(format!(
                "invalid reference '{}' for '{}'",
                entry.reference, entry.address
            )));
        };
        packages.push(ResolvedDependency {
            address: entry.address,
            alias: entry.alias,
            version,
            reference,
            requires: entry.requires.into_iter().collect(),
        });
    }
    packages.sort_by(|a, b| a.address.cmp(&b.address));

    Ok(LockFile {
        fingerprint: raw.fingerprint,
        packages,
    })
}

/// Render a lock file deterministically: entries sorted by address, fixed
/// field order. Locking twice against unchanged state is byte-identical.
pub fn serialize_lock(lock: &LockFile) -> String {
    let mut out = String::new();
    out.push_str("# methods.lock — generated, do not edit manually\n");
    out.push_str(&format!("fingerprint = \"{}\"\n", lock.fingerprint));

    let mut entries: Vec<&ResolvedDependency> = lock.packages.iter().collect();
    entries.sort_by(|a, b| a.address.cmp(&b.address));

    for dep in entries {
        let reference = match &dep.reference {
            ResolvedReference::Registry { hash } => hash.clone(),
            ResolvedReference::Path { path } => format!("{PATH_PREFIX}{}", path.display()),
        };
        let requires = dep
            .requires
            .iter()
            .map(|addr| format!("\"{addr}\""))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str("\n[[package]]\n");
        out.push_str(&format!("address = \"{}\"\n", dep.address));
        out.push_str(&format!("alias = \"{}\"\n", dep.alias));
        out.push_str(&format!("version = \"{}\"\n", dep.version));
        out.push_str(&format!("reference = \"{reference}\"\n"));
        out.push_str(&format!("requires = [{requires}]\n"));
    }

    out
}

// ─── File I/O ──────────────────────────────────────────────────────

/// Load a lock file. Absence is `LockFileMissing`; unreadable content is
/// `LockFileCorrupt`.
pub fn load_lock(path: &Path) -> Result<LockFile> {
    if !path.exists() {
        return Err(PackageError::LockFileMissing {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    parse_lock(&content, path)
}

/// Write a lock file via temporary file + atomic rename.
pub fn save_lock(path: &Path, lock: &LockFile) -> Result<()> {
    let tmp = path.with_extension("lock.tmp");
    std::fs::write(&tmp, serialize_lock(lock))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
