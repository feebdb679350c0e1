//! Lock / install / update workflows on top of the lock file model.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{PackageError, Result};
use crate::manifest::PackageManifest;
use crate::resolve::{self, DependencySource, ResolvedReference};
use crate::version::Version;

use super::{load_lock, save_lock, LockFile};

// ─── Lock ──────────────────────────────────────────────────────────

/// Resolve the manifest's dependency graph and write `methods.lock`.
///
/// The written file is deterministic: locking twice against the same
/// manifest and registry state produces byte-identical output.
pub fn lock(
    manifest: &PackageManifest,
    root_dir: &Path,
    source: &dyn DependencySource,
    lock_path: &Path,
) -> Result<LockFile> {
    let graph = resolve::resolve(manifest, root_dir, source)?;
    let lock = LockFile::from_graph(manifest, &graph);
    save_lock(lock_path, &lock)?;
    info!(packages = lock.packages.len(), "wrote lock file");
    Ok(lock)
}

// ─── Install ───────────────────────────────────────────────────────

/// Where installed packages land and where downloads are staged.
#[derive(Clone, Debug)]
pub struct InstallLayout {
    /// Final install root; each package lands in a subdirectory of it.
    pub install_root: PathBuf,
    /// Scratch root for staging. Must be on the same filesystem as
    /// `install_root` so the commit renames are atomic.
    pub staging_root: PathBuf,
}

impl InstallLayout {
    pub fn new(install_root: impl Into<PathBuf>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            staging_root: staging_root.into(),
        }
    }

    /// Directory name for an address under the install root.
    fn dir_name(address: &str) -> String {
        address.replace('/', "_")
    }
}

/// Materialize every locked package on disk, in lock-file (address) order.
///
/// All packages are fetched into a staging area and hash-verified against
/// their locked references first; only when every entry checks out are
/// they committed into `install_root`. A verification or fetch failure
/// aborts before any existing installed package is touched.
///
/// Returns the installed addresses in order.
pub fn install(
    lock_path: &Path,
    source: &dyn DependencySource,
    layout: &InstallLayout,
) -> Result<Vec<String>> {
    let lock = load_lock(lock_path)?;

    let stage = layout.staging_root.join("stage");
    if stage.exists() {
        fs::remove_dir_all(&stage)?;
    }
    fs::create_dir_all(&stage)?;

    let result = stage_all(&lock, source, &stage);
    if result.is_err() {
        let _ = fs::remove_dir_all(&stage);
    }
    let staged = result?;

    fs::create_dir_all(&layout.install_root)?;
    let mut installed = Vec::with_capacity(staged.len());
    for (address, staged_dir) in staged {
        let dest = layout.install_root.join(InstallLayout::dir_name(&address));
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        fs::rename(&staged_dir, &dest)?;
        debug!(%address, dest = %dest.display(), "installed package");
        installed.push(address);
    }
    let _ = fs::remove_dir_all(&stage);

    Ok(installed)
}

fn stage_all(
    lock: &LockFile,
    source: &dyn DependencySource,
    stage: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let mut staged = Vec::new();
    for dep in &lock.packages {
        let locked_hash = match &dep.reference {
            ResolvedReference::Registry { hash } => hash,
            // Path overrides are used in place and never materialized.
            ResolvedReference::Path { .. } => continue,
        };
        let dir = stage.join(InstallLayout::dir_name(&dep.address));
        fs::create_dir_all(&dir)?;
        let fetched_hash = source.fetch(&dep.address, &dep.version, &dir)?;
        if &fetched_hash != locked_hash {
            return Err(PackageError::source(
                dep.address.clone(),
                format!(
                    "content hash mismatch for version {}: locked {locked_hash}, fetched {fetched_hash}",
                    dep.version
                ),
            ));
        }
        staged.push((dep.address.clone(), dir));
    }
    Ok(staged)
}

// ─── Update ────────────────────────────────────────────────────────

/// How a single locked address changed across an update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockChangeKind {
    Added,
    Removed,
    Upgraded,
    Downgraded,
}

/// One address-level delta between two lock files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockChange {
    pub address: String,
    pub kind: LockChangeKind,
    pub previous: Option<Version>,
    pub current: Option<Version>,
}

/// The full delta of an update, sorted by address.
#[derive(Clone, Debug, Default)]
pub struct LockDiff {
    pub changes: Vec<LockChange>,
}

impl LockDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Re-resolve from scratch and rewrite the lock file, reporting what moved.
///
/// A missing previous lock file is fine (everything shows as `Added`);
/// a corrupt one is an error.
pub fn update(
    manifest: &PackageManifest,
    root_dir: &Path,
    source: &dyn DependencySource,
    lock_path: &Path,
) -> Result<LockDiff> {
    let previous = match load_lock(lock_path) {
        Ok(lock) => lock,
        Err(PackageError::LockFileMissing { .. }) => LockFile::default(),
        Err(e) => return Err(e),
    };

    let current = lock(manifest, root_dir, source, lock_path)?;
    let diff = diff_locks(&previous, &current);
    info!(changes = diff.changes.len(), "updated lock file");
    Ok(diff)
}

/// Pure address-level diff between two lock files.
pub fn diff_locks(previous: &LockFile, current: &LockFile) -> LockDiff {
    let mut changes = Vec::new();

    for dep in &current.packages {
        match previous.get(&dep.address) {
            None => changes.push(LockChange {
                address: dep.address.clone(),
                kind: LockChangeKind::Added,
                previous: None,
                current: Some(dep.version.clone()),
            }),
            Some(old) if old.version != dep.version => {
                let kind = if dep.version > old.version {
                    LockChangeKind::Upgraded
                } else {
                    LockChangeKind::Downgraded
                };
                changes.push(LockChange {
                    address: dep.address.clone(),
                    kind,
                    previous: Some(old.version.clone()),
                    current: Some(dep.version.clone()),
                });
            }
            Some(_) => {}
        }
    }

    for dep in &previous.packages {
        if current.get(&dep.address).is_none() {
            changes.push(LockChange {
                address: dep.address.clone(),
                kind: LockChangeKind::Removed,
                previous: Some(dep.version.clone()),
                current: None,
            });
        }
    }

    changes.sort_by(|a, b| a.address.cmp(&b.address));
    LockDiff { changes }
}
