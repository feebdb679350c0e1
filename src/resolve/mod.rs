//! Dependency graph resolution.
//!
//! A `DependencySource` abstracts where package content comes from (a
//! registry client, a local tree, or the installed-method index). The
//! resolver walks manifests from a root, accumulates version constraints
//! per address, detects cycles on the ancestor chain, and pins each
//! address to the highest version satisfying every constraint.
//!
//! Resolution is a pure function of the root manifest plus source state:
//! identical inputs yield an identical `ResolvedGraph` (all maps are
//! ordered by address, traversal follows alias order).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::manifest::PackageManifest;
use crate::version::Version;

mod resolver;

pub use resolver::resolve;

#[cfg(test)]
pub(crate) mod tests;

// ─── Source Abstraction ────────────────────────────────────────────

/// Access to published package content, keyed by address.
///
/// Implementations must be read-only and stable for the duration of a
/// resolution; all failures surface as `PackageError::DependencySource`.
pub trait DependencySource {
    /// All published versions of an address, in any order.
    fn available_versions(&self, address: &str) -> Result<Vec<Version>>;

    /// The manifest of one published version.
    fn manifest(&self, address: &str, version: &Version) -> Result<PackageManifest>;

    /// The content hash of one published version (`blake3:<64 hex>`).
    fn content_hash(&self, address: &str, version: &Version) -> Result<String>;

    /// Materialize package contents into `dest`, returning the content hash
    /// of what was written.
    fn fetch(&self, address: &str, version: &Version, dest: &Path) -> Result<String>;
}

// ─── Resolved Graph ────────────────────────────────────────────────

/// How a resolved dependency is pinned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedReference {
    /// Registry content, pinned by content hash.
    Registry { hash: String },
    /// Local path override, pinned to whatever manifest the path holds.
    Path { path: PathBuf },
}

/// One node of the resolved graph; also the shape of a lock file entry.
#[derive(Clone, Debug)]
pub struct ResolvedDependency {
    pub address: String,
    /// Alias of the first declaration encountered (root declarations first).
    pub alias: String,
    pub version: Version,
    pub reference: ResolvedReference,
    /// Addresses of this package's own remote dependencies.
    pub requires: BTreeSet<String>,
}

/// A consistent, conflict-free, cycle-free resolved dependency graph.
#[derive(Clone, Debug, Default)]
pub struct ResolvedGraph {
    /// Exactly one node per distinct address.
    pub nodes: BTreeMap<String, ResolvedDependency>,
}

impl ResolvedGraph {
    pub fn get(&self, address: &str) -> Option<&ResolvedDependency> {
        self.nodes.get(address)
    }

    /// Addresses in sorted order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
