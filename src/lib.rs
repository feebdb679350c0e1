//! Client-side package management core for method packages.
//!
//! A *method* package is a directory of `.mthds` bundle files (each
//! declaring executable *pipes* within a *domain*) described by a
//! `METHODS.toml` manifest. This crate is the resolution and validation
//! logic behind a package tool: manifest parsing, dependency graph
//! resolution, the reproducible `methods.lock` file, bundle scanning,
//! pipe visibility rules, and discovery of installed packages. The
//! command-line surface, credential storage and pipe execution live in
//! external callers.
//!
//! ```text
//! manifest ──► resolve ──► lockfile (lock / install / update)
//! bundle ──► exports ──► visibility
//! installed ──► resolve (InstalledSource), and direct lookups
//! ```

pub mod bundle;
pub mod error;
pub mod hash;
pub mod installed;
pub mod lockfile;
pub mod manifest;
pub mod resolve;
pub mod version;
pub mod visibility;

// Re-export the operation surface — callers reach everything as `mthds_pack::X`
pub use bundle::{
    build_domain_exports_from_scan, scan_bundles_for_domain_info, verify_main_pipe,
    BundleMetadata, BundleScan, DomainExports, ScanMode,
};
pub use error::{PackageError, Result};
pub use installed::{
    discover_installed_methods, find_method_by_exported_pipe, find_method_by_name,
    InstalledMethod, InstalledSource,
};
pub use lockfile::{install, lock, update, InstallLayout, LockDiff, LockFile};
pub use manifest::{parse_manifest, PackageManifest};
pub use resolve::{resolve, DependencySource, ResolvedGraph};
pub use visibility::{check, VisibilityViolation};
