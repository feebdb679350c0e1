//! Error taxonomy for the package manager core.
//!
//! Every public operation returns a typed `PackageError` with enough
//! context to report the failure without re-deriving it: field paths for
//! manifest problems, the full constraint list for conflicts, the full
//! ancestor chain for cycles.
//!
//! Visibility problems are deliberately *not* errors: the checker collects
//! `VisibilityViolation` values so callers always get the complete set.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackageError>;

#[derive(Debug, Error)]
pub enum PackageError {
    /// A manifest failed validation before construction.
    /// `field` is the path of the offending entry (e.g. `dependencies.geo.address`).
    #[error("manifest validation failed at `{field}`: {reason}")]
    ManifestValidation { field: String, reason: String },

    /// No available version of `address` satisfies all accumulated constraints.
    #[error("no version of `{address}` satisfies all constraints: {}", constraints.join(", "))]
    DependencyConflict {
        address: String,
        constraints: Vec<String>,
    },

    /// An address reappeared in its own ancestor chain during resolution.
    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    /// `install` was asked to run without a lock file.
    #[error("lock file not found at '{}'; run lock first", path.display())]
    LockFileMissing { path: PathBuf },

    /// The lock file exists but cannot be read as a valid lock document.
    #[error("lock file '{}' is corrupt: {reason}", path.display())]
    LockFileCorrupt { path: PathBuf, reason: String },

    /// No installed method matches the requested name.
    #[error("no installed method named '{name}'")]
    MethodNotFound { name: String },

    /// The same method name exists in more than one search root.
    #[error("multiple installed methods named '{name}': {}", locations.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    DuplicateMethodName { name: String, locations: Vec<PathBuf> },

    /// No installed method exports the requested pipe code.
    #[error("pipe code '{pipe_code}' is not exported by any installed method")]
    PipeCodeNotFound { pipe_code: String },

    /// More than one installed method exports the requested pipe code.
    #[error("pipe code '{pipe_code}' is exported by multiple methods: {}", methods.join(", "))]
    AmbiguousPipeCode {
        pipe_code: String,
        methods: Vec<String>,
    },

    /// The dependency source (registry, local tree, installed index) failed.
    #[error("dependency source error for '{address}': {reason}")]
    DependencySource { address: String, reason: String },

    /// A bundle file could not be scanned (strict mode, or an unreadable root).
    #[error("bundle scan failed for '{}': {reason}", path.display())]
    BundleScan { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PackageError {
    /// Shorthand for a manifest validation failure at a field path.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PackageError::ManifestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a dependency source failure.
    pub fn source(address: impl Into<String>, reason: impl Into<String>) -> Self {
        PackageError::DependencySource {
            address: address.into(),
            reason: reason.into(),
        }
    }
}
