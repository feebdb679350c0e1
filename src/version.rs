//! Thin wrapper around the `semver` crate for version and constraint
//! handling.
//!
//! Constraint grammar is the standard range syntax: exact (`1.2.3`), caret
//! (`^1.2.3`), tilde (`~1.2.3`), comparisons (`>=1.0.0, <2.0.0`), and
//! wildcards (`*`, `1.*`). Selection picks the *highest* version that
//! satisfies every accumulated constraint.

pub use semver::{Version, VersionReq};

use crate::error::{PackageError, Result};

/// Default constraint applied when a dependency omits `version`.
pub const DEFAULT_CONSTRAINT: &str = "0.1.0";

/// Parse a version string, tolerating a leading `v` (common in git tags).
pub fn parse_version(raw: &str) -> Result<Version> {
    let cleaned = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(cleaned).map_err(|e| {
        PackageError::validation("version", format!("invalid semver version '{raw}': {e}"))
    })
}

/// Parse a version constraint string into a `VersionReq`.
pub fn parse_constraint(raw: &str) -> Result<VersionReq> {
    VersionReq::parse(raw.trim()).map_err(|e| {
        PackageError::validation("version", format!("invalid version constraint '{raw}': {e}"))
    })
}

/// True if `version` satisfies every constraint in the set.
pub fn satisfies_all(version: &Version, constraints: &[VersionReq]) -> bool {
    constraints.iter().all(|req| req.matches(version))
}

/// Select the highest version satisfying every constraint, or `None` when
/// the constraint set is unsatisfiable against the available versions.
pub fn select_highest(available: &[Version], constraints: &[VersionReq]) -> Option<Version> {
    available
        .iter()
        .filter(|v| satisfies_all(v, constraints))
        .max()
        .cloned()
}
