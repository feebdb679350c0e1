//! Package manifest model for `METHODS.toml`.
//!
//! A manifest declares the package identity, which pipes it makes public,
//! and its dependencies on other packages:
//!
//! ```toml
//! name = "weather_tools"
//! version = "0.1.0"
//! main_pipe = "summarize_forecast"
//! exports = ["fetch_raw"]
//!
//! [dependencies]
//! geo = { address = "github.com/org/geo-utils", version = "^1.2.0" }
//! ```
//!
//! The typed model can only be obtained through validation: `parse_manifest`
//! runs a single pass over the raw TOML value and rejects unknown fields,
//! bad patterns, and duplicate aliases before any struct is built.

use std::path::PathBuf;

use crate::error::{PackageError, Result};
use crate::version::{self, VersionReq};

mod parse;

pub use parse::{parse_manifest, serialize_manifest};


/// Name of the manifest file at a package root.
pub const MANIFEST_FILENAME: &str = "METHODS.toml";

// ─── Data Types ────────────────────────────────────────────────────

/// A version constraint together with the text it was parsed from.
///
/// The raw text is kept for conflict reports and round-trip serialization.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub req: VersionReq,
    pub raw: String,
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            req: version::parse_constraint(raw)?,
            raw: raw.trim().to_string(),
        })
    }

    /// The default constraint used when a dependency omits `version`.
    pub fn default_constraint() -> Self {
        Self {
            req: VersionReq::parse(version::DEFAULT_CONSTRAINT)
                .unwrap_or(VersionReq::STAR),
            raw: version::DEFAULT_CONSTRAINT.to_string(),
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A declared dependency on another method package.
#[derive(Clone, Debug)]
pub struct PackageDependency {
    /// Registry-style location, e.g. `github.com/org/geo-utils`.
    pub address: String,
    /// Local name used for cross-package pipe references.
    pub alias: String,
    /// Version constraint; ignored when `path` is set.
    pub constraint: Constraint,
    /// Local filesystem override bypassing registry resolution.
    pub path: Option<PathBuf>,
}

impl PackageDependency {
    /// Build a dependency with a derived alias and the default constraint.
    pub fn new(address: &str) -> Result<Self> {
        if !is_valid_address(address) {
            return Err(PackageError::validation(
                "address",
                format!(
                    "invalid package address '{address}'; expected hostname/path form \
                     like 'github.com/org/repo'"
                ),
            ));
        }
        let alias = derive_alias(address);
        if !is_snake_case(&alias) {
            return Err(PackageError::validation(
                "alias",
                format!("cannot derive a snake_case alias from address '{address}'"),
            ));
        }
        Ok(Self {
            address: address.to_string(),
            alias,
            constraint: Constraint::default_constraint(),
            path: None,
        })
    }
}

/// The `METHODS.toml` package manifest.
#[derive(Clone, Debug, Default)]
pub struct PackageManifest {
    /// Optional package identifier, `^[a-z][a-z0-9_-]{1,24}$`.
    pub name: Option<String>,
    /// Package version (exact semver, not a constraint).
    pub version: String,
    /// Default pipe; implicitly public when set.
    pub main_pipe: Option<String>,
    /// Pipe codes explicitly made public.
    pub exports: Vec<String>,
    /// Declared dependencies, ordered by alias; aliases are unique.
    pub dependencies: Vec<PackageDependency>,
}

impl PackageManifest {
    /// Look up a dependency by alias.
    pub fn dependency(&self, alias: &str) -> Option<&PackageDependency> {
        self.dependencies.iter().find(|d| d.alias == alias)
    }

    /// True if `code` is public by declaration: listed in `exports` or the
    /// package's `main_pipe`.
    pub fn declares_public(&self, code: &str) -> bool {
        self.exports.iter().any(|e| e == code) || self.main_pipe.as_deref() == Some(code)
    }
}

// ─── Validation Helpers ────────────────────────────────────────────

/// Package name pattern: `^[a-z][a-z0-9_-]{1,24}$`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest_len = name.len() - 1;
    if !(1..=24).contains(&rest_len) {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Pipe codes, domain segments, and aliases are snake_case: a lowercase
/// letter followed by lowercase letters, digits, or underscores.
pub fn is_snake_case(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Addresses follow a hostname/path pattern: at least one dot before the
/// first slash, e.g. `github.com/org/repo`.
pub fn is_valid_address(address: &str) -> bool {
    let Some((host, rest)) = address.split_once('/') else {
        return false;
    };
    if !host.contains('.') || rest.is_empty() {
        return false;
    }
    let host_ok = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    let rest_ok = rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    host_ok && rest_ok && !host.starts_with('.') && !host.ends_with('.')
}

/// Derive a dependency alias from an address: last path segment, lowercased,
/// non-alphanumerics replaced with `_`.
pub fn derive_alias(address: &str) -> String {
    let segment = address.rsplit('/').next().unwrap_or(address);
    segment
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}
