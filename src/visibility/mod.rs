//! Cross-domain and cross-package pipe visibility rules.
//!
//! Pipes default to private. A pipe is public only when its bundle marks
//! it `exported`, the manifest lists it in `exports`, or it is the
//! `main_pipe`. Same-domain references are always allowed; references
//! into another package must route through a declared dependency alias
//! (`alias.code`), and an alias shadows a same-named local domain.
//!
//! Checking collects every violation rather than stopping at the first,
//! so callers get a complete diagnostic set per pass.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::bundle::{BundleMetadata, DomainExports};
use crate::manifest::{is_snake_case, PackageManifest};

#[cfg(test)]
mod tests;

// ─── Pipe References ───────────────────────────────────────────────

/// A parsed pipe reference: optional qualifier head plus the pipe code.
///
/// `code` is bare; `domain.code` and `alias.code` share one shape, with
/// the head resolved against aliases first, then local domains. Dotted
/// domain paths keep everything before the last dot as the head.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipeRef {
    pub head: Option<String>,
    pub code: String,
}

impl PipeRef {
    /// Parse a raw reference. Every dot-separated segment must be
    /// snake_case; empty segments (leading, trailing, doubled dots) are
    /// rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("empty pipe reference".to_string());
        }
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(format!("empty segment in pipe reference '{raw}'"));
            }
            if !is_snake_case(segment) {
                return Err(format!("segment '{segment}' in pipe reference '{raw}' is not snake_case"));
            }
        }
        Ok(match raw.rsplit_once('.') {
            Some((head, code)) => Self {
                head: Some(head.to_string()),
                code: code.to_string(),
            },
            None => Self {
                head: None,
                code: raw.to_string(),
            },
        })
    }

    pub fn is_qualified(&self) -> bool {
        self.head.is_some()
    }
}

// ─── Violations ────────────────────────────────────────────────────

/// Why a reference is illegal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViolationKind {
    /// The target exists but is not exported to the referencing side.
    PrivatePipe,
    /// The reference does not route through any declared dependency or
    /// locally declared pipe.
    UndeclaredDependencyReference,
}

/// One collected visibility violation.
#[derive(Clone, Debug)]
pub struct VisibilityViolation {
    pub kind: ViolationKind,
    /// The raw reference as written in the bundle.
    pub pipe_ref: String,
    /// Domain of the bundle making the reference.
    pub origin_domain: String,
    /// The domain or alias the reference targets.
    pub target: String,
    /// TOML location of the reference (e.g. `pipe.x.steps[0].pipe`).
    pub context: String,
    pub message: String,
}

// ─── Check ─────────────────────────────────────────────────────────

/// Validate every pipe reference collected from `bundles`.
///
/// `exports` is the local package's domain export index;
/// `dep_exports` maps declared dependency aliases to the pipe codes that
/// dependency exports (aliases absent from the map pass unchecked, since
/// their packages have not been scanned).
pub fn check(
    manifest: &PackageManifest,
    exports: &DomainExports,
    bundles: &[BundleMetadata],
    dep_exports: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<VisibilityViolation> {
    let aliases: BTreeSet<&str> = manifest.dependencies.iter().map(|d| d.alias.as_str()).collect();
    let local_domains: BTreeSet<&str> = bundles.iter().map(|b| b.domain.as_str()).collect();
    let local_codes: BTreeSet<&str> = bundles
        .iter()
        .flat_map(|b| b.pipes.iter().map(|p| p.code.as_str()))
        .collect();

    let mut violations = Vec::new();

    for bundle in bundles {
        for reference in &bundle.references {
            let parsed = match PipeRef::parse(&reference.raw) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    debug!(context = %reference.context, %reason, "skipping unparseable pipe reference");
                    continue;
                }
            };

            let violation = match &parsed.head {
                None => check_bare(&parsed, &local_codes),
                // A declared alias shadows a same-named local domain.
                Some(head) if aliases.contains(head.as_str()) => {
                    check_alias(&parsed, head, dep_exports)
                }
                Some(head) if local_domains.contains(head.as_str()) => {
                    check_local_domain(&parsed, head, &bundle.domain, exports)
                }
                Some(head) => Some((
                    ViolationKind::UndeclaredDependencyReference,
                    format!(
                        "'{head}' is neither a local domain nor a declared dependency alias; \
                         declare it in [dependencies] of METHODS.toml"
                    ),
                )),
            };

            if let Some((kind, detail)) = violation {
                let target = parsed.head.clone().unwrap_or_else(|| parsed.code.clone());
                violations.push(VisibilityViolation {
                    kind,
                    pipe_ref: reference.raw.clone(),
                    origin_domain: bundle.domain.clone(),
                    target,
                    context: reference.context.clone(),
                    message: format!(
                        "pipe reference '{}' in {} (domain '{}'): {detail}",
                        reference.raw, reference.context, bundle.domain
                    ),
                });
            }
        }
    }

    violations
}

fn check_bare(
    parsed: &PipeRef,
    local_codes: &BTreeSet<&str>,
) -> Option<(ViolationKind, String)> {
    if local_codes.contains(parsed.code.as_str()) {
        return None;
    }
    Some((
        ViolationKind::UndeclaredDependencyReference,
        format!(
            "no local bundle declares pipe '{}'; foreign pipes must be referenced as alias.code",
            parsed.code
        ),
    ))
}

fn check_alias(
    parsed: &PipeRef,
    alias: &str,
    dep_exports: &BTreeMap<String, BTreeSet<String>>,
) -> Option<(ViolationKind, String)> {
    match dep_exports.get(alias) {
        Some(exported) if !exported.contains(&parsed.code) => Some((
            ViolationKind::PrivatePipe,
            format!("dependency '{alias}' does not export pipe '{}'", parsed.code),
        )),
        // Alias known but dependency content not scanned; nothing to check.
        _ => None,
    }
}

fn check_local_domain(
    parsed: &PipeRef,
    domain: &str,
    origin: &str,
    exports: &DomainExports,
) -> Option<(ViolationKind, String)> {
    if domain == origin {
        return None;
    }
    let exported = exports.get(domain);
    if exported.is_some_and(|set| set.contains(&parsed.code)) {
        return None;
    }
    Some((
        ViolationKind::PrivatePipe,
        format!(
            "pipe '{}' is not exported by domain '{domain}'; \
             add it to exports in METHODS.toml or mark it exported",
            parsed.code
        ),
    ))
}
