//! Bundle scanning: extract domain / pipe / export facts from `.mthds`
//! content files.
//!
//! A bundle is opaque beyond the few fields scanned here. The TOML shape
//! this module cares about:
//!
//! ```toml
//! domain = "weather"
//! main_pipe = "summarize_forecast"
//!
//! [pipe.summarize_forecast]
//! exported = true
//! steps = [{ pipe = "fetch_raw" }]
//! ```
//!
//! `domain` and `main_pipe` may also sit under a `[header]` table. Each
//! file parses independently; lenient scans collect per-file errors
//! alongside the successful bundles, strict scans abort on the first.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{PackageError, Result};
use crate::manifest::PackageManifest;


/// File extension of bundle content files.
pub const BUNDLE_EXTENSION: &str = "mthds";

// ─── Scan Output ───────────────────────────────────────────────────

/// One pipe declared by a bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipeDecl {
    pub code: String,
    pub exported: bool,
}

/// A raw pipe reference found in a controller field, with the TOML
/// location it came from (e.g. `pipe.summarize.steps[0].pipe`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipeReference {
    pub raw: String,
    pub context: String,
}

/// The scanned facts of one bundle file.
#[derive(Clone, Debug)]
pub struct BundleMetadata {
    pub domain: String,
    pub main_pipe: Option<String>,
    pub pipes: Vec<PipeDecl>,
    pub references: Vec<PipeReference>,
    pub source: PathBuf,
}

impl BundleMetadata {
    /// Whether this bundle declares the given pipe code.
    pub fn declares(&self, code: &str) -> bool {
        self.pipes.iter().any(|p| p.code == code)
    }
}

/// A per-file scan failure (lenient mode collects these).
#[derive(Clone, Debug)]
pub struct ScanError {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning a directory tree for bundles.
#[derive(Clone, Debug, Default)]
pub struct BundleScan {
    pub bundles: Vec<BundleMetadata>,
    pub errors: Vec<ScanError>,
}

/// Failure handling for a scan pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanMode {
    /// Collect per-file errors, keep scanning.
    Lenient,
    /// Abort on the first malformed file.
    Strict,
}

/// Domain → exported pipe codes, rebuilt on every scan.
pub type DomainExports = BTreeMap<String, BTreeSet<String>>;

// ─── Scan ──────────────────────────────────────────────────────────

/// Scan `root` recursively for `.mthds` files and extract their metadata.
///
/// Files parse in parallel but results keep sorted-path order, so two
/// scans of the same tree agree. Dot-directories (`.git`, `.mthds`) are
/// not descended into.
pub fn scan_bundles_for_domain_info(root: &Path, mode: ScanMode) -> Result<BundleScan> {
    let mut files = Vec::new();
    collect_bundle_files(root, &mut files)?;
    files.sort();
    debug!(root = %root.display(), files = files.len(), "scanning bundles");

    let parsed: Vec<std::result::Result<BundleMetadata, ScanError>> = files
        .par_iter()
        .map(|path| parse_bundle_file(path))
        .collect();

    let mut scan = BundleScan::default();
    for item in parsed {
        match item {
            Ok(bundle) => scan.bundles.push(bundle),
            Err(err) => match mode {
                ScanMode::Strict => {
                    return Err(PackageError::BundleScan {
                        path: err.path,
                        reason: err.reason,
                    })
                }
                ScanMode::Lenient => scan.errors.push(err),
            },
        }
    }
    Ok(scan)
}

fn collect_bundle_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_bundle_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(BUNDLE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

// ─── Bundle Parse ──────────────────────────────────────────────────

fn parse_bundle_file(path: &Path) -> std::result::Result<BundleMetadata, ScanError> {
    let fail = |reason: String| ScanError {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    parse_bundle(&content, path).map_err(fail)
}

/// Parse one bundle document. `path` only labels the result.
pub fn parse_bundle(content: &str, path: &Path) -> std::result::Result<BundleMetadata, String> {
    let value: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;

    // `domain` / `main_pipe` live either at the top level or in [header].
    let header = value.get("header").filter(|h| h.is_table()).unwrap_or(&value);
    let domain = match header.get("domain").and_then(|v| v.as_str()) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => return Err("missing or invalid 'domain' field".to_string()),
    };
    let main_pipe = header
        .get("main_pipe")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut pipes = Vec::new();
    let mut references = Vec::new();
    if let Some(toml::Value::Table(pipe_section)) = value.get("pipe") {
        for (code, body) in pipe_section {
            let exported = body
                .get("exported")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            pipes.push(PipeDecl {
                code: code.clone(),
                exported,
            });
            if let toml::Value::Table(body) = body {
                collect_pipe_refs(code, body, &mut references);
            }
        }
    }

    Ok(BundleMetadata {
        domain,
        main_pipe,
        pipes,
        references,
        source: path.to_path_buf(),
    })
}

/// Pull pipe references out of a pipe's controller fields.
fn collect_pipe_refs(code: &str, body: &toml::Table, refs: &mut Vec<PipeReference>) {
    let mut push = |raw: &str, context: String| {
        refs.push(PipeReference {
            raw: raw.to_string(),
            context,
        })
    };

    for field in ["steps", "branches", "sub_pipes"] {
        if let Some(toml::Value::Array(items)) = body.get(field) {
            for (i, item) in items.iter().enumerate() {
                if let Some(target) = item.get("pipe").and_then(|v| v.as_str()) {
                    push(target, format!("pipe.{code}.{field}[{i}].pipe"));
                }
            }
        }
    }
    if let Some(target) = body.get("branch_pipe_code").and_then(|v| v.as_str()) {
        push(target, format!("pipe.{code}.branch_pipe_code"));
    }
}

// ─── Export Aggregation ────────────────────────────────────────────

/// Build the domain → public-pipes index from a scan.
///
/// Per domain: every pipe marked `exported`, every manifest `exports`
/// entry a bundle of that domain declares, and the main pipe (implicitly
/// exported). Bundles of one domain disagreeing on `main_pipe` keep the
/// first declaration, with a warning.
pub fn build_domain_exports_from_scan(
    bundles: &[BundleMetadata],
    manifest: &PackageManifest,
) -> DomainExports {
    let mut exports = DomainExports::new();
    let mut domain_main: BTreeMap<String, String> = BTreeMap::new();

    for bundle in bundles {
        let set = exports.entry(bundle.domain.clone()).or_default();
        for pipe in &bundle.pipes {
            if pipe.exported || manifest.declares_public(&pipe.code) {
                set.insert(pipe.code.clone());
            }
        }
        if let Some(main) = &bundle.main_pipe {
            match domain_main.get(&bundle.domain) {
                Some(existing) if existing != main => warn!(
                    domain = %bundle.domain,
                    kept = %existing,
                    ignored = %main,
                    "conflicting main_pipe declarations; keeping first"
                ),
                _ => {
                    domain_main.insert(bundle.domain.clone(), main.clone());
                }
            }
        }
    }

    for (domain, main) in domain_main {
        exports.entry(domain).or_default().insert(main);
    }

    // The manifest's main pipe is public in whichever domain declares it.
    if let Some(main) = &manifest.main_pipe {
        for bundle in bundles {
            if bundle.declares(main) {
                exports.entry(bundle.domain.clone()).or_default().insert(main.clone());
            }
        }
    }

    exports
}

/// Enforce that a declared `main_pipe` names a pipe some bundle declares.
pub fn verify_main_pipe(manifest: &PackageManifest, bundles: &[BundleMetadata]) -> Result<()> {
    let Some(main) = &manifest.main_pipe else {
        return Ok(());
    };
    if bundles.iter().any(|b| b.declares(main)) {
        return Ok(());
    }
    Err(PackageError::validation(
        "main_pipe",
        format!("pipe '{main}' is not declared by any bundle in the package"),
    ))
}
