use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PackageError, Result};
use crate::manifest::{self, Constraint, PackageDependency, PackageManifest, MANIFEST_FILENAME};
use crate::version::{select_highest, Version};

use super::{DependencySource, ResolvedDependency, ResolvedGraph, ResolvedReference};

/// Upper bound on fixpoint rounds. Each round either converges or changes
/// at least one selection; oscillation past this bound is reported as a
/// conflict on the first address still in play.
const MAX_ROUNDS: usize = 32;

/// Resolve the dependency graph of `root`.
///
/// `root_dir` anchors relative `path` overrides declared by the root
/// manifest. Local overrides are pinned to the manifest currently at their
/// path and are not traversed transitively; registry dependencies are
/// resolved to the highest version satisfying every accumulated constraint.
pub fn resolve(
    root: &PackageManifest,
    root_dir: &Path,
    source: &dyn DependencySource,
) -> Result<ResolvedGraph> {
    Resolution::new(root, root_dir, source)?.run()
}

// ─── Resolution State ──────────────────────────────────────────────

struct Resolution<'a> {
    root: &'a PackageManifest,
    source: &'a dyn DependencySource,
    /// Root-level `path` overrides, pinned once up front. Pinned addresses
    /// never take part in version resolution.
    locals: BTreeMap<String, LocalPin>,
    versions_cache: BTreeMap<String, Vec<Version>>,
    manifest_cache: BTreeMap<(String, Version), PackageManifest>,
}

/// A pinned local override: alias, declared path, manifest found there.
struct LocalPin {
    alias: String,
    declared: PathBuf,
    manifest: PackageManifest,
}

/// Constraint and alias state accumulated during one traversal pass.
#[derive(Default)]
struct Pass {
    /// Every constraint contributed anywhere in the tree, per address.
    constraints: BTreeMap<String, Vec<Constraint>>,
    /// Version used to expand each address during this pass.
    expanded_at: BTreeMap<String, Version>,
    /// Alias of the first declaration encountered per address.
    aliases: BTreeMap<String, String>,
}

impl<'a> Resolution<'a> {
    fn new(
        root: &'a PackageManifest,
        root_dir: &Path,
        source: &'a dyn DependencySource,
    ) -> Result<Self> {
        let mut locals = BTreeMap::new();
        for dep in &root.dependencies {
            if let Some(path) = &dep.path {
                locals.insert(dep.address.clone(), pin_local(dep, root_dir, path)?);
            }
        }
        Ok(Self {
            root,
            source,
            locals,
            versions_cache: BTreeMap::new(),
            manifest_cache: BTreeMap::new(),
        })
    }

    fn run(&mut self) -> Result<ResolvedGraph> {
        let mut prev_picks: BTreeMap<String, Version> = BTreeMap::new();

        for round in 0..MAX_ROUNDS {
            let pass = self.traverse(&prev_picks)?;

            // Final selection from the complete constraint sets of this pass.
            let mut picks: BTreeMap<String, Version> = BTreeMap::new();
            for (address, constraints) in &pass.constraints {
                let available = self.versions(address)?;
                let reqs: Vec<_> = constraints.iter().map(|c| c.req.clone()).collect();
                let selected = select_highest(&available, &reqs).ok_or_else(|| {
                    PackageError::DependencyConflict {
                        address: address.clone(),
                        constraints: constraints.iter().map(|c| c.raw.clone()).collect(),
                    }
                })?;
                picks.insert(address.clone(), selected);
            }

            if picks == pass.expanded_at {
                debug!(rounds = round + 1, packages = picks.len(), "resolution converged");
                return self.build_graph(&pass, &picks);
            }
            prev_picks = picks;
        }

        let pass = self.traverse(&prev_picks)?;
        let (address, constraints) = pass
            .constraints
            .into_iter()
            .next()
            .unwrap_or_default();
        Err(PackageError::DependencyConflict {
            address,
            constraints: constraints.into_iter().map(|c| c.raw).collect(),
        })
    }

    fn traverse(&mut self, prev_picks: &BTreeMap<String, Version>) -> Result<Pass> {
        let mut pass = Pass::default();
        let mut chain: Vec<String> = Vec::new();
        let root_deps = self.root.dependencies.clone();
        self.walk(&root_deps, &mut chain, prev_picks, &mut pass)?;
        Ok(pass)
    }

    fn walk(
        &mut self,
        deps: &[PackageDependency],
        chain: &mut Vec<String>,
        prev_picks: &BTreeMap<String, Version>,
        pass: &mut Pass,
    ) -> Result<()> {
        for dep in deps {
            if dep.path.is_some() {
                // Root-level overrides were pinned up front; relative paths
                // declared by a fetched package are meaningless before
                // materialization and are not followed.
                continue;
            }

            let address = &dep.address;

            if self.locals.contains_key(address) {
                debug!(address = %address, "address is locally pinned; registry constraint skipped");
                continue;
            }

            if let Some(i) = chain.iter().position(|a| a == address) {
                let mut cycle = chain[i..].to_vec();
                cycle.push(address.clone());
                return Err(PackageError::CyclicDependency { chain: cycle });
            }

            pass.constraints
                .entry(address.clone())
                .or_default()
                .push(dep.constraint.clone());
            pass.aliases
                .entry(address.clone())
                .or_insert_with(|| dep.alias.clone());

            if pass.expanded_at.contains_key(address) {
                continue;
            }

            // Expand with the previous round's selection when there is one;
            // otherwise pick greedily from the constraints seen so far.
            let version = match prev_picks.get(address) {
                Some(v) => v.clone(),
                None => {
                    let available = self.versions(address)?;
                    let constraints = &pass.constraints[address];
                    let reqs: Vec<_> = constraints.iter().map(|c| c.req.clone()).collect();
                    select_highest(&available, &reqs).ok_or_else(|| {
                        PackageError::DependencyConflict {
                            address: address.clone(),
                            constraints: constraints.iter().map(|c| c.raw.clone()).collect(),
                        }
                    })?
                }
            };
            pass.expanded_at.insert(address.clone(), version.clone());

            let sub_manifest = self.manifest_at(address, &version)?;
            let sub_deps = sub_manifest.dependencies.clone();
            chain.push(address.clone());
            let walked = self.walk(&sub_deps, chain, prev_picks, pass);
            chain.pop();
            walked?;
        }
        Ok(())
    }

    fn build_graph(
        &mut self,
        pass: &Pass,
        picks: &BTreeMap<String, Version>,
    ) -> Result<ResolvedGraph> {
        let mut nodes = BTreeMap::new();

        for (address, pin) in &self.locals {
            let version = crate::version::parse_version(&pin.manifest.version)?;
            nodes.insert(
                address.clone(),
                ResolvedDependency {
                    address: address.clone(),
                    alias: pin.alias.clone(),
                    version,
                    reference: ResolvedReference::Path {
                        path: pin.declared.clone(),
                    },
                    requires: remote_requires(&pin.manifest),
                },
            );
        }

        for (address, version) in picks {
            let hash = self.source.content_hash(address, version)?;
            let sub_manifest = self.manifest_at(address, version)?;
            nodes.insert(
                address.clone(),
                ResolvedDependency {
                    address: address.clone(),
                    alias: pass.aliases[address].clone(),
                    version: version.clone(),
                    reference: ResolvedReference::Registry { hash },
                    requires: remote_requires(&sub_manifest),
                },
            );
        }

        Ok(ResolvedGraph { nodes })
    }

    fn versions(&mut self, address: &str) -> Result<Vec<Version>> {
        if !self.versions_cache.contains_key(address) {
            let mut versions = self.source.available_versions(address)?;
            versions.sort();
            self.versions_cache.insert(address.to_string(), versions);
        }
        Ok(self.versions_cache[address].clone())
    }

    fn manifest_at(&mut self, address: &str, version: &Version) -> Result<PackageManifest> {
        let key = (address.to_string(), version.clone());
        if !self.manifest_cache.contains_key(&key) {
            let manifest = self.source.manifest(address, version)?;
            self.manifest_cache.insert(key.clone(), manifest);
        }
        Ok(self.manifest_cache[&key].clone())
    }
}

/// Pin a root-level `path` override to the manifest currently at that path.
fn pin_local(dep: &PackageDependency, root_dir: &Path, path: &Path) -> Result<LocalPin> {
    let dir = root_dir.join(path);
    let manifest_path = dir.join(MANIFEST_FILENAME);
    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        PackageError::source(
            dep.address.clone(),
            format!(
                "path override '{}' has no readable manifest at '{}': {e}",
                path.display(),
                manifest_path.display()
            ),
        )
    })?;
    let manifest = manifest::parse_manifest(&content)?;

    debug!(
        alias = %dep.alias,
        address = %dep.address,
        version = %manifest.version,
        "pinned local path override"
    );
    Ok(LocalPin {
        alias: dep.alias.clone(),
        declared: path.to_path_buf(),
        manifest,
    })
}

/// Addresses of a manifest's remote (non-path) dependencies.
fn remote_requires(manifest: &PackageManifest) -> BTreeSet<String> {
    manifest
        .dependencies
        .iter()
        .filter(|d| d.path.is_none())
        .map(|d| d.address.clone())
        .collect()
}
