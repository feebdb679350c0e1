//! Discovery of installed method packages on the filesystem.
//!
//! Two fixed roots are searched: the global `~/.mthds/methods` (override
//! with `$MTHDS_HOME`) and a project-local `<project>/.mthds/methods`.
//! Each subdirectory holding a valid `METHODS.toml` is one installed
//! method. Discovery is a fresh snapshot per call; unreadable or invalid
//! entries are skipped, never fatal.
//!
//! A discovery snapshot can also act as a `DependencySource`, letting the
//! resolver and installer draw on already-installed packages.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PackageError, Result};
use crate::hash;
use crate::manifest::{self, PackageManifest, MANIFEST_FILENAME};
use crate::resolve::DependencySource;
use crate::version::{self, Version};


// ─── Roots ─────────────────────────────────────────────────────────

/// Which search root an installed method came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RootKind {
    Global,
    Project,
}

/// Global methods directory: `$MTHDS_HOME/methods`, defaulting the home
/// part to `~/.mthds`.
pub fn global_methods_dir() -> Option<PathBuf> {
    let home = match std::env::var_os("MTHDS_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::var_os("HOME").map(PathBuf::from)?.join(".mthds"),
    };
    Some(home.join("methods"))
}

/// Project-local methods directory: `<project>/.mthds/methods`.
pub fn project_methods_dir(project_root: &Path) -> PathBuf {
    project_root.join(".mthds").join("methods")
}

// ─── Discovery ─────────────────────────────────────────────────────

/// One installed method: its manifest plus where it was found.
#[derive(Clone, Debug)]
pub struct InstalledMethod {
    /// Manifest `name` if present, otherwise the directory name.
    pub name: String,
    /// The method's directory.
    pub root: PathBuf,
    pub kind: RootKind,
    pub manifest: PackageManifest,
}

impl InstalledMethod {
    /// Pipe codes this method exposes: its `exports` plus `main_pipe`.
    pub fn exported_pipes(&self) -> BTreeSet<&str> {
        let mut pipes: BTreeSet<&str> = self.manifest.exports.iter().map(String::as_str).collect();
        if let Some(main) = &self.manifest.main_pipe {
            pipes.insert(main);
        }
        pipes
    }
}

/// Snapshot both fixed roots. `project_root` of `None` searches only the
/// global root.
pub fn discover_installed_methods(project_root: Option<&Path>) -> Vec<InstalledMethod> {
    let mut roots = Vec::new();
    if let Some(global) = global_methods_dir() {
        roots.push((RootKind::Global, global));
    }
    if let Some(project) = project_root {
        roots.push((RootKind::Project, project_methods_dir(project)));
    }
    discover_in_roots(&roots)
}

/// Snapshot an explicit list of roots, in order.
pub fn discover_in_roots(roots: &[(RootKind, PathBuf)]) -> Vec<InstalledMethod> {
    let mut methods = Vec::new();
    for (kind, root) in roots {
        if !root.is_dir() {
            continue;
        }
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot read methods root");
                continue;
            }
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            match load_method(&dir, *kind) {
                Ok(Some(method)) => methods.push(method),
                Ok(None) => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping invalid installed method");
                }
            }
        }
    }
    debug!(count = methods.len(), "discovered installed methods");
    methods
}

fn load_method(dir: &Path, kind: RootKind) -> Result<Option<InstalledMethod>> {
    let manifest_path = dir.join(MANIFEST_FILENAME);
    if !manifest_path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&manifest_path)?;
    let manifest = manifest::parse_manifest(&content)?;
    let name = match &manifest.name {
        Some(name) => name.clone(),
        None => dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string(),
    };
    Ok(Some(InstalledMethod {
        name,
        root: dir.to_path_buf(),
        kind,
        manifest,
    }))
}

// ─── Lookup ────────────────────────────────────────────────────────

/// Find the unique installed method with the given name.
///
/// Two methods of the same name (typically one global, one project-local)
/// are an error; there is no implicit precedence between the roots.
pub fn find_method_by_name<'a>(
    name: &str,
    methods: &'a [InstalledMethod],
) -> Result<&'a InstalledMethod> {
    let matches: Vec<&InstalledMethod> = methods.iter().filter(|m| m.name == name).collect();
    match matches.as_slice() {
        [] => Err(PackageError::MethodNotFound {
            name: name.to_string(),
        }),
        [only] => Ok(only),
        many => Err(PackageError::DuplicateMethodName {
            name: name.to_string(),
            locations: many.iter().map(|m| m.root.clone()).collect(),
        }),
    }
}

/// Find the unique installed method exporting the given pipe code.
pub fn find_method_by_exported_pipe<'a>(
    pipe_code: &str,
    methods: &'a [InstalledMethod],
) -> Result<&'a InstalledMethod> {
    let matches: Vec<&InstalledMethod> = methods
        .iter()
        .filter(|m| m.exported_pipes().contains(pipe_code))
        .collect();
    match matches.as_slice() {
        [] => Err(PackageError::PipeCodeNotFound {
            pipe_code: pipe_code.to_string(),
        }),
        [only] => Ok(only),
        many => Err(PackageError::AmbiguousPipeCode {
            pipe_code: pipe_code.to_string(),
            methods: many.iter().map(|m| m.name.clone()).collect(),
        }),
    }
}

// ─── Resolver Source ───────────────────────────────────────────────

/// A `DependencySource` over a discovery snapshot.
///
/// An address matches an installed method when the alias derived from the
/// address equals the method name, so `github.com/org/geo-utils` resolves
/// against a method installed as `geo_utils`.
pub struct InstalledSource {
    methods: Vec<InstalledMethod>,
}

impl InstalledSource {
    pub fn new(methods: Vec<InstalledMethod>) -> Self {
        Self { methods }
    }

    fn lookup(&self, address: &str) -> Result<&InstalledMethod> {
        let name = manifest::derive_alias(address);
        self.methods
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| PackageError::source(address, format!("no installed method named '{name}'")))
    }

    fn at_version<'a>(&'a self, address: &str, version: &Version) -> Result<&'a InstalledMethod> {
        let method = self.lookup(address)?;
        let installed = version::parse_version(&method.manifest.version)?;
        if &installed != version {
            return Err(PackageError::source(
                address,
                format!("installed version is {installed}, not {version}"),
            ));
        }
        Ok(method)
    }
}

impl DependencySource for InstalledSource {
    fn available_versions(&self, address: &str) -> Result<Vec<Version>> {
        let method = self.lookup(address)?;
        Ok(vec![version::parse_version(&method.manifest.version)?])
    }

    fn manifest(&self, address: &str, version: &Version) -> Result<PackageManifest> {
        Ok(self.at_version(address, version)?.manifest.clone())
    }

    fn content_hash(&self, address: &str, version: &Version) -> Result<String> {
        hash::hash_directory(&self.at_version(address, version)?.root)
    }

    fn fetch(&self, address: &str, version: &Version, dest: &Path) -> Result<String> {
        let method = self.at_version(address, version)?;
        copy_tree(&method.root, dest)?;
        hash::hash_directory(dest)
    }
}

/// Recursive copy, skipping `.git` the way directory hashing does.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let to = dest.join(&name);
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
