use std::collections::BTreeMap;
use std::path::Path;

use crate::error::PackageError;
use crate::hash;
use crate::manifest::parse_manifest;
use crate::version::{parse_version, Version};

use super::{resolve, DependencySource, ResolvedReference};

/// In-memory registry: address -> version -> manifest TOML.
#[derive(Default)]
pub(crate) struct TestSource {
    packages: BTreeMap<String, BTreeMap<Version, String>>,
}

impl TestSource {
    pub(crate) fn publish(&mut self, address: &str, version: &str, manifest_toml: &str) {
        self.packages
            .entry(address.to_string())
            .or_default()
            .insert(parse_version(version).unwrap(), manifest_toml.to_string());
    }

    fn content(&self, address: &str, version: &Version) -> crate::error::Result<&String> {
        self.packages
            .get(address)
            .and_then(|versions| versions.get(version))
            .ok_or_else(|| PackageError::source(address, format!("no published version {version}")))
    }
}

impl DependencySource for TestSource {
    fn available_versions(&self, address: &str) -> crate::error::Result<Vec<Version>> {
        match self.packages.get(address) {
            Some(versions) => Ok(versions.keys().cloned().collect()),
            None => Err(PackageError::source(address, "unknown address")),
        }
    }

    fn manifest(&self, address: &str, version: &Version) -> crate::error::Result<crate::manifest::PackageManifest> {
        parse_manifest(self.content(address, version)?)
    }

    fn content_hash(&self, address: &str, version: &Version) -> crate::error::Result<String> {
        Ok(hash::hash_bytes(self.content(address, version)?.as_bytes()))
    }

    fn fetch(&self, address: &str, version: &Version, dest: &Path) -> crate::error::Result<String> {
        let content = self.content(address, version)?;
        std::fs::write(dest.join(crate::manifest::MANIFEST_FILENAME), content)?;
        Ok(hash::hash_bytes(content.as_bytes()))
    }
}

fn leaf(version: &str) -> String {
    format!("version = \"{version}\"\n")
}

fn root(deps: &str) -> crate::manifest::PackageManifest {
    parse_manifest(&format!("version = \"0.1.0\"\n\n[dependencies]\n{deps}")).unwrap()
}

#[test]
fn resolves_highest_satisfying_version() {
    let mut source = TestSource::default();
    source.publish("github.com/org/geo-utils", "1.2.0", &leaf("1.2.0"));
    source.publish("github.com/org/geo-utils", "1.2.4", &leaf("1.2.4"));
    source.publish("github.com/org/geo-utils", "2.0.0", &leaf("2.0.0"));

    let manifest = root("geo = { address = \"github.com/org/geo-utils\", version = \"^1.2.0\" }\n");
    let graph = resolve(&manifest, Path::new("."), &source).unwrap();

    assert_eq!(graph.len(), 1);
    let dep = graph.get("github.com/org/geo-utils").unwrap();
    assert_eq!(dep.version, parse_version("1.2.4").unwrap());
    assert_eq!(dep.alias, "geo");
    assert!(matches!(&dep.reference, ResolvedReference::Registry { hash } if hash::is_valid_reference(hash)));
}

#[test]
fn resolves_transitive_dependencies() {
    let mut source = TestSource::default();
    source.publish(
        "github.com/org/weather",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", version = \"^1.0.0\" }\n",
    );
    source.publish("github.com/org/geo-utils", "1.3.0", &leaf("1.3.0"));

    let manifest = root("weather = { address = \"github.com/org/weather\", version = \"^1.0.0\" }\n");
    let graph = resolve(&manifest, Path::new("."), &source).unwrap();

    assert_eq!(graph.len(), 2);
    let weather = graph.get("github.com/org/weather").unwrap();
    assert!(weather.requires.contains("github.com/org/geo-utils"));
    let geo = graph.get("github.com/org/geo-utils").unwrap();
    assert_eq!(geo.version, parse_version("1.3.0").unwrap());
}

#[test]
fn diamond_constraints_narrow_the_selection() {
    let mut source = TestSource::default();
    source.publish(
        "github.com/org/a",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\nshared = { address = \"github.com/org/shared\", version = \"^1.0.0\" }\n",
    );
    source.publish(
        "github.com/org/b",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\nshared = { address = \"github.com/org/shared\", version = \"~1.1.0\" }\n",
    );
    source.publish("github.com/org/shared", "1.1.3", &leaf("1.1.3"));
    source.publish("github.com/org/shared", "1.2.0", &leaf("1.2.0"));

    let manifest = root(
        "a = { address = \"github.com/org/a\", version = \"^1.0.0\" }\nb = { address = \"github.com/org/b\", version = \"^1.0.0\" }\n",
    );
    let graph = resolve(&manifest, Path::new("."), &source).unwrap();

    // ^1.0.0 allows 1.2.0 but ~1.1.0 caps the pick at 1.1.3.
    let shared = graph.get("github.com/org/shared").unwrap();
    assert_eq!(shared.version, parse_version("1.1.3").unwrap());
}

#[test]
fn disjoint_constraints_report_every_requirement() {
    let mut source = TestSource::default();
    source.publish(
        "github.com/org/a",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\nshared = { address = \"github.com/org/shared\", version = \"^1.0.0\" }\n",
    );
    source.publish(
        "github.com/org/b",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\nshared = { address = \"github.com/org/shared\", version = \"^2.0.0\" }\n",
    );
    source.publish("github.com/org/shared", "1.4.0", &leaf("1.4.0"));
    source.publish("github.com/org/shared", "2.1.0", &leaf("2.1.0"));

    let manifest = root(
        "a = { address = \"github.com/org/a\", version = \"^1.0.0\" }\nb = { address = \"github.com/org/b\", version = \"^1.0.0\" }\n",
    );
    let err = resolve(&manifest, Path::new("."), &source).unwrap_err();
    match err {
        PackageError::DependencyConflict { address, constraints } => {
            assert_eq!(address, "github.com/org/shared");
            assert!(constraints.contains(&"^1.0.0".to_string()));
            assert!(constraints.contains(&"^2.0.0".to_string()));
        }
        other => panic!("expected conflict, got {other}"),
    }
}

#[test]
fn cycles_are_reported_with_the_offending_chain() {
    let mut source = TestSource::default();
    source.publish(
        "github.com/org/a",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\nb = { address = \"github.com/org/b\", version = \"^1.0.0\" }\n",
    );
    source.publish(
        "github.com/org/b",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\na = { address = \"github.com/org/a\", version = \"^1.0.0\" }\n",
    );

    let manifest = root("a = { address = \"github.com/org/a\", version = \"^1.0.0\" }\n");
    let err = resolve(&manifest, Path::new("."), &source).unwrap_err();
    match err {
        PackageError::CyclicDependency { chain } => {
            assert_eq!(chain.first(), chain.last());
            assert!(chain.contains(&"github.com/org/b".to_string()));
        }
        other => panic!("expected cycle, got {other}"),
    }
}

#[test]
fn resolution_is_deterministic() {
    let mut source = TestSource::default();
    source.publish(
        "github.com/org/weather",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", version = \"^1.0.0\" }\n",
    );
    source.publish("github.com/org/geo-utils", "1.0.0", &leaf("1.0.0"));
    source.publish("github.com/org/geo-utils", "1.5.0", &leaf("1.5.0"));

    let manifest = root("weather = { address = \"github.com/org/weather\", version = \"^1.0.0\" }\n");
    let first = resolve(&manifest, Path::new("."), &source).unwrap();
    let second = resolve(&manifest, Path::new("."), &source).unwrap();

    let a: Vec<_> = first.nodes.values().map(|d| (d.address.clone(), d.version.clone())).collect();
    let b: Vec<_> = second.nodes.values().map(|d| (d.address.clone(), d.version.clone())).collect();
    assert_eq!(a, b);
}

#[test]
fn path_override_bypasses_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local-geo");
    std::fs::create_dir_all(&local).unwrap();
    std::fs::write(local.join("METHODS.toml"), "version = \"9.9.9\"\n").unwrap();

    // Registry is empty for this address; the override must not consult it.
    let source = TestSource::default();
    let manifest = parse_manifest(
        "version = \"0.1.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", path = \"local-geo\" }\n",
    )
    .unwrap();

    let graph = resolve(&manifest, dir.path(), &source).unwrap();
    let dep = graph.get("github.com/org/geo-utils").unwrap();
    assert_eq!(dep.version, parse_version("9.9.9").unwrap());
    assert!(matches!(&dep.reference, ResolvedReference::Path { path } if path == Path::new("local-geo")));
}

#[test]
fn later_constraints_can_force_a_downgrade_and_prune_subtrees() {
    let mut source = TestSource::default();
    // p 2.0.0 pulls in q; p 1.0.0 has no dependencies. r caps p at ^1.0,
    // so the first greedy expansion of p 2.0.0 must be re-done and q must
    // not survive into the final graph.
    source.publish("github.com/org/p", "1.0.0", &leaf("1.0.0"));
    source.publish(
        "github.com/org/p",
        "2.0.0",
        "version = \"2.0.0\"\n\n[dependencies]\nq = { address = \"github.com/org/q\", version = \"^1.0.0\" }\n",
    );
    source.publish("github.com/org/q", "1.0.0", &leaf("1.0.0"));
    source.publish(
        "github.com/org/r",
        "1.0.0",
        "version = \"1.0.0\"\n\n[dependencies]\np = { address = \"github.com/org/p\", version = \"^1.0.0\" }\n",
    );

    let manifest = root(
        "p = { address = \"github.com/org/p\", version = \">=1.0.0\" }\nr = { address = \"github.com/org/r\", version = \"^1.0.0\" }\n",
    );
    let graph = resolve(&manifest, Path::new("."), &source).unwrap();

    assert_eq!(graph.get("github.com/org/p").unwrap().version, parse_version("1.0.0").unwrap());
    assert!(graph.get("github.com/org/q").is_none());
    assert!(graph.get("github.com/org/r").is_some());
}
