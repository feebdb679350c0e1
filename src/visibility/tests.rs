use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::bundle::{build_domain_exports_from_scan, parse_bundle, BundleMetadata};
use crate::manifest::parse_manifest;

use super::{check, PipeRef, ViolationKind};

fn bundle(toml: &str, name: &str) -> BundleMetadata {
    parse_bundle(toml, Path::new(name)).unwrap()
}

fn no_dep_exports() -> BTreeMap<String, BTreeSet<String>> {
    BTreeMap::new()
}

#[test]
fn parses_bare_and_qualified_references() {
    assert_eq!(
        PipeRef::parse("fetch_raw").unwrap(),
        PipeRef { head: None, code: "fetch_raw".into() }
    );
    assert_eq!(
        PipeRef::parse("geo.locate").unwrap(),
        PipeRef { head: Some("geo".into()), code: "locate".into() }
    );
    // Dotted domain paths keep everything before the last dot as the head.
    assert_eq!(
        PipeRef::parse("weather.forecast.summarize").unwrap(),
        PipeRef { head: Some("weather.forecast".into()), code: "summarize".into() }
    );
}

#[test]
fn rejects_malformed_references() {
    assert!(PipeRef::parse("").is_err());
    assert!(PipeRef::parse(".locate").is_err());
    assert!(PipeRef::parse("geo.").is_err());
    assert!(PipeRef::parse("geo..locate").is_err());
    assert!(PipeRef::parse("Geo.locate").is_err());
}

#[test]
fn same_domain_references_are_always_allowed() {
    let bundles = vec![bundle(
        r#"
domain = "weather"

[pipe.summarize]
exported = true
steps = [{ pipe = "fetch_raw" }, { pipe = "weather.fetch_raw" }]

[pipe.fetch_raw]
"#,
        "weather.mthds",
    )];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let violations = check(&manifest, &exports, &bundles, &no_dep_exports());
    assert!(violations.is_empty(), "{violations:?}");
}

#[test]
fn cross_domain_reference_to_private_pipe_is_a_violation() {
    let bundles = vec![
        bundle(
            "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
            "weather.mthds",
        ),
        bundle("domain = \"geo\"\n\n[pipe.locate]\n", "geo.mthds"),
    ];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let violations = check(&manifest, &exports, &bundles, &no_dep_exports());
    assert_eq!(violations.len(), 1);
    let v = &violations[0];
    assert_eq!(v.kind, ViolationKind::PrivatePipe);
    assert_eq!(v.pipe_ref, "geo.locate");
    assert_eq!(v.origin_domain, "weather");
    assert_eq!(v.target, "geo");
    assert_eq!(v.context, "pipe.summarize.steps[0].pipe");
}

#[test]
fn cross_domain_reference_to_exported_pipe_is_allowed() {
    let bundles = vec![
        bundle(
            "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
            "weather.mthds",
        ),
        bundle("domain = \"geo\"\n\n[pipe.locate]\nexported = true\n", "geo.mthds"),
    ];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    assert!(check(&manifest, &exports, &bundles, &no_dep_exports()).is_empty());
}

#[test]
fn main_pipe_is_implicitly_public_across_domains() {
    let bundles = vec![
        bundle(
            "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
            "weather.mthds",
        ),
        bundle("domain = \"geo\"\nmain_pipe = \"locate\"\n\n[pipe.locate]\n", "geo.mthds"),
    ];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    assert!(check(&manifest, &exports, &bundles, &no_dep_exports()).is_empty());
}

#[test]
fn bare_reference_to_foreign_pipe_is_undeclared() {
    let bundles = vec![bundle(
        "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"locate\" }]\n",
        "weather.mthds",
    )];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let violations = check(&manifest, &exports, &bundles, &no_dep_exports());
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::UndeclaredDependencyReference);
    assert_eq!(violations[0].target, "locate");
}

#[test]
fn undeclared_alias_head_is_a_violation() {
    let bundles = vec![bundle(
        "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
        "weather.mthds",
    )];
    // No dependency named geo and no local geo domain.
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let violations = check(&manifest, &exports, &bundles, &no_dep_exports());
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::UndeclaredDependencyReference);
    assert_eq!(violations[0].target, "geo");
}

#[test]
fn declared_alias_passes_without_dependency_exports() {
    let bundles = vec![bundle(
        "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
        "weather.mthds",
    )];
    let manifest = parse_manifest(
        "version = \"1.0.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", version = \"^1.0.0\" }\n",
    )
    .unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    // The dependency has not been scanned; the alias routing alone is valid.
    assert!(check(&manifest, &exports, &bundles, &no_dep_exports()).is_empty());
}

#[test]
fn declared_alias_is_checked_against_known_dependency_exports() {
    let bundles = vec![bundle(
        r#"
domain = "weather"

[pipe.summarize]
steps = [{ pipe = "geo.locate" }, { pipe = "geo.internal_step" }]
"#,
        "weather.mthds",
    )];
    let manifest = parse_manifest(
        "version = \"1.0.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", version = \"^1.0.0\" }\n",
    )
    .unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let mut dep_exports = BTreeMap::new();
    dep_exports.insert("geo".to_string(), BTreeSet::from(["locate".to_string()]));

    let violations = check(&manifest, &exports, &bundles, &dep_exports);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::PrivatePipe);
    assert_eq!(violations[0].pipe_ref, "geo.internal_step");
}

#[test]
fn alias_shadows_a_same_named_local_domain() {
    let bundles = vec![
        bundle(
            "domain = \"weather\"\n\n[pipe.summarize]\nsteps = [{ pipe = \"geo.locate\" }]\n",
            "weather.mthds",
        ),
        // Local domain also named geo, with locate exported.
        bundle("domain = \"geo\"\n\n[pipe.locate]\nexported = true\n", "geo.mthds"),
    ];
    let manifest = parse_manifest(
        "version = \"1.0.0\"\n\n[dependencies]\ngeo = { address = \"github.com/org/geo-utils\", version = \"^1.0.0\" }\n",
    )
    .unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    // The alias wins: the dependency does not export locate, so the local
    // domain's export cannot satisfy the reference.
    let mut dep_exports = BTreeMap::new();
    dep_exports.insert("geo".to_string(), BTreeSet::from(["other".to_string()]));

    let violations = check(&manifest, &exports, &bundles, &dep_exports);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::PrivatePipe);
}

#[test]
fn all_violations_are_collected_not_short_circuited() {
    let bundles = vec![bundle(
        r#"
domain = "weather"

[pipe.summarize]
steps = [{ pipe = "geo.locate" }, { pipe = "missing_pipe" }, { pipe = "atlas.render" }]
"#,
        "weather.mthds",
    )];
    let manifest = parse_manifest("version = \"1.0.0\"\n").unwrap();
    let exports = build_domain_exports_from_scan(&bundles, &manifest);

    let violations = check(&manifest, &exports, &bundles, &no_dep_exports());
    assert_eq!(violations.len(), 3);
}
