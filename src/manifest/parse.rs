use std::path::PathBuf;

use toml::Value;

use crate::error::{PackageError, Result};
use crate::version::{self, VersionReq};

use super::{
    derive_alias, is_snake_case, is_valid_address, is_valid_name, Constraint, PackageDependency,
    PackageManifest,
};

const KNOWN_TOP_LEVEL: [&str; 5] = ["name", "version", "main_pipe", "exports", "dependencies"];
const KNOWN_DEP_FIELDS: [&str; 4] = ["address", "version", "path", "alias"];

// ─── Parsing ───────────────────────────────────────────────────────

/// Parse and validate `METHODS.toml` content into a `PackageManifest`.
///
/// The whole validation pass runs over the raw TOML value: unknown fields,
/// pattern checks, alias derivation, and duplicate-alias detection all
/// happen before the typed manifest is constructed, so an invalid manifest
/// can never exist as a value.
pub fn parse_manifest(content: &str) -> Result<PackageManifest> {
    let value: Value = content
        .parse()
        .map_err(|e: toml::de::Error| {
            PackageError::validation("manifest", format!("invalid TOML: {e}"))
        })?;
    let table = value.as_table().ok_or_else(|| {
        PackageError::validation("manifest", "top level must be a table")
    })?;

    for key in table.keys() {
        if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
            return Err(PackageError::validation(
                key.clone(),
                "unknown top-level field in METHODS.toml",
            ));
        }
    }

    let name = match table.get("name") {
        None => None,
        Some(v) => {
            let s = expect_str(v, "name")?;
            if !is_valid_name(s) {
                return Err(PackageError::validation(
                    "name",
                    format!(
                        "invalid package name '{s}'; expected a lowercase identifier \
                         matching ^[a-z][a-z0-9_-]{{1,24}}$"
                    ),
                ));
            }
            Some(s.to_string())
        }
    };

    let version_value = table
        .get("version")
        .ok_or_else(|| PackageError::validation("version", "missing required field"))?;
    let version_str = expect_str(version_value, "version")?;
    version::parse_version(version_str)?;

    let main_pipe = match table.get("main_pipe") {
        None => None,
        Some(v) => {
            let s = expect_str(v, "main_pipe")?;
            if !is_snake_case(s) {
                return Err(PackageError::validation(
                    "main_pipe",
                    format!("invalid pipe code '{s}'; pipe codes are snake_case"),
                ));
            }
            Some(s.to_string())
        }
    };

    let mut exports = Vec::new();
    if let Some(v) = table.get("exports") {
        let items = v
            .as_array()
            .ok_or_else(|| PackageError::validation("exports", "expected an array of pipe codes"))?;
        for (i, item) in items.iter().enumerate() {
            let code = expect_str(item, &format!("exports[{i}]"))?;
            if !is_snake_case(code) {
                return Err(PackageError::validation(
                    format!("exports[{i}]"),
                    format!("invalid pipe code '{code}'; pipe codes are snake_case"),
                ));
            }
            if !exports.iter().any(|e| e == code) {
                exports.push(code.to_string());
            }
        }
    }

    let mut dependencies = Vec::new();
    match table.get("dependencies") {
        None => {}
        Some(Value::Table(deps)) => {
            for (alias, entry) in deps {
                let field = format!("dependencies.{alias}");
                dependencies.push(parse_dependency(Some(alias.as_str()), entry, &field)?);
            }
        }
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                let field = format!("dependencies[{i}]");
                dependencies.push(parse_dependency(None, entry, &field)?);
            }
        }
        Some(_) => {
            return Err(PackageError::validation(
                "dependencies",
                "expected a table of alias = { address, version, path? } entries",
            ));
        }
    }

    // Aliases must be unique, including collisions introduced by derivation.
    let mut seen = std::collections::BTreeSet::new();
    for dep in &dependencies {
        if !seen.insert(dep.alias.clone()) {
            return Err(PackageError::validation(
                format!("dependencies.{}", dep.alias),
                format!("duplicate dependency alias '{}'", dep.alias),
            ));
        }
    }
    dependencies.sort_by(|a, b| a.alias.cmp(&b.alias));

    Ok(PackageManifest {
        name,
        version: version_str.to_string(),
        main_pipe,
        exports,
        dependencies,
    })
}

fn parse_dependency(
    alias_key: Option<&str>,
    value: &Value,
    field: &str,
) -> Result<PackageDependency> {
    let (address, alias, constraint, path) = match value {
        // Shorthand: alias = "host/org/repo"
        Value::String(address) => (
            address.clone(),
            alias_key.map(str::to_string),
            Constraint::default_constraint(),
            None,
        ),
        Value::Table(entry) => {
            for key in entry.keys() {
                if !KNOWN_DEP_FIELDS.contains(&key.as_str()) {
                    return Err(PackageError::validation(
                        format!("{field}.{key}"),
                        "unknown dependency field",
                    ));
                }
            }
            let address = entry
                .get("address")
                .ok_or_else(|| {
                    PackageError::validation(
                        format!("{field}.address"),
                        "dependency entry is missing the required 'address'",
                    )
                })
                .and_then(|v| expect_str(v, &format!("{field}.address")))?
                .to_string();

            let alias = match entry.get("alias") {
                None => alias_key.map(str::to_string),
                Some(v) => {
                    let s = expect_str(v, &format!("{field}.alias"))?;
                    if let Some(key) = alias_key {
                        if key != s {
                            return Err(PackageError::validation(
                                format!("{field}.alias"),
                                format!("alias '{s}' conflicts with the table key '{key}'"),
                            ));
                        }
                    }
                    Some(s.to_string())
                }
            };

            let constraint = match entry.get("version") {
                None => Constraint::default_constraint(),
                Some(v) => {
                    let s = expect_str(v, &format!("{field}.version"))?;
                    let req = VersionReq::parse(s.trim()).map_err(|e| {
                        PackageError::validation(
                            format!("{field}.version"),
                            format!("invalid version constraint '{s}': {e}"),
                        )
                    })?;
                    Constraint {
                        req,
                        raw: s.trim().to_string(),
                    }
                }
            };

            let path = match entry.get("path") {
                None => None,
                Some(v) => Some(PathBuf::from(expect_str(v, &format!("{field}.path"))?)),
            };

            (address, alias, constraint, path)
        }
        _ => {
            return Err(PackageError::validation(
                field,
                "expected an address string or a dependency table",
            ));
        }
    };

    if !is_valid_address(&address) {
        return Err(PackageError::validation(
            format!("{field}.address"),
            format!(
                "invalid package address '{address}'; expected hostname/path form \
                 like 'github.com/org/repo'"
            ),
        ));
    }

    let alias = alias.unwrap_or_else(|| derive_alias(&address));
    if !is_snake_case(&alias) {
        return Err(PackageError::validation(
            format!("{field}.alias"),
            format!("invalid dependency alias '{alias}'; aliases are snake_case"),
        ));
    }

    Ok(PackageDependency {
        address,
        alias,
        constraint,
        path,
    })
}

fn expect_str<'v>(value: &'v Value, field: &str) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        PackageError::validation(field, format!("expected a string, got {}", value.type_str()))
    })
}

// ─── Serialization ─────────────────────────────────────────────────

/// Render a manifest as canonical TOML.
///
/// Output is deterministic (dependencies sorted by alias, fixed field
/// order), so it doubles as the input to the lock file fingerprint: two
/// manifests that parse to the same model always fingerprint identically.
pub fn serialize_manifest(manifest: &PackageManifest) -> String {
    let mut out = String::new();

    if let Some(name) = &manifest.name {
        out.push_str(&format!("name = \"{name}\"\n"));
    }
    out.push_str(&format!("version = \"{}\"\n", manifest.version));
    if let Some(main_pipe) = &manifest.main_pipe {
        out.push_str(&format!("main_pipe = \"{main_pipe}\"\n"));
    }
    if !manifest.exports.is_empty() {
        let list = manifest
            .exports
            .iter()
            .map(|code| format!("\"{code}\""))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("exports = [{list}]\n"));
    }

    if !manifest.dependencies.is_empty() {
        out.push_str("\n[dependencies]\n");
        let mut deps: Vec<&PackageDependency> = manifest.dependencies.iter().collect();
        deps.sort_by(|a, b| a.alias.cmp(&b.alias));
        for dep in deps {
            let mut fields = vec![
                format!("address = \"{}\"", dep.address),
                format!("version = \"{}\"", dep.constraint.raw),
            ];
            if let Some(path) = &dep.path {
                fields.push(format!("path = \"{}\"", path.display()));
            }
            out.push_str(&format!("{} = {{ {} }}\n", dep.alias, fields.join(", ")));
        }
    }

    out
}
