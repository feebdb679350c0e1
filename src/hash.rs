//! BLAKE3 content hashing for lock references and fingerprints.
//!
//! References are rendered as `blake3:<64 hex chars>`. Directory hashes are
//! deterministic across platforms: files are sorted by POSIX-normalized
//! relative path and fed to one hasher as `path bytes + content bytes`,
//! with `.git` subtrees skipped.

use std::path::{Path, PathBuf};

use crate::error::{PackageError, Result};

/// Prefix of every content-hash reference.
pub const HASH_PREFIX: &str = "blake3:";

/// Hash a byte string into a `blake3:<hex>` reference.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", blake3::hash(bytes).to_hex())
}

/// True for a well-formed `blake3:<64 hex>` reference.
pub fn is_valid_reference(s: &str) -> bool {
    match s.strip_prefix(HASH_PREFIX) {
        Some(hex) => hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Hash a directory's contents into a `blake3:<hex>` reference.
pub fn hash_directory(directory: &Path) -> Result<String> {
    if !directory.is_dir() {
        return Err(PackageError::source(
            directory.display().to_string(),
            "cannot hash: not a directory",
        ));
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    collect_files(directory, directory, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (relative, path) in files {
        hasher.update(relative.as_bytes());
        hasher.update(&std::fs::read(&path)?);
    }
    Ok(format!("{HASH_PREFIX}{}", hasher.finalize().to_hex()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_shape() {
        let reference = hash_bytes(b"content");
        assert!(is_valid_reference(&reference));
        assert!(!is_valid_reference("sha256:abc"));
        assert!(!is_valid_reference("blake3:short"));
    }

    #[test]
    fn test_directory_hash_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("b.mthds"), "b").unwrap();
        std::fs::write(tmp.path().join("sub/a.mthds"), "a").unwrap();
        let first = hash_directory(tmp.path()).unwrap();
        let second = hash_directory(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert!(is_valid_reference(&first));
    }

    #[test]
    fn test_directory_hash_sees_content_changes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.mthds"), "one").unwrap();
        let before = hash_directory(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("a.mthds"), "two").unwrap();
        let after = hash_directory(tmp.path()).unwrap();
        assert_ne!(before, after);
    }
}
