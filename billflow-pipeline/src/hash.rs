//! Content hashing for input change detection.
//!
//! Hashes depend on bytes only: the same content at a different path or with
//! a different mtime hashes the same.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::StageError;

/// SHA-256 hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest over every file of an artifact, in listed order.
///
/// Each file is prefixed with its length so that moving bytes between files
/// changes the digest. A single-file artifact therefore does not hash to
/// [`content_hash`] of its bytes.
pub fn hash_artifact(paths: &[PathBuf]) -> Result<String, StageError> {
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = std::fs::read(path).map_err(|source| StageError::Io {
            path: path.clone(),
            source,
        })?;
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether a stage's input differs from what it consumed last time.
///
/// A stage that never recorded a hash always counts as changed.
pub fn input_changed(current: &str, recorded: Option<&str>) -> bool {
    match recorded {
        Some(recorded) => recorded != current,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn artifact_hash_ignores_path_and_mtime() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("nested").join("b.md");
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, "Section 1. Be it enacted").unwrap();
        std::fs::write(&b, "Section 1. Be it enacted").unwrap();

        assert_eq!(hash_artifact(&[a.clone()]).unwrap(), hash_artifact(&[b]).unwrap());

        std::fs::write(&a, "Section 1. Be it further enacted").unwrap();
        let changed = hash_artifact(&[a]).unwrap();
        assert_ne!(changed, content_hash(b"Section 1. Be it enacted"));
    }

    #[test]
    fn artifact_hash_respects_file_boundaries() {
        let dir = TempDir::new().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            path
        };
        let split_one = [write("1a", "ab"), write("1b", "c")];
        let split_two = [write("2a", "a"), write("2b", "bc")];
        assert_ne!(
            hash_artifact(&split_one).unwrap(),
            hash_artifact(&split_two).unwrap()
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.md");
        let err = hash_artifact(&[missing]).unwrap_err();
        assert!(err.to_string().contains("gone.md"));
    }

    #[test]
    fn input_changed_never_skips_unrecorded_hash() {
        assert!(input_changed("abc", None));
        assert!(input_changed("abc", Some("def")));
        assert!(!input_changed("abc", Some("abc")));
    }
}
