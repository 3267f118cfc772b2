//! Filesystem helpers

use crate::Result;
use std::path::{Path, PathBuf};

/// Create a directory (and parents) if missing, returning the owned path.
pub fn ensure_dir(path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a").join("b").join("c");
        let created = ensure_dir(&target).unwrap();
        assert!(created.is_dir());
    }

    #[test]
    fn is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("raw");
        ensure_dir(&target).unwrap();
        ensure_dir(&target).unwrap();
        assert!(target.is_dir());
    }
}
