use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::Result;

/// Scratch directory of one submission. Directories the service created
/// are removed when the submission is done, whatever way it ends;
/// caller-provided directories are left alone.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    owned: bool,
}

impl WorkDir {
    pub fn create(base: &Path, id: &str) -> Result<Self> {
        let path = base.join(id);
        fs::create_dir_all(&path)?;
        // Wrapper scripts need absolute paths, the sandbox execs them
        // from an unrelated working directory.
        let path = fs::canonicalize(&path)?;
        Ok(Self { path, owned: true })
    }

    pub fn external(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        let path = fs::canonicalize(path)?;
        Ok(Self { path, owned: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.owned {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                warn!("failed to remove work dir {}: {}", self.path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_dir_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let path;
        {
            let work = WorkDir::create(base.path(), "sub-1").unwrap();
            path = work.path().to_path_buf();
            fs::write(work.path().join("main.cpp"), "int main(){}").unwrap();
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn external_dir_survives_drop() {
        let base = tempfile::tempdir().unwrap();
        let external = base.path().join("caller-owned");
        {
            let work = WorkDir::external(&external).unwrap();
            assert!(work.path().is_dir());
        }
        assert!(external.is_dir());
    }

    #[test]
    fn path_is_absolute() {
        let base = tempfile::tempdir().unwrap();
        let work = WorkDir::create(base.path(), "sub-2").unwrap();
        assert!(work.path().is_absolute());
    }
}
