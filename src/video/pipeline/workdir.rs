use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{Builder, TempDir};

/// Run-scoped scratch directory. Everything a run writes, except the final
/// artifact, lives below it.
#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl WorkDir {
    pub fn create(root: Option<&Path>, run_id: &str) -> Result<Self> {
        let mut builder = Builder::new();
        let prefix = format!("slidecast-{run_id}-");
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)
                    .with_context(|| format!("Failed to create work root {}", root.display()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("Failed to create run working directory")?;

        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if needed) and return a named subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.path.join(name);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Remove the directory now. Dropping without calling this still removes it.
    pub fn cleanup(mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        if dir.close().is_ok() {
            return Ok(());
        }
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cleanup_removes_nested_content() {
        let root = tempdir().unwrap();
        let work = WorkDir::create(Some(root.path()), "run_1").unwrap();
        let nested = work.subdir("narration").unwrap();
        fs::write(nested.join("slide_1.wav"), b"RIFF").unwrap();
        let path = work.path().to_path_buf();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("slidecast-run_1-")
        );

        work.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_also_removes() {
        let root = tempdir().unwrap();
        let path = {
            let work = WorkDir::create(Some(root.path()), "run_2").unwrap();
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
