//! ffconcat manifests built from typed records.
//!
//! Paths are never spliced into the manifest by hand: every record goes
//! through [`ConcatManifest::render`], which owns quoting.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::utils::format_seconds;

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestRecord {
    File(PathBuf),
    Duration(f64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcatManifest {
    records: Vec<ManifestRecord>,
}

impl ConcatManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain file list, used for stream-copy audio concatenation.
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut manifest = Self::new();
        for file in files {
            manifest.push_file(file.as_ref());
        }
        manifest
    }

    /// Still images each shown for a duration. The demuxer ignores the duration
    /// of the final entry, so the last image is listed once more.
    pub fn from_timed_images(entries: &[(PathBuf, f64)]) -> Self {
        let mut manifest = Self::new();
        for (path, seconds) in entries {
            manifest.push_file(path);
            manifest.push_duration(*seconds);
        }
        if let Some((last, _)) = entries.last() {
            manifest.push_file(last);
        }
        manifest
    }

    pub fn push_file(&mut self, path: &Path) {
        self.records.push(ManifestRecord::File(path.to_path_buf()));
    }

    pub fn push_duration(&mut self, seconds: f64) {
        self.records.push(ManifestRecord::Duration(seconds));
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::from("ffconcat version 1.0\n");
        for record in &self.records {
            match record {
                ManifestRecord::File(path) => {
                    out.push_str("file ");
                    out.push_str(&quote_path(path)?);
                    out.push('\n');
                }
                ManifestRecord::Duration(seconds) => {
                    if !seconds.is_finite() || *seconds < 0.0 {
                        bail!("Invalid manifest duration {seconds}");
                    }
                    out.push_str(&format!("duration {}\n", format_seconds(*seconds)));
                }
            }
        }
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let contents = self.render()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write concat manifest {}", path.display()))
    }
}

fn quote_path(path: &Path) -> Result<String> {
    let raw = path.to_string_lossy();
    if raw.contains('\n') || raw.contains('\r') {
        bail!("Path {} contains a line break", path.display());
    }
    Ok(format!("'{}'", raw.replace('\'', "'\\''")))
}
