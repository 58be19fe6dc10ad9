use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;

use super::{DocumentConverter, PAGE_PREFIX};
use crate::video::support::process::run_tool;
use crate::video::support::utils::file_stem;

const OFFICE_BINARIES: [&str; 2] = ["soffice", "libreoffice"];

/// `soffice` for PDF conversion, `pdftoppm` for rasterization.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn office_binary() -> Result<PathBuf> {
        OFFICE_BINARIES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                anyhow!("LibreOffice is not installed (none of {OFFICE_BINARIES:?} found on PATH)")
            })
    }
}

/// Percent-encoded `file://` URL for a profile directory.
fn profile_url(dir: &Path) -> Result<String> {
    let absolute = std::path::absolute(dir)
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let url = Url::from_directory_path(&absolute)
        .map_err(|_| anyhow!("Cannot express {} as a file URL", absolute.display()))?;
    Ok(url.to_string())
}

#[async_trait]
impl DocumentConverter for LibreOfficeConverter {
    async fn to_pdf(&self, document: &Path, out_dir: &Path) -> Result<PathBuf> {
        let soffice = Self::office_binary()?;
        // A private profile keeps a running desktop LibreOffice from swallowing the job.
        let profile = out_dir.join("lo-profile");
        let args = vec![
            format!("-env:UserInstallation={}", profile_url(&profile)?),
            "--headless".to_string(),
            "--convert-to".to_string(),
            "pdf".to_string(),
            "--outdir".to_string(),
            out_dir.to_string_lossy().into_owned(),
            document.to_string_lossy().into_owned(),
        ];

        run_tool(&soffice.to_string_lossy(), &args, self.timeout)
            .await
            .with_context(|| format!("Failed to convert {} to PDF", document.display()))?;

        Ok(out_dir.join(format!("{}.pdf", file_stem(document)?)))
    }

    async fn rasterize(&self, pdf: &Path, out_dir: &Path, dpi: u32) -> Result<()> {
        which::which("pdftoppm")
            .map_err(|_| anyhow!("pdftoppm is not installed (install poppler-utils)"))?;

        let args = vec![
            "-r".to_string(),
            dpi.to_string(),
            "-png".to_string(),
            pdf.to_string_lossy().into_owned(),
            out_dir.join(PAGE_PREFIX).to_string_lossy().into_owned(),
        ];

        run_tool("pdftoppm", &args, self.timeout)
            .await
            .with_context(|| format!("Failed to rasterize {}", pdf.display()))?;
        Ok(())
    }
}
