//! Slide rasterization: document to PDF to one PNG per slide.

pub mod libreoffice;

pub use libreoffice::LibreOfficeConverter;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::ui::prelude::{Level, emit};
use crate::video::config::QualityTier;
use crate::video::error::{PipelineError, PipelineResult};
use crate::video::support::utils::{
    describe_tree, file_stem, indexed_files, move_into_place,
};

pub(crate) const PAGE_PREFIX: &str = "page";

// pdftoppm zero-pads page numbers once the document has ten or more pages
static PAGE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^page-(\d+)\.png$").expect("valid page pattern"));

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the whole document into a PDF inside `out_dir`.
    async fn to_pdf(&self, document: &Path, out_dir: &Path) -> Result<PathBuf>;

    /// Rasterize every page of `pdf` to `page-<n>.png` inside `out_dir`.
    async fn rasterize(&self, pdf: &Path, out_dir: &Path, dpi: u32) -> Result<()>;
}

pub struct SlideRenderer<'a> {
    converter: &'a dyn DocumentConverter,
}

impl<'a> SlideRenderer<'a> {
    pub fn new(converter: &'a dyn DocumentConverter) -> Self {
        Self { converter }
    }

    /// Render `document` into `<stem>_slide_<n>.png` files in `output_dir`,
    /// returned in slide order.
    pub async fn render(
        &self,
        document: &Path,
        scratch_dir: &Path,
        output_dir: &Path,
        quality: QualityTier,
    ) -> PipelineResult<Vec<PathBuf>> {
        let stem = file_stem(document)
            .map_err(|err| render_error("invalid document name", err, scratch_dir))?;
        for dir in [scratch_dir, output_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                render_error("could not create render directory", err.into(), dir)
            })?;
        }

        let pdf = self
            .converter
            .to_pdf(document, scratch_dir)
            .await
            .map_err(|err| render_error("document conversion failed", err, scratch_dir))?;
        if !pdf.is_file() {
            return Err(PipelineError::Render {
                message: format!("conversion produced no {}", display_name(&pdf)),
                detail: describe_tree(scratch_dir),
            });
        }

        let dpi = quality.dpi();
        self.converter
            .rasterize(&pdf, scratch_dir, dpi)
            .await
            .map_err(|err| render_error("rasterization failed", err, scratch_dir))?;

        let pages = indexed_files(scratch_dir, &PAGE_FILE)
            .map_err(|err| render_error("could not list rasterized pages", err, scratch_dir))?;
        if pages.is_empty() {
            return Err(PipelineError::Render {
                message: "rasterization produced no slide images".to_string(),
                detail: describe_tree(scratch_dir),
            });
        }

        let mut slides = Vec::with_capacity(pages.len());
        for (index, page) in pages {
            let target = output_dir.join(format!("{stem}_slide_{index}.png"));
            move_into_place(&page, &target)
                .map_err(|err| render_error("could not move slide image", err, scratch_dir))?;
            slides.push(target);
        }

        emit(
            Level::Info,
            "slides.rendered",
            &format!("Rendered {} slides at {dpi} dpi", slides.len()),
            None,
        );
        Ok(slides)
    }
}

fn render_error(message: &str, err: anyhow::Error, scratch_dir: &Path) -> PipelineError {
    PipelineError::Render {
        message: message.to_string(),
        detail: format!("{err:#}\n{}", describe_tree(scratch_dir)),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
