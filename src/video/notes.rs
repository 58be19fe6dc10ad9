//! Speaker-notes extraction from presentation packages.
//!
//! A `.pptx` file is a zip archive whose `ppt/notesSlides/notesSlideN.xml`
//! parts hold one slide's notes each. Only body placeholders are read;
//! slide-number, date, footer and header placeholders never leak into the
//! narration text.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use roxmltree::{Document, Node};
use serde::Serialize;

use crate::ui::prelude::{Level, emit};
use crate::video::support::utils::indexed_files;

const NOTES_DIR: &str = "ppt/notesSlides";

static NOTE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^notesSlide(\d+)\.xml$").expect("valid note-part pattern"));

const EXCLUDED_PLACEHOLDERS: [&str; 4] = ["sldNum", "dt", "ftr", "hdr"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlideNote {
    /// 1-based slide index taken from the note-part file name
    pub index: u32,
    pub text: String,
}

impl SlideNote {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Unpack the note parts of `document` into `scratch_dir` and extract them.
pub fn extract_notes(document: &Path, scratch_dir: &Path) -> Result<Vec<SlideNote>> {
    let notes_dir = unpack_note_parts(document, scratch_dir)?;
    read_notes_dir(&notes_dir)
}

/// Extracts only the notes directory of the package. A missing notes directory
/// is not an error, the returned directory simply does not exist.
fn unpack_note_parts(document: &Path, scratch_dir: &Path) -> Result<PathBuf> {
    let file = File::open(document)
        .with_context(|| format!("Failed to open presentation {}", document.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a readable zip package", document.display()))?;

    fs::create_dir_all(scratch_dir)
        .with_context(|| format!("Failed to create scratch directory {}", scratch_dir.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Corrupted entry #{i} in {}", document.display()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        if relative.parent() != Some(Path::new(NOTES_DIR)) {
            continue;
        }

        let target = scratch_dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to unpack {}", relative.display()))?;
    }

    Ok(scratch_dir.join(NOTES_DIR))
}

/// Read every note part in `notes_dir`, ordered by the number in its file name.
pub fn read_notes_dir(notes_dir: &Path) -> Result<Vec<SlideNote>> {
    if !notes_dir.is_dir() {
        emit(
            Level::Info,
            "notes.none",
            "Presentation has no speaker notes",
            None,
        );
        return Ok(Vec::new());
    }

    let parts = indexed_files(notes_dir, &NOTE_PART)?;
    let notes = parts
        .into_iter()
        .map(|(index, path)| SlideNote {
            index,
            text: read_note_part(&path, index),
        })
        .collect();
    Ok(notes)
}

/// A part that cannot be read or parsed degrades to an empty note.
fn read_note_part(path: &Path, index: u32) -> String {
    let parsed = fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|xml| note_text_from_xml(&xml));

    match parsed {
        Ok(text) => text,
        Err(err) => {
            emit(
                Level::Warn,
                "notes.parse_failed",
                &format!("Ignoring unreadable notes for slide {index}: {err:#}"),
                None,
            );
            String::new()
        }
    }
}

/// Plain text of the body placeholder(s) in one note part.
pub fn note_text_from_xml(xml: &str) -> Result<String> {
    let doc = Document::parse(xml).map_err(|e| anyhow!("XML parse error: {e}"))?;

    let shapes: Vec<Node> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "sp")
        .collect();

    let body: Vec<&Node> = shapes
        .iter()
        .filter(|shape| placeholder_type(shape).as_deref() == Some("body"))
        .collect();

    let runs: Vec<String> = if body.is_empty() {
        // No body placeholder: take every text run except the excluded kinds.
        shapes
            .iter()
            .filter(|shape| {
                placeholder_type(shape)
                    .map(|kind| !EXCLUDED_PLACEHOLDERS.contains(&kind.as_str()))
                    .unwrap_or(true)
            })
            .flat_map(|shape| text_runs(shape))
            .collect()
    } else {
        body.into_iter().flat_map(|shape| text_runs(shape)).collect()
    };

    Ok(normalize_whitespace(&runs.join(" ")))
}

fn placeholder_type(shape: &Node) -> Option<String> {
    let placeholder = shape
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "ph")?;
    // `<p:ph idx="1"/>` without a type is a body placeholder.
    Some(placeholder.attribute("type").unwrap_or("body").to_string())
}

fn text_runs(shape: &Node) -> Vec<String> {
    let mut paragraphs = Vec::new();
    for paragraph in shape
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "p" && is_drawing_ns(n))
    {
        let mut text = String::new();
        for node in paragraph.descendants().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "t" => text.push_str(node.text().unwrap_or_default()),
                // Soft line breaks and tabs separate words just like spaces.
                "br" => text.push(' '),
                "tab" if !in_tab_list(&node) => text.push(' '),
                _ => {}
            }
        }
        if !text.trim().is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs
}

fn in_tab_list(node: &Node) -> bool {
    node.parent_element()
        .is_some_and(|parent| parent.tag_name().name() == "tabLst")
}

fn is_drawing_ns(node: &Node) -> bool {
    node.tag_name()
        .namespace()
        .map(|ns| ns.contains("drawingml"))
        .unwrap_or(true)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
