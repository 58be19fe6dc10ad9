//! In-process stand-ins for the external collaborators.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::video::imagegen::ImageGenerator;
use crate::video::slides::DocumentConverter;
use crate::video::speech::SpeechSynthesizer;
use crate::video::support::ffmpeg::{DurationProbe, FfmpegRunOptions, FfmpegRunner};
use crate::video::voice::VoiceProfile;

/// Records every invocation and writes a placeholder at the output path
/// (the last argument). Fails any call with an argument containing `fail_on`.
#[derive(Default)]
pub struct RecordingFfmpeg {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on: Option<String>,
}

impl RecordingFfmpeg {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(needle.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Vec<String> {
        self.calls().pop().expect("ffmpeg was never called")
    }
}

#[async_trait]
impl FfmpegRunner for RecordingFfmpeg {
    async fn run(&self, args: &[String], _options: FfmpegRunOptions) -> Result<()> {
        self.calls.lock().unwrap().push(args.to_vec());

        if let Some(needle) = &self.fail_on
            && args.iter().any(|a| a.contains(needle.as_str()))
        {
            bail!("ffmpeg exited with status Some(1): simulated failure");
        }

        if let Some(output) = args.last() {
            let output = Path::new(output);
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(output, b"media")?;
        }
        Ok(())
    }
}

/// Reports the same duration for every file, or a per-file-name override.
pub struct FixedProbe {
    default: f64,
    overrides: HashMap<String, f64>,
    fail: bool,
    probed: Mutex<Vec<PathBuf>>,
}

impl FixedProbe {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            fail: false,
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0.0)
        }
    }

    pub fn with(mut self, file_name: &str, seconds: f64) -> Self {
        self.overrides.insert(file_name.to_string(), seconds);
        self
    }

    pub fn probed(&self) -> Vec<PathBuf> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn duration_seconds(&self, path: &Path) -> Result<f64> {
        self.probed.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            bail!("ffprobe returned no duration for {}", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.overrides.get(&name).copied().unwrap_or(self.default))
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    texts: Mutex<Vec<String>>,
    counter: AtomicUsize,
    fail: bool,
}

impl FakeSynthesizer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &VoiceProfile, out_dir: &Path) -> Result<PathBuf> {
        if self.fail {
            bail!("Speech service returned 503 Service Unavailable");
        }
        self.texts.lock().unwrap().push(text.to_string());
        fs::create_dir_all(out_dir)?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = out_dir.join(format!("tts_{n}.wav"));
        fs::write(&path, b"RIFF")?;
        Ok(path)
    }
}

/// Pretends to be LibreOffice plus pdftoppm.
pub struct FakeConverter {
    pages: u32,
    write_pdf: bool,
    dpi: Mutex<Option<u32>>,
}

impl FakeConverter {
    pub fn with_pages(pages: u32) -> Self {
        Self {
            pages,
            write_pdf: true,
            dpi: Mutex::new(None),
        }
    }

    pub fn without_pdf() -> Self {
        Self {
            write_pdf: false,
            ..Self::with_pages(3)
        }
    }

    pub fn dpi_used(&self) -> Option<u32> {
        *self.dpi.lock().unwrap()
    }
}

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn to_pdf(&self, document: &Path, out_dir: &Path) -> Result<PathBuf> {
        let stem = document.file_stem().unwrap().to_string_lossy().into_owned();
        let pdf = out_dir.join(format!("{stem}.pdf"));
        if self.write_pdf {
            fs::write(&pdf, b"%PDF-1.7")?;
        } else {
            fs::write(out_dir.join("conversion.log"), b"source file could not be loaded")?;
        }
        Ok(pdf)
    }

    async fn rasterize(&self, _pdf: &Path, out_dir: &Path, dpi: u32) -> Result<()> {
        *self.dpi.lock().unwrap() = Some(dpi);
        let width = if self.pages >= 10 { 2 } else { 1 };
        for page in 1..=self.pages {
            fs::write(out_dir.join(format!("page-{page:0width$}.png")), b"PNG")?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeImageGenerator {
    prompts: Mutex<Vec<String>>,
}

impl FakeImageGenerator {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate_image(&self, prompt: &str, _aspect_ratio: &str, output: &Path) -> Result<PathBuf> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        fs::write(output, b"PNG")?;
        Ok(output.to_path_buf())
    }
}

/// Write a minimal presentation package with one notes part per entry.
/// Empty strings still produce a part, with an empty body.
pub fn write_deck(path: &Path, notes: &[&str]) {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    zip.start_file("ppt/presentation.xml", options).unwrap();
    zip.write_all(b"<p:presentation/>").unwrap();
    for (i, text) in notes.iter().enumerate() {
        let paragraph = if text.is_empty() {
            String::new()
        } else {
            format!("<a:p><a:r><a:t>{text}</a:t></a:r></a:p>")
        };
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:notes xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
         xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main">
  <p:cSld><p:spTree><p:sp><p:nvSpPr><p:nvPr><p:ph type="body"/></p:nvPr></p:nvSpPr><p:txBody>{paragraph}</p:txBody></p:sp></p:spTree></p:cSld>
</p:notes>"#
        );
        zip.start_file(format!("ppt/notesSlides/notesSlide{}.xml", i + 1), options)
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}
