//! Final video encode: opening, slides and closing muxed against the mixed audio.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;

use crate::video::config::{BookendMode, VideoSettings};
use crate::video::error::{MediaStage, PipelineError, PipelineResult};
use crate::video::support::ffmpeg::{EncodeProfile, FfmpegRunOptions, FfmpegRunner};
use crate::video::support::manifest::ConcatManifest;
use crate::video::support::utils::format_seconds;
use crate::video::timeline::SlideDuration;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualKind {
    Opening,
    Slide(u32),
    Closing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualEntry {
    pub kind: VisualKind,
    pub path: PathBuf,
    pub display_seconds: f64,
}

/// An opening or closing visual and how long it stays on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Bookend {
    pub path: PathBuf,
    pub seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoTimeline {
    entries: Vec<VisualEntry>,
}

impl VideoTimeline {
    /// Opening, then each slide for its recorded duration, then closing.
    pub fn build(
        opening: Option<&Bookend>,
        slides: &[PathBuf],
        durations: &[SlideDuration],
        closing: Option<&Bookend>,
    ) -> PipelineResult<Self> {
        if slides.len() != durations.len() {
            return Err(PipelineError::compose(
                MediaStage::Concat,
                anyhow!(
                    "{} slide images but {} slide durations",
                    slides.len(),
                    durations.len()
                ),
            ));
        }
        if slides.is_empty() {
            return Err(PipelineError::EmptyTimeline(
                "no slide images to show".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(slides.len() + 2);
        if let Some(opening) = opening {
            entries.push(VisualEntry {
                kind: VisualKind::Opening,
                path: opening.path.clone(),
                display_seconds: opening.seconds,
            });
        }
        for (path, duration) in slides.iter().zip(durations) {
            entries.push(VisualEntry {
                kind: VisualKind::Slide(duration.slide_index),
                path: path.clone(),
                display_seconds: duration.total_seconds,
            });
        }
        if let Some(closing) = closing {
            entries.push(VisualEntry {
                kind: VisualKind::Closing,
                path: closing.path.clone(),
                display_seconds: closing.seconds,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[VisualEntry] {
        &self.entries
    }

    pub fn total_seconds(&self) -> f64 {
        self.entries.iter().map(|e| e.display_seconds).sum()
    }

    fn bookend(&self, kind: VisualKind) -> Option<&VisualEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    fn slides(&self) -> impl Iterator<Item = &VisualEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, VisualKind::Slide(_)))
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct VideoComposer<'a> {
    ffmpeg: &'a dyn FfmpegRunner,
    settings: &'a VideoSettings,
    mode: BookendMode,
}

impl<'a> VideoComposer<'a> {
    pub fn new(ffmpeg: &'a dyn FfmpegRunner, settings: &'a VideoSettings, mode: BookendMode) -> Self {
        Self {
            ffmpeg,
            settings,
            mode,
        }
    }

    pub async fn compose(
        &self,
        timeline: &VideoTimeline,
        audio: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        let args = match self.mode {
            BookendMode::Image => self.image_args(timeline, audio, work_dir, output)?,
            BookendMode::Video => self.clip_args(timeline, audio, work_dir, output)?,
        };

        self.ffmpeg
            .run(
                &args,
                FfmpegRunOptions::with_progress(timeline.total_seconds(), "Encoding video"),
            )
            .await
            .with_context(|| format!("encoding {}", output.display()))
            .map_err(|err| PipelineError::compose(MediaStage::Encode, err))?;

        if !output.is_file() {
            return Err(PipelineError::compose(
                MediaStage::Encode,
                anyhow!("encoder finished but {} was not written", output.display()),
            ));
        }
        Ok(())
    }

    /// Every visual is a still: one timed-image manifest covers the whole video.
    fn image_args(
        &self,
        timeline: &VideoTimeline,
        audio: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<Vec<String>> {
        let stills: Vec<(PathBuf, f64)> = timeline
            .entries()
            .iter()
            .map(|e| (e.path.clone(), e.display_seconds))
            .collect();
        let manifest = work_dir.join("visuals.txt");
        ConcatManifest::from_timed_images(&stills)
            .write_to(&manifest)
            .map_err(|err| PipelineError::compose(MediaStage::Concat, err))?;

        let mut args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "1:a".to_string(),
            "-vf".to_string(),
            self.frame_filter(),
        ];
        self.profile().push_to(&mut args);
        args.push(output.to_string_lossy().into_owned());
        Ok(args)
    }

    /// Opening and closing clips are held on their last frame or cut so they
    /// last exactly as long as their audio; the encode stops at the shorter stream.
    fn clip_args(
        &self,
        timeline: &VideoTimeline,
        audio: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<Vec<String>> {
        let stills: Vec<(PathBuf, f64)> = timeline
            .slides()
            .map(|e| (e.path.clone(), e.display_seconds))
            .collect();
        let manifest = work_dir.join("slides.txt");
        ConcatManifest::from_timed_images(&stills)
            .write_to(&manifest)
            .map_err(|err| PipelineError::compose(MediaStage::Concat, err))?;

        let mut args = vec!["-y".to_string()];
        let mut filters = Vec::new();
        let mut labels = Vec::new();
        let mut input = 0usize;

        let opening = timeline.bookend(VisualKind::Opening);
        let closing = timeline.bookend(VisualKind::Closing);

        if let Some(entry) = opening {
            self.push_clip_input(&mut args, entry);
            filters.push(self.clip_filter(input, entry.display_seconds, "vopen"));
            labels.push("[vopen]");
            input += 1;
        }

        args.extend([
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.to_string_lossy().into_owned(),
        ]);
        filters.push(format!(
            "[{input}:v]{},setpts=PTS-STARTPTS[vslides]",
            self.frame_filter()
        ));
        labels.push("[vslides]");
        input += 1;

        if let Some(entry) = closing {
            self.push_clip_input(&mut args, entry);
            filters.push(self.clip_filter(input, entry.display_seconds, "vclose"));
            labels.push("[vclose]");
            input += 1;
        }

        args.extend(["-i".to_string(), audio.to_string_lossy().into_owned()]);
        let audio_input = input;

        filters.push(format!(
            "{}concat=n={}:v=1:a=0[vout]",
            labels.concat(),
            labels.len()
        ));

        args.extend([
            "-filter_complex".to_string(),
            filters.join(";"),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            format!("{audio_input}:a"),
            "-shortest".to_string(),
        ]);
        self.profile().push_to(&mut args);
        args.push(output.to_string_lossy().into_owned());
        Ok(args)
    }

    fn push_clip_input(&self, args: &mut Vec<String>, entry: &VisualEntry) {
        if is_image(&entry.path) {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                self.settings.frame_rate.to_string(),
                "-t".to_string(),
                format_seconds(entry.display_seconds),
            ]);
        }
        args.extend(["-i".to_string(), entry.path.to_string_lossy().into_owned()]);
    }

    fn clip_filter(&self, input: usize, seconds: f64, label: &str) -> String {
        let seconds = format_seconds(seconds);
        format!(
            "[{input}:v]{},tpad=stop_mode=clone:stop_duration={seconds},trim=duration={seconds},setpts=PTS-STARTPTS[{label}]",
            self.frame_filter()
        )
    }

    /// Letterbox into the target frame. libx264 with yuv420p needs even sizes.
    fn frame_filter(&self) -> String {
        let width = even(self.settings.width);
        let height = even(self.settings.height);
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             scale=trunc(iw/2)*2:trunc(ih/2)*2,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={},format=yuv420p",
            self.settings.frame_rate
        )
    }

    fn profile(&self) -> EncodeProfile {
        EncodeProfile::h264_aac(&self.settings.preset, self.settings.crf)
    }
}

fn even(value: u32) -> u32 {
    value.max(2) & !1
}
