//! One parameterized pipeline for both narration-only and video output.

mod orchestrator;
pub mod report;
pub mod workdir;

pub use orchestrator::Pipeline;

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use crate::video::audio::ChannelLayout;
use crate::video::config::{BookendMode, QualityTier, SlidecastConfig};
use crate::video::error::{PipelineError, PipelineResult};
use crate::video::imagegen::{ImageGenerator, ImagenClient};
use crate::video::slides::{DocumentConverter, LibreOfficeConverter};
use crate::video::speech::{CloudSpeechClient, SpeechSynthesizer};
use crate::video::support::ffmpeg::{
    DurationProbe, FfmpegRunner, FfprobeDurationProbe, SystemFfmpegRunner,
};
use crate::video::timeline::PromptPolicy;
use crate::video::voice::Gender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    NarrationAudio,
    Video,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::NarrationAudio => "wav",
            ArtifactKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineOptions {
    pub artifact: ArtifactKind,
    pub opening_closing_mode: BookendMode,
    pub channel_layout: ChannelLayout,
    pub prompt_policy: PromptPolicy,
    pub quality: QualityTier,
}

impl PipelineOptions {
    /// Standalone narration track: mono, spoken prompt between slides.
    pub fn narration() -> Self {
        Self {
            artifact: ArtifactKind::NarrationAudio,
            opening_closing_mode: BookendMode::Image,
            channel_layout: ChannelLayout::Mono,
            prompt_policy: PromptPolicy::InterSlidePrompt,
            quality: QualityTier::Standard,
        }
    }

    /// Slide video: stereo soundtrack, fixed cadence per slide.
    pub fn video() -> Self {
        Self {
            artifact: ArtifactKind::Video,
            opening_closing_mode: BookendMode::Image,
            channel_layout: ChannelLayout::Stereo,
            prompt_policy: PromptPolicy::FixedCadence,
            quality: QualityTier::Standard,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.artifact == ArtifactKind::Video
            && self.prompt_policy == PromptPolicy::InterSlidePrompt
        {
            return Err(PipelineError::Config(
                "video output needs per-slide durations; use the cadence policy".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opening/closing material and background music for a video run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookendInputs {
    pub opening: Option<PathBuf>,
    pub closing: Option<PathBuf>,
    pub opening_audio: Option<PathBuf>,
    pub closing_audio: Option<PathBuf>,
    pub opening_prompt: Option<String>,
    pub closing_prompt: Option<String>,
    pub music: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    /// Document name, resolved against the configured base directory
    pub document: PathBuf,
    pub gender: Gender,
    /// Overrides the configured inter-slide prompt
    pub prompt_text: Option<String>,
    pub options: PipelineOptions,
    pub bookends: BookendInputs,
}

/// External collaborators a run talks to.
pub struct Collaborators<'a> {
    pub speech: &'a dyn SpeechSynthesizer,
    pub ffmpeg: &'a dyn FfmpegRunner,
    pub probe: &'a dyn DurationProbe,
    pub converter: &'a dyn DocumentConverter,
    pub images: Option<&'a dyn ImageGenerator>,
}

/// Real implementations backed by the network services and local tools.
/// Image generation is only available with an image API key.
pub struct SystemTools {
    speech: CloudSpeechClient,
    ffmpeg: SystemFfmpegRunner,
    probe: FfprobeDurationProbe,
    converter: LibreOfficeConverter,
    images: Option<ImagenClient>,
}

impl SystemTools {
    pub fn from_config(config: &SlidecastConfig) -> Result<Self> {
        let timeout = config.runtime.tool_timeout();
        Ok(Self {
            speech: CloudSpeechClient::new(&config.voice, timeout)?,
            ffmpeg: SystemFfmpegRunner::new(timeout),
            probe: FfprobeDurationProbe::new(timeout),
            converter: LibreOfficeConverter::new(timeout),
            images: match config.image.api_key {
                Some(_) => Some(ImagenClient::new(&config.image, timeout)?),
                None => None,
            },
        })
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            speech: &self.speech,
            ffmpeg: &self.ffmpeg,
            probe: &self.probe,
            converter: &self.converter,
            images: self.images.as_ref().map(|c| c as &dyn ImageGenerator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_in_layout_and_policy() {
        let narration = PipelineOptions::narration();
        let video = PipelineOptions::video();
        assert_eq!(narration.channel_layout, ChannelLayout::Mono);
        assert_eq!(video.channel_layout, ChannelLayout::Stereo);
        assert_eq!(narration.prompt_policy, PromptPolicy::InterSlidePrompt);
        assert_eq!(video.prompt_policy, PromptPolicy::FixedCadence);
        assert!(narration.validate().is_ok());
        assert!(video.validate().is_ok());
    }

    #[test]
    fn video_with_prompt_policy_is_rejected() {
        let options = PipelineOptions {
            prompt_policy: PromptPolicy::InterSlidePrompt,
            ..PipelineOptions::video()
        };
        assert!(matches!(options.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn narration_may_use_cadence() {
        let options = PipelineOptions {
            prompt_policy: PromptPolicy::FixedCadence,
            ..PipelineOptions::narration()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.artifact.extension(), "wav");
    }
}
