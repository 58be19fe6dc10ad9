use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    ExtractNotes,
    RenderSlides,
    SynthesizeNarration,
    MixAudio,
    ComposeVideo,
    Cleanup,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::ExtractNotes => "extract_notes",
            Stage::RenderSlides => "render_slides",
            Stage::SynthesizeNarration => "synthesize_narration",
            Stage::MixAudio => "mix_audio",
            Stage::ComposeVideo => "compose_video",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual external media invocations inside the mix and compose stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStage {
    Normalize,
    Silence,
    Probe,
    Mix,
    Concat,
    Encode,
}

impl fmt::Display for MediaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaStage::Normalize => "normalize",
            MediaStage::Silence => "silence",
            MediaStage::Probe => "probe",
            MediaStage::Mix => "mix",
            MediaStage::Concat => "concat",
            MediaStage::Encode => "encode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input document {path} is not usable: {reason}")]
    Input { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to unpack presentation {path}")]
    Extraction { path: PathBuf, detail: String },

    #[error("Speech synthesis failed for {target}")]
    Synthesis { target: PathBuf, detail: String },

    #[error("Slide rendering failed: {message}")]
    Render { message: String, detail: String },

    #[error("Audio {stage} step failed")]
    Mix { stage: MediaStage, detail: String },

    #[error("Video {stage} step failed")]
    Compose { stage: MediaStage, detail: String },

    #[error("Nothing to narrate: {0}")]
    EmptyTimeline(String),

    #[error("Another run holds the lease for {resource} until {expires_at}")]
    Busy { resource: String, expires_at: String },
}

impl PipelineError {
    pub fn input(path: &Path, reason: impl Into<String>) -> Self {
        Self::Input {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn extraction(path: &Path, err: anyhow::Error) -> Self {
        Self::Extraction {
            path: path.to_path_buf(),
            detail: format!("{err:#}"),
        }
    }

    pub fn synthesis(target: &Path, err: anyhow::Error) -> Self {
        Self::Synthesis {
            target: target.to_path_buf(),
            detail: format!("{err:#}"),
        }
    }

    pub fn mix(stage: MediaStage, err: anyhow::Error) -> Self {
        Self::Mix {
            stage,
            detail: format!("{err:#}"),
        }
    }

    pub fn compose(stage: MediaStage, err: anyhow::Error) -> Self {
        Self::Compose {
            stage,
            detail: format!("{err:#}"),
        }
    }

    /// Orchestrator stage this error aborts.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Input { .. } | PipelineError::Config(_) | PipelineError::Busy { .. } => {
                Stage::Init
            }
            PipelineError::Extraction { .. } => Stage::ExtractNotes,
            PipelineError::Synthesis { .. } => Stage::SynthesizeNarration,
            PipelineError::Render { .. } => Stage::RenderSlides,
            PipelineError::Mix { .. } | PipelineError::EmptyTimeline(_) => Stage::MixAudio,
            PipelineError::Compose { .. } => Stage::ComposeVideo,
        }
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input { .. } => "input_error",
            PipelineError::Config(_) => "config_error",
            PipelineError::Extraction { .. } => "extraction_error",
            PipelineError::Synthesis { .. } => "synthesis_error",
            PipelineError::Render { .. } => "render_error",
            PipelineError::Mix { .. } => "mix_error",
            PipelineError::Compose { .. } => "compose_error",
            PipelineError::EmptyTimeline(_) => "empty_timeline",
            PipelineError::Busy { .. } => "busy",
        }
    }

    /// Diagnostic payload for the structured outcome (tool output, path listings).
    pub fn diagnostics(&self) -> Option<String> {
        match self {
            PipelineError::Extraction { detail, .. }
            | PipelineError::Synthesis { detail, .. }
            | PipelineError::Render { detail, .. }
            | PipelineError::Mix { detail, .. }
            | PipelineError::Compose { detail, .. } => Some(detail.clone()),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_error_names_media_stage() {
        let err = PipelineError::mix(MediaStage::Normalize, anyhow::anyhow!("exit 1"));
        assert_eq!(err.to_string(), "Audio normalize step failed");
        assert_eq!(err.stage(), Stage::MixAudio);
        assert_eq!(err.diagnostics().as_deref(), Some("exit 1"));
    }

    #[test]
    fn empty_timeline_is_distinct_from_tool_failures() {
        let err = PipelineError::EmptyTimeline("no slide has notes".into());
        assert_eq!(err.kind(), "empty_timeline");
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn anyhow_context_chain_is_kept_in_diagnostics() {
        let inner = anyhow::anyhow!("ffmpeg exited with status 1").context("encoding out.mp4");
        let err = PipelineError::compose(MediaStage::Encode, inner);
        let diag = err.diagnostics().unwrap();
        assert!(diag.contains("encoding out.mp4"));
        assert!(diag.contains("status 1"));
    }
}
