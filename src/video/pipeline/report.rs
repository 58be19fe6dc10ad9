use std::path::PathBuf;

use serde::Serialize;

use crate::ui::prelude::{Level, emit};
use crate::video::error::{PipelineError, Stage};
use crate::video::timeline::SlideDuration;

/// Structured result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub message: String,
    pub stage: Stage,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slides: Vec<SlideDuration>,
}

impl PipelineOutcome {
    pub fn succeeded(run_id: &str, output: PathBuf, slides: Vec<SlideDuration>) -> Self {
        Self {
            success: true,
            message: format!("Wrote {}", output.display()),
            stage: Stage::Done,
            run_id: run_id.to_string(),
            error_kind: None,
            diagnostics: None,
            output: Some(output),
            slides,
        }
    }

    pub fn failed(run_id: &str, err: &PipelineError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            stage: err.stage(),
            run_id: run_id.to_string(),
            error_kind: Some(err.kind()),
            diagnostics: err.diagnostics(),
            output: None,
            slides: Vec::new(),
        }
    }

    pub fn emit(&self) {
        let data = serde_json::to_value(self).ok();
        if self.success {
            emit(Level::Success, "pipeline.done", &self.message, data);
            return;
        }

        emit(
            Level::Error,
            "pipeline.failed",
            &format!("{} (stage: {})", self.message, self.stage),
            data,
        );
        if let Some(diagnostics) = &self.diagnostics {
            for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
                emit(Level::Debug, "pipeline.diagnostics", line, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::error::MediaStage;

    #[test]
    fn failure_carries_stage_kind_and_diagnostics() {
        let err = PipelineError::compose(MediaStage::Encode, anyhow::anyhow!("x264 [error]: broken"));
        let outcome = PipelineOutcome::failed("run_1", &err);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["stage"], "compose_video");
        assert_eq!(json["error_kind"], "compose_error");
        assert_eq!(json["diagnostics"], "x264 [error]: broken");
        assert!(json.get("output").is_none());
    }

    #[test]
    fn success_lists_output_and_slides() {
        let outcome = PipelineOutcome::succeeded(
            "run_2",
            PathBuf::from("/decks/deck.mp4"),
            vec![SlideDuration {
                slide_index: 1,
                narration_seconds: 5.0,
                total_seconds: 8.0,
            }],
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stage"], "done");
        assert_eq!(json["output"], "/decks/deck.mp4");
        assert_eq!(json["slides"][0]["total_seconds"], 8.0);
    }
}
