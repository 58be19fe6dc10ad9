//! Narration timeline assembly.
//!
//! Planning is pure: [`plan_prompted`] and [`plan_cadence`] turn "which slides
//! have narration" into an ordered list of [`Step`]s. [`TimelineAssembler`]
//! then materializes the steps into audio segments, generating silences and
//! measuring narration where the policy needs durations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ui::prelude::{Level, emit};
use crate::video::audio::SilenceGenerator;
use crate::video::config::TimingSettings;
use crate::video::error::{MediaStage, PipelineError, PipelineResult};
use crate::video::support::ffmpeg::DurationProbe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PromptPolicy {
    /// Spoken prompt between narrated slides, no per-slide timing
    #[default]
    #[value(name = "prompt")]
    InterSlidePrompt,
    /// Fixed silence around every slide, with per-slide durations for video sync
    #[value(name = "cadence")]
    FixedCadence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Narration,
    Silence,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSegment {
    pub path: PathBuf,
    pub kind: SegmentKind,
    /// Known only once measured or generated with a fixed length
    pub duration_seconds: Option<f64>,
}

impl AudioSegment {
    pub fn new(path: PathBuf, kind: SegmentKind) -> Self {
        Self {
            path,
            kind,
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlideDuration {
    pub slide_index: u32,
    pub narration_seconds: f64,
    pub total_seconds: f64,
}

/// Result of synthesizing one slide's note.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideNarration {
    pub slide_index: u32,
    /// `None` when the slide had no note text
    pub audio: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NarrationTimeline {
    pub segments: Vec<AudioSegment>,
    /// One entry per slide under the cadence policy, empty otherwise
    pub slide_durations: Vec<SlideDuration>,
}

impl NarrationTimeline {
    pub fn slides_total_seconds(&self) -> f64 {
        self.slide_durations.iter().map(|d| d.total_seconds).sum()
    }
}

/// One planned piece of the timeline. Positions index into the slide list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Narration(usize),
    PromptPrePause,
    Prompt,
    PromptPostPause,
    SlidePre(usize),
    Fallback(usize),
    SlidePost(usize),
}

/// Narrated slides separated by pause, prompt, pause. A separator follows
/// slide `i` only when some later slide, not necessarily `i + 1`, is narrated.
pub fn plan_prompted(has_content: &[bool]) -> Vec<Step> {
    let mut steps = Vec::new();
    for (i, &narrated) in has_content.iter().enumerate() {
        if !narrated {
            continue;
        }
        steps.push(Step::Narration(i));
        if has_content[i + 1..].iter().any(|&later| later) {
            steps.extend([Step::PromptPrePause, Step::Prompt, Step::PromptPostPause]);
        }
    }
    steps
}

/// Every slide gets pre silence, narration or fallback silence, post silence.
pub fn plan_cadence(has_content: &[bool]) -> Vec<Step> {
    let mut steps = Vec::with_capacity(has_content.len() * 3);
    for (i, &narrated) in has_content.iter().enumerate() {
        steps.push(Step::SlidePre(i));
        steps.push(if narrated {
            Step::Narration(i)
        } else {
            Step::Fallback(i)
        });
        steps.push(Step::SlidePost(i));
    }
    steps
}

pub fn prompt_needed(has_content: &[bool]) -> bool {
    plan_prompted(has_content).contains(&Step::Prompt)
}

pub struct TimelineAssembler<'a> {
    silence: SilenceGenerator<'a>,
    probe: &'a dyn DurationProbe,
    timing: TimingSettings,
    work_dir: PathBuf,
}

impl<'a> TimelineAssembler<'a> {
    pub fn new(
        silence: SilenceGenerator<'a>,
        probe: &'a dyn DurationProbe,
        timing: TimingSettings,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            silence,
            probe,
            timing,
            work_dir,
        }
    }

    pub async fn assemble(
        &self,
        policy: PromptPolicy,
        slides: &[SlideNarration],
        prompt: Option<&Path>,
    ) -> PipelineResult<NarrationTimeline> {
        let has_content: Vec<bool> = slides.iter().map(|s| s.audio.is_some()).collect();

        let steps = match policy {
            PromptPolicy::InterSlidePrompt => {
                let steps = plan_prompted(&has_content);
                if steps.is_empty() {
                    return Err(PipelineError::EmptyTimeline(
                        "no slide has speaker notes".to_string(),
                    ));
                }
                steps
            }
            PromptPolicy::FixedCadence => {
                if slides.is_empty() {
                    return Err(PipelineError::EmptyTimeline(
                        "presentation has no slides".to_string(),
                    ));
                }
                plan_cadence(&has_content)
            }
        };

        let mut silences: HashMap<u64, AudioSegment> = HashMap::new();
        let mut timeline = NarrationTimeline::default();
        let mut current_narration = 0.0;

        for step in steps {
            match step {
                Step::Narration(i) => {
                    let Some(path) = slides[i].audio.clone() else {
                        continue;
                    };
                    let mut segment = AudioSegment::new(path, SegmentKind::Narration);
                    if policy == PromptPolicy::FixedCadence {
                        let seconds = self.measure(&segment.path).await?;
                        current_narration = seconds;
                        segment = segment.with_duration(seconds);
                    }
                    timeline.segments.push(segment);
                }
                Step::Prompt => match prompt {
                    Some(path) => timeline
                        .segments
                        .push(AudioSegment::new(path.to_path_buf(), SegmentKind::Prompt)),
                    None => emit(
                        Level::Debug,
                        "timeline.prompt_skipped",
                        "No prompt audio, keeping only the pauses",
                        None,
                    ),
                },
                Step::PromptPrePause => {
                    let segment = self
                        .silence_of(self.timing.prompt_pre_pause, &mut silences)
                        .await?;
                    timeline.segments.push(segment);
                }
                Step::PromptPostPause => {
                    let segment = self
                        .silence_of(self.timing.prompt_post_pause, &mut silences)
                        .await?;
                    timeline.segments.push(segment);
                }
                Step::SlidePre(_) => {
                    current_narration = 0.0;
                    let segment = self
                        .silence_of(self.timing.slide_pre_silence, &mut silences)
                        .await?;
                    timeline.segments.push(segment);
                }
                Step::Fallback(_) => {
                    let segment = self
                        .silence_of(self.timing.fallback_narration, &mut silences)
                        .await?;
                    current_narration = segment.duration_seconds.unwrap_or_default();
                    timeline.segments.push(segment);
                }
                Step::SlidePost(i) => {
                    let segment = self
                        .silence_of(self.timing.slide_post_silence, &mut silences)
                        .await?;
                    timeline.segments.push(segment);
                    timeline.slide_durations.push(SlideDuration {
                        slide_index: slides[i].slide_index,
                        narration_seconds: current_narration,
                        total_seconds: current_narration
                            + self.silence.clamp(self.timing.slide_pre_silence)
                            + self.silence.clamp(self.timing.slide_post_silence),
                    });
                }
            }
        }

        emit(
            Level::Debug,
            "timeline.assembled",
            &format!(
                "{} segments, {} slide durations",
                timeline.segments.len(),
                timeline.slide_durations.len()
            ),
            None,
        );
        Ok(timeline)
    }

    async fn measure(&self, path: &Path) -> PipelineResult<f64> {
        let seconds = self
            .probe
            .duration_seconds(path)
            .await
            .map_err(|err| PipelineError::mix(MediaStage::Probe, err))?;
        Ok(seconds.max(0.0))
    }

    /// Equal-length silences are generated once and reused.
    async fn silence_of(
        &self,
        seconds: f64,
        cache: &mut HashMap<u64, AudioSegment>,
    ) -> PipelineResult<AudioSegment> {
        let clamped = self.silence.clamp(seconds);
        let millis = (clamped * 1000.0).round() as u64;
        if let Some(existing) = cache.get(&millis) {
            return Ok(existing.clone());
        }

        let path = self.work_dir.join(format!("silence_{millis}ms.wav"));
        let written = self.silence.generate(&path, clamped).await?;
        let segment = AudioSegment::new(path, SegmentKind::Silence).with_duration(written);
        cache.insert(millis, segment.clone());
        Ok(segment)
    }
}
