use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::report::PipelineOutcome;
use super::workdir::WorkDir;
use super::{ArtifactKind, BookendInputs, Collaborators, PipelineRequest};
use crate::common::paths;
use crate::ui::prelude::{Level, emit};
use crate::video::audio::{AudioFormat, AudioMixer, SilenceGenerator};
use crate::video::compose::{Bookend, VideoComposer, VideoTimeline, is_image};
use crate::video::config::{BookendMode, SlidecastConfig};
use crate::video::error::{MediaStage, PipelineError, PipelineResult, Stage};
use crate::video::lease::{Lease, LeaseError, acquire_lease, new_run_id};
use crate::video::notes::{SlideNote, extract_notes};
use crate::video::slides::SlideRenderer;
use crate::video::speech::{NarrationJob, NarrationSynthesizer};
use crate::video::support::utils::{expand_path, move_into_place, sibling_with_extension};
use crate::video::timeline::{
    PromptPolicy, SlideDuration, SlideNarration, TimelineAssembler, prompt_needed,
};
use crate::video::voice::{PronunciationDictionary, VoiceProfile};

pub struct Pipeline<'a> {
    config: &'a SlidecastConfig,
    tools: Collaborators<'a>,
}

/// Everything checked before any temporary state exists.
struct Prepared {
    run_id: String,
    document: PathBuf,
    output: PathBuf,
    bookends: BookendInputs,
    _lease: Option<Lease>,
}

/// An opening or closing visual with the audio that plays under it.
struct BookendTrack {
    visual: Bookend,
    audio: PathBuf,
}

struct Completed {
    output: PathBuf,
    slides: Vec<SlideDuration>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a SlidecastConfig, tools: Collaborators<'a>) -> Self {
        Self { config, tools }
    }

    pub async fn run(&self, request: &PipelineRequest) -> PipelineOutcome {
        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(err) => {
                let run_id = new_run_id();
                self.enter(Stage::Failed, &run_id);
                return PipelineOutcome::failed(&run_id, &err);
            }
        };
        let run_id = prepared.run_id.clone();

        let work = match WorkDir::create(self.config.work_root.as_deref().map(expand_path).as_deref(), &run_id) {
            Ok(work) => work,
            Err(err) => {
                self.enter(Stage::Failed, &run_id);
                return PipelineOutcome::failed(
                    &run_id,
                    &PipelineError::Config(format!("{err:#}")),
                );
            }
        };
        emit(
            Level::Debug,
            "pipeline.workdir",
            &format!("Working directory {}", work.path().display()),
            None,
        );

        let result = self.execute(request, &prepared, &work).await;

        self.enter(Stage::Cleanup, &run_id);
        let work_path = work.path().to_path_buf();
        if let Err(err) = work.cleanup() {
            emit(
                Level::Warn,
                "pipeline.cleanup_failed",
                &format!("Could not remove {}: {err:#}", work_path.display()),
                None,
            );
        }
        drop(prepared);

        match result {
            Ok(done) => {
                self.enter(Stage::Done, &run_id);
                PipelineOutcome::succeeded(&run_id, done.output, done.slides)
            }
            Err(err) => {
                self.enter(Stage::Failed, &run_id);
                PipelineOutcome::failed(&run_id, &err)
            }
        }
    }

    fn prepare(&self, request: &PipelineRequest) -> PipelineResult<Prepared> {
        self.enter(Stage::Init, "-");
        request.options.validate()?;

        let document = self.config.resolve_document(&request.document);
        check_document(&document)?;
        let output = sibling_with_extension(&document, request.options.artifact.extension())
            .map_err(|err| PipelineError::input(&document, format!("{err:#}")))?;

        let bookends = match request.options.artifact {
            ArtifactKind::Video => self.resolve_bookends(request)?,
            ArtifactKind::NarrationAudio => BookendInputs::default(),
        };

        let lease = if self.config.runtime.serialize_runs {
            Some(self.lease_for(&output)?)
        } else {
            None
        };
        let run_id = lease
            .as_ref()
            .map(|l| l.run_id().to_string())
            .unwrap_or_else(new_run_id);

        Ok(Prepared {
            run_id,
            document,
            output,
            bookends,
            _lease: lease,
        })
    }

    fn lease_for(&self, output: &Path) -> PipelineResult<Lease> {
        let lease_dir = match &self.config.runtime.lease_dir {
            Some(dir) => expand_path(dir),
            None => paths::lease_dir().map_err(|err| PipelineError::Config(format!("{err:#}")))?,
        };
        let key = output.to_string_lossy();
        acquire_lease(&lease_dir, &key, self.config.runtime.lease_ttl()).map_err(|err| match err {
            LeaseError::Busy {
                resource,
                expires_at,
                ..
            } => PipelineError::Busy {
                resource,
                expires_at: expires_at.to_rfc3339(),
            },
            other => PipelineError::Config(other.to_string()),
        })
    }

    fn resolve_bookends(&self, request: &PipelineRequest) -> PipelineResult<BookendInputs> {
        let given = &request.bookends;
        let resolve = |label: &str, path: &Option<PathBuf>| -> PipelineResult<Option<PathBuf>> {
            let Some(path) = path else {
                return Ok(None);
            };
            let resolved = self.config.resolve_asset(path);
            if !resolved.is_file() {
                return Err(PipelineError::input(
                    &resolved,
                    format!("{label} file does not exist"),
                ));
            }
            Ok(Some(resolved))
        };

        let resolved = BookendInputs {
            opening: resolve("opening", &given.opening)?,
            closing: resolve("closing", &given.closing)?,
            opening_audio: resolve("opening audio", &given.opening_audio)?,
            closing_audio: resolve("closing audio", &given.closing_audio)?,
            opening_prompt: given.opening_prompt.clone().filter(|p| !p.trim().is_empty()),
            closing_prompt: given.closing_prompt.clone().filter(|p| !p.trim().is_empty()),
            music: resolve("background music", &given.music)?,
        };

        if request.options.opening_closing_mode == BookendMode::Image {
            for visual in [&resolved.opening, &resolved.closing].into_iter().flatten() {
                if !is_image(visual) {
                    return Err(PipelineError::Config(format!(
                        "{} is not an image; use the video opening/closing mode for clips",
                        visual.display()
                    )));
                }
            }
        }
        Ok(resolved)
    }

    async fn execute(
        &self,
        request: &PipelineRequest,
        prepared: &Prepared,
        work: &WorkDir,
    ) -> PipelineResult<Completed> {
        let run_id = prepared.run_id.as_str();
        let options = &request.options;

        self.enter(Stage::ExtractNotes, run_id);
        let package_dir = scratch(work, "package")?;
        let notes = extract_notes(&prepared.document, &package_dir)
            .map_err(|err| PipelineError::extraction(&prepared.document, err))?;
        emit(
            Level::Info,
            "notes.extracted",
            &format!(
                "Found notes for {} of {} note pages",
                notes.iter().filter(|n| n.has_content()).count(),
                notes.len()
            ),
            None,
        );

        let format = AudioFormat::canonical(options.channel_layout);
        let synthesizer = NarrationSynthesizer::new(
            self.tools.speech,
            AudioMixer::new(self.tools.ffmpeg, format),
            VoiceProfile::for_gender(request.gender, &self.config.voice),
            self.dictionary()?,
            scratch(work, "tts_raw")?,
        );
        let narration_dir = scratch(work, "narration")?;
        let jobs = narration_jobs(&notes, &narration_dir);
        let concurrency = self.config.runtime.synthesis_concurrency;

        let mixer = AudioMixer::new(self.tools.ffmpeg, format);
        let silence = SilenceGenerator::new(self.tools.ffmpeg, format, self.config.timing.min_silence);
        let assembler = TimelineAssembler::new(
            SilenceGenerator::new(self.tools.ffmpeg, format, self.config.timing.min_silence),
            self.tools.probe,
            self.config.timing.clone(),
            scratch(work, "timeline")?,
        );

        match options.artifact {
            ArtifactKind::NarrationAudio => {
                self.enter(Stage::SynthesizeNarration, run_id);
                let slides = synthesizer.synthesize_all(jobs, concurrency).await?;
                let prompt = self
                    .synthesize_prompt(&synthesizer, request, &slides, &narration_dir)
                    .await?;

                self.enter(Stage::MixAudio, run_id);
                let timeline = assembler
                    .assemble(options.prompt_policy, &slides, prompt.as_deref())
                    .await?;
                let staged = work.path().join("narration.wav");
                mixer
                    .concatenate(
                        &timeline.segments,
                        &work.path().join("narration_concat.txt"),
                        &staged,
                    )
                    .await?;
                move_into_place(&staged, &prepared.output)
                    .map_err(|err| PipelineError::mix(MediaStage::Concat, err))?;

                Ok(Completed {
                    output: prepared.output.clone(),
                    slides: timeline.slide_durations,
                })
            }
            ArtifactKind::Video => {
                self.enter(Stage::RenderSlides, run_id);
                self.enter(Stage::SynthesizeNarration, run_id);
                let render_dir = scratch(work, "render")?;
                let slides_dir = scratch(work, "slides")?;
                let renderer = SlideRenderer::new(self.tools.converter);
                let render = renderer.render(
                    &prepared.document,
                    &render_dir,
                    &slides_dir,
                    options.quality,
                );
                let synthesize = synthesizer.synthesize_all(jobs, concurrency);
                let (images, narrations) = tokio::try_join!(render, synthesize)?;
                let slides = align_to_slides(images.len(), narrations);

                let bookend_dir = scratch(work, "bookends")?;
                let bookends = &prepared.bookends;
                let opening = self
                    .bookend_track(
                        "opening",
                        bookends.opening.as_deref(),
                        bookends.opening_prompt.as_deref(),
                        bookends.opening_audio.as_deref(),
                        &bookend_dir,
                        &silence,
                    )
                    .await?;
                let closing = self
                    .bookend_track(
                        "closing",
                        bookends.closing.as_deref(),
                        bookends.closing_prompt.as_deref(),
                        bookends.closing_audio.as_deref(),
                        &bookend_dir,
                        &silence,
                    )
                    .await?;

                self.enter(Stage::MixAudio, run_id);
                let timeline = assembler
                    .assemble(options.prompt_policy, &slides, None)
                    .await?;
                emit(
                    Level::Debug,
                    "timeline.assembled",
                    &format!(
                        "{} segments, {:.2}s of slides",
                        timeline.segments.len(),
                        timeline.slides_total_seconds()
                    ),
                    None,
                );
                let narration = work.path().join("narration.wav");
                mixer
                    .concatenate(
                        &timeline.segments,
                        &work.path().join("narration_concat.txt"),
                        &narration,
                    )
                    .await?;

                let main = match &bookends.music {
                    Some(music) => {
                        let mixed = work.path().join("main_mix.wav");
                        mixer
                            .mix_with_background(
                                &narration,
                                music,
                                self.config.video.music_gain,
                                work.path(),
                                &mixed,
                            )
                            .await?;
                        mixed
                    }
                    None => narration,
                };

                let final_audio = work.path().join("final.wav");
                mixer
                    .assemble_final(
                        opening.as_ref().map(|t| t.audio.as_path()),
                        &main,
                        closing.as_ref().map(|t| t.audio.as_path()),
                        work.path(),
                        &final_audio,
                    )
                    .await?;

                let visuals = VideoTimeline::build(
                    opening.as_ref().map(|t| &t.visual),
                    &images,
                    &timeline.slide_durations,
                    closing.as_ref().map(|t| &t.visual),
                )?;
                self.check_sync(&visuals, &final_audio).await;

                self.enter(Stage::ComposeVideo, run_id);
                let staged = work.path().join("output.mp4");
                VideoComposer::new(
                    self.tools.ffmpeg,
                    &self.config.video,
                    options.opening_closing_mode,
                )
                .compose(&visuals, &final_audio, work.path(), &staged)
                .await?;
                move_into_place(&staged, &prepared.output)
                    .map_err(|err| PipelineError::compose(MediaStage::Encode, err))?;

                Ok(Completed {
                    output: prepared.output.clone(),
                    slides: timeline.slide_durations,
                })
            }
        }
    }

    /// The inter-slide prompt is only synthesized when the plan actually uses it.
    async fn synthesize_prompt(
        &self,
        synthesizer: &NarrationSynthesizer<'_>,
        request: &PipelineRequest,
        slides: &[SlideNarration],
        narration_dir: &Path,
    ) -> PipelineResult<Option<PathBuf>> {
        if request.options.prompt_policy != PromptPolicy::InterSlidePrompt {
            return Ok(None);
        }
        let has_content: Vec<bool> = slides.iter().map(|s| s.audio.is_some()).collect();
        if !prompt_needed(&has_content) {
            return Ok(None);
        }

        let text = request
            .prompt_text
            .as_deref()
            .unwrap_or(&self.config.prompt_text);
        synthesizer
            .synthesize_segment(text, &narration_dir.join("prompt.wav"))
            .await
    }

    async fn bookend_track(
        &self,
        name: &str,
        visual: Option<&Path>,
        prompt: Option<&str>,
        audio: Option<&Path>,
        dir: &Path,
        silence: &SilenceGenerator<'_>,
    ) -> PipelineResult<Option<BookendTrack>> {
        let visual = match (visual, prompt, self.tools.images) {
            (Some(path), _, _) => Some(path.to_path_buf()),
            (None, Some(prompt), Some(images)) => {
                let target = dir.join(format!("{name}.png"));
                emit(
                    Level::Info,
                    "bookend.generate",
                    &format!("Generating {name} image"),
                    None,
                );
                let generated = images
                    .generate_image(prompt, &self.config.image.aspect_ratio, &target)
                    .await
                    .map_err(|err| PipelineError::Render {
                        message: format!("{name} image generation failed"),
                        detail: format!("{err:#}"),
                    })?;
                Some(generated)
            }
            (None, Some(_), None) => {
                emit(
                    Level::Warn,
                    "bookend.no_generator",
                    &format!("No image generator available, skipping {name}"),
                    None,
                );
                None
            }
            (None, None, _) => None,
        };

        let Some(visual) = visual else {
            if let Some(audio) = audio {
                emit(
                    Level::Warn,
                    "bookend.audio_ignored",
                    &format!("Ignoring {name} audio {} without a {name} visual", audio.display()),
                    None,
                );
            }
            return Ok(None);
        };

        let fallback = self.config.timing.fallback_bookend;
        let track = match audio {
            Some(audio) => {
                let seconds = match self.tools.probe.duration_seconds(audio).await {
                    Ok(seconds) if seconds.is_finite() && seconds > 0.0 => seconds,
                    Ok(_) | Err(_) => {
                        emit(
                            Level::Warn,
                            "bookend.unmeasured",
                            &format!(
                                "Could not measure {name} audio {}, showing it for {fallback:.1}s",
                                audio.display()
                            ),
                            None,
                        );
                        fallback
                    }
                };
                BookendTrack {
                    visual: Bookend {
                        path: visual,
                        seconds,
                    },
                    audio: audio.to_path_buf(),
                }
            }
            None => {
                let silent = dir.join(format!("{name}_silence.wav"));
                let seconds = silence.generate(&silent, fallback).await?;
                BookendTrack {
                    visual: Bookend {
                        path: visual,
                        seconds,
                    },
                    audio: silent,
                }
            }
        };
        Ok(Some(track))
    }

    async fn check_sync(&self, visuals: &VideoTimeline, audio: &Path) {
        let expected = visuals.total_seconds();
        match self.tools.probe.duration_seconds(audio).await {
            Ok(actual) => {
                let drift = (actual - expected).abs();
                if drift > self.config.timing.sync_tolerance {
                    emit(
                        Level::Warn,
                        "pipeline.sync_drift",
                        &format!(
                            "Slides last {expected:.2}s but the soundtrack is {actual:.2}s; the video ends with the shorter one"
                        ),
                        Some(json!({ "visual_seconds": expected, "audio_seconds": actual })),
                    );
                }
            }
            Err(err) => emit(
                Level::Debug,
                "pipeline.sync_unchecked",
                &format!("Could not measure final audio: {err:#}"),
                None,
            ),
        }
    }

    fn dictionary(&self) -> PipelineResult<PronunciationDictionary> {
        match &self.config.voice.pronunciation_dictionary {
            Some(path) => {
                let path = self.config.resolve_asset(path);
                PronunciationDictionary::load(&path)
                    .map_err(|err| PipelineError::Config(format!("{err:#}")))
            }
            None => Ok(PronunciationDictionary::default()),
        }
    }

    fn enter(&self, stage: Stage, run_id: &str) {
        let (level, message) = match stage {
            Stage::Init => (Level::Debug, "Checking inputs"),
            Stage::ExtractNotes => (Level::Info, "Extracting speaker notes"),
            Stage::RenderSlides => (Level::Info, "Rendering slide images"),
            Stage::SynthesizeNarration => (Level::Info, "Synthesizing narration"),
            Stage::MixAudio => (Level::Info, "Assembling audio"),
            Stage::ComposeVideo => (Level::Info, "Encoding video"),
            Stage::Cleanup => (Level::Debug, "Removing working directory"),
            Stage::Done => (Level::Debug, "Pipeline finished"),
            Stage::Failed => (Level::Debug, "Pipeline failed"),
        };
        emit(
            level,
            "pipeline.stage",
            message,
            Some(json!({ "stage": stage, "run_id": run_id })),
        );
    }
}

fn check_document(document: &Path) -> PipelineResult<()> {
    let metadata = match fs::metadata(document) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(PipelineError::input(document, "file does not exist"));
        }
        Err(err) => return Err(PipelineError::input(document, err.to_string())),
    };
    if !metadata.is_file() {
        return Err(PipelineError::input(document, "not a regular file"));
    }
    File::open(document)
        .map(|_| ())
        .map_err(|err| PipelineError::input(document, format!("cannot be read: {err}")))
}

fn scratch(work: &WorkDir, name: &str) -> PipelineResult<PathBuf> {
    work.subdir(name)
        .map_err(|err| PipelineError::Config(format!("{err:#}")))
}

fn narration_jobs(notes: &[SlideNote], dir: &Path) -> Vec<NarrationJob> {
    notes
        .iter()
        .map(|note| NarrationJob {
            slide_index: note.index,
            text: note.text.clone(),
            output: dir.join(format!("slide_{}.wav", note.index)),
        })
        .collect()
}

/// One entry per rendered slide. The note for slide `k` is the note part
/// numbered `k`; notes without a slide are dropped.
fn align_to_slides(slide_count: usize, narrations: Vec<SlideNarration>) -> Vec<SlideNarration> {
    let mut by_index: BTreeMap<u32, Option<PathBuf>> = narrations
        .into_iter()
        .map(|n| (n.slide_index, n.audio))
        .collect();

    let slides: Vec<SlideNarration> = (1..=slide_count as u32)
        .map(|slide_index| SlideNarration {
            slide_index,
            audio: by_index.remove(&slide_index).flatten(),
        })
        .collect();

    let unmatched: Vec<u32> = by_index.keys().copied().collect();
    if !unmatched.is_empty() {
        emit(
            Level::Warn,
            "notes.unmatched",
            &format!(
                "Dropping notes for {unmatched:?}: the document rendered only {slide_count} slides"
            ),
            None,
        );
    }
    slides
}
