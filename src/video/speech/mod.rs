//! Narration synthesis: note text in, canonical-format clip out.

pub mod cloud;

pub use cloud::CloudSpeechClient;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};

use crate::ui::prelude::{Level, emit};
use crate::video::audio::AudioMixer;
use crate::video::error::{PipelineError, PipelineResult};
use crate::video::timeline::SlideNarration;
use crate::video::voice::{PronunciationDictionary, VoiceProfile};

/// Text-to-speech backend. Returns the file it produced inside `out_dir`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile, out_dir: &Path) -> Result<PathBuf>;
}

/// One note waiting to be spoken.
#[derive(Debug, Clone)]
pub struct NarrationJob {
    pub slide_index: u32,
    pub text: String,
    pub output: PathBuf,
}

pub struct NarrationSynthesizer<'a> {
    backend: &'a dyn SpeechSynthesizer,
    mixer: AudioMixer<'a>,
    voice: VoiceProfile,
    dictionary: PronunciationDictionary,
    raw_dir: PathBuf,
}

impl<'a> NarrationSynthesizer<'a> {
    pub fn new(
        backend: &'a dyn SpeechSynthesizer,
        mixer: AudioMixer<'a>,
        voice: VoiceProfile,
        dictionary: PronunciationDictionary,
        raw_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            mixer,
            voice,
            dictionary,
            raw_dir,
        }
    }

    /// Speak `text` into `output` in the canonical format.
    ///
    /// Empty or whitespace-only text is skipped: no file is written and
    /// `Ok(None)` is returned. Any backend failure on real text is an error.
    pub async fn synthesize_segment(
        &self,
        text: &str,
        output: &Path,
    ) -> PipelineResult<Option<PathBuf>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let spoken = self.dictionary.apply(text);
        let produced = self
            .backend
            .synthesize(&spoken, &self.voice, &self.raw_dir)
            .await
            .map_err(|err| PipelineError::synthesis(output, err))?;

        if !produced.is_file() {
            return Err(PipelineError::synthesis(
                output,
                anyhow!(
                    "speech backend reported {} but no file exists there",
                    produced.display()
                ),
            ));
        }

        // Normalizing in place would have ffmpeg read and write the same file.
        let source = if produced == output {
            let moved = output.with_extension("raw.wav");
            std::fs::rename(&produced, &moved)
                .with_context(|| format!("Failed to move {}", produced.display()))
                .map_err(|err| PipelineError::synthesis(output, err))?;
            moved
        } else {
            produced
        };

        self.mixer.normalize(&source, output).await?;

        emit(
            Level::Debug,
            "speech.segment",
            &format!("Synthesized {} chars into {}", text.chars().count(), output.display()),
            None,
        );
        Ok(Some(output.to_path_buf()))
    }

    /// Synthesize every job with up to `concurrency` requests in flight.
    /// Results come back in job order regardless of completion order.
    pub async fn synthesize_all(
        &self,
        jobs: Vec<NarrationJob>,
        concurrency: usize,
    ) -> PipelineResult<Vec<SlideNarration>> {
        stream::iter(jobs)
            .map(|job| async move {
                let audio = self.synthesize_segment(&job.text, &job.output).await?;
                Ok::<_, PipelineError>(SlideNarration {
                    slide_index: job.slide_index,
                    audio,
                })
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::audio::{AudioFormat, ChannelLayout};
    use crate::video::config::VoiceSettings;
    use crate::video::testing::{FakeSynthesizer, RecordingFfmpeg};
    use crate::video::voice::Gender;
    use tempfile::tempdir;

    fn synthesizer<'a>(
        backend: &'a FakeSynthesizer,
        ffmpeg: &'a RecordingFfmpeg,
        raw_dir: &Path,
    ) -> NarrationSynthesizer<'a> {
        NarrationSynthesizer::new(
            backend,
            AudioMixer::new(ffmpeg, AudioFormat::canonical(ChannelLayout::Mono)),
            VoiceProfile::for_gender(Gender::Female, &VoiceSettings::default()),
            PronunciationDictionary::from_pairs([("AI", "エーアイ")]),
            raw_dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn whitespace_text_is_skipped_without_a_file() {
        let temp = tempdir().unwrap();
        let backend = FakeSynthesizer::default();
        let ffmpeg = RecordingFfmpeg::default();
        let synth = synthesizer(&backend, &ffmpeg, &temp.path().join("raw"));

        let out = temp.path().join("slide_1.wav");
        for text in ["", "   ", "\n\t"] {
            assert_eq!(synth.synthesize_segment(text, &out).await.unwrap(), None);
        }
        assert!(!out.exists());
        assert!(backend.texts().is_empty());
        assert!(ffmpeg.calls().is_empty());
    }

    #[tokio::test]
    async fn non_empty_text_produces_exactly_the_requested_file() {
        let temp = tempdir().unwrap();
        let backend = FakeSynthesizer::default();
        let ffmpeg = RecordingFfmpeg::default();
        let synth = synthesizer(&backend, &ffmpeg, &temp.path().join("raw"));

        let out = temp.path().join("slide_2.wav");
        let written = synth.synthesize_segment("  About AI  ", &out).await.unwrap();

        assert_eq!(written, Some(out.clone()));
        assert!(out.is_file());
        assert_eq!(backend.texts(), vec!["About エーアイ".to_string()]);
        let normalize = ffmpeg.last_call().join(" ");
        assert!(normalize.contains("-ar 44100 -ac 1 -c:a pcm_s16le"));
    }

    #[tokio::test]
    async fn backend_failure_is_a_synthesis_error() {
        let temp = tempdir().unwrap();
        let backend = FakeSynthesizer::failing();
        let ffmpeg = RecordingFfmpeg::default();
        let synth = synthesizer(&backend, &ffmpeg, &temp.path().join("raw"));

        let out = temp.path().join("slide_1.wav");
        let err = synth.synthesize_segment("hello", &out).await.unwrap_err();
        match err {
            PipelineError::Synthesis { target, .. } => assert_eq!(target, out),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_synthesis_keeps_slide_order() {
        let temp = tempdir().unwrap();
        let backend = FakeSynthesizer::default();
        let ffmpeg = RecordingFfmpeg::default();
        let synth = synthesizer(&backend, &ffmpeg, &temp.path().join("raw"));

        let jobs: Vec<NarrationJob> = ["one", "", "three", "four"]
            .iter()
            .enumerate()
            .map(|(i, text)| NarrationJob {
                slide_index: i as u32 + 1,
                text: text.to_string(),
                output: temp.path().join(format!("slide_{}.wav", i + 1)),
            })
            .collect();

        let results = synth.synthesize_all(jobs, 3).await.unwrap();
        let order: Vec<u32> = results.iter().map(|r| r.slide_index).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(results[1].audio.is_none());
        assert!(results[3].audio.is_some());
    }
}
