use std::path::Path;

use anyhow::anyhow;

use super::AudioFormat;
use crate::video::error::{MediaStage, PipelineError, PipelineResult};
use crate::video::support::ffmpeg::{FfmpegRunOptions, FfmpegRunner};
use crate::video::support::utils::format_seconds;

/// Writes silent clips in the pipeline's canonical format.
pub struct SilenceGenerator<'a> {
    ffmpeg: &'a dyn FfmpegRunner,
    format: AudioFormat,
    min_seconds: f64,
}

impl<'a> SilenceGenerator<'a> {
    pub fn new(ffmpeg: &'a dyn FfmpegRunner, format: AudioFormat, min_seconds: f64) -> Self {
        Self {
            ffmpeg,
            format,
            min_seconds,
        }
    }

    /// Duration actually written for a request of `seconds`.
    pub fn clamp(&self, seconds: f64) -> f64 {
        if seconds.is_finite() {
            seconds.max(self.min_seconds)
        } else {
            self.min_seconds
        }
    }

    /// Generate silence at `output`, returning the clamped duration.
    pub async fn generate(&self, output: &Path, seconds: f64) -> PipelineResult<f64> {
        let duration = self.clamp(seconds);

        let mut args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            self.format.null_source(),
            "-t".to_string(),
            format_seconds(duration),
        ];
        self.format.push_output_args(&mut args);
        args.push(output.to_string_lossy().into_owned());

        self.ffmpeg
            .run(&args, FfmpegRunOptions::quiet())
            .await
            .map_err(|err| {
                PipelineError::mix(
                    MediaStage::Silence,
                    err.context(format!(
                        "generating {duration:.3}s of silence at {}",
                        output.display()
                    )),
                )
            })?;

        if !output.exists() {
            return Err(PipelineError::mix(
                MediaStage::Silence,
                anyhow!(
                    "ffmpeg reported success but {} was not written ({duration:.3}s requested)",
                    output.display()
                ),
            ));
        }

        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::audio::ChannelLayout;
    use crate::video::testing::RecordingFfmpeg;
    use tempfile::tempdir;

    #[tokio::test]
    async fn short_requests_are_clamped() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::default();
        let generator =
            SilenceGenerator::new(&ffmpeg, AudioFormat::canonical(ChannelLayout::Mono), 0.1);

        let out = temp.path().join("gap.wav");
        let written = generator.generate(&out, 0.0).await.unwrap();

        assert_eq!(written, 0.1);
        assert!(out.exists());
        let call = ffmpeg.last_call().join(" ");
        assert!(call.contains("-t 0.100000"));
        assert!(call.contains("anullsrc=r=44100:cl=mono"));
    }

    #[tokio::test]
    async fn failure_names_target_and_duration() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::failing_on("anullsrc");
        let generator =
            SilenceGenerator::new(&ffmpeg, AudioFormat::canonical(ChannelLayout::Stereo), 0.1);

        let out = temp.path().join("pre_3.wav");
        let err = generator.generate(&out, 2.0).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Mix {
                stage: MediaStage::Silence,
                ..
            }
        ));
        let diag = err.diagnostics().unwrap();
        assert!(diag.contains("pre_3.wav"));
        assert!(diag.contains("2.000s"));
    }
}
