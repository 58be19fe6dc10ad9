use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use super::AudioFormat;
use crate::video::error::{MediaStage, PipelineError, PipelineResult};
use crate::video::support::ffmpeg::{FfmpegRunOptions, FfmpegRunner};
use crate::video::support::manifest::ConcatManifest;
use crate::video::timeline::AudioSegment;

/// Concatenation and mixing of canonical-format audio.
pub struct AudioMixer<'a> {
    ffmpeg: &'a dyn FfmpegRunner,
    format: AudioFormat,
}

impl<'a> AudioMixer<'a> {
    pub fn new(ffmpeg: &'a dyn FfmpegRunner, format: AudioFormat) -> Self {
        Self { ffmpeg, format }
    }

    /// Transcode any input into the canonical format.
    pub async fn normalize(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
        ];
        self.format.push_output_args(&mut args);
        args.push(output.to_string_lossy().into_owned());

        self.ffmpeg
            .run(&args, FfmpegRunOptions::quiet())
            .await
            .with_context(|| format!("normalizing {}", input.display()))
            .map_err(|err| PipelineError::mix(MediaStage::Normalize, err))
    }

    /// Stream-copy concatenation of already normalized segments.
    pub async fn concatenate(
        &self,
        segments: &[AudioSegment],
        manifest_path: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        let files: Vec<&Path> = segments.iter().map(|s| s.path.as_path()).collect();
        self.concat_files(&files, manifest_path, output).await
    }

    /// Mix `background` under `narration`, looped and attenuated by `gain`.
    /// The result is exactly as long as the narration.
    pub async fn mix_with_background(
        &self,
        narration: &Path,
        background: &Path,
        gain: f32,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        let narration_norm = work_dir.join("mix_narration.wav");
        let background_norm = work_dir.join("mix_background.wav");
        self.normalize(narration, &narration_norm).await?;
        self.normalize(background, &background_norm).await?;

        let filter = format!(
            "[1:a]volume={gain:.6}[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0,{}[out]",
            self.format.aformat_filter()
        );

        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            narration_norm.to_string_lossy().into_owned(),
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            background_norm.to_string_lossy().into_owned(),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[out]".to_string(),
        ];
        self.format.push_output_args(&mut args);
        args.push(output.to_string_lossy().into_owned());

        self.ffmpeg
            .run(&args, FfmpegRunOptions::quiet())
            .await
            .with_context(|| format!("mixing background {}", background.display()))
            .map_err(|err| PipelineError::mix(MediaStage::Mix, err))
    }

    /// Opening, main and closing tracks joined in that order.
    pub async fn assemble_final(
        &self,
        opening: Option<&Path>,
        main: &Path,
        closing: Option<&Path>,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        let parts: Vec<(&str, &Path)> = [("opening", opening), ("main", Some(main)), ("closing", closing)]
            .into_iter()
            .filter_map(|(name, path)| path.map(|p| (name, p)))
            .collect();

        let mut normalized: Vec<PathBuf> = Vec::with_capacity(parts.len());
        for (name, path) in parts {
            let target = work_dir.join(format!("final_{name}.wav"));
            self.normalize(path, &target).await?;
            normalized.push(target);
        }

        let files: Vec<&Path> = normalized.iter().map(PathBuf::as_path).collect();
        self.concat_files(&files, &work_dir.join("final_concat.txt"), output)
            .await
    }

    async fn concat_files(
        &self,
        files: &[&Path],
        manifest_path: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        if files.is_empty() {
            return Err(PipelineError::EmptyTimeline(
                "no audio segments to concatenate".to_string(),
            ));
        }

        ConcatManifest::from_files(files.iter().copied())
            .write_to(manifest_path)
            .map_err(|err| PipelineError::mix(MediaStage::Concat, err))?;

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest_path.to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        self.ffmpeg
            .run(&args, FfmpegRunOptions::quiet())
            .await
            .with_context(|| format!("concatenating {} segments", files.len()))
            .map_err(|err| PipelineError::mix(MediaStage::Concat, err))?;

        if !output.exists() {
            return Err(PipelineError::mix(
                MediaStage::Concat,
                anyhow!("concatenated output {} was not written", output.display()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::audio::ChannelLayout;
    use crate::video::testing::RecordingFfmpeg;
    use crate::video::timeline::SegmentKind;
    use std::fs;
    use tempfile::tempdir;

    fn mixer(ffmpeg: &RecordingFfmpeg) -> AudioMixer<'_> {
        AudioMixer::new(ffmpeg, AudioFormat::canonical(ChannelLayout::Stereo))
    }

    #[tokio::test]
    async fn concatenate_writes_manifest_in_segment_order() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::default();
        let segments = vec![
            AudioSegment::new(temp.path().join("slide_1.wav"), SegmentKind::Narration),
            AudioSegment::new(temp.path().join("pause.wav"), SegmentKind::Silence),
            AudioSegment::new(temp.path().join("slide_3.wav"), SegmentKind::Narration),
        ];
        let manifest = temp.path().join("concat.txt");
        let out = temp.path().join("narration.wav");

        mixer(&ffmpeg)
            .concatenate(&segments, &manifest, &out)
            .await
            .unwrap();

        let text = fs::read_to_string(&manifest).unwrap();
        let files: Vec<&str> = text.lines().filter(|l| l.starts_with("file ")).collect();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("slide_1.wav'"));
        assert!(files[2].ends_with("slide_3.wav'"));
        assert!(ffmpeg.last_call().join(" ").contains("-c copy"));
    }

    #[tokio::test]
    async fn empty_concat_is_an_empty_timeline() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::default();
        let err = mixer(&ffmpeg)
            .concatenate(&[], &temp.path().join("c.txt"), &temp.path().join("o.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTimeline(_)));
        assert!(ffmpeg.calls().is_empty());
    }

    #[tokio::test]
    async fn background_is_looped_attenuated_and_cut_to_narration() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::default();
        let out = temp.path().join("mixed.wav");

        mixer(&ffmpeg)
            .mix_with_background(
                Path::new("/in/narration.wav"),
                Path::new("/in/music.mp3"),
                0.1,
                temp.path(),
                &out,
            )
            .await
            .unwrap();

        let calls = ffmpeg.calls();
        assert_eq!(calls.len(), 3, "two normalizations and one mix");
        let mix = calls[2].join(" ");
        assert!(mix.contains("-stream_loop -1 -i"));
        assert!(mix.contains("volume=0.100000"));
        assert!(mix.contains("duration=first"));
        assert!(mix.contains("-ac 2"));
    }

    #[tokio::test]
    async fn normalize_failure_is_reported_as_normalize_stage() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::failing_on("music.mp3");
        let err = mixer(&ffmpeg)
            .mix_with_background(
                Path::new("/in/narration.wav"),
                Path::new("/in/music.mp3"),
                0.1,
                temp.path(),
                &temp.path().join("mixed.wav"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Mix {
                stage: MediaStage::Normalize,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn assemble_final_keeps_fixed_order_and_skips_missing_parts() {
        let temp = tempdir().unwrap();
        let ffmpeg = RecordingFfmpeg::default();
        let out = temp.path().join("final.wav");

        mixer(&ffmpeg)
            .assemble_final(
                None,
                Path::new("/in/main.wav"),
                Some(Path::new("/in/outro.wav")),
                temp.path(),
                &out,
            )
            .await
            .unwrap();

        let manifest = fs::read_to_string(temp.path().join("final_concat.txt")).unwrap();
        let files: Vec<&str> = manifest.lines().skip(1).collect();
        assert_eq!(files.len(), 2);
        assert!(files[0].contains("final_main.wav"));
        assert!(files[1].contains("final_closing.wav"));
    }
}
