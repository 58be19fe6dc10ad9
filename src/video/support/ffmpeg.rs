use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use super::process::{run_tool, summarize_stderr};
use crate::common::progress::create_media_bar;
use crate::ui::prelude::{Level, emit};

#[async_trait]
pub trait FfmpegRunner: Send + Sync {
    async fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<()>;
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_seconds(&self, path: &Path) -> Result<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegRunOptions {
    /// Expected output length; enables the progress bar when set.
    pub total_duration: Option<f64>,
    pub label: Option<String>,
}

impl FfmpegRunOptions {
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn with_progress(total_duration: f64, label: impl Into<String>) -> Self {
        Self {
            total_duration: Some(total_duration),
            label: Some(label.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemFfmpegRunner {
    timeout: Duration,
}

impl SystemFfmpegRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FfmpegRunner for SystemFfmpegRunner {
    async fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<()> {
        emit(
            Level::Debug,
            "ffmpeg.run",
            &format!("ffmpeg {}", args.join(" ")),
            None,
        );

        let mut command = Command::new("ffmpeg");
        command.arg("-hide_banner").args(["-nostats", "-progress", "pipe:1"]);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().context("Failed to spawn ffmpeg")?;
        let stdout = child.stdout.take().context("ffmpeg stdout was not captured")?;
        let mut stderr = child.stderr.take().context("ffmpeg stderr was not captured")?;

        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer).await;
            buffer
        });

        let pb = options.total_duration.map(|total| {
            create_media_bar(total, options.label.as_deref().unwrap_or("encoding"))
        });

        let progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .context("Failed to read ffmpeg progress")?
            {
                if let Some(pb) = &pb {
                    if let Some(seconds) = parse_progress_time(&line) {
                        pb.set_position((seconds * 1000.0) as u64);
                    } else if let Some(speed) = line.strip_prefix("speed=") {
                        pb.set_message(speed.trim().to_string());
                    }
                }
            }
            child.wait().await.context("Failed to wait for ffmpeg")
        };

        let status = match timeout(self.timeout, progress).await {
            Ok(status) => status?,
            Err(_) => {
                if let Some(pb) = &pb {
                    pb.abandon_with_message("timed out");
                }
                bail!("ffmpeg timed out after {}s", self.timeout.as_secs());
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if !status.success() {
            bail!(
                "ffmpeg exited with status {:?}: {}",
                status.code(),
                summarize_stderr(&stderr)
            );
        }

        Ok(())
    }
}

/// `-progress` emits `out_time=HH:MM:SS.micros` lines.
fn parse_progress_time(line: &str) -> Option<f64> {
    let value = line.strip_prefix("out_time=")?;
    parse_time_to_seconds(value.trim())
}

fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[derive(Debug, Clone, Copy)]
pub struct FfprobeDurationProbe {
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration_seconds(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let output = run_tool("ffprobe", &args, self.timeout)
            .await
            .with_context(|| format!("Failed to probe duration of {}", path.display()))?;

        let duration: f64 = output
            .stdout
            .trim()
            .parse()
            .with_context(|| format!("ffprobe returned no duration for {}", path.display()))?;

        Ok(duration)
    }
}

/// Encoder settings appended before the output path.
#[derive(Debug, Clone)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: &'static str,
    pub audio_codec: &'static str,
    pub audio_bitrate: &'static str,
}

impl EncodeProfile {
    pub fn h264_aac(preset: &str, crf: u8) -> Self {
        Self {
            video_codec: "libx264",
            preset: preset.to_string(),
            crf,
            pixel_format: "yuv420p",
            audio_codec: "aac",
            audio_bitrate: "192k",
        }
    }

    pub fn push_to(&self, args: &mut Vec<String>) {
        args.extend([
            "-c:v".to_string(),
            self.video_codec.to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            self.pixel_format.to_string(),
            "-c:a".to_string(),
            self.audio_codec.to_string(),
            "-b:a".to_string(),
            self.audio_bitrate.to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
    }
}
