use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::paths;
use crate::ui::prelude::{Level, emit};
use crate::video::support::utils::expand_path;

/// How opening/closing content is supplied to the composer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BookendMode {
    /// Still images shown for the length of their audio
    #[default]
    Image,
    /// Video clips, trimmed or held to the length of their audio
    Video,
}

/// Rasterization quality for slide images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Standard,
    High,
}

impl QualityTier {
    pub fn dpi(self) -> u32 {
        match self {
            QualityTier::Low => 96,
            QualityTier::Standard => 150,
            QualityTier::High => 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceSettings {
    pub language_code: String,
    pub speaking_rate: f32,
    pub pitch: f32,
    pub female_voice: String,
    pub male_voice: String,
    /// TOML file of `word = "reading"` substitutions applied before synthesis
    pub pronunciation_dictionary: Option<PathBuf>,
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language_code: "ja-JP".to_string(),
            speaking_rate: 1.0,
            pitch: 0.0,
            female_voice: "ja-JP-Neural2-B".to_string(),
            male_voice: "ja-JP-Neural2-C".to_string(),
            pronunciation_dictionary: None,
            endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize".to_string(),
            api_key: None,
        }
    }
}

/// Padding and fallback durations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub prompt_pre_pause: f64,
    pub prompt_post_pause: f64,
    pub slide_pre_silence: f64,
    pub slide_post_silence: f64,
    pub fallback_narration: f64,
    pub fallback_bookend: f64,
    pub min_silence: f64,
    pub sync_tolerance: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            prompt_pre_pause: 0.8,
            prompt_post_pause: 1.2,
            slide_pre_silence: 2.0,
            slide_post_silence: 1.0,
            fallback_narration: 5.0,
            fallback_bookend: 5.0,
            min_silence: 0.1,
            sync_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub crf: u8,
    pub preset: String,
    pub quality: QualityTier,
    pub opening_closing_mode: BookendMode,
    pub background_music: Option<PathBuf>,
    /// Background amplitude relative to the original track
    pub music_gain: f32,
    pub opening: Option<PathBuf>,
    pub closing: Option<PathBuf>,
    pub opening_audio: Option<PathBuf>,
    pub closing_audio: Option<PathBuf>,
    pub opening_prompt: Option<String>,
    pub closing_prompt: Option<String>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            crf: 23,
            preset: "medium".to_string(),
            quality: QualityTier::default(),
            opening_closing_mode: BookendMode::default(),
            background_music: None,
            music_gain: 0.1,
            opening: None,
            closing: None,
            opening_audio: None,
            closing_audio: None,
            opening_prompt: None,
            closing_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub aspect_ratio: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/imagen-3.0-generate-002:predict"
                .to_string(),
            api_key: None,
            aspect_ratio: "16:9".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSettings {
    pub tool_timeout_secs: u64,
    pub synthesis_concurrency: usize,
    pub serialize_runs: bool,
    pub lease_ttl_secs: u64,
    pub lease_dir: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 900,
            synthesis_concurrency: 1,
            serialize_runs: true,
            lease_ttl_secs: 1800,
            lease_dir: None,
        }
    }
}

impl RuntimeSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlidecastConfig {
    /// Directory relative document names are resolved against
    pub base_dir: PathBuf,
    /// Spoken between slides by the inter-slide prompt policy
    pub prompt_text: String,
    /// Parent directory for run working directories (system temp when unset)
    pub work_root: Option<PathBuf>,
    pub voice: VoiceSettings,
    pub timing: TimingSettings,
    pub video: VideoSettings,
    pub image: ImageSettings,
    pub runtime: RuntimeSettings,
}

impl Default for SlidecastConfig {
    fn default() -> Self {
        Self {
            base_dir: paths::default_presentations_dir(),
            prompt_text: "Next slide.".to_string(),
            work_root: None,
            voice: VoiceSettings::default(),
            timing: TimingSettings::default(),
            video: VideoSettings::default(),
            image: ImageSettings::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

pub const ENV_LANGUAGE: &str = "SLIDECAST_TTS_LANGUAGE";
pub const ENV_RATE: &str = "SLIDECAST_TTS_RATE";
pub const ENV_PITCH: &str = "SLIDECAST_TTS_PITCH";
pub const ENV_DICTIONARY: &str = "SLIDECAST_TTS_DICTIONARY";
pub const ENV_TTS_API_KEY: &str = "SLIDECAST_TTS_API_KEY";
pub const ENV_IMAGE_API_KEY: &str = "SLIDECAST_IMAGE_API_KEY";

impl SlidecastConfig {
    /// Load the user config (creating it with defaults) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading slidecast config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents).context("parsing slidecast config")?;
        config.sanitize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("creating slidecast config directory {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("serializing slidecast config")?;
        fs::write(path, toml)
            .with_context(|| format!("writing slidecast config to {}", path.display()))?;
        Ok(())
    }

    /// Voice defaults may be overridden through named environment variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(language) = lookup(ENV_LANGUAGE).filter(|v| !v.trim().is_empty()) {
            self.voice.language_code = language.trim().to_string();
        }
        if let Some(rate) = lookup(ENV_RATE) {
            match rate.trim().parse::<f32>() {
                Ok(value) if value.is_finite() && value > 0.0 => self.voice.speaking_rate = value,
                _ => warn_ignored(ENV_RATE, &rate),
            }
        }
        if let Some(pitch) = lookup(ENV_PITCH) {
            match pitch.trim().parse::<f32>() {
                Ok(value) if value.is_finite() => self.voice.pitch = value,
                _ => warn_ignored(ENV_PITCH, &pitch),
            }
        }
        if let Some(dictionary) = lookup(ENV_DICTIONARY).filter(|v| !v.trim().is_empty()) {
            self.voice.pronunciation_dictionary = Some(PathBuf::from(dictionary.trim()));
        }
        if let Some(key) = lookup(ENV_TTS_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.voice.api_key = Some(key.trim().to_string());
        }
        if let Some(key) = lookup(ENV_IMAGE_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.image.api_key = Some(key.trim().to_string());
        }
    }

    /// Resolve a document name against the base directory.
    pub fn resolve_document(&self, name: &Path) -> PathBuf {
        let expanded = expand_path(name);
        if expanded.is_absolute() {
            expanded
        } else {
            expand_path(&self.base_dir).join(expanded)
        }
    }

    /// Resolve an asset path (music, opening, closing) against the base directory.
    pub fn resolve_asset(&self, path: &Path) -> PathBuf {
        self.resolve_document(path)
    }

    fn sanitize(&mut self) {
        let defaults = TimingSettings::default();
        let timing = &mut self.timing;
        for (value, fallback) in [
            (&mut timing.prompt_pre_pause, defaults.prompt_pre_pause),
            (&mut timing.prompt_post_pause, defaults.prompt_post_pause),
            (&mut timing.slide_pre_silence, defaults.slide_pre_silence),
            (&mut timing.slide_post_silence, defaults.slide_post_silence),
            (&mut timing.fallback_narration, defaults.fallback_narration),
            (&mut timing.fallback_bookend, defaults.fallback_bookend),
            (&mut timing.min_silence, defaults.min_silence),
            (&mut timing.sync_tolerance, defaults.sync_tolerance),
        ] {
            if !value.is_finite() || *value < 0.0 {
                *value = fallback;
            }
        }

        if !self.video.music_gain.is_finite() || self.video.music_gain < 0.0 {
            self.video.music_gain = VideoSettings::default().music_gain;
        }
        if self.video.frame_rate == 0 {
            self.video.frame_rate = VideoSettings::default().frame_rate;
        }
        self.runtime.synthesis_concurrency = self.runtime.synthesis_concurrency.max(1);
    }
}

fn warn_ignored(key: &str, value: &str) {
    emit(
        Level::Warn,
        "config.env.ignored",
        &format!("Ignoring {key}={value}: not a valid number"),
        None,
    );
}

pub fn config_path() -> Result<PathBuf> {
    Ok(paths::slidecast_config_dir()?.join("slidecast.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("slidecast.toml");
        let config = SlidecastConfig::load_from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.timing.fallback_narration, 5.0);
        assert_eq!(config.video.music_gain, 0.1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("slidecast.toml");
        fs::write(
            &path,
            "prompt_text = \"Weiter.\"\n[timing]\nslide_pre_silence = 1.5\nmin_silence = -3.0\n",
        )
        .unwrap();

        let config = SlidecastConfig::load_from_path(&path).unwrap();
        assert_eq!(config.prompt_text, "Weiter.");
        assert_eq!(config.timing.slide_pre_silence, 1.5);
        assert_eq!(config.timing.min_silence, 0.1);
        assert_eq!(config.timing.slide_post_silence, 1.0);
        assert_eq!(config.voice.language_code, "ja-JP");
    }

    #[test]
    fn env_overrides_replace_voice_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LANGUAGE, "en-US"),
            (ENV_RATE, "1.25"),
            (ENV_PITCH, "not-a-number"),
            (ENV_DICTIONARY, "/etc/slidecast/dict.toml"),
        ]);
        let mut config = SlidecastConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.voice.language_code, "en-US");
        assert_eq!(config.voice.speaking_rate, 1.25);
        assert_eq!(config.voice.pitch, 0.0);
        assert_eq!(
            config.voice.pronunciation_dictionary,
            Some(PathBuf::from("/etc/slidecast/dict.toml"))
        );
    }

    #[test]
    fn documents_resolve_against_base_dir() {
        let config = SlidecastConfig {
            base_dir: PathBuf::from("/srv/decks"),
            ..SlidecastConfig::default()
        };
        assert_eq!(
            config.resolve_document(Path::new("intro.pptx")),
            PathBuf::from("/srv/decks/intro.pptx")
        );
        assert_eq!(
            config.resolve_document(Path::new("/tmp/other.pptx")),
            PathBuf::from("/tmp/other.pptx")
        );
    }

    #[test]
    #[serial_test::serial]
    fn load_applies_process_environment() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("slidecast.toml");
        // SAFETY: serialized with every other test that touches the environment
        unsafe { std::env::set_var(ENV_TTS_API_KEY, "from-env") };
        let config = SlidecastConfig::load(Some(&path));
        unsafe { std::env::remove_var(ENV_TTS_API_KEY) };

        let config = config.unwrap();
        assert_eq!(config.voice.api_key.as_deref(), Some("from-env"));
        assert!(path.exists());
        let saved = SlidecastConfig::load_from_path(&path).unwrap();
        assert_eq!(saved.voice.api_key, None);
    }

    #[test]
    fn quality_tiers_map_to_dpi() {
        assert_eq!(QualityTier::Low.dpi(), 96);
        assert_eq!(QualityTier::Standard.dpi(), 150);
        assert_eq!(QualityTier::High.dpi(), 300);
    }
}
