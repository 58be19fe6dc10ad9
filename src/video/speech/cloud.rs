use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::SpeechSynthesizer;
use crate::video::audio::CANONICAL_SAMPLE_RATE;
use crate::video::config::{ENV_TTS_API_KEY, VoiceSettings};
use crate::video::voice::VoiceProfile;

/// Cloud Text-to-Speech REST client returning LINEAR16 WAV.
pub struct CloudSpeechClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    sequence: AtomicU64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    sample_rate_hertz: u32,
    speaking_rate: f32,
    pitch: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: Option<String>,
}

impl CloudSpeechClient {
    pub fn new(settings: &VoiceSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("slidecast/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            sequence: AtomicU64::new(0),
        })
    }

    /// Raw output path for one request, unique even for repeated text.
    fn raw_path(&self, out_dir: &Path, text: &str, voice: &VoiceProfile) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        out_dir.join(format!("tts_{}_{n:04}.wav", content_key(text, voice)))
    }
}

#[async_trait]
impl SpeechSynthesizer for CloudSpeechClient {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile, out_dir: &Path) -> Result<PathBuf> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("No speech API key configured (set {ENV_TTS_API_KEY})"))?;

        let request = SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &voice.language_code,
                name: &voice.voice_name,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                sample_rate_hertz: CANONICAL_SAMPLE_RATE,
                speaking_rate: voice.speaking_rate,
                pitch: voice.pitch,
            },
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .context("Failed to reach speech service")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Speech service returned {}: {}", status, truncate(&text, 400));
        }

        let body: SynthesizeResponse = resp
            .json()
            .await
            .context("Failed to parse speech service response")?;
        let encoded = body
            .audio_content
            .filter(|content| !content.is_empty())
            .context("Speech service response has no audioContent")?;
        let audio = STANDARD
            .decode(encoded.as_bytes())
            .context("Speech service returned invalid base64 audio")?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        let path = self.raw_path(out_dir, text, voice);
        tokio::fs::write(&path, audio)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }
}

fn content_key(text: &str, voice: &VoiceProfile) -> String {
    let mut hasher = Sha256::new();
    hasher.update(voice.voice_name.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.trim().to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> VoiceProfile {
        VoiceProfile {
            voice_name: name.to_string(),
            language_code: "ja-JP".to_string(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }
    }

    #[test]
    fn request_uses_camel_case_wire_names() {
        let voice = profile("ja-JP-Neural2-B");
        let request = SynthesizeRequest {
            input: SynthesisInput { text: "hello" },
            voice: VoiceSelection {
                language_code: &voice.language_code,
                name: &voice.voice_name,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                sample_rate_hertz: CANONICAL_SAMPLE_RATE,
                speaking_rate: 1.0,
                pitch: 0.0,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"]["languageCode"], "ja-JP");
        assert_eq!(json["audioConfig"]["sampleRateHertz"], 44100);
        assert_eq!(json["audioConfig"]["audioEncoding"], "LINEAR16");
    }

    #[test]
    fn content_key_depends_on_voice_and_text() {
        let a = content_key("hello", &profile("a"));
        assert_eq!(a.len(), 16);
        assert_eq!(a, content_key("hello", &profile("a")));
        assert_ne!(a, content_key("hello", &profile("b")));
        assert_ne!(a, content_key("hello!", &profile("a")));
    }

    #[test]
    fn repeated_text_gets_distinct_raw_files() {
        let client =
            CloudSpeechClient::new(&VoiceSettings::default(), Duration::from_secs(5)).unwrap();
        let dir = Path::new("/work/raw");
        let voice = profile("a");
        let first = client.raw_path(dir, "Thank you.", &voice);
        let second = client.raw_path(dir, "Thank you.", &voice);
        assert_ne!(first, second);
        assert!(first.starts_with(dir));
        let key = content_key("Thank you.", &voice);
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("tts_{key}_"))
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let settings = VoiceSettings {
            api_key: None,
            ..VoiceSettings::default()
        };
        let client = CloudSpeechClient::new(&settings, Duration::from_secs(5)).unwrap();
        let temp = tempfile::tempdir().unwrap();
        let err = client
            .synthesize("hello", &profile("a"), temp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TTS_API_KEY));
    }
}
