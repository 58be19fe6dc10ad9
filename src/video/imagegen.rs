use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::video::config::{ENV_IMAGE_API_KEY, ImageSettings};

/// Produces an opening or closing still from a text prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, aspect_ratio: &str, output: &Path) -> Result<PathBuf>;
}

pub struct ImagenClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

impl ImagenClient {
    pub fn new(settings: &ImageSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("slidecast/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    async fn generate_image(&self, prompt: &str, aspect_ratio: &str, output: &Path) -> Result<PathBuf> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("No image API key configured (set {ENV_IMAGE_API_KEY})"))?;

        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1, "aspectRatio": aspect_ratio }
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach image service")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Image service returned {}: {}", status, text.trim());
        }

        let parsed: PredictResponse = resp
            .json()
            .await
            .context("Failed to parse image service response")?;
        let encoded = decode_first_image(parsed)?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(output, encoded)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        Ok(output.to_path_buf())
    }
}

fn decode_first_image(response: PredictResponse) -> Result<Vec<u8>> {
    let encoded = response
        .predictions
        .into_iter()
        .find_map(|p| p.bytes_base64_encoded)
        .context("Image service returned no image")?;
    STANDARD
        .decode(encoded.as_bytes())
        .context("Image service returned invalid base64 data")
}
