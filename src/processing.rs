use std::time::Duration;

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

const DEEP_IMAGE_BASE: &str = "https://deep-image.ai/rest_api";
const CLIPPINGMAGIC_BASE: &str = "https://clippingmagic.com/api/v1";
const VECTORIZER_BASE: &str = "https://vectorizer.ai/api/v1";
const OPENAI_BASE: &str = "https://api.openai.com/v1";

const DEEP_IMAGE_POLL_ATTEMPTS: usize = 20;
const DEEP_IMAGE_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Result of a paid image operation: either a hosted URL from the provider or
/// raw image bytes to stream back to the caller.
#[derive(Debug, Clone)]
pub enum ProcessedOutput {
    Url(String),
    Image {
        bytes: Bytes,
        content_type: &'static str,
    },
}

#[derive(Clone)]
pub struct ProcessingClient {
    http: reqwest::Client,
    deep_image_api_key: Option<String>,
    clippingmagic_api_id: Option<String>,
    clippingmagic_api_secret: Option<String>,
    vectorizer_api_id: Option<String>,
    vectorizer_api_secret: Option<String>,
    openai_api_key: Option<String>,
}

impl ProcessingClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to create processing HTTP client")?;

        Ok(Self {
            http,
            deep_image_api_key: config.deep_image_api_key.clone(),
            clippingmagic_api_id: config.clippingmagic_api_id.clone(),
            clippingmagic_api_secret: config.clippingmagic_api_secret.clone(),
            vectorizer_api_id: config.vectorizer_api_id.clone(),
            vectorizer_api_secret: config.vectorizer_api_secret.clone(),
            openai_api_key: config.openai_api_key.clone(),
        })
    }

    /// Deep-Image upscale. The API either answers inline with a result URL or
    /// hands back a job to poll.
    pub async fn upscale(&self, image_url: &str, scale: u32) -> anyhow::Result<ProcessedOutput> {
        let api_key = self
            .deep_image_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("DEEP_IMAGE_API_KEY is not configured."))?;

        let body = json!({
            "url": image_url,
            "width": format!("{}%", scale * 100),
            "height": format!("{}%", scale * 100),
        });

        let response = self
            .http
            .post(format!("{DEEP_IMAGE_BASE}/process_result"))
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .await
            .context("Deep-Image request failed")?;

        let mut result: DeepImageResult = parse_provider_json(response, "Deep-Image").await?;

        let mut attempts = 0;
        while result.result_url.is_none() {
            let job = result
                .job
                .clone()
                .ok_or_else(|| anyhow!("Deep-Image returned neither result nor job id"))?;
            if matches!(result.status.as_deref(), Some("failed") | Some("error")) {
                return Err(anyhow!("Deep-Image processing failed"));
            }
            if attempts >= DEEP_IMAGE_POLL_ATTEMPTS {
                return Err(anyhow!("Deep-Image processing timed out"));
            }
            attempts += 1;
            tokio::time::sleep(DEEP_IMAGE_POLL_INTERVAL).await;

            let response = self
                .http
                .get(format!("{DEEP_IMAGE_BASE}/result/{job}"))
                .header("x-api-key", api_key)
                .send()
                .await
                .context("Deep-Image poll failed")?;
            result = parse_provider_json(response, "Deep-Image").await?;
        }

        Ok(ProcessedOutput::Url(
            result
                .result_url
                .ok_or_else(|| anyhow!("Deep-Image returned no result URL"))?,
        ))
    }

    /// ClippingMagic background removal; the cut-out image comes back inline.
    pub async fn remove_background(&self, image_url: &str) -> anyhow::Result<ProcessedOutput> {
        let (api_id, api_secret) = match (
            self.clippingmagic_api_id.as_deref(),
            self.clippingmagic_api_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(anyhow!("ClippingMagic API credentials are not configured.")),
        };

        let response = self
            .http
            .post(format!("{CLIPPINGMAGIC_BASE}/images"))
            .basic_auth(api_id, Some(api_secret))
            .form(&[("image.url", image_url), ("format", "result")])
            .send()
            .await
            .context("ClippingMagic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "ClippingMagic failed with status {}: {}",
                status,
                body
            ));
        }

        let bytes = response
            .bytes()
            .await
            .context("failed to read ClippingMagic result")?;
        Ok(ProcessedOutput::Image {
            bytes,
            content_type: "image/png",
        })
    }

    /// Vectorizer.AI raster-to-SVG conversion.
    pub async fn vectorize(&self, image_url: &str) -> anyhow::Result<ProcessedOutput> {
        let (api_id, api_secret) = match (
            self.vectorizer_api_id.as_deref(),
            self.vectorizer_api_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(anyhow!("Vectorizer API credentials are not configured.")),
        };

        let response = self
            .http
            .post(format!("{VECTORIZER_BASE}/vectorize"))
            .basic_auth(api_id, Some(api_secret))
            .form(&[("image.url", image_url)])
            .send()
            .await
            .context("Vectorizer request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Vectorizer failed with status {}: {}", status, body));
        }

        let bytes = response
            .bytes()
            .await
            .context("failed to read Vectorizer result")?;
        Ok(ProcessedOutput::Image {
            bytes,
            content_type: "image/svg+xml",
        })
    }

    /// OpenAI image generation; the image arrives base64-encoded.
    pub async fn generate(&self, prompt: &str, size: &str) -> anyhow::Result<ProcessedOutput> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not configured."))?;

        let body = json!({
            "model": "gpt-image-1",
            "prompt": prompt,
            "size": size,
            "n": 1,
        });

        let response = self
            .http
            .post(format!("{OPENAI_BASE}/images/generations"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI image generation request failed")?;

        let result: OpenAiImageResponse = parse_provider_json(response, "OpenAI").await?;
        let encoded = result
            .data
            .first()
            .and_then(|item| item.b64_json.as_deref())
            .ok_or_else(|| anyhow!("OpenAI returned no image data"))?;

        let bytes = BASE64_STANDARD
            .decode(encoded)
            .context("failed to decode OpenAI image payload")?;
        Ok(ProcessedOutput::Image {
            bytes: Bytes::from(bytes),
            content_type: "image/png",
        })
    }
}

async fn parse_provider_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    provider: &str,
) -> anyhow::Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read {provider} response body"))?;

    if !status.is_success() {
        return Err(anyhow!("{} failed with status {}: {}", provider, status, text));
    }

    serde_json::from_str(&text).with_context(|| format!("failed to decode {provider} response"))
}

#[derive(Debug, Deserialize)]
struct DeepImageResult {
    status: Option<String>,
    result_url: Option<String>,
    job: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    #[serde(default)]
    data: Vec<OpenAiImageDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageDatum {
    b64_json: Option<String>,
}
