/// HTTP client for the hosted style engine
///
/// [`StyleEngine`] is the seam the rest of the app talks through; the
/// [`HttpStyleEngine`] implementation speaks JSON with base64 image
/// payloads to the hosted service. Rate limiting is its own error
/// variant so the UI can show a cooldown hint instead of a generic
/// failure.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::state::data::ImagePayload;

fn cooldown_suffix(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(seconds) => format!(", retry in {}s", seconds),
        None => String::new(),
    }
}

/// Errors from the hosted engine
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service pushed back; wait before sending more work
    #[error("rate limited by the style engine{}", cooldown_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },
    /// The service answered with a non-success status
    #[error("engine rejected the request: {0}")]
    Api(String),
    /// The request never got a usable answer
    #[error("could not reach the style engine: {0}")]
    Transport(String),
    /// The service answered 200 with bytes we cannot use
    #[error("engine returned an unreadable payload: {0}")]
    Decode(String),
}

/// Cloneable failure carried in UI messages and batch slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub message: String,
    pub rate_limited: bool,
    pub retry_after: Option<u64>,
}

impl From<RemoteError> for EngineFailure {
    fn from(err: RemoteError) -> Self {
        let (rate_limited, retry_after) = match &err {
            RemoteError::RateLimited { retry_after } => (true, *retry_after),
            _ => (false, None),
        };
        Self {
            message: err.to_string(),
            rate_limited,
            retry_after,
        }
    }
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Output size for the upscale capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleTarget {
    TwoK,
    FourK,
}

impl UpscaleTarget {
    pub fn label(&self) -> &'static str {
        match self {
            UpscaleTarget::TwoK => "2K",
            UpscaleTarget::FourK => "4K",
        }
    }

    /// Longest edge of the upscaled output in pixels
    pub fn long_edge(&self) -> u32 {
        match self {
            UpscaleTarget::TwoK => 2048,
            UpscaleTarget::FourK => 4096,
        }
    }
}

/// The hosted generative capabilities the studio relies on.
///
/// Everything behind this trait is an opaque remote service; tests
/// swap in a scripted implementation.
#[async_trait]
pub trait StyleEngine: Send + Sync {
    /// Restyle an image according to an instruction, optionally guided
    /// by a reference image and an aspect-ratio hint
    async fn stylize(
        &self,
        image: &ImagePayload,
        instruction: &str,
        reference: Option<&ImagePayload>,
        aspect_ratio: Option<&str>,
    ) -> Result<ImagePayload, RemoteError>;

    /// Produce an image from a text prompt alone
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<&str>,
    ) -> Result<ImagePayload, RemoteError>;

    /// Turn a still image into a short animation; returns the video URL
    async fn animate(&self, image: &ImagePayload) -> Result<String, RemoteError>;

    /// Upscale an image to the target size
    async fn upscale(
        &self,
        image: &ImagePayload,
        target: UpscaleTarget,
    ) -> Result<ImagePayload, RemoteError>;
}

/// reqwest-backed implementation of [`StyleEngine`]
pub struct HttpStyleEngine {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ImageResponse {
    /// Base64 of the produced image
    image: String,
    #[serde(default = "default_mime")]
    mime_type: String,
}

#[derive(Deserialize)]
struct VideoResponse {
    video_url: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

impl HttpStyleEngine {
    /// Create a client targeting a specific engine deployment.
    ///
    /// * `base_url` - HTTP base URL, e.g. `https://engine.example.com`.
    /// * `api_key`  - bearer token sent with every request.
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Read the deployment coordinates from the environment
    /// (`STYLE_ENGINE_URL`, `STYLE_ENGINE_API_KEY`)
    pub fn from_env() -> Self {
        let base_url = std::env::var("STYLE_ENGINE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8788".to_string());
        let api_key = std::env::var("STYLE_ENGINE_API_KEY").unwrap_or_default();
        Self::new(base_url, api_key)
    }

    fn image_part(payload: &ImagePayload) -> serde_json::Value {
        serde_json::json!({
            "data": BASE64.encode(&payload.data),
            "mime_type": payload.mime,
        })
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RemoteError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(format!("{}: {}", status, detail)));
        }

        Ok(response)
    }

    async fn read_image(response: reqwest::Response) -> Result<ImagePayload, RemoteError> {
        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let data = BASE64
            .decode(body.image.as_bytes())
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(ImagePayload::new(body.mime_type, data))
    }
}

#[async_trait]
impl StyleEngine for HttpStyleEngine {
    async fn stylize(
        &self,
        image: &ImagePayload,
        instruction: &str,
        reference: Option<&ImagePayload>,
        aspect_ratio: Option<&str>,
    ) -> Result<ImagePayload, RemoteError> {
        let body = serde_json::json!({
            "image": Self::image_part(image),
            "instruction": instruction,
            "reference_image": reference.map(Self::image_part),
            "aspect_ratio": aspect_ratio,
        });
        let response = self.post("v1/stylize", body).await?;
        Self::read_image(response).await
    }

    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<&str>,
    ) -> Result<ImagePayload, RemoteError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "aspect_ratio": aspect_ratio,
        });
        let response = self.post("v1/generate", body).await?;
        Self::read_image(response).await
    }

    async fn animate(&self, image: &ImagePayload) -> Result<String, RemoteError> {
        let body = serde_json::json!({ "image": Self::image_part(image) });
        let response = self.post("v1/animate", body).await?;
        let video: VideoResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(video.video_url)
    }

    async fn upscale(
        &self,
        image: &ImagePayload,
        target: UpscaleTarget,
    ) -> Result<ImagePayload, RemoteError> {
        let body = serde_json::json!({
            "image": Self::image_part(image),
            "target_long_edge": target.long_edge(),
        });
        let response = self.post("v1/upscale", body).await?;
        Self::read_image(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_failures_keep_their_cooldown() {
        let failure: EngineFailure = RemoteError::RateLimited {
            retry_after: Some(30),
        }
        .into();

        assert!(failure.rate_limited);
        assert_eq!(failure.retry_after, Some(30));
        assert!(failure.message.contains("retry in 30s"));
    }

    #[test]
    fn test_generic_failures_are_not_rate_limits() {
        let failure: EngineFailure = RemoteError::Api("500: boom".to_string()).into();
        assert!(!failure.rate_limited);
        assert_eq!(failure.retry_after, None);
    }

    #[test]
    fn test_upscale_targets() {
        assert_eq!(UpscaleTarget::TwoK.label(), "2K");
        assert_eq!(UpscaleTarget::FourK.long_edge(), 4096);
    }
}
