//! C5: Generation Backend Client. A typed wrapper over the two downstream
//! model calls (spec §4.4): synchronous image generation and asynchronous
//! video generation (start -> poll -> URL). Contains no retry logic of its
//! own beyond the video poll loop — recovering from `throttled` /
//! `backend_unavailable` is the queue's job (spec §4.4, last line).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("backend throttled the request")]
    Throttled,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend refused the prompt: {0}")]
    PolicyBlocked(String),
}

/// Fixed output dimensions for the card image path (spec §4.4).
pub const CARD_WIDTH: u32 = 1280;
pub const CARD_HEIGHT: u32 = 720;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Synchronous image generation (~5-30s typical). Returns the final PNG
    /// bytes at `CARD_WIDTH` x `CARD_HEIGHT`.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, BackendError>;

    /// Asynchronous video generation: starts a job on the backend, polls for
    /// completion with a bounded exponential backoff and a hard overall
    /// deadline, and returns the signed URL the backend surfaces.
    async fn generate_video(
        &self,
        prompt: &str,
        seed_image_bytes: &[u8],
    ) -> Result<String, BackendError>;
}

pub struct HttpGenerationBackend {
    http: Client,
    base_url: String,
    api_key: String,
    image_timeout: Duration,
    video_poll_deadline: Duration,
}

impl HttpGenerationBackend {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_key,
            image_timeout: Duration::from_secs(45),
            video_poll_deadline: Duration::from_secs(5 * 60),
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> BackendError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => BackendError::Throttled,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                BackendError::PolicyBlocked(body.to_string())
            }
            s if s.is_server_error() => BackendError::BackendUnavailable(body.to_string()),
            s => BackendError::BackendUnavailable(format!("unexpected status {s}: {body}")),
        }
    }

    /// The image path already produces backend-accepted dimensions
    /// (`CARD_WIDTH` x `CARD_HEIGHT`), so the seed image for the video call
    /// needs no further re-encoding or letterboxing when it was produced by
    /// `generate_image`. A seed sourced elsewhere would be resized here.
    fn prepare_seed_image(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(with = "base64_bytes")]
    image_base64: Vec<u8>,
}

#[derive(Serialize)]
struct StartVideoRequest<'a> {
    prompt: &'a str,
    #[serde(with = "base64_bytes")]
    seed_image_base64: Vec<u8>,
}

#[derive(Deserialize)]
struct StartVideoResponse {
    operation_id: String,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum VideoPollResponse {
    Pending,
    Completed { url: String },
    Failed { reason: String, policy: bool },
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, BackendError> {
        let response = self
            .http
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.image_timeout)
            .json(&ImageRequest {
                prompt,
                width: CARD_WIDTH,
                height: CARD_HEIGHT,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "image generation request failed");
                BackendError::BackendUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "image generation backend error");
            return Err(Self::classify_status(status, &body));
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?;

        debug!(prompt_len = prompt.len(), "image generation succeeded");
        Ok(parsed.image_base64)
    }

    async fn generate_video(
        &self,
        prompt: &str,
        seed_image_bytes: &[u8],
    ) -> Result<String, BackendError> {
        let seed = Self::prepare_seed_image(seed_image_bytes);

        let start = self
            .http
            .post(format!("{}/v1/videos/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&StartVideoRequest {
                prompt,
                seed_image_base64: seed,
            })
            .send()
            .await
            .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?;

        let status = start.status();
        if !status.is_success() {
            let body = start.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let started: StartVideoResponse = start
            .json()
            .await
            .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.video_poll_deadline;
        let mut delay = Duration::from_secs(2);
        let max_delay = Duration::from_secs(30);

        loop {
            let poll = self
                .http
                .get(format!(
                    "{}/v1/videos/generations/{}",
                    self.base_url, started.operation_id
                ))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?;

            let status = poll.status();
            if !status.is_success() {
                let body = poll.text().await.unwrap_or_default();
                return Err(Self::classify_status(status, &body));
            }

            match poll
                .json::<VideoPollResponse>()
                .await
                .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?
            {
                VideoPollResponse::Completed { url } => return Ok(url),
                VideoPollResponse::Failed { reason, policy } => {
                    return Err(if policy {
                        BackendError::PolicyBlocked(reason)
                    } else {
                        BackendError::BackendUnavailable(reason)
                    });
                }
                VideoPollResponse::Pending => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(BackendError::BackendUnavailable(
                    "video poll deadline exceeded".to_string(),
                ));
            }

            let remaining = deadline - tokio::time::Instant::now();
            tokio::time::sleep(delay.min(remaining)).await;
            delay = (delay * 2).min(max_delay);
        }
    }
}
