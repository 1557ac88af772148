//! HTTP client for the voice-chat backend.
//!
//!   GET  /health          → `{"status": "ok"}`
//!   GET  /presets         → models and roles to choose from
//!   POST /presets/select  → apply a model/role selection
//!   POST /reset           → forget the dialog history
//!   POST /post-audio      → multipart recording in, synthesized MP3 bytes out

use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::audio_store::AudioBlob;
use crate::conversation::{UploadResponse, VoiceBackend, UPLOAD_TIMEOUT};
use crate::error::{BackendError, UploadError};
use crate::presets::{PresetsResponse, SelectionRequest, SelectionResponse};

/// Bound on the small JSON requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `GET /health` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Thin async client for the backend endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    http: reqwest::Client,
    upload_timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http_client(base_url, reqwest::Client::new())
    }

    pub fn with_http_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let mut url = base_url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self {
            base_url: url,
            http,
            upload_timeout: UPLOAD_TIMEOUT,
        }
    }

    pub fn localhost() -> Self {
        Self::new("http://localhost:8000")
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── JSON endpoints ───────────────────────────────────────────────────────

    pub async fn health(&self) -> Result<HealthStatus, BackendError> {
        let url = self.url("/health");
        let resp = self.send(&url, self.http.get(&url)).await?;
        decode(&url, resp).await
    }

    pub async fn presets(&self) -> Result<PresetsResponse, BackendError> {
        let url = self.url("/presets");
        let resp = self.send(&url, self.http.get(&url)).await?;
        let presets: PresetsResponse = decode(&url, resp).await?;
        log::info!(
            "BackendClient: {} models, {} roles available",
            presets.models.len(),
            presets.roles.len()
        );
        Ok(presets)
    }

    pub async fn select(
        &self,
        request: &SelectionRequest,
    ) -> Result<SelectionResponse, BackendError> {
        let url = self.url("/presets/select");
        let resp = self.send(&url, self.http.post(&url).json(request)).await?;
        decode(&url, resp).await
    }

    pub async fn reset_dialog(&self) -> Result<(), BackendError> {
        let url = self.url("/reset");
        self.send(&url, self.http.post(&url)).await?;
        log::info!("BackendClient: dialog reset");
        Ok(())
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body: error_detail(&body),
        })
    }

    // ── Audio ────────────────────────────────────────────────────────────────

    /// `POST /post-audio` with the recording in the multipart field `file`.
    ///
    /// Any HTTP status comes back as a response; only transport problems and
    /// the timeout are errors here.
    pub async fn post_audio(
        &self,
        blob: AudioBlob,
        filename: &str,
    ) -> Result<UploadResponse, UploadError> {
        let url = self.url("/post-audio");
        let part = reqwest::multipart::Part::bytes(blob.bytes().to_vec())
            .file_name(filename.to_string())
            .mime_str(blob.mime())
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(|e| self.upload_error(e))?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| self.upload_error(e))?;
        log::debug!("BackendClient: /post-audio -> {} ({} bytes)", status, body.len());
        Ok(UploadResponse {
            status,
            body: body.to_vec(),
        })
    }

    fn upload_error(&self, e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout(self.upload_timeout)
        } else {
            UploadError::Transport(e.to_string())
        }
    }
}

impl VoiceBackend for BackendClient {
    fn upload<'a>(
        &'a self,
        blob: AudioBlob,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<UploadResponse, UploadError>> {
        Box::pin(self.post_audio(blob, filename))
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(self.reset_dialog())
    }
}

async fn decode<T: DeserializeOwned>(url: &str, resp: reqwest::Response) -> Result<T, BackendError> {
    let decode_error = |message: String| BackendError::Decode {
        url: url.to_string(),
        message,
    };
    let bytes = resp.bytes().await.map_err(|e| decode_error(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| decode_error(e.to_string()))
}

/// FastAPI puts the reason under `detail`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: String,
    }
    match serde_json::from_str::<Detail>(body) {
        Ok(d) => d.detail,
        Err(_) => body.trim().to_string(),
    }
}
