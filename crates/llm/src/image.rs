//! Image-generation providers.
//!
//! The image service is best-effort: callers treat any `LlmError` from
//! here as non-fatal.

use crate::http::{check_error, transport_error};
use crate::provider::LlmError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single natural-language image prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    /// e.g. "1024x1024"
    pub size: String,
}

/// Encoded image returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 transport encoding of the image bytes.
    pub data_base64: String,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate(
        &self,
        request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage, LlmError>> + Send + '_>>;
}

// ── OpenAI-compatible images API ──

#[derive(Serialize)]
struct OaiImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct OaiImageResponse {
    data: Vec<OaiImageData>,
}

#[derive(Deserialize)]
struct OaiImageData {
    b64_json: Option<String>,
}

/// HTTP image provider for OpenAI-compatible `/images/generations`.
pub struct HttpImageProvider {
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpImageProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_owned());
        Self {
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }

    async fn generate_openai(&self, request: ImageRequest) -> Result<GeneratedImage, LlmError> {
        let body = OaiImageRequest {
            model: &self.model,
            prompt: &request.prompt,
            n: 1,
            size: &request.size,
            response_format: "b64_json",
        };

        let resp = self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: OaiImageResponse = resp.json().await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let data = api.data.into_iter()
            .find_map(|d| d.b64_json)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| LlmError::RequestFailed("image response carried no data".into()))?;

        Ok(GeneratedImage { mime_type: "image/png".into(), data_base64: data })
    }
}

impl ImageProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "openai-images"
    }

    fn generate(
        &self,
        request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage, LlmError>> + Send + '_>> {
        Box::pin(self.generate_openai(request))
    }
}

/// Build an image provider from environment variables.
/// Reads `RAPPORT_IMAGE_MODEL`, `RAPPORT_IMAGE_API_KEY` (falling back to
/// `RAPPORT_LLM_API_KEY`), optionally `RAPPORT_IMAGE_BASE_URL`.
pub fn from_env() -> Option<HttpImageProvider> {
    let model = std::env::var("RAPPORT_IMAGE_MODEL").ok()?;
    let api_key = std::env::var("RAPPORT_IMAGE_API_KEY")
        .or_else(|_| std::env::var("RAPPORT_LLM_API_KEY"))
        .ok()?;
    let base_url = std::env::var("RAPPORT_IMAGE_BASE_URL").ok();
    Some(HttpImageProvider::new(model, api_key, base_url))
}

/// Mock image provider; returns a tiny fixed payload and counts calls.
#[derive(Debug, Default)]
pub struct MockImageProvider {
    calls: AtomicUsize,
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageProvider for MockImageProvider {
    fn name(&self) -> &str {
        "mock-images"
    }

    fn generate(
        &self,
        _request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage, LlmError>> + Send + '_>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            Ok(GeneratedImage {
                mime_type: "image/png".into(),
                data_base64: format!("bW9jay1pbWFnZS0{n}"),
            })
        })
    }
}

/// Image provider that always fails with the given error. Counts calls.
#[derive(Debug)]
pub struct FailingImageProvider {
    error: LlmError,
    calls: AtomicUsize,
}

impl FailingImageProvider {
    pub fn new(error: LlmError) -> Self {
        Self { error, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageProvider for FailingImageProvider {
    fn name(&self) -> &str {
        "failing-images"
    }

    fn generate(
        &self,
        _request: ImageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage, LlmError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let error = self.error.clone();
        Box::pin(async move { Err(error) })
    }
}
