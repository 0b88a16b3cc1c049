use std::io::Read;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use crate::config::ClientOptions;
use crate::error::truncate_text;

/// One image attached to an edit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSubmission {
    pub model: String,
    pub prompt: String,
    pub images: Vec<ImageUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReply {
    pub status: u16,
    pub body: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Wire access to the image provider.
///
/// `submit_edit` is the billable call and is issued at most once per
/// generation attempt; nothing behind this trait retries it.
pub trait ProviderTransport: Send + Sync {
    /// Cheap authenticated request used for connection checks. Returns the
    /// HTTP status.
    fn probe(&self, api_key: &str, model: &str) -> Result<u16>;

    fn submit_edit(&self, api_key: &str, submission: &EditSubmission) -> Result<SubmitReply>;

    /// Fetches a remote input image, refusing bodies over `max_bytes`.
    fn download(&self, url: &str, max_bytes: u64) -> Result<DownloadedImage>;
}

pub struct HttpTransport {
    api_base: String,
    http: HttpClient,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            api_base: options.api_base.trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            request_timeout: options.request_timeout,
            probe_timeout: options.probe_timeout,
        }
    }

    fn models_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}", self.api_base, model.trim())
    }

    fn edits_endpoint(&self) -> String {
        format!("{}/images/edits", self.api_base)
    }
}

impl ProviderTransport for HttpTransport {
    fn probe(&self, api_key: &str, model: &str) -> Result<u16> {
        let endpoint = self.models_endpoint(model);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.probe_timeout)
            .send()
            .with_context(|| format!("connection probe failed ({endpoint})"))?;
        Ok(response.status().as_u16())
    }

    fn submit_edit(&self, api_key: &str, submission: &EditSubmission) -> Result<SubmitReply> {
        let endpoint = self.edits_endpoint();
        let mut form = MultipartForm::new()
            .text("model", submission.model.clone())
            .text("prompt", submission.prompt.clone())
            .text("n", "1".to_string());
        for image in &submission.images {
            let part = MultipartPart::bytes(image.bytes.clone())
                .file_name(image.file_name.clone())
                .mime_str(&image.mime_type)
                .with_context(|| {
                    format!("invalid mime '{}' for {}", image.mime_type, image.file_name)
                })?;
            form = form.part("image[]", part);
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .with_context(|| format!("image edit request failed ({endpoint})"))?;
        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let body = response
            .text()
            .context("image edit response body read failed")?;
        Ok(SubmitReply {
            status,
            body,
            request_id,
        })
    }

    fn download(&self, url: &str, max_bytes: u64) -> Result<DownloadedImage> {
        let response = self
            .http
            .get(url)
            .timeout(self.probe_timeout.max(Duration::from_secs(30)))
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!("image download failed ({code}): {}", truncate_text(&body, 256));
        }
        if let Some(length) = response.content_length() {
            if length > max_bytes {
                bail!("image at {url} is {length} bytes; limit is {max_bytes}");
            }
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        // Content-Length is optional; cap the read itself.
        let mut bytes = Vec::new();
        response
            .take(max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .context("failed reading downloaded image bytes")?;
        if bytes.len() as u64 > max_bytes {
            bail!("image at {url} exceeds the {max_bytes} byte limit");
        }
        Ok(DownloadedImage { bytes, mime_type })
    }
}

/// True when the transport error is a timeout rather than a refused or
/// broken connection.
pub(crate) fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout())
            .unwrap_or(false)
    })
}
