use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tryon_contracts::store::keys;
use tryon_contracts::LocalStore;

use crate::config::{ClientOptions, ProviderConfig};
use crate::error::{error_chain_text, truncate_text, TryOnError};
use crate::images::{resolve_upload, ImageSlot, ImageSource};
use crate::prompt::build_tryon_prompt;
use crate::reply::{extract_image, request_id_from_body, ImageRef, ProviderReply};
use crate::transport::{
    is_timeout, EditSubmission, HttpTransport, ImageUpload, ProviderTransport, SubmitReply,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnRequest {
    pub subject_image: String,
    pub garment_image: String,
    pub garment_type: Option<String>,
    pub style: Option<String>,
}

impl TryOnRequest {
    pub fn new(subject_image: impl Into<String>, garment_image: impl Into<String>) -> Self {
        Self {
            subject_image: subject_image.into(),
            garment_image: garment_image.into(),
            garment_type: None,
            style: None,
        }
    }

    pub fn with_garment_type(mut self, garment_type: impl Into<String>) -> Self {
        self.garment_type = Some(garment_type.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub image_ref: ImageRef,
    pub request_id: String,
    /// Which extractor found the image.
    pub strategy: &'static str,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    InvalidKey,
    ServiceUnavailable,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::InvalidKey => "invalid-key",
            ConnectionStatus::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for the image-edit provider.
///
/// Key and model are cached in memory but every public operation starts
/// with [`ProviderClient::refresh`], so a key changed elsewhere (a settings
/// screen, another client instance) is always picked up.
///
/// Generation is single-attempt: one `generate` call issues at most one
/// billable request and never retries it.
pub struct ProviderClient {
    store: LocalStore,
    transport: Arc<dyn ProviderTransport>,
    options: ClientOptions,
    config: Mutex<ProviderConfig>,
}

impl ProviderClient {
    pub fn new(store: LocalStore, options: ClientOptions) -> Self {
        let transport = Arc::new(HttpTransport::new(&options));
        Self::with_transport(store, options, transport)
    }

    pub fn with_transport(
        store: LocalStore,
        options: ClientOptions,
        transport: Arc<dyn ProviderTransport>,
    ) -> Self {
        let client = Self {
            store,
            transport,
            options,
            config: Mutex::new(ProviderConfig::default()),
        };
        client.refresh();
        client
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Re-reads key and model from the store into the in-memory config.
    pub fn refresh(&self) -> ProviderConfig {
        let api_key = self
            .store
            .get_setting_str(keys::PROVIDER_API_KEY)
            .map(|key| key.trim().to_string())
            .unwrap_or_default();
        let model = self
            .store
            .get_setting_str(keys::PROVIDER_MODEL)
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| self.options.default_model.clone());
        let config = ProviderConfig { api_key, model };
        *self.config() = config.clone();
        config
    }

    /// Writes the key through to the store, then to memory. No format
    /// checks beyond non-empty.
    pub fn set_api_key(&self, key: &str) -> Result<(), TryOnError> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(TryOnError::Validation(
                "API key must not be empty".to_string(),
            ));
        }
        self.store.set_setting(keys::PROVIDER_API_KEY, trimmed);
        self.config().api_key = trimmed.to_string();
        tracing::info!("provider API key updated");
        Ok(())
    }

    pub fn api_key_from_storage(&self) -> Option<String> {
        let config = self.refresh();
        config.has_api_key().then_some(config.api_key)
    }

    pub fn has_api_key(&self) -> bool {
        self.refresh().has_api_key()
    }

    pub fn clear_api_key(&self) {
        self.store.delete_setting(keys::PROVIDER_API_KEY);
        self.config().api_key.clear();
        tracing::info!("provider API key cleared");
    }

    pub fn model(&self) -> String {
        self.refresh().model
    }

    /// Persists a model override; an empty value restores the default.
    pub fn set_model(&self, model: &str) {
        let trimmed = model.trim();
        if trimmed.is_empty() {
            self.store.delete_setting(keys::PROVIDER_MODEL);
        } else {
            self.store.set_setting(keys::PROVIDER_MODEL, trimmed);
        }
        self.refresh();
    }

    /// Authenticated metadata lookup for the configured model. Never calls
    /// the billable edit endpoint.
    pub fn test_connection(&self) -> Result<ConnectionStatus, TryOnError> {
        let config = self.refresh();
        if !config.has_api_key() {
            return Err(TryOnError::missing_api_key());
        }
        let status = match self.transport.probe(&config.api_key, &config.model) {
            Ok(code) if (200..300).contains(&code) => ConnectionStatus::Connected,
            Ok(401) | Ok(403) => ConnectionStatus::InvalidKey,
            Ok(code) => {
                tracing::warn!(code, model = %config.model, "connection probe rejected");
                ConnectionStatus::ServiceUnavailable
            }
            Err(err) => {
                tracing::warn!(error = %error_chain_text(&err, 300), "connection probe failed");
                ConnectionStatus::ServiceUnavailable
            }
        };
        tracing::info!(status = status.as_str(), "connection tested");
        Ok(status)
    }

    pub fn generate(&self, request: &TryOnRequest) -> Result<Generated, TryOnError> {
        let config = self.refresh();
        if !config.has_api_key() {
            return Err(TryOnError::missing_api_key());
        }

        let max_bytes = self.options.max_image_bytes;
        let subject = ImageSource::inspect(&request.subject_image, ImageSlot::Subject, max_bytes)?;
        let garment = ImageSource::inspect(&request.garment_image, ImageSlot::Garment, max_bytes)?;
        let (subject_upload, garment_upload) = self.resolve_pair(&subject, &garment)?;

        let submission = EditSubmission {
            model: config.model.clone(),
            prompt: build_tryon_prompt(request.garment_type.as_deref(), request.style.as_deref()),
            images: vec![subject_upload, garment_upload],
        };

        tracing::info!(model = %config.model, "submitting try-on generation");
        let started = Instant::now();
        // Exactly one attempt. Retrying is a new billable generation and is
        // left to the user.
        let reply = self
            .transport
            .submit_edit(&config.api_key, &submission)
            .map_err(|err| self.classify_transport_error(&err))?;
        let elapsed = started.elapsed();

        let outcome = interpret_reply(reply, elapsed);
        match &outcome {
            Ok(generated) => tracing::info!(
                request_id = %generated.request_id,
                strategy = generated.strategy,
                elapsed_ms = elapsed.as_millis() as u64,
                "try-on generation succeeded"
            ),
            Err(err) => tracing::warn!(
                kind = %err.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                "try-on generation failed"
            ),
        }
        outcome
    }

    /// Both inputs have no ordering dependency; when either needs a
    /// download they are resolved side by side.
    fn resolve_pair(
        &self,
        subject: &ImageSource,
        garment: &ImageSource,
    ) -> Result<(ImageUpload, ImageUpload), TryOnError> {
        let transport = self.transport.as_ref();
        let max_bytes = self.options.max_image_bytes;
        if !subject.is_remote() && !garment.is_remote() {
            let subject_upload = resolve_upload(subject, ImageSlot::Subject, transport, max_bytes)?;
            let garment_upload = resolve_upload(garment, ImageSlot::Garment, transport, max_bytes)?;
            return Ok((subject_upload, garment_upload));
        }

        thread::scope(|scope| {
            let garment_job =
                scope.spawn(|| resolve_upload(garment, ImageSlot::Garment, transport, max_bytes));
            let subject_upload = resolve_upload(subject, ImageSlot::Subject, transport, max_bytes);
            let garment_upload = garment_job.join().unwrap_or_else(|_| {
                Err(TryOnError::Validation(
                    "garment image could not be prepared".to_string(),
                ))
            });
            Ok((subject_upload?, garment_upload?))
        })
    }

    fn classify_transport_error(&self, err: &anyhow::Error) -> TryOnError {
        if is_timeout(err) {
            return TryOnError::ServiceUnavailable(format!(
                "request timed out after {}s",
                self.options.request_timeout.as_secs()
            ));
        }
        TryOnError::ServiceUnavailable(error_chain_text(err, 300))
    }

    fn config(&self) -> MutexGuard<'_, ProviderConfig> {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn interpret_reply(reply: SubmitReply, elapsed: Duration) -> Result<Generated, TryOnError> {
    let status = reply.status;
    if status == 401 || status == 403 {
        return Err(TryOnError::Auth(format!(
            "HTTP {status}: {}",
            provider_error_excerpt(&reply.body)
        )));
    }
    if !(200..300).contains(&status) {
        return Err(TryOnError::ServiceUnavailable(format!(
            "HTTP {status}: {}",
            provider_error_excerpt(&reply.body)
        )));
    }

    let parsed = ProviderReply::parse(&reply.body);
    let Some(extraction) = extract_image(&parsed) else {
        return Err(TryOnError::NoImageProduced(format!(
            "{} response carried no image: {}",
            parsed.shape(),
            provider_error_excerpt(&reply.body)
        )));
    };
    let request_id = reply
        .request_id
        .or_else(|| request_id_from_body(&reply.body))
        .unwrap_or_else(|| format!("req-{}", uuid::Uuid::new_v4().simple()));
    Ok(Generated {
        image_ref: extraction.image,
        request_id,
        strategy: extraction.strategy,
        elapsed,
    })
}

/// Prefers the provider's own `error.message`; otherwise a short body
/// excerpt.
fn provider_error_excerpt(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let text = message.unwrap_or_else(|| body.trim().to_string());
    if text.is_empty() {
        return "empty response body".to_string();
    }
    truncate_text(&text, 240)
}
