use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-image-1";
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Static client settings. The API key is not one of them; it lives in the
/// local store.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub api_base: String,
    pub default_model: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_image_bytes: u64,
    pub output_dir: PathBuf,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(15),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            output_dir: env::temp_dir().join("tryon-results"),
        }
    }
}

impl ClientOptions {
    /// Defaults with `TRYON_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(api_base) = non_empty_env("TRYON_API_BASE") {
            options.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("TRYON_MODEL") {
            options.default_model = model;
        }
        if let Some(seconds) = env_seconds("TRYON_REQUEST_TIMEOUT_S", 15.0, 600.0) {
            options.request_timeout = seconds;
        }
        if let Some(seconds) = env_seconds("TRYON_PROBE_TIMEOUT_S", 2.0, 60.0) {
            options.probe_timeout = seconds;
        }
        options
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}

/// Credentials and model in effect for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_seconds(key: &str, min: f64, max: f64) -> Option<Duration> {
    let raw = non_empty_env(key)?;
    let parsed = raw.parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(Duration::from_secs_f64(parsed.clamp(min, max)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_image_edits_provider() {
        let options = ClientOptions::default();
        assert_eq!(options.api_base, DEFAULT_API_BASE);
        assert_eq!(options.default_model, DEFAULT_MODEL);
        assert_eq!(options.request_timeout, Duration::from_secs(120));
        assert!(options.output_dir.ends_with("tryon-results"));
    }

    #[test]
    fn blank_key_is_not_configured() {
        let config = ProviderConfig {
            api_key: "   ".to_string(),
            model: DEFAULT_MODEL.to_string(),
        };
        assert!(!config.has_api_key());
    }
}
