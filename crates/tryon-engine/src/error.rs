use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Auth,
    ServiceUnavailable,
    NoImageProduced,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::NoImageProduced => "no_image_produced",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a provider operation. The payload is a diagnostic detail,
/// not text meant for end users; see `workflow::UserFacingError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TryOnError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("provider rejected the API key: {0}")]
    Auth(String),
    #[error("provider unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("provider returned no image: {0}")]
    NoImageProduced(String),
    #[error("result could not be saved: {0}")]
    Persistence(String),
}

impl TryOnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TryOnError::Configuration(_) => ErrorKind::Configuration,
            TryOnError::Validation(_) => ErrorKind::Validation,
            TryOnError::Auth(_) => ErrorKind::Auth,
            TryOnError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            TryOnError::NoImageProduced(_) => ErrorKind::NoImageProduced,
            TryOnError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            TryOnError::Configuration(detail)
            | TryOnError::Validation(detail)
            | TryOnError::Auth(detail)
            | TryOnError::ServiceUnavailable(detail)
            | TryOnError::NoImageProduced(detail)
            | TryOnError::Persistence(detail) => detail,
        }
    }

    pub(crate) fn missing_api_key() -> Self {
        TryOnError::Configuration("no provider API key is configured".to_string())
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn error_chain_text_joins_unique_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("provider request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "provider request failed | caused by: connection reset"
        );
        assert_eq!(error_chain_text(&err, 8), "provider…");
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(TryOnError::missing_api_key().kind(), ErrorKind::Configuration);
        assert_eq!(
            TryOnError::NoImageProduced("empty".to_string()).kind().as_str(),
            "no_image_produced"
        );
        assert_eq!(TryOnError::Auth("401".to_string()).detail(), "401");
    }
}
