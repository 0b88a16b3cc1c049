//! Interpretation of provider responses.
//!
//! The provider's body is not a stable contract. It is first sorted into a
//! [`ProviderReply`] shape, then an ordered list of extractors is tried, most
//! specific first, and the first hit wins.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A usable reference to the generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    /// Base64 payload without the `data:` prefix.
    Inline { mime_type: String, data: String },
}

impl ImageRef {
    /// Displayable uri: the URL itself or a `data:` URL.
    pub fn to_uri(&self) -> String {
        match self {
            ImageRef::Url(url) => url.clone(),
            ImageRef::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
        }
    }

    /// Returns a uri fit for the gallery. Inline payloads are written to
    /// `output_dir` under a content-addressed name.
    pub fn persist(&self, output_dir: &Path) -> Result<String> {
        let (mime_type, data) = match self {
            ImageRef::Url(url) => return Ok(url.clone()),
            ImageRef::Inline { mime_type, data } => (mime_type, data),
        };
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("generated image base64 decode failed")?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(&hasher.finalize()[..8]);
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        let image_path = output_dir.join(format!(
            "result-{digest}.{}",
            extension_for_mime(mime_type)
        ));
        fs::write(&image_path, bytes)
            .with_context(|| format!("failed to write {}", image_path.display()))?;
        Ok(image_path.to_string_lossy().to_string())
    }
}

/// Recognized response shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    /// A structured list of output images (`data`, `images`, ...).
    ImageList(Vec<Value>),
    /// Free text, e.g. a chat completion's message content.
    Text(String),
    Unrecognized(Value),
}

impl ProviderReply {
    pub fn parse(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return ProviderReply::Text(body.to_string());
        };
        if let Some(rows) = image_rows(&value) {
            return ProviderReply::ImageList(rows);
        }
        if let Some(text) = reply_text(&value) {
            return ProviderReply::Text(text);
        }
        match value {
            Value::String(text) => ProviderReply::Text(text),
            other => ProviderReply::Unrecognized(other),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            ProviderReply::ImageList(_) => "image_list",
            ProviderReply::Text(_) => "text",
            ProviderReply::Unrecognized(_) => "unrecognized",
        }
    }

    fn searchable_text(&self) -> Cow<'_, str> {
        match self {
            ProviderReply::Text(text) => Cow::Borrowed(text.as_str()),
            ProviderReply::ImageList(rows) => {
                Cow::Owned(serde_json::to_string(rows).unwrap_or_default())
            }
            ProviderReply::Unrecognized(value) => {
                Cow::Owned(serde_json::to_string(value).unwrap_or_default())
            }
        }
    }
}

pub type Extractor = fn(&ProviderReply) -> Option<ImageRef>;

/// Tried in order; the first extractor to return an image wins.
pub const EXTRACTORS: [(&str, Extractor); 3] = [
    ("structured", structured_image),
    ("url", embedded_url),
    ("base64", embedded_base64),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub image: ImageRef,
    pub strategy: &'static str,
}

pub fn extract_image(reply: &ProviderReply) -> Option<Extraction> {
    EXTRACTORS.iter().find_map(|(strategy, extractor)| {
        extractor(reply).map(|image| Extraction {
            image,
            strategy: *strategy,
        })
    })
}

/// Provider-assigned id from a JSON body, if any.
pub fn request_id_from_body(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub fn structured_image(reply: &ProviderReply) -> Option<ImageRef> {
    let ProviderReply::ImageList(rows) = reply else {
        return None;
    };
    rows.iter().find_map(image_from_row)
}

pub fn embedded_url(reply: &ProviderReply) -> Option<ImageRef> {
    let text = reply.searchable_text();
    let urls: Vec<&str> = url_pattern()
        .find_iter(&text)
        .map(|found| found.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .filter(|url| url.len() > "https://".len())
        .collect();
    // Links to docs or policy pages are not results.
    urls.into_iter()
        .find(|url| looks_like_image_url(url))
        .map(|url| ImageRef::Url(url.to_string()))
}

pub fn embedded_base64(reply: &ProviderReply) -> Option<ImageRef> {
    let text = reply.searchable_text();
    if let Some(captures) = data_url_pattern().captures(&text) {
        let mime_type = captures.get(1).map(|m| m.as_str()).unwrap_or("image/png");
        let data = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        if BASE64.decode(data.as_bytes()).is_ok() {
            return Some(ImageRef::Inline {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            });
        }
    }
    bare_base64_pattern().find_iter(&text).find_map(|found| {
        let data = found.as_str();
        let bytes = BASE64.decode(data.as_bytes()).ok()?;
        let format = image::guess_format(&bytes).ok()?;
        Some(ImageRef::Inline {
            mime_type: format.to_mime_type().to_string(),
            data: data.to_string(),
        })
    })
}

fn image_rows(value: &Value) -> Option<Vec<Value>> {
    let candidates = [
        value.get("data"),
        value.get("images"),
        value.pointer("/choices/0/message/images"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|rows| !rows.is_empty())
        .cloned()
}

fn reply_text(value: &Value) -> Option<String> {
    if let Some(content) = value.pointer("/choices/0/message/content") {
        if let Some(text) = content.as_str() {
            return Some(text.to_string());
        }
        if let Some(parts) = content.as_array() {
            let joined = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("\n");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
    }
    ["output_text", "text", "content"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn image_from_row(row: &Value) -> Option<ImageRef> {
    if let Some(raw) = row.as_str() {
        return image_from_reference(raw);
    }
    let obj = row.as_object()?;
    for key in ["b64_json", "b64", "base64"] {
        if let Some(data) = obj.get(key).and_then(Value::as_str) {
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if let Some(image) = image_from_reference(data) {
                return Some(image);
            }
            let declared = obj
                .get("mime_type")
                .or_else(|| obj.get("mimeType"))
                .and_then(Value::as_str);
            let mime_type = sniffed_mime(data).or(declared).unwrap_or("image/png");
            return Some(ImageRef::Inline {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            });
        }
    }
    if let Some(url) = obj.get("url").and_then(Value::as_str) {
        if let Some(image) = image_from_reference(url) {
            return Some(image);
        }
    }
    let image_url = obj.get("image_url")?;
    image_url
        .as_str()
        .or_else(|| image_url.get("url").and_then(Value::as_str))
        .and_then(image_from_reference)
}

fn image_from_reference(raw: &str) -> Option<ImageRef> {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(ImageRef::Url(trimmed.to_string()));
    }
    let rest = trimmed.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.split(';').next().unwrap_or("image/png").trim();
    Some(ImageRef::Inline {
        mime_type: if mime_type.is_empty() {
            "image/png".to_string()
        } else {
            mime_type.to_string()
        },
        data: data.trim().to_string(),
    })
}

/// Mime type read from the decoded bytes, when they decode to a known
/// image format.
fn sniffed_mime(data: &str) -> Option<&'static str> {
    let bytes = BASE64.decode(data.as_bytes()).ok()?;
    image::guess_format(&bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn looks_like_image_url(url: &str) -> bool {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    [".png", ".jpg", ".jpeg", ".webp", ".gif"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s"'<>()\[\]{}\\]+"#).expect("url pattern compiles")
    })
}

fn data_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"data:(image/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/]+={0,2})")
            .expect("data url pattern compiles")
    })
}

fn bare_base64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9+/]{64,}={0,2}").expect("base64 pattern compiles")
    })
}
