use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{error_chain_text, TryOnError};
use crate::transport::{ImageUpload, ProviderTransport};

/// Which input an image reference fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSlot {
    Subject,
    Garment,
}

impl ImageSlot {
    pub fn label(&self) -> &'static str {
        match self {
            ImageSlot::Subject => "subject",
            ImageSlot::Garment => "garment",
        }
    }
}

/// Where an input image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    LocalPath(PathBuf),
    RemoteUrl(String),
    DataUrl { mime_type: String, bytes: Vec<u8> },
}

impl ImageSource {
    /// Classifies a uri and runs the checks that need no network: local
    /// files must exist and fit under `max_bytes`, data URLs must decode.
    pub fn inspect(raw: &str, slot: ImageSlot, max_bytes: u64) -> Result<Self, TryOnError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TryOnError::Validation(format!(
                "{} image is missing",
                slot.label()
            )));
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(ImageSource::RemoteUrl(trimmed.to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("data:") {
            let (meta, payload) = rest.split_once(',').ok_or_else(|| {
                TryOnError::Validation(format!("{} image data URL is malformed", slot.label()))
            })?;
            let mime_type = meta
                .split(';')
                .next()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("image/png")
                .to_string();
            let bytes = BASE64.decode(payload.trim().as_bytes()).map_err(|err| {
                TryOnError::Validation(format!(
                    "{} image data URL is not valid base64: {err}",
                    slot.label()
                ))
            })?;
            check_size(bytes.len() as u64, slot, max_bytes)?;
            return Ok(ImageSource::DataUrl { mime_type, bytes });
        }

        let path = PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed));
        let metadata = fs::metadata(&path).map_err(|_| {
            TryOnError::Validation(format!(
                "{} image not found at {}",
                slot.label(),
                path.display()
            ))
        })?;
        if !metadata.is_file() {
            return Err(TryOnError::Validation(format!(
                "{} image path {} is not a file",
                slot.label(),
                path.display()
            )));
        }
        check_size(metadata.len(), slot, max_bytes)?;
        Ok(ImageSource::LocalPath(path))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageSource::RemoteUrl(_))
    }
}

/// Turns a checked source into upload bytes. Remote URLs are fetched here,
/// so this is the only step that may touch the network.
pub fn resolve_upload(
    source: &ImageSource,
    slot: ImageSlot,
    transport: &dyn ProviderTransport,
    max_bytes: u64,
) -> Result<ImageUpload, TryOnError> {
    let (bytes, hinted_mime, stem) = match source {
        ImageSource::LocalPath(path) => {
            let bytes = fs::read(path).map_err(|err| {
                TryOnError::Validation(format!(
                    "{} image at {} could not be read: {err}",
                    slot.label(),
                    path.display()
                ))
            })?;
            (bytes, mime_for_path(path).map(str::to_string), file_stem(path))
        }
        ImageSource::RemoteUrl(url) => {
            let downloaded = transport.download(url, max_bytes).map_err(|err| {
                TryOnError::Validation(format!(
                    "{} image could not be fetched: {}",
                    slot.label(),
                    error_chain_text(&err, 240)
                ))
            })?;
            (downloaded.bytes, downloaded.mime_type, None)
        }
        ImageSource::DataUrl { mime_type, bytes } => (bytes.clone(), Some(mime_type.clone()), None),
    };
    check_size(bytes.len() as u64, slot, max_bytes)?;

    let format = image::guess_format(&bytes).map_err(|_| {
        TryOnError::Validation(format!("{} image is not a recognizable image", slot.label()))
    })?;
    let mime_type = format.to_mime_type().to_string();
    if let Some(hint) = hinted_mime.as_deref() {
        if !hint.eq_ignore_ascii_case(&mime_type) {
            tracing::debug!(
                slot = slot.label(),
                hint,
                sniffed = %mime_type,
                "image mime hint overridden"
            );
        }
    }
    let extension = format.extensions_str().first().copied().unwrap_or("png");
    let file_name = format!(
        "{}.{}",
        stem.unwrap_or_else(|| slot.label().to_string()),
        extension
    );
    Ok(ImageUpload {
        file_name,
        mime_type,
        bytes,
    })
}

fn check_size(len: u64, slot: ImageSlot, max_bytes: u64) -> Result<(), TryOnError> {
    if len == 0 {
        return Err(TryOnError::Validation(format!("{} image is empty", slot.label())));
    }
    if len > max_bytes {
        return Err(TryOnError::Validation(format!(
            "{} image is {len} bytes; the limit is {max_bytes}",
            slot.label()
        )));
    }
    Ok(())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|value| value.to_str())
        .map(str::to_string)
        .filter(|value| !value.is_empty())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tiny_png, MockTransport};

    #[test]
    fn local_file_is_checked_and_resolved() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("me.jpg");
        fs::write(&path, tiny_png())?;

        let uri = format!("file://{}", path.display());
        let source = ImageSource::inspect(&uri, ImageSlot::Subject, 1024 * 1024)?;
        assert_eq!(source, ImageSource::LocalPath(path));

        let transport = MockTransport::default();
        let upload = resolve_upload(&source, ImageSlot::Subject, &transport, 1024 * 1024)?;
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(upload.file_name, "me.png");
        assert_eq!(transport.download_calls(), 0);
        Ok(())
    }

    #[test]
    fn missing_and_oversized_files_fail_validation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("nope.png");
        let err = ImageSource::inspect(&missing.to_string_lossy(), ImageSlot::Garment, 10)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("garment image not found"));

        let big = temp.path().join("big.png");
        fs::write(&big, vec![0u8; 64])?;
        let err = ImageSource::inspect(&big.to_string_lossy(), ImageSlot::Garment, 32).err();
        assert!(matches!(
            err,
            Some(TryOnError::Validation(detail)) if detail.contains("limit is 32")
        ));
        Ok(())
    }

    #[test]
    fn data_url_decodes_inline() -> anyhow::Result<()> {
        let uri = format!("data:image/png;base64,{}", BASE64.encode(tiny_png()));
        let source = ImageSource::inspect(&uri, ImageSlot::Garment, 1024 * 1024)?;
        let transport = MockTransport::default();
        let upload = resolve_upload(&source, ImageSlot::Garment, &transport, 1024 * 1024)?;
        assert_eq!(upload.bytes, tiny_png());
        assert_eq!(upload.file_name, "garment.png");
        Ok(())
    }

    #[test]
    fn remote_url_is_downloaded_once() -> anyhow::Result<()> {
        let transport = MockTransport::default().with_download(tiny_png());
        let source = ImageSource::inspect(
            "https://shop.example.com/shirt.png",
            ImageSlot::Garment,
            1024 * 1024,
        )?;
        assert!(source.is_remote());
        let upload = resolve_upload(&source, ImageSlot::Garment, &transport, 1024 * 1024)?;
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(transport.download_calls(), 1);
        Ok(())
    }

    #[test]
    fn non_image_bytes_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.png");
        fs::write(&path, b"definitely not an image")?;
        let source = ImageSource::inspect(&path.to_string_lossy(), ImageSlot::Subject, 1024)?;
        let transport = MockTransport::default();
        let err = resolve_upload(&source, ImageSlot::Subject, &transport, 1024).err();
        assert!(matches!(err, Some(TryOnError::Validation(_))));
        Ok(())
    }
}
