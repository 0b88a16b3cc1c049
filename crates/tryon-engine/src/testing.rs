use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{ImageFormat, Rgb, RgbImage};
use tryon_contracts::store::MemoryBackend;
use tryon_contracts::LocalStore;

use crate::transport::{DownloadedImage, EditSubmission, ProviderTransport, SubmitReply};

pub(crate) fn tiny_png() -> Vec<u8> {
    let mut image = RgbImage::new(2, 2);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([200, 40, 90]);
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

pub(crate) fn memory_store() -> LocalStore {
    LocalStore::open(Arc::new(MemoryBackend::new()))
}

#[derive(Debug, Clone)]
pub(crate) enum MockSubmit {
    Reply(SubmitReply),
    TransportError(String),
}

/// Recording transport. Every call is counted so tests can assert how many
/// billable submissions happened.
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    probe_status: Mutex<Result<u16, String>>,
    submit: Mutex<MockSubmit>,
    download: Mutex<Option<Vec<u8>>>,
    submit_delay: Mutex<Duration>,
    probes: AtomicUsize,
    submits: AtomicUsize,
    downloads: AtomicUsize,
    submissions: Mutex<Vec<EditSubmission>>,
    keys_seen: Mutex<Vec<String>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            inner: Arc::new(MockInner {
                probe_status: Mutex::new(Ok(200)),
                submit: Mutex::new(MockSubmit::Reply(SubmitReply {
                    status: 200,
                    body: r#"{"data":[{"url":"https://cdn.example.com/result.png"}]}"#.to_string(),
                    request_id: Some("req_mock".to_string()),
                })),
                download: Mutex::new(None),
                submit_delay: Mutex::new(Duration::ZERO),
                probes: AtomicUsize::new(0),
                submits: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
                submissions: Mutex::new(Vec::new()),
                keys_seen: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl MockTransport {
    pub(crate) fn with_probe_status(self, status: u16) -> Self {
        *self.inner.probe_status.lock().expect("probe lock") = Ok(status);
        self
    }

    pub(crate) fn with_probe_error(self, message: &str) -> Self {
        *self.inner.probe_status.lock().expect("probe lock") = Err(message.to_string());
        self
    }

    pub(crate) fn with_reply(self, status: u16, body: &str) -> Self {
        *self.inner.submit.lock().expect("submit lock") = MockSubmit::Reply(SubmitReply {
            status,
            body: body.to_string(),
            request_id: None,
        });
        self
    }

    pub(crate) fn with_transport_error(self, message: &str) -> Self {
        *self.inner.submit.lock().expect("submit lock") =
            MockSubmit::TransportError(message.to_string());
        self
    }

    pub(crate) fn with_download(self, bytes: Vec<u8>) -> Self {
        *self.inner.download.lock().expect("download lock") = Some(bytes);
        self
    }

    pub(crate) fn with_submit_delay(self, delay: Duration) -> Self {
        *self.inner.submit_delay.lock().expect("delay lock") = delay;
        self
    }

    pub(crate) fn probe_calls(&self) -> usize {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.inner.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn download_calls(&self) -> usize {
        self.inner.downloads.load(Ordering::SeqCst)
    }

    pub(crate) fn last_submission(&self) -> Option<EditSubmission> {
        self.inner
            .submissions
            .lock()
            .expect("submissions lock")
            .last()
            .cloned()
    }

    pub(crate) fn keys_seen(&self) -> Vec<String> {
        self.inner.keys_seen.lock().expect("keys lock").clone()
    }
}

impl ProviderTransport for MockTransport {
    fn probe(&self, api_key: &str, _model: &str) -> Result<u16> {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .keys_seen
            .lock()
            .expect("keys lock")
            .push(api_key.to_string());
        self.inner
            .probe_status
            .lock()
            .expect("probe lock")
            .clone()
            .map_err(|message| anyhow!(message))
    }

    fn submit_edit(&self, api_key: &str, submission: &EditSubmission) -> Result<SubmitReply> {
        self.inner.submits.fetch_add(1, Ordering::SeqCst);
        self.inner
            .keys_seen
            .lock()
            .expect("keys lock")
            .push(api_key.to_string());
        self.inner
            .submissions
            .lock()
            .expect("submissions lock")
            .push(submission.clone());
        let delay = *self.inner.submit_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match self.inner.submit.lock().expect("submit lock").clone() {
            MockSubmit::Reply(reply) => Ok(reply),
            MockSubmit::TransportError(message) => Err(anyhow!(message)),
        }
    }

    fn download(&self, url: &str, max_bytes: u64) -> Result<DownloadedImage> {
        self.inner.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .inner
            .download
            .lock()
            .expect("download lock")
            .clone()
            .ok_or_else(|| anyhow!("no download configured for {url}"))?;
        if bytes.len() as u64 > max_bytes {
            return Err(anyhow!("image at {url} exceeds {max_bytes} bytes"));
        }
        Ok(DownloadedImage {
            bytes,
            mime_type: Some("image/png".to_string()),
        })
    }
}
