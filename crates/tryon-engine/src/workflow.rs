use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tryon_contracts::journal::{AttemptEvent, AttemptJournal, BlockReason};
use tryon_contracts::{ItemKind, LocalStore};

use crate::client::{Generated, ProviderClient, TryOnRequest};
use crate::error::{truncate_text, ErrorKind, TryOnError};
use crate::images::ImageSlot;

/// What the UI should offer next to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrectiveAction {
    /// Send the user back to the capture or pick step.
    CaptureImages,
    /// Open the provider settings screen.
    OpenSettings,
    /// Offer a manual retry button.
    Retry,
    /// The key exists but was refused.
    CheckApiKey,
    /// Suggest different photos or hints.
    AdjustInputs,
}

impl CorrectiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectiveAction::CaptureImages => "capture_images",
            CorrectiveAction::OpenSettings => "open_settings",
            CorrectiveAction::Retry => "retry",
            CorrectiveAction::CheckApiKey => "check_api_key",
            CorrectiveAction::AdjustInputs => "adjust_inputs",
        }
    }
}

/// A failure rendered for display. `message` is written for end users;
/// `diagnostic` carries the technical detail for support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    pub kind: ErrorKind,
    pub message: String,
    pub action: CorrectiveAction,
    pub diagnostic: Option<String>,
}

impl fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.diagnostic {
            Some(diagnostic) => write!(f, "{} (details: {diagnostic})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Maps a provider failure to user text and a corrective action.
pub fn present(err: &TryOnError) -> UserFacingError {
    let (message, action) = match err {
        TryOnError::Configuration(_) => (
            "No API key is set for the try-on service. Add one in Settings.",
            CorrectiveAction::OpenSettings,
        ),
        TryOnError::Validation(_) => (
            "One of the photos can't be used. Retake it or pick a different one.",
            CorrectiveAction::CaptureImages,
        ),
        TryOnError::Auth(_) => (
            "The try-on service rejected your API key. Check the key in Settings.",
            CorrectiveAction::CheckApiKey,
        ),
        TryOnError::ServiceUnavailable(_) => (
            "The try-on service couldn't be reached. Check your connection and try again.",
            CorrectiveAction::Retry,
        ),
        TryOnError::NoImageProduced(_) => (
            "The service answered without an image. The photos may have been declined; try different ones.",
            CorrectiveAction::AdjustInputs,
        ),
        TryOnError::Persistence(_) => (
            "The result was created but couldn't be saved to your gallery.",
            CorrectiveAction::Retry,
        ),
    };
    let detail = err.detail().trim();
    UserFacingError {
        kind: err.kind(),
        message: message.to_string(),
        action,
        diagnostic: (!detail.is_empty()).then(|| truncate_text(detail, 300)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnSuccess {
    /// Path or URL of the result, as stored in the gallery.
    pub image_uri: String,
    pub request_id: String,
    pub gallery_item_id: String,
    /// Non-fatal problems, e.g. the gallery write failing.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    ValidatingInputs,
    MissingImages { missing: Vec<ImageSlot> },
    MissingKey,
    Submitting,
    Succeeded(TryOnSuccess),
    Failed(UserFacingError),
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::ValidatingInputs => "validating_inputs",
            WorkflowState::MissingImages { .. } => "missing_images",
            WorkflowState::MissingKey => "missing_key",
            WorkflowState::Submitting => "submitting",
            WorkflowState::Succeeded(_) => "succeeded",
            WorkflowState::Failed(_) => "failed",
        }
    }

    /// The action a screen should surface in this state, if any.
    pub fn corrective_action(&self) -> Option<CorrectiveAction> {
        match self {
            WorkflowState::MissingImages { .. } => Some(CorrectiveAction::CaptureImages),
            WorkflowState::MissingKey => Some(CorrectiveAction::OpenSettings),
            WorkflowState::Failed(error) => Some(error.action),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            WorkflowState::Idle | WorkflowState::ValidatingInputs | WorkflowState::Submitting
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// An attempt is already in flight, or there is nothing to retry.
    Ignored,
    Finished(WorkflowState),
    /// The workflow was detached while the attempt ran; its state was left
    /// untouched.
    Detached,
}

#[derive(Debug, Default, Clone)]
struct Inputs {
    subject_image: Option<String>,
    garment_image: Option<String>,
    garment_type: Option<String>,
    style: Option<String>,
}

impl Inputs {
    fn missing(&self) -> Vec<ImageSlot> {
        let mut missing = Vec::new();
        if is_blank(self.subject_image.as_deref()) {
            missing.push(ImageSlot::Subject);
        }
        if is_blank(self.garment_image.as_deref()) {
            missing.push(ImageSlot::Garment);
        }
        missing
    }

    fn request(&self) -> TryOnRequest {
        TryOnRequest {
            subject_image: self.subject_image.clone().unwrap_or_default(),
            garment_image: self.garment_image.clone().unwrap_or_default(),
            garment_type: self.garment_type.clone(),
            style: self.style.clone(),
        }
    }
}

struct WorkflowInner {
    inputs: Inputs,
    state: WorkflowState,
}

/// One screen's try-on flow:
/// `Idle -> ValidatingInputs -> (MissingImages | MissingKey | Submitting)`,
/// then `Submitting -> (Succeeded | Failed)`.
///
/// Each attempt makes at most one provider call. A submit that arrives
/// while an attempt is in flight is ignored, and after [`detach`] a
/// finishing attempt no longer changes the visible state.
///
/// [`detach`]: TryOnWorkflow::detach
pub struct TryOnWorkflow {
    client: Arc<ProviderClient>,
    journal: Option<AttemptJournal>,
    inner: Mutex<WorkflowInner>,
    active: AtomicBool,
    attempts: AtomicU64,
}

impl TryOnWorkflow {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self {
            client,
            journal: None,
            inner: Mutex::new(WorkflowInner {
                inputs: Inputs::default(),
                state: WorkflowState::Idle,
            }),
            active: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn with_journal(mut self, journal: AttemptJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn set_subject_image(&self, uri: impl Into<String>) {
        self.inner().inputs.subject_image = Some(uri.into());
    }

    pub fn set_garment_image(&self, uri: impl Into<String>) {
        self.inner().inputs.garment_image = Some(uri.into());
    }

    pub fn set_garment_type(&self, garment_type: Option<String>) {
        self.inner().inputs.garment_type = garment_type;
    }

    pub fn set_style(&self, style: Option<String>) {
        self.inner().inputs.style = style;
    }

    pub fn state(&self) -> WorkflowState {
        self.inner().state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Marks the owning screen as gone. An in-flight attempt still runs to
    /// completion and its result is still saved to the gallery.
    pub fn detach(&self) {
        self.active.store(false, Ordering::SeqCst);
        tracing::debug!("try-on workflow detached");
    }

    /// Back to `Idle` from any state except `Submitting`.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner();
        if inner.state == WorkflowState::Submitting {
            return false;
        }
        inner.state = WorkflowState::Idle;
        true
    }

    /// Manual retry after a failure. Re-enters input validation.
    pub fn retry(&self) -> SubmitOutcome {
        if !matches!(self.inner().state, WorkflowState::Failed(_)) {
            return SubmitOutcome::Ignored;
        }
        self.submit()
    }

    pub fn submit(&self) -> SubmitOutcome {
        if !self.is_active() {
            return SubmitOutcome::Detached;
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let request = {
            let mut inner = self.inner();
            if inner.state == WorkflowState::Submitting {
                tracing::debug!(attempt, "submit ignored while an attempt is in flight");
                return SubmitOutcome::Ignored;
            }
            inner.state = WorkflowState::ValidatingInputs;

            let missing = inner.inputs.missing();
            if !missing.is_empty() {
                self.record(
                    attempt,
                    AttemptEvent::Blocked {
                        reason: BlockReason::MissingImages,
                        missing: missing.iter().map(|slot| slot.label().to_string()).collect(),
                    },
                );
                inner.state = WorkflowState::MissingImages { missing };
                return SubmitOutcome::Finished(inner.state.clone());
            }
            if !self.client.has_api_key() {
                self.record(
                    attempt,
                    AttemptEvent::Blocked {
                        reason: BlockReason::MissingKey,
                        missing: Vec::new(),
                    },
                );
                inner.state = WorkflowState::MissingKey;
                return SubmitOutcome::Finished(inner.state.clone());
            }

            inner.state = WorkflowState::Submitting;
            inner.inputs.request()
        };

        self.record(
            attempt,
            AttemptEvent::Started {
                model: self.client.model(),
            },
        );
        let next = match self.client.generate(&request) {
            Ok(generated) => WorkflowState::Succeeded(self.keep_result(attempt, generated)),
            Err(err) => {
                let shown = present(&err);
                tracing::warn!(
                    attempt,
                    kind = %err.kind(),
                    detail = err.detail(),
                    "try-on attempt failed"
                );
                self.record(
                    attempt,
                    AttemptEvent::Failed {
                        kind: err.kind().as_str().to_string(),
                        action: shown.action.as_str().to_string(),
                        detail: shown.diagnostic.clone(),
                    },
                );
                WorkflowState::Failed(shown)
            }
        };

        let mut inner = self.inner();
        if !self.is_active() {
            tracing::info!(attempt, outcome = next.name(), "attempt finished after detach");
            return SubmitOutcome::Detached;
        }
        inner.state = next;
        SubmitOutcome::Finished(inner.state.clone())
    }

    /// Saves a successful result to the gallery. A failed write is logged
    /// and reported as a warning; the success stands.
    fn keep_result(&self, attempt: u64, generated: Generated) -> TryOnSuccess {
        let mut warnings = Vec::new();
        let output_dir = &self.client.options().output_dir;
        let image_uri = match generated.image_ref.persist(output_dir) {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!(error = %err, "could not write generated image; keeping data url");
                generated.image_ref.to_uri()
            }
        };

        let store: &LocalStore = self.client.store();
        let gallery_item_id = match store.try_save_gallery_item(&image_uri, ItemKind::Result) {
            Ok(item) => item.id,
            Err((item, fault)) => {
                let err = TryOnError::Persistence(fault.to_string());
                tracing::warn!(attempt, error = %fault, "result gallery write failed");
                warnings.push(present(&err).to_string());
                item.id
            }
        };

        self.record(
            attempt,
            AttemptEvent::Succeeded {
                request_id: generated.request_id.clone(),
                strategy: generated.strategy.to_string(),
                elapsed_ms: generated.elapsed.as_millis() as u64,
                gallery_item_id: gallery_item_id.clone(),
                saved: warnings.is_empty(),
            },
        );
        TryOnSuccess {
            image_uri,
            request_id: generated.request_id,
            gallery_item_id,
            warnings,
        }
    }

    fn record(&self, attempt: u64, event: AttemptEvent) {
        if let Some(journal) = &self.journal {
            journal.record_best_effort(attempt, event);
        }
    }

    fn inner(&self) -> MutexGuard<'_, WorkflowInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}
