use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    MissingImages,
    MissingKey,
}

/// What happened to one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptEvent {
    /// Stopped before the provider was called.
    #[serde(rename = "attempt_blocked")]
    Blocked {
        reason: BlockReason,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<String>,
    },
    #[serde(rename = "attempt_started")]
    Started { model: String },
    #[serde(rename = "attempt_succeeded")]
    Succeeded {
        request_id: String,
        strategy: String,
        elapsed_ms: u64,
        gallery_item_id: String,
        /// False when the gallery write failed.
        saved: bool,
    },
    #[serde(rename = "attempt_failed")]
    Failed {
        kind: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl AttemptEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AttemptEvent::Blocked { .. } => "attempt_blocked",
            AttemptEvent::Started { .. } => "attempt_started",
            AttemptEvent::Succeeded { .. } => "attempt_succeeded",
            AttemptEvent::Failed { .. } => "attempt_failed",
        }
    }
}

/// One JSONL line: the event plus where and when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub session_id: String,
    pub attempt: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AttemptEvent,
}

/// Append-only journal of generation attempts for one session.
///
/// The file is opened once and shared by clones; each entry is written as a
/// single line under the lock. Entries never carry the API key.
#[derive(Debug, Clone)]
pub struct AttemptJournal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    session_id: String,
    file: Mutex<File>,
}

impl AttemptJournal {
    pub fn open(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(JournalInner {
                path,
                session_id: session_id.into(),
                file: Mutex::new(file),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, attempt: u64, event: AttemptEvent) -> Result<JournalEntry> {
        let entry = JournalEntry {
            session_id: self.inner.session_id.clone(),
            attempt,
            ts: Utc::now(),
            event,
        };
        let mut line = serde_json::to_string(&entry).context("journal entry encode failed")?;
        line.push('\n');
        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.inner.path.display()))?;
        Ok(entry)
    }

    /// Journal trouble never interrupts a generation; it is logged instead.
    pub fn record_best_effort(&self, attempt: u64, event: AttemptEvent) {
        let name = event.name();
        if let Err(err) = self.record(attempt, event) {
            tracing::warn!(
                event = name,
                path = %self.inner.path.display(),
                error = %err,
                "failed to append journal entry"
            );
        }
    }
}

/// Reads a journal back, oldest first. Blank lines are skipped.
pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read journal {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{} is not a journal entry", path.display(), index + 1))
        })
        .collect()
}
