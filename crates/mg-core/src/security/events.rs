//! Structured security event log for the form guard and secure channel.
//!
//! Abuse heuristics abort silently towards the visitor, so the only record of
//! why a submission was dropped is here. Each event is one JSON object per line
//! (JSON Lines), suitable for `jq` or a log shipper.
//!
//! # Rotation
//!
//! [`FileEventLog`] renames the current file with a timestamp suffix once it
//! passes 10 MB and starts a new one.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Maximum event log size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the guard or channel decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    /// Bot heuristics flagged the client environment.
    BotDetected,
    /// A decoy field was filled in.
    HoneypotTriggered,
    /// The form was submitted faster than a person could fill it.
    SubmittedTooFast,
    /// The fingerprint's attempt window is exhausted.
    RateLimited,
    /// A field failed format or required checks.
    ValidationFailed,
    /// A second submit arrived while one was in flight.
    DuplicateSubmit,
    /// The submission handler accepted the payload.
    SubmissionAccepted,
    /// The submission handler returned an error.
    SubmissionFailed,
    /// The secure channel locked out after repeated failures.
    RequestLockout,
    /// A bearer token refresh failed and tokens were cleared.
    TokenRefreshFailed,
}

impl fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BotDetected => "bot_detected",
            Self::HoneypotTriggered => "honeypot_triggered",
            Self::SubmittedTooFast => "submitted_too_fast",
            Self::RateLimited => "rate_limited",
            Self::ValidationFailed => "validation_failed",
            Self::DuplicateSubmit => "duplicate_submit",
            Self::SubmissionAccepted => "submission_accepted",
            Self::SubmissionFailed => "submission_failed",
            Self::RequestLockout => "request_lockout",
            Self::TokenRefreshFailed => "token_refresh_failed",
        };
        write!(f, "{}", s)
    }
}

/// A single recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub action: SecurityAction,
    /// Form id, endpoint path, or rate-limit key the decision applied to.
    pub subject: String,
    /// Session fingerprint, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SecurityEvent {
    pub fn new(action: SecurityAction, subject: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            subject: subject.into(),
            fingerprint: None,
            details: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {}",
            self.timestamp.to_rfc3339(),
            self.action,
            self.subject,
        )?;
        if let Some(ref fp) = self.fingerprint {
            write!(f, " ({})", fp)?;
        }
        if let Some(ref details) = self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SecurityEventSink trait
// ---------------------------------------------------------------------------

/// Destination for security events.
///
/// Recording is best effort: a sink that cannot persist an event logs the
/// failure and returns, it never fails the operation being recorded.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: &SecurityEvent);
}

// ---------------------------------------------------------------------------
// FileEventLog
// ---------------------------------------------------------------------------

/// JSON Lines event log on disk, rotated at [`MAX_LOG_SIZE`].
pub struct FileEventLog {
    path: PathBuf,
    /// Closed after a failed rotation or open; reopened on the next event.
    sink: Mutex<Option<BufWriter<File>>>,
}

impl FileEventLog {
    /// Open the log at `path` for appending, creating parent directories.
    pub fn new(path: &Path) -> Result<Self, EventLogError> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
                fs::create_dir_all(dir)?;
                info!(dir = %dir.display(), "Created security event log directory");
            }
            _ => {}
        }

        let writer = BufWriter::new(append_to(path)?);
        Ok(Self {
            path: path.to_path_buf(),
            sink: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Move a full log aside as `<path>.<timestamp>` and start a new one.
    fn rotate(&self, sink: &mut Option<BufWriter<File>>) -> Result<(), EventLogError> {
        if let Some(mut writer) = sink.take() {
            let _ = writer.flush();
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let archived = PathBuf::from(format!("{}.{}", self.path.display(), stamp));
        if let Err(e) = fs::rename(&self.path, &archived) {
            error!(path = %self.path.display(), error = %e, "Could not rotate security event log");
            return Err(e.into());
        }
        info!(archived = %archived.display(), "Security event log rotated");

        *sink = Some(BufWriter::new(append_to(&self.path)?));
        Ok(())
    }
}

fn append_to(path: &Path) -> Result<File, EventLogError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn write_line(writer: &mut BufWriter<File>, event: &SecurityEvent) -> Result<(), EventLogError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

impl SecurityEventSink for FileEventLog {
    fn record(&self, event: &SecurityEvent) {
        let mut sink = self.sink.lock().unwrap_or_else(|poisoned| {
            warn!("Security event log lock poisoned, continuing");
            poisoned.into_inner()
        });

        if self.current_size() >= MAX_LOG_SIZE {
            if let Err(e) = self.rotate(&mut sink) {
                warn!(error = %e, "Security event log not rotated");
            }
        }

        if sink.is_none() {
            match append_to(&self.path) {
                Ok(file) => *sink = Some(BufWriter::new(file)),
                Err(e) => {
                    error!(error = %e, event = %event, "Security event dropped: log unavailable");
                    return;
                }
            }
        }

        if let Some(writer) = sink.as_mut() {
            if let Err(e) = write_line(writer, event) {
                error!(error = %e, event = %event, "Security event dropped: write failed");
            }
        }
    }
}

impl fmt::Debug for FileEventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventLog").field("path", &self.path).finish()
    }
}

// ---------------------------------------------------------------------------
// NullEventLog / MemoryEventLog
// ---------------------------------------------------------------------------

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NullEventLog;

impl SecurityEventSink for NullEventLog {
    fn record(&self, _event: &SecurityEvent) {}
}

/// Keeps events in memory; used by tests to assert on decisions.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn actions(&self) -> Vec<SecurityAction> {
        self.events().into_iter().map(|e| e.action).collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl SecurityEventSink for MemoryEventLog {
    fn record(&self, event: &SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}
