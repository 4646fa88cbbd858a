//! Submission payload, outcome, and the handler seam.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::FormSurface;

/// Metadata the guard attaches to every accepted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub fingerprint: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub csrf_token: String,
}

/// Sanitized field values plus security metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "_security")]
    pub security: SecurityMetadata,
}

impl SubmissionPayload {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Receives payloads that passed every check.
///
/// An error means the submission did not reach its destination; the guard
/// reports a generic failure to the visitor and logs the error.
#[async_trait]
pub trait SubmissionHandler: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload, form: &dyn FormSurface) -> anyhow::Result<()>;
}

/// A handler failure that should reach the visitor as a wait rather than a
/// generic error. Return it (possibly wrapped in `anyhow` context) from
/// [`SubmissionHandler::submit`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerRejection {
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl HandlerRejection {
    pub fn retry_later(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }
}

/// Why a submission was dropped without telling the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Another submission of the same form is still in flight.
    InFlight,
    Bot,
    Honeypot,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InFlight => write!(f, "in_flight"),
            Self::Bot => write!(f, "bot"),
            Self::Honeypot => write!(f, "honeypot"),
        }
    }
}

/// Result of running a form through the guard.
///
/// The presentation layer decides how to show it; every variant except
/// [`SubmitOutcome::Discarded`] carries a localized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted {
        message: String,
    },
    ValidationError {
        /// Field to focus, if the failure is tied to one.
        field: Option<String>,
        message: String,
    },
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    ServerError {
        message: String,
    },
    Discarded {
        reason: DiscardReason,
    },
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accepted { message }
            | Self::ValidationError { message, .. }
            | Self::RateLimited { message, .. }
            | Self::ServerError { message } => Some(message),
            Self::Discarded { .. } => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::ValidationError { .. } => "validation_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Discarded { .. } => "discarded",
        }
    }

    /// JSON view for logs and the CLI.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({ "outcome": self.kind() });
        if let Some(message) = self.message() {
            value["message"] = message.into();
        }
        if let Some(retry) = self.retry_after() {
            value["retry_after_seconds"] = retry.num_seconds().into();
        }
        match self {
            Self::ValidationError { field: Some(field), .. } => {
                value["field"] = field.as_str().into();
            }
            Self::Discarded { reason } => {
                value["reason"] = reason.to_string().into();
            }
            _ => {}
        }
        value
    }
}
