use chrono::Duration;
use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::TransportError;

/// Seconds to wait on a 429 that carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Upper bound on a server-supplied `Retry-After` (one day).
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Requests suspended after repeated failures; retry in {remaining_seconds}s")]
    LockedOut { remaining_seconds: u64 },

    #[error("Session is no longer authenticated")]
    Unauthorized,

    #[error("Rate limited by server; retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Could not obtain CSRF token: {0}")]
    Csrf(String),

    #[error("Request failed with status {status}")]
    Status { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ChannelError {
    /// How long the caller should wait before trying again, if the error says.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockedOut { remaining_seconds } => Some(seconds(*remaining_seconds)),
            Self::RateLimited { retry_after_seconds } => Some(seconds(*retry_after_seconds)),
            _ => None,
        }
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(i64::MAX / 1_000))
}
