//! Per-session channel state: cached CSRF token and the error-streak lockout.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Default)]
pub struct SecureSession {
    csrf_token: Option<String>,
    error_count: u32,
    lockout_until: Option<DateTime<Utc>>,
}

impl SecureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn set_csrf_token(&mut self, token: String) {
        self.csrf_token = Some(token);
    }

    pub fn clear_csrf_token(&mut self) {
        self.csrf_token = None;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Time left on an active lockout. An elapsed lockout is cleared along
    /// with the error streak.
    pub fn lockout_remaining(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.lockout_until?;
        if now < until {
            return Some(until - now);
        }
        self.lockout_until = None;
        self.error_count = 0;
        None
    }

    /// Count a failed request. Returns the lockout end if this failure
    /// reached the threshold.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        max_errors: u32,
        lockout: Duration,
    ) -> Option<DateTime<Utc>> {
        self.error_count += 1;
        if self.error_count >= max_errors && self.lockout_until.is_none() {
            let until = now.checked_add_signed(lockout).unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.lockout_until = Some(until);
            return Some(until);
        }
        None
    }

    pub fn record_success(&mut self) {
        self.error_count = 0;
    }
}
