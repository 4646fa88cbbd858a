//! The secure channel: every backend call from the site goes through
//! [`SecureChannel::secure_request`].
//!
//! Per request, in order:
//!
//! - reject immediately while an error-streak lockout is active
//! - for mutating methods, attach `X-CSRF-Token`, fetching one first if none
//!   is cached
//! - attach `Authorization: Bearer` from the session store's `accessToken`
//! - on 401, refresh the token pair once and retry
//! - on 429, fail with the server's `Retry-After`
//! - on 403, drop the cached CSRF token
//!
//! Every failure extends the error streak; a success resets it. Reaching
//! `max_consecutive_errors` suspends all requests for the lockout period.

use std::sync::{Arc, Mutex, MutexGuard};

use mg_core::clock::{Clock, SystemClock};
use mg_core::security::events::{NullEventLog, SecurityAction, SecurityEvent, SecurityEventSink};
use mg_core::storage::KeyValueStore;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, DEFAULT_RETRY_AFTER_SECS, MAX_RETRY_AFTER_SECS};
use crate::session::SecureSession;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

pub const CSRF_HEADER: &str = "X-CSRF-Token";

const CSRF_ROUTE: &str = "/csrf-token";
const REFRESH_ROUTE: &str = "/auth/refresh";
const CSP_REPORT_ROUTE: &str = "/csp-report";

/// Method, extra headers and JSON body for [`SecureChannel::secure_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn is_mutating(&self) -> bool {
        is_mutating(&self.method)
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

#[derive(Debug, Deserialize)]
struct CsrfResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

/// A Content-Security-Policy violation as the browser reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CspReport {
    pub document_uri: String,
    pub violated_directive: String,
    pub effective_directive: String,
    pub blocked_uri: String,
    pub original_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

pub struct SecureChannel {
    config: ChannelConfig,
    transport: Arc<dyn HttpTransport>,
    session_store: Arc<dyn KeyValueStore>,
    session: Mutex<SecureSession>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
}

impl SecureChannel {
    pub fn new(
        config: ChannelConfig,
        transport: Arc<dyn HttpTransport>,
        session_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            transport,
            session_store,
            session: Mutex::new(SecureSession::new()),
            clock: Arc::new(SystemClock),
            events: Arc::new(NullEventLog),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn session(&self) -> MutexGuard<'_, SecureSession> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn error_count(&self) -> u32 {
        self.session().error_count()
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.session().csrf_token().map(str::to_string)
    }

    /// Seconds left on the lockout, if one is active.
    pub fn lockout_remaining(&self) -> Option<u64> {
        let now = self.clock.now();
        self.session()
            .lockout_remaining(now)
            .map(|d| (d.num_milliseconds().max(0) as u64).div_ceil(1000))
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    pub async fn secure_request(&self, path: &str, options: RequestOptions) -> Result<HttpResponse, ChannelError> {
        if let Some(remaining_seconds) = self.lockout_remaining() {
            debug!(path = %path, remaining_seconds, "Request rejected by lockout");
            return Err(ChannelError::LockedOut { remaining_seconds });
        }

        match self.send_with_refresh(path, &options).await {
            Ok(response) => {
                self.session().record_success();
                Ok(response)
            }
            Err(e) => {
                self.record_failure(path, &e);
                Err(e)
            }
        }
    }

    async fn send_with_refresh(&self, path: &str, options: &RequestOptions) -> Result<HttpResponse, ChannelError> {
        let mut refreshed = false;
        loop {
            let request = self.build_request(path, options).await?;
            let response = self.transport.send(request).await?;

            match response.status {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    refreshed = true;
                    info!(path = %path, "Access token rejected, refreshing");
                    if !self.refresh_auth_token().await {
                        return Err(ChannelError::Unauthorized);
                    }
                }
                StatusCode::UNAUTHORIZED => return Err(ChannelError::Unauthorized),
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after_seconds = response
                        .retry_after()
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
                        .min(MAX_RETRY_AFTER_SECS);
                    warn!(path = %path, retry_after_seconds, "Server rate limited request");
                    return Err(ChannelError::RateLimited { retry_after_seconds });
                }
                status if status.is_success() => return Ok(response),
                status => {
                    if status == StatusCode::FORBIDDEN && options.is_mutating() {
                        debug!(path = %path, "Dropping cached CSRF token after 403");
                        self.session().clear_csrf_token();
                    }
                    return Err(ChannelError::Status {
                        status,
                        body: response.body,
                    });
                }
            }
        }
    }

    async fn build_request(&self, path: &str, options: &RequestOptions) -> Result<HttpRequest, ChannelError> {
        let mut request = HttpRequest::new(options.method.clone(), self.config.endpoint(path))
            .header("Content-Type", "application/json")
            .header("X-Requested-With", "XMLHttpRequest");

        if options.is_mutating() {
            let token = self.csrf_token_or_fetch().await?;
            request = request.header(CSRF_HEADER, token);
        }
        if let Some(access) = self.stored_token(ACCESS_TOKEN_KEY) {
            request = request.header("Authorization", format!("Bearer {}", access));
        }
        for (name, value) in &options.headers {
            request = request.header(name.clone(), value.clone());
        }
        if let Some(body) = &options.body {
            request = request.json(body.clone());
        }
        Ok(request)
    }

    async fn csrf_token_or_fetch(&self) -> Result<String, ChannelError> {
        if let Some(token) = self.csrf_token() {
            return Ok(token);
        }

        let request = HttpRequest::new(Method::GET, self.config.endpoint(CSRF_ROUTE))
            .header("X-Requested-With", "XMLHttpRequest");
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ChannelError::Csrf(format!("status {}", response.status)));
        }
        let CsrfResponse { token } = response
            .json()
            .map_err(|e| ChannelError::Csrf(e.to_string()))?;
        if token.is_empty() {
            return Err(ChannelError::Csrf("empty token".into()));
        }

        debug!("Fetched CSRF token");
        self.session().set_csrf_token(token.clone());
        Ok(token)
    }

    fn stored_token(&self, key: &str) -> Option<String> {
        match self.session_store.get(key) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read session token");
                None
            }
        }
    }

    fn record_failure(&self, path: &str, err: &ChannelError) {
        let now = self.clock.now();
        let (count, locked_until) = {
            let mut session = self.session();
            let locked = session.record_failure(now, self.config.max_consecutive_errors, self.config.lockout());
            (session.error_count(), locked)
        };
        warn!(path = %path, error = %err, consecutive_errors = count, "Secure request failed");

        if let Some(until) = locked_until {
            error!(
                path = %path,
                consecutive_errors = count,
                until = %until,
                "Too many consecutive request failures, suspending requests"
            );
            self.events.record(
                &SecurityEvent::new(SecurityAction::RequestLockout, path)
                    .with_details(format!("consecutive_errors={} until={}", count, until.to_rfc3339()))
                    .at(now),
            );
        }
    }

    // -----------------------------------------------------------------------
    // Token refresh
    // -----------------------------------------------------------------------

    /// Trade the stored refresh token for a new pair. On any failure both
    /// tokens are removed and `false` is returned; the caller should treat the
    /// session as signed out.
    pub async fn refresh_auth_token(&self) -> bool {
        match self.try_refresh().await {
            Ok(()) => {
                info!("Access token refreshed");
                true
            }
            Err(reason) => {
                warn!(reason = %reason, "Token refresh failed, clearing session tokens");
                for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
                    if let Err(e) = self.session_store.remove(key) {
                        error!(key = %key, error = %e, "Failed to clear session token");
                    }
                }
                self.events.record(
                    &SecurityEvent::new(SecurityAction::TokenRefreshFailed, REFRESH_ROUTE)
                        .with_details(reason)
                        .at(self.clock.now()),
                );
                false
            }
        }
    }

    async fn try_refresh(&self) -> Result<(), String> {
        let refresh = self
            .stored_token(REFRESH_TOKEN_KEY)
            .ok_or_else(|| "no refresh token".to_string())?;

        let request = HttpRequest::new(Method::POST, self.config.endpoint(REFRESH_ROUTE))
            .header("Content-Type", "application/json")
            .header("X-Requested-With", "XMLHttpRequest")
            .json(json!({ "refreshToken": refresh }));
        let response = self.transport.send(request).await.map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("status {}", response.status));
        }
        let pair: TokenPair = response.json().map_err(|e| e.to_string())?;

        self.session_store
            .set(ACCESS_TOKEN_KEY, &pair.access_token)
            .and_then(|_| self.session_store.set(REFRESH_TOKEN_KEY, &pair.refresh_token))
            .map_err(|e| e.to_string())
    }

    // -----------------------------------------------------------------------
    // CSP reporting
    // -----------------------------------------------------------------------

    /// Forward a CSP violation to the backend. Best effort: ignores the
    /// lockout and never touches the error streak.
    pub async fn report_csp_violation(&self, report: &CspReport) {
        warn!(
            directive = %report.violated_directive,
            blocked_uri = %report.blocked_uri,
            "Content-Security-Policy violation"
        );

        let request = HttpRequest::new(Method::POST, self.config.endpoint(CSP_REPORT_ROUTE))
            .header("Content-Type", "application/csp-report")
            .json(json!({ "csp-report": report }));
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => debug!("CSP report delivered"),
            Ok(response) => debug!(status = response.status.as_u16(), "CSP report rejected"),
            Err(e) => debug!(error = %e, "CSP report not delivered"),
        }
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_options() {
        let get = RequestOptions::get();
        assert_eq!(get.method, Method::GET);
        assert!(!get.is_mutating());

        let post = RequestOptions::post(json!({"a": 1})).header("X-Trace", "1");
        assert!(post.is_mutating());
        assert_eq!(post.headers, vec![("X-Trace".to_string(), "1".to_string())]);
        assert!(RequestOptions::get().method(Method::DELETE).is_mutating());
        assert!(!RequestOptions::get().method(Method::HEAD).is_mutating());
    }

    #[test]
    fn test_csp_report_wire_names() {
        let report = CspReport {
            document_uri: "https://mall.example/".into(),
            violated_directive: "script-src".into(),
            blocked_uri: "https://evil.example/x.js".into(),
            ..CspReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["document-uri"], "https://mall.example/");
        assert_eq!(value["violated-directive"], "script-src");
        assert!(value.get("line-number").is_none());
    }
}
