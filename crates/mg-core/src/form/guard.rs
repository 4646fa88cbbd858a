//! The input & abuse guard: one instance per page session, shared by every
//! form on the page.
//!
//! [`AbuseGuard::handle_form_submit`] runs the full pipeline and stops at the
//! first failing step:
//!
//! 1. drop the submit if the same form already has one in flight
//! 2. bot heuristics (silent)
//! 3. honeypot (silent)
//! 4. minimum fill time
//! 5. rate limit keyed by `form-<fingerprint>`
//! 6. per-field sanitization and email/phone/name validation
//! 7. required fields
//! 8. hand the sanitized payload to the [`SubmissionHandler`]
//!
//! The in-flight mark and the submit control are restored on every exit path.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tracing::{debug, error, info, warn};

use super::honeypot::HoneypotRules;
use super::messages;
use super::model::{FormId, FormSurface};
use super::submit::{
    DiscardReason, HandlerRejection, SecurityMetadata, SubmissionHandler, SubmissionPayload, SubmitOutcome,
};
use super::timing::FormTimingTracker;
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::security::bot::{self, BotSignal, ClientEnvironment};
use crate::security::events::{NullEventLog, SecurityAction, SecurityEvent, SecurityEventSink};
use crate::security::fingerprint::SessionFingerprint;
use crate::security::input::{self, FieldType, SanitizationPolicy};
use crate::security::rate_limit::{RateLimitDecision, RateLimiter};
use crate::security::token;

pub struct AbuseGuard {
    config: GuardConfig,
    policy: &'static SanitizationPolicy,
    limiter: RateLimiter,
    timing: FormTimingTracker,
    honeypot: HoneypotRules,
    environment: ClientEnvironment,
    fingerprint: SessionFingerprint,
    in_flight: Mutex<HashSet<FormId>>,
    events: Arc<dyn SecurityEventSink>,
    clock: Arc<dyn Clock>,
}

impl AbuseGuard {
    /// Guard on the system clock with events discarded.
    pub fn new(config: GuardConfig, environment: ClientEnvironment) -> Self {
        Self::with_parts(config, environment, Arc::new(SystemClock), Arc::new(NullEventLog))
    }

    pub fn with_parts(
        config: GuardConfig,
        environment: ClientEnvironment,
        clock: Arc<dyn Clock>,
        events: Arc<dyn SecurityEventSink>,
    ) -> Self {
        let fingerprint = SessionFingerprint::compute(&environment);
        info!(fingerprint = %fingerprint, "Abuse guard initialized");

        Self {
            limiter: RateLimiter::new(config.rate_limit, clock.clone()),
            timing: FormTimingTracker::new(Duration::milliseconds(config.min_fill_ms), clock.clone()),
            honeypot: HoneypotRules::from_config(&config),
            policy: SanitizationPolicy::standard(),
            config,
            environment,
            fingerprint,
            in_flight: Mutex::new(HashSet::new()),
            events,
            clock,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &SessionFingerprint {
        &self.fingerprint
    }

    pub fn environment(&self) -> &ClientEnvironment {
        &self.environment
    }

    // -----------------------------------------------------------------------
    // Individual checks
    // -----------------------------------------------------------------------

    pub fn sanitize(&self, value: &str, field: FieldType) -> String {
        self.policy.sanitize(value, field)
    }

    pub fn is_valid_email(&self, value: &str) -> bool {
        input::is_valid_email(value)
    }

    pub fn is_valid_phone(&self, value: &str) -> bool {
        input::is_valid_phone(value)
    }

    pub fn is_valid_name(&self, value: &str) -> bool {
        input::is_valid_name(value)
    }

    pub fn check_rate_limit(&self, key: &str) -> RateLimitDecision {
        self.limiter.check(key)
    }

    pub fn detect_bot(&self) -> Option<Vec<BotSignal>> {
        bot::detect_bot(&self.environment)
    }

    /// True if a decoy field on `form` has been filled in.
    pub fn check_honeypot(&self, form: &dyn FormSurface) -> bool {
        self.honeypot.is_tripped(&form.fields())
    }

    pub fn track_form_load(&self, form: &dyn FormSurface) {
        self.timing.track_form_load(&form.id());
    }

    /// False if `form` is being submitted before the minimum fill time.
    pub fn check_form_timing(&self, form: &dyn FormSurface) -> bool {
        self.timing.check_form_timing(&form.id())
    }

    /// Release per-form state when a form is removed from the page.
    pub fn forget_form(&self, id: &FormId) {
        self.timing.forget(id);
        debug!(form = %id, "Forgot form");
    }

    /// Rate-limit key shared by every form in this session.
    pub fn rate_limit_key(&self) -> String {
        format!("form-{}", self.fingerprint)
    }

    /// Direct access for tests that need to place a load time in the past.
    pub fn timing(&self) -> &FormTimingTracker {
        &self.timing
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Run `form` through every check and, if it passes, hand the sanitized
    /// payload to `handler`.
    pub async fn handle_form_submit(
        &self,
        form: &dyn FormSurface,
        handler: &dyn SubmissionHandler,
    ) -> SubmitOutcome {
        let form_id = form.id();

        let Some(_in_flight) = InFlight::acquire(&self.in_flight, &form_id) else {
            debug!(form = %form_id, "Submission already in flight, dropping");
            self.record(SecurityAction::DuplicateSubmit, &form_id, None);
            return SubmitOutcome::Discarded {
                reason: DiscardReason::InFlight,
            };
        };

        if let Some(signals) = self.detect_bot() {
            let details = signals
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            warn!(form = %form_id, signals = %details, "Bot heuristics tripped, discarding submission");
            self.record(SecurityAction::BotDetected, &form_id, Some(details));
            return SubmitOutcome::Discarded {
                reason: DiscardReason::Bot,
            };
        }

        let fields = form.fields();

        if let Some(decoy) = self.honeypot.tripped_field(&fields) {
            warn!(form = %form_id, field = %decoy, "Honeypot field filled, discarding submission");
            self.record(
                SecurityAction::HoneypotTriggered,
                &form_id,
                Some(format!("field={}", decoy)),
            );
            return SubmitOutcome::Discarded {
                reason: DiscardReason::Honeypot,
            };
        }

        if let Some(remaining) = self.timing.time_remaining(&form_id) {
            info!(form = %form_id, remaining_ms = remaining.num_milliseconds(), "Form submitted too fast");
            self.record(
                SecurityAction::SubmittedTooFast,
                &form_id,
                Some(format!("remaining_ms={}", remaining.num_milliseconds())),
            );
            return SubmitOutcome::RateLimited {
                message: messages::SUBMITTED_TOO_FAST.to_string(),
                retry_after: Some(remaining),
            };
        }

        let key = self.rate_limit_key();
        if let RateLimitDecision::Blocked { remaining_seconds } = self.limiter.check(&key) {
            self.record(
                SecurityAction::RateLimited,
                &form_id,
                Some(format!("key={} remaining_seconds={}", key, remaining_seconds)),
            );
            return SubmitOutcome::RateLimited {
                message: messages::rate_limit_blocked(remaining_seconds),
                retry_after: Some(Duration::seconds(remaining_seconds as i64)),
            };
        }

        let mut data = BTreeMap::new();
        for field in fields.iter() {
            if field.is_control() || self.honeypot.is_decoy(field) || field.name.is_empty() {
                continue;
            }
            let field_type = field.field_type();
            let raw = field.text();

            if !raw.is_empty() {
                let invalid = match field_type {
                    FieldType::Email if !input::is_valid_email(raw) => Some(messages::INVALID_EMAIL),
                    FieldType::Phone if !input::is_valid_phone(raw) => Some(messages::INVALID_PHONE),
                    FieldType::Name if !input::is_valid_name(raw) => Some(messages::INVALID_NAME),
                    _ => None,
                };
                if let Some(message) = invalid {
                    return self.reject_field(form, &form_id, &field.name, field_type, message);
                }
            }

            let sanitized = match field.value.as_str() {
                Some(_) => self.policy.sanitize(raw, field_type),
                None => String::new(),
            };
            data.insert(field.name.clone(), sanitized);
        }

        if let Some(missing) = fields
            .iter()
            .find(|f| f.required && !f.is_control() && f.text().is_empty())
        {
            return self.reject_field(
                form,
                &form_id,
                &missing.name,
                missing.field_type(),
                messages::REQUIRED_FIELDS,
            );
        }

        let payload = SubmissionPayload {
            fields: data,
            security: SecurityMetadata {
                fingerprint: self.fingerprint.to_string(),
                timestamp: self.clock.now().timestamp_millis(),
                csrf_token: token::generate_csrf_token(),
            },
        };

        let _control = SubmitControl::engage(form);

        match handler.submit(&payload, form).await {
            Ok(()) => {
                form.reset();
                self.timing.track_form_load(&form_id);
                info!(form = %form_id, fields = payload.fields.len(), "Form submitted");
                self.record(SecurityAction::SubmissionAccepted, &form_id, None);
                SubmitOutcome::Accepted {
                    message: messages::SUBMIT_SUCCESS.to_string(),
                }
            }
            Err(e) => {
                if let Some(rejection) = e.downcast_ref::<HandlerRejection>() {
                    warn!(form = %form_id, error = %format!("{:#}", e), "Form submission deferred");
                    self.record(SecurityAction::SubmissionFailed, &form_id, Some(format!("{:#}", e)));
                    return SubmitOutcome::RateLimited {
                        message: rejection.message.clone(),
                        retry_after: rejection.retry_after,
                    };
                }
                error!(form = %form_id, error = %format!("{:#}", e), "Form submission failed");
                self.record(SecurityAction::SubmissionFailed, &form_id, Some(format!("{:#}", e)));
                SubmitOutcome::ServerError {
                    message: messages::SUBMIT_FAILURE.to_string(),
                }
            }
        }
    }

    fn reject_field(
        &self,
        form: &dyn FormSurface,
        form_id: &FormId,
        field: &str,
        field_type: FieldType,
        message: &str,
    ) -> SubmitOutcome {
        info!(form = %form_id, field = %field, field_type = %field_type, "Field rejected");
        self.record(
            SecurityAction::ValidationFailed,
            form_id,
            Some(format!("field={}", field)),
        );
        form.focus_field(field);
        SubmitOutcome::ValidationError {
            field: Some(field.to_string()),
            message: message.to_string(),
        }
    }

    fn record(&self, action: SecurityAction, form_id: &FormId, details: Option<String>) {
        let mut event = SecurityEvent::new(action, form_id.as_str())
            .with_fingerprint(self.fingerprint.as_str())
            .at(self.clock.now());
        if let Some(details) = details {
            event = event.with_details(details);
        }
        self.events.record(&event);
    }
}

impl std::fmt::Debug for AbuseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbuseGuard")
            .field("config", &self.config)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Marks a form as in flight until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<FormId>>,
    id: FormId,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<FormId>>, id: &FormId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone());
        inserted.then(|| Self { set, id: id.clone() })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

/// Disables and relabels the submit control, restoring it when dropped.
struct SubmitControl<'a> {
    form: &'a dyn FormSurface,
    label: String,
}

impl<'a> SubmitControl<'a> {
    fn engage(form: &'a dyn FormSurface) -> Self {
        let label = form.submit_label();
        form.set_submit_control(false, messages::SENDING);
        Self { form, label }
    }
}

impl Drop for SubmitControl<'_> {
    fn drop(&mut self) {
        self.form.set_submit_control(true, &self.label);
    }
}
