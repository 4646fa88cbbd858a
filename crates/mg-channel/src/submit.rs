//! Bridges the form guard to the backend contact endpoint.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use mg_core::form::messages;
use mg_core::{FormSurface, HandlerRejection, SubmissionHandler, SubmissionPayload};
use tracing::info;

use crate::client::{RequestOptions, SecureChannel};
use crate::error::ChannelError;

pub const CONTACT_ROUTE: &str = "/contact";

/// Posts accepted contact-form payloads through the secure channel.
///
/// Server throttling and the channel lockout become [`HandlerRejection`]s so
/// the visitor is told to wait instead of seeing a generic failure.
#[derive(Debug, Clone)]
pub struct ContactSubmitter {
    channel: Arc<SecureChannel>,
    route: String,
}

impl ContactSubmitter {
    pub fn new(channel: Arc<SecureChannel>) -> Self {
        Self {
            channel,
            route: CONTACT_ROUTE.to_string(),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }
}

#[async_trait]
impl SubmissionHandler for ContactSubmitter {
    async fn submit(&self, payload: &SubmissionPayload, form: &dyn FormSurface) -> anyhow::Result<()> {
        let body = serde_json::to_value(payload).context("Failed to encode submission payload")?;

        match self
            .channel
            .secure_request(&self.route, RequestOptions::post(body))
            .await
        {
            Ok(response) => {
                info!(form = %form.id(), status = response.status.as_u16(), "Contact form delivered");
                Ok(())
            }
            Err(e @ ChannelError::RateLimited { .. }) => {
                let retry_after = e.retry_after().unwrap_or_else(chrono::Duration::zero);
                Err(HandlerRejection::retry_later(messages::SERVER_RATE_LIMITED, retry_after))
                    .context(format!("Contact form for {} throttled by server", form.id()))
            }
            Err(e @ ChannelError::LockedOut { .. }) => {
                let retry_after = e.retry_after().unwrap_or_else(chrono::Duration::zero);
                Err(HandlerRejection::retry_later(messages::REQUEST_LOCKED_OUT, retry_after))
                    .context(format!("Contact form for {} held by request lockout", form.id()))
            }
            Err(e) => Err(e).context(format!("Failed to deliver contact form {}", form.id())),
        }
    }
}
