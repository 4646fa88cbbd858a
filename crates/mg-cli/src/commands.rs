//! `mall-guard` subcommands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use mg_channel::{ChannelConfig, ContactSubmitter, ReqwestTransport, SecureChannel};
use mg_core::form::model::FormDocument;
use mg_core::security::bot::ClientEnvironment;
use mg_core::security::events::{FileEventLog, NullEventLog, SecurityEventSink};
use mg_core::security::input::{self, FieldType};
use mg_core::security::integrity;
use mg_core::storage::MemoryStore;
use mg_core::{
    AbuseGuard, Clock, FormSurface, GuardConfig, MemoryForm, SubmissionHandler, SubmissionPayload, SystemClock,
};
use tracing::{debug, info};

/// Longest `--fill-ms` accepted (one day).
const MAX_FILL_MS: i64 = 86_400_000;

#[derive(Parser)]
#[command(name = "mall-guard")]
#[command(about = "Input and abuse guard for the mall site's forms and backend calls")]
#[command(version)]
pub struct Cli {
    /// JSON config file (guard settings plus an optional `channel` section)
    #[arg(long, global = true, env = "MG_CONFIG")]
    config: Option<PathBuf>,

    /// Append security events to this JSON Lines file
    #[arg(long, global = true, env = "MG_EVENTS")]
    events: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize text as the guard would for a field type
    Sanitize {
        /// name, email, phone, message or text
        field_type: String,
        text: String,
    },

    /// Check a value against a field validator (exit code 1 if invalid)
    Validate {
        #[arg(value_enum)]
        kind: ValidateKind,
        value: String,
    },

    /// Run a form document through the full submission pipeline
    Submit {
        /// Form document: {"id"?, "submit_label"?, "fields": [...]}
        form: PathBuf,
        /// Deliver the payload to the backend instead of only logging it
        #[arg(long)]
        post: bool,
        /// Pretend the form was loaded this many milliseconds ago
        /// (default: the configured minimum fill time)
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_FILL_MS))]
        fill_ms: Option<i64>,
        /// Client environment JSON (default: a regular desktop browser)
        #[arg(long)]
        environment: Option<PathBuf>,
    },

    /// Verify a file against Subresource Integrity metadata (exit code 1 on mismatch)
    VerifySri {
        file: PathBuf,
        /// e.g. "sha384-oqVuAfXRKap7fdgcCY5uykM6+R9GqQ8K/uxy9rx7HNQlGYl1kPzQho1wx4JwY8wC"
        integrity: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ValidateKind {
    Email,
    Phone,
    Name,
}

impl Cli {
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Sanitize { ref field_type, ref text } => {
                let field: FieldType = field_type.parse()?;
                println!("{}", input::sanitize(text, field));
                Ok(ExitCode::SUCCESS)
            }
            Commands::Validate { kind, ref value } => {
                let valid = is_valid(kind, value);
                println!("{}", if valid { "valid" } else { "invalid" });
                Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
            }
            Commands::Submit {
                ref form,
                post,
                fill_ms,
                ref environment,
            } => {
                self.submit(form, post, fill_ms, environment.as_deref())
                    .await
            }
            Commands::VerifySri { ref file, ref integrity } => verify_sri(file, integrity),
        }
    }

    fn event_sink(&self) -> Result<Arc<dyn SecurityEventSink>> {
        match &self.events {
            Some(path) => {
                let log = FileEventLog::new(path)
                    .with_context(|| format!("Failed to open event log {}", path.display()))?;
                Ok(Arc::new(log))
            }
            None => Ok(Arc::new(NullEventLog)),
        }
    }

    async fn submit(
        &self,
        form_path: &Path,
        post: bool,
        fill_ms: Option<i64>,
        environment: Option<&Path>,
    ) -> Result<ExitCode> {
        let config = GuardConfig::load(self.config.as_deref()).context("Failed to load guard config")?;
        let environment = match environment {
            Some(path) => read_json::<ClientEnvironment>(path)?,
            None => ClientEnvironment::desktop_chrome(),
        };
        let document = read_json::<FormDocument>(form_path)?;
        let form = MemoryForm::from_document(document);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fill = chrono::Duration::milliseconds(fill_ms.unwrap_or(config.min_fill_ms));
        let guard = AbuseGuard::with_parts(config, environment, clock.clone(), self.event_sink()?);
        let loaded_at = clock.now().checked_sub_signed(fill).unwrap_or(DateTime::<Utc>::MIN_UTC);
        guard.timing().track_form_load_at(&form.id(), loaded_at);

        let (outcome, payload) = if post {
            let channel_config = ChannelConfig::load(self.config.as_deref()).context("Failed to load channel config")?;
            let transport = ReqwestTransport::new(channel_config.request_timeout())?;
            info!(base_url = %channel_config.base_url, "Posting submission to backend");
            let channel = SecureChannel::new(channel_config, Arc::new(transport), Arc::new(MemoryStore::new()))
                .with_clock(clock.clone());
            let submitter = ContactSubmitter::new(Arc::new(channel));
            (guard.handle_form_submit(&form, &submitter).await, None)
        } else {
            let handler = CapturingHandler::default();
            let outcome = guard.handle_form_submit(&form, &handler).await;
            (outcome, handler.take())
        };

        let mut report = outcome.to_json();
        if let Some(payload) = payload {
            report["payload"] = serde_json::to_value(payload)?;
        }
        println!("{}", serde_json::to_string_pretty(&report)?);

        Ok(if outcome.is_accepted() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        })
    }
}

fn is_valid(kind: ValidateKind, value: &str) -> bool {
    match kind {
        ValidateKind::Email => input::is_valid_email(value),
        ValidateKind::Phone => input::is_valid_phone(value),
        ValidateKind::Name => input::is_valid_name(value),
    }
}

fn verify_sri(file: &Path, metadata: &str) -> Result<ExitCode> {
    let content = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    match integrity::verify_integrity(&content, metadata) {
        Ok(()) => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accepts every payload and keeps the last one for printing.
#[derive(Default)]
struct CapturingHandler {
    last: Mutex<Option<SubmissionPayload>>,
}

impl CapturingHandler {
    fn take(&self) -> Option<SubmissionPayload> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

#[async_trait]
impl SubmissionHandler for CapturingHandler {
    async fn submit(&self, payload: &SubmissionPayload, form: &dyn FormSurface) -> Result<()> {
        debug!(form = %form.id(), fields = payload.fields.len(), "Captured submission payload");
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit_flags() {
        let cli = Cli::try_parse_from([
            "mall-guard",
            "--events",
            "/tmp/events.jsonl",
            "submit",
            "form.json",
            "--post",
            "--fill-ms",
            "5000",
        ])
        .unwrap();
        assert_eq!(cli.events.as_deref(), Some(Path::new("/tmp/events.jsonl")));
        match cli.command {
            Commands::Submit { post, fill_ms, .. } => {
                assert!(post);
                assert_eq!(fill_ms, Some(5000));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_fill_ms_range() {
        let parse = |fill: &str| Cli::try_parse_from(["mall-guard", "submit", "form.json", "--fill-ms", fill]);
        assert!(parse("86400000").is_ok());
        assert!(parse("86400001").is_err());
        assert!(parse("9223372036854775807").is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn test_validate_kinds() {
        assert!(is_valid(ValidateKind::Phone, "07701234567"));
        assert!(!is_valid(ValidateKind::Phone, "12345"));
        assert!(is_valid(ValidateKind::Email, "user@example.com"));
        assert!(!is_valid(ValidateKind::Email, "not-an-email"));
        assert!(is_valid(ValidateKind::Name, "علي حسن"));
    }
}
