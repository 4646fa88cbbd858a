//! Input & abuse guard for the mall site's contact forms.
//!
//! Everything the presentation layer needs before a submission is allowed to
//! leave the page lives here: sanitization, field validation, rate limiting,
//! bot heuristics, honeypot and timing checks, and the submission pipeline
//! that ties them together.

pub mod clock;
pub mod config;
pub mod form;
pub mod security;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GuardConfig};
pub use form::guard::AbuseGuard;
pub use form::model::{FormField, FormId, FormSurface, MemoryForm};
pub use form::submit::{
    DiscardReason, HandlerRejection, SecurityMetadata, SubmissionHandler, SubmissionPayload, SubmitOutcome,
};
