//! Secure channel helper for the mall site's backend calls.
//!
//! CSRF and bearer-token handling, a single refresh-and-retry on 401, an
//! error-streak lockout, encrypted persistent storage, CSP violation
//! reporting, and the contact-form submitter used by the form guard.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod secure_storage;
pub mod session;
pub mod submit;
pub mod transport;

pub use client::{CspReport, RequestOptions, SecureChannel};
pub use config::ChannelConfig;
pub use crypto::{CryptoError, StorageKey};
pub use error::ChannelError;
pub use secure_storage::SecureStorage;
pub use submit::ContactSubmitter;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
