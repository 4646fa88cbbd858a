//! Security primitives for form handling: sanitization and validation, rate
//! limiting, bot heuristics, session fingerprinting, random tokens,
//! subresource integrity checks, and the structured security event log.

pub mod bot;
pub mod events;
pub mod fingerprint;
pub mod input;
pub mod integrity;
pub mod rate_limit;
pub mod token;
