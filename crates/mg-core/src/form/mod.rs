//! Contact-form handling: the form model, decoy and timing checks, the
//! localized messages shown to visitors, and the submission pipeline.

pub mod guard;
pub mod honeypot;
pub mod messages;
pub mod model;
pub mod submit;
pub mod timing;
