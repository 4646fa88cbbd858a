//! Sanitization and validation for text that arrives from contact forms.
//!
//! Every submitted value passes through [`sanitize`] before it is placed in an
//! outgoing payload, and email, phone and name fields are additionally checked
//! by the allowlist validators below.
//!
//! The dangerous-pattern list is illustrative rather than exhaustive. Output is
//! safe to embed as literal text because `<`, `>`, `&`, quotes, backticks and
//! parentheses are entity-encoded after the strip pass, but the strip pass on
//! its own will not catch every injection vector ever published. Callers must
//! still insert the result as text, never as markup.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned when input fails validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Input too long: max {max} chars, got {actual}")]
    TooLong { max: usize, actual: usize },
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),
}

/// The kinds of field the sanitizer knows limits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Name,
    Email,
    Phone,
    Message,
    Text,
}

impl FieldType {
    /// Maximum length in characters before sanitization truncates.
    pub fn max_len(self) -> usize {
        match self {
            Self::Name => 100,
            Self::Email => 254,
            Self::Phone => 20,
            Self::Message => 5000,
            Self::Text => 1000,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Message => "message",
            Self::Text => "text",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for FieldType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "phone" | "tel" => Ok(Self::Phone),
            "message" => Ok(Self::Message),
            "text" => Ok(Self::Text),
            other => Err(ValidationError::UnknownFieldType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Sanitization policy
// ---------------------------------------------------------------------------

/// Patterns stripped from every value before encoding.
///
/// Paired tags are removed with their content first, then any stray opening or
/// closing tag, then URI schemes, inline handlers and CSS expressions.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?is)<script\b.*?</script\s*>",
    r"(?is)<iframe\b.*?</iframe\s*>",
    r"(?is)<object\b.*?</object\s*>",
    r"(?is)<embed\b.*?</embed\s*>",
    r"(?is)<form\b.*?</form\s*>",
    r"(?i)</?\s*(?:script|iframe|object|embed|form)\b[^>]*>?",
    r"(?i)javascript\s*:",
    r"(?i)vbscript\s*:",
    r"(?i)data\s*:",
    r"(?i)on[a-z]+\s*=",
    r"(?i)expression\s*\(",
];

/// Per-field limits and the compiled dangerous-pattern list.
///
/// Read-only once built; share the [`SanitizationPolicy::standard`] instance.
#[derive(Debug)]
pub struct SanitizationPolicy {
    patterns: Vec<Regex>,
}

static STANDARD_POLICY: Lazy<SanitizationPolicy> = Lazy::new(|| SanitizationPolicy {
    patterns: DANGEROUS_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect(),
});

impl SanitizationPolicy {
    /// The process-wide policy.
    pub fn standard() -> &'static SanitizationPolicy {
        &STANDARD_POLICY
    }

    pub fn max_len(&self, field: FieldType) -> usize {
        field.max_len()
    }

    /// Truncate, strip dangerous patterns, then entity-encode.
    pub fn sanitize(&self, input: &str, field: FieldType) -> String {
        let truncated: String = input.chars().take(self.max_len(field)).collect();
        let stripped = self.strip(truncated);
        encode_entities(&stripped)
    }

    /// Remove every configured pattern, repeating until nothing matches so that
    /// a removal cannot splice a new match together.
    fn strip(&self, mut value: String) -> String {
        loop {
            let mut next = value.clone();
            for pattern in &self.patterns {
                if pattern.is_match(&next) {
                    next = pattern.replace_all(&next, "").into_owned();
                }
            }
            if next == value {
                return next;
            }
            value = next;
        }
    }

    /// True if the value still contains anything the strip pass would remove.
    pub fn contains_dangerous(&self, value: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(value))
    }
}

fn encode_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '(' => out.push_str("&#40;"),
            ')' => out.push_str("&#41;"),
            c => out.push(c),
        }
    }
    out
}

/// Sanitize a value using the standard policy.
pub fn sanitize(input: &str, field: FieldType) -> String {
    SanitizationPolicy::standard().sanitize(input, field)
}

/// Sanitize an arbitrary JSON value. Anything that is not a string becomes empty.
pub fn sanitize_value(input: &serde_json::Value, field: FieldType) -> String {
    match input.as_str() {
        Some(s) => sanitize(s, field),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Simplified RFC 5322 address shape.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*\.[a-zA-Z]{2,}$",
    )
    .unwrap()
});

/// Iraqi mobile numbers: optional +964 / 00964 / 0 prefix, then 7[3-9] and 8 digits.
static IRAQI_MOBILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+964|00964|0)?7[3-9][0-9]{8}$").unwrap());

/// Characters stripped from phone input before matching.
static PHONE_NOISE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s()\-]").unwrap());

/// Arabic script blocks, Latin letters, whitespace, hyphen, apostrophe, period.
static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[\x{0600}-\x{06FF}\x{0750}-\x{077F}\x{08A0}-\x{08FF}\x{FB50}-\x{FDFF}\x{FE70}-\x{FEFF}a-zA-Z\s\-'.]+$",
    )
    .unwrap()
});

const EMAIL_MAX_LEN: usize = 254;
const PHONE_MAX_LEN: usize = 20;
const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 100;

/// Validate an email address.
pub fn validate_email(email: &str) -> Result<&str, ValidationError> {
    if email.len() > EMAIL_MAX_LEN {
        return Err(ValidationError::TooLong {
            max: EMAIL_MAX_LEN,
            actual: email.len(),
        });
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }
    Ok(email)
}

/// Validate an Iraqi mobile number and return it with spacing, parentheses
/// and hyphens removed.
pub fn validate_phone(phone: &str) -> Result<String, ValidationError> {
    let cleaned = PHONE_NOISE_RE.replace_all(phone, "").into_owned();
    if cleaned.len() > PHONE_MAX_LEN {
        return Err(ValidationError::TooLong {
            max: PHONE_MAX_LEN,
            actual: cleaned.len(),
        });
    }
    if !IRAQI_MOBILE_RE.is_match(&cleaned) {
        return Err(ValidationError::InvalidPhone(phone.to_string()));
    }
    Ok(cleaned)
}

/// Validate a personal name (Arabic or Latin script).
pub fn validate_name(name: &str) -> Result<&str, ValidationError> {
    let name = name.trim();
    let len = name.chars().count();
    if len > NAME_MAX_LEN {
        return Err(ValidationError::TooLong {
            max: NAME_MAX_LEN,
            actual: len,
        });
    }
    if len < NAME_MIN_LEN || !NAME_RE.is_match(name) {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(name)
}

pub fn is_valid_email(email: &str) -> bool {
    validate_email(email).is_ok()
}

pub fn is_valid_phone(phone: &str) -> bool {
    validate_phone(phone).is_ok()
}

pub fn is_valid_name(name: &str) -> bool {
    validate_name(name).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
