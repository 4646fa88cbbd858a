//! Weak per-session client identifier.
//!
//! The fingerprint keys the form rate limiter. It is a 32-bit rolling string
//! hash over environment signals, rendered in base 36, and is not meant to
//! resist collision or forgery.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::bot::ClientEnvironment;

/// Opaque, immutable hash of a [`ClientEnvironment`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionFingerprint(String);

impl SessionFingerprint {
    pub fn compute(env: &ClientEnvironment) -> Self {
        let source = [
            env.user_agent.clone(),
            env.languages.join(","),
            format!("{}x{}", env.screen_width, env.screen_height),
            env.color_depth.to_string(),
            env.timezone_offset_minutes.to_string(),
            env.hardware_concurrency.to_string(),
            env.platform.clone(),
            env.plugins.to_string(),
        ]
        .join("|");

        Self(to_base36(rolling_hash(&source).unsigned_abs()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `h = h * 31 + unit` over UTF-16 code units, wrapping at 32 bits.
fn rolling_hash(source: &str) -> i32 {
    source
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let env = ClientEnvironment::desktop_chrome();
        assert_eq!(
            SessionFingerprint::compute(&env),
            SessionFingerprint::compute(&env)
        );
    }

    #[test]
    fn test_fingerprint_changes_with_environment() {
        let a = ClientEnvironment::desktop_chrome();
        let mut b = a.clone();
        b.screen_width = 1366;
        assert_ne!(SessionFingerprint::compute(&a), SessionFingerprint::compute(&b));
    }

    #[test]
    fn test_fingerprint_is_base36() {
        let fp = SessionFingerprint::compute(&ClientEnvironment::desktop_chrome());
        assert!(!fp.as_str().is_empty());
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_rolling_hash_known_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("ab"), 97 * 31 + 98);
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
