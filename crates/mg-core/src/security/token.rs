//! Random tokens for request metadata.

use rand::Rng;

/// Bytes of entropy in a pseudo-CSRF token.
pub const CSRF_TOKEN_BYTES: usize = 32;

/// Generate a hex-encoded random token of `bytes` bytes.
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}

/// Generate a 64-character pseudo-CSRF token.
pub fn generate_csrf_token() -> String {
    generate_token(CSRF_TOKEN_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_token_shape() {
        let token = generate_csrf_token();
        assert_eq!(token.len(), CSRF_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_csrf_token(), generate_csrf_token());
    }
}
