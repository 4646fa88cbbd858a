//! Subresource Integrity (SRI) metadata checks for third-party assets.
//!
//! Integrity strings follow the `<alg>-<base64 digest>` form, optionally with
//! several space-separated entries. Only the strongest algorithm present is
//! considered, and the content matches if any entry of that algorithm matches.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("No usable integrity metadata in: {0}")]
    NoMetadata(String),
    #[error("Unsupported integrity algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Integrity mismatch for {algorithm}: expected one of {expected:?}, got {actual}")]
    Mismatch {
        algorithm: IntegrityAlgorithm,
        expected: Vec<String>,
        actual: String,
    },
}

/// Digest algorithms accepted in integrity metadata, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntegrityAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl IntegrityAlgorithm {
    fn digest(self, content: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(content).to_vec(),
            Self::Sha384 => Sha384::digest(content).to_vec(),
            Self::Sha512 => Sha512::digest(content).to_vec(),
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(IntegrityError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Compute the integrity string for `content`, e.g. `sha384-<base64>`.
pub fn compute_integrity(content: &[u8], algorithm: IntegrityAlgorithm) -> String {
    format!("{}-{}", algorithm, STANDARD.encode(algorithm.digest(content)))
}

/// Verify `content` against SRI metadata.
///
/// Entries with unknown algorithms are skipped, as browsers do. Options after
/// a `?` in an entry are ignored.
pub fn verify_integrity(content: &[u8], integrity: &str) -> Result<(), IntegrityError> {
    let entries: Vec<(IntegrityAlgorithm, &str)> = integrity
        .split_whitespace()
        .filter_map(|entry| {
            let (alg, rest) = entry.split_once('-')?;
            let alg = alg.parse::<IntegrityAlgorithm>().ok()?;
            let digest = rest.split('?').next().unwrap_or(rest);
            Some((alg, digest))
        })
        .collect();

    let strongest = entries
        .iter()
        .map(|(alg, _)| *alg)
        .max()
        .ok_or_else(|| IntegrityError::NoMetadata(integrity.to_string()))?;

    let actual = STANDARD.encode(strongest.digest(content));
    let expected: Vec<String> = entries
        .iter()
        .filter(|(alg, _)| *alg == strongest)
        .map(|(_, digest)| digest.to_string())
        .collect();

    if expected.iter().any(|e| *e == actual) {
        Ok(())
    } else {
        Err(IntegrityError::Mismatch {
            algorithm: strongest,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &[u8] = b"console.log('mall');";

    #[test]
    fn test_compute_then_verify() {
        for alg in [
            IntegrityAlgorithm::Sha256,
            IntegrityAlgorithm::Sha384,
            IntegrityAlgorithm::Sha512,
        ] {
            let sri = compute_integrity(ASSET, alg);
            assert!(sri.starts_with(&alg.to_string()));
            verify_integrity(ASSET, &sri).unwrap();
        }
    }

    #[test]
    fn test_known_sha256_vector() {
        // sha256("abc")
        assert_eq!(
            compute_integrity(b"abc", IntegrityAlgorithm::Sha256),
            "sha256-ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn test_tampered_content_rejected() {
        let sri = compute_integrity(ASSET, IntegrityAlgorithm::Sha384);
        let err = verify_integrity(b"console.log('evil');", &sri).unwrap_err();
        assert!(matches!(err, IntegrityError::Mismatch { .. }));
    }

    #[test]
    fn test_strongest_algorithm_wins() {
        let weak_ok = compute_integrity(ASSET, IntegrityAlgorithm::Sha256);
        let strong_bad = compute_integrity(b"other", IntegrityAlgorithm::Sha512);
        let metadata = format!("{} {}", weak_ok, strong_bad);
        assert!(verify_integrity(ASSET, &metadata).is_err());
    }

    #[test]
    fn test_any_matching_entry_of_strongest_passes() {
        let bad = compute_integrity(b"other", IntegrityAlgorithm::Sha384);
        let good = compute_integrity(ASSET, IntegrityAlgorithm::Sha384);
        verify_integrity(ASSET, &format!("{} {}", bad, good)).unwrap();
    }

    #[test]
    fn test_options_suffix_ignored() {
        let sri = format!("{}?ct=application/javascript", compute_integrity(ASSET, IntegrityAlgorithm::Sha256));
        verify_integrity(ASSET, &sri).unwrap();
    }

    #[test]
    fn test_no_metadata() {
        assert!(matches!(
            verify_integrity(ASSET, "md5-abc"),
            Err(IntegrityError::NoMetadata(_))
        ));
        assert!(matches!(
            verify_integrity(ASSET, ""),
            Err(IntegrityError::NoMetadata(_))
        ));
    }
}
