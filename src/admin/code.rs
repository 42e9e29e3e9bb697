//! One-time verification codes.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of digits in a verification code.
pub const CODE_DIGITS: usize = 6;

/// Why a code exchange was refused.
///
/// The messages are shown to the person signing in, so none of them says
/// anything about whether an account exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// No live code for this email
    #[error("No verification code found. Please request a new one.")]
    NoCode,

    /// The code outlived its validity window
    #[error("Verification code expired. Please request a new one.")]
    Expired,

    /// The attempt budget is spent
    #[error("Too many failed attempts. Please request a new code.")]
    TooManyAttempts,

    /// Wrong code; the record stays alive
    #[error("Invalid verification code. {remaining} attempts remaining.")]
    InvalidCode {
        /// Guesses left before the code is discarded
        remaining: u32,
    },
}

/// A stored code, keyed by normalized email.
///
/// Only the SHA-256 digest of the code is kept.
#[derive(Debug, Clone)]
pub(crate) struct VerificationCode {
    pub(crate) digest: [u8; 32],
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) attempts: u32,
}

impl VerificationCode {
    pub(crate) fn new(code: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            digest: digest(code),
            expires_at,
            attempts: 0,
        }
    }

    /// Constant-time comparison against a submitted code.
    pub(crate) fn matches(&self, provided: &str) -> bool {
        self.digest[..].ct_eq(&digest(provided.trim())[..]).into()
    }

    /// A code is still usable at exactly its expiry instant.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A freshly issued code, to be sent over the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    /// The plaintext code
    pub code: String,
    /// When it stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Draw a uniformly random six digit code from the OS RNG.
pub fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:0width$}", n, width = CODE_DIGITS)
}

/// Lowercase and trim an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis_to_datetime;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Admin@Example.COM "), "admin@example.com");
    }

    #[test]
    fn test_code_matching() {
        let record = VerificationCode::new("012345", millis_to_datetime(0));
        assert!(record.matches("012345"));
        assert!(record.matches(" 012345\n"));
        assert!(!record.matches("12345"));
        assert!(!record.matches("012346"));
    }

    #[test]
    fn test_expiry_boundary() {
        let record = VerificationCode::new("000000", millis_to_datetime(300_000));
        assert!(!record.is_expired(millis_to_datetime(300_000)));
        assert!(record.is_expired(millis_to_datetime(300_001)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            VerificationError::InvalidCode { remaining: 3 }.to_string(),
            "Invalid verification code. 3 attempts remaining."
        );
        assert!(VerificationError::NoCode.to_string().contains("request a new one"));
    }
}
