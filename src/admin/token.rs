//! Opaque session tokens.
//!
//! A token is 32 random bytes, hex-encoded, handed to the browser as a
//! cookie. It encodes nothing; the server maps it back to an email. The map
//! is keyed by the token's SHA-256 digest, so the plaintext is never stored
//! and lookups do not compare secrets byte by byte.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of randomness in a token.
pub const TOKEN_BYTES: usize = 32;

/// What a token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Normalized email the session belongs to
    pub email: String,
    /// When the token stops resolving
    pub expires_at: DateTime<Utc>,
}

/// A newly minted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Plaintext token for the cookie
    pub token: String,
    /// Normalized email the session belongs to
    pub email: String,
    /// When the token stops resolving
    pub expires_at: DateTime<Utc>,
}

/// Server-side token table.
#[derive(Debug, Default)]
pub(crate) struct TokenTable {
    entries: HashMap<[u8; 32], SessionToken>,
}

impl TokenTable {
    pub(crate) fn mint(&mut self, email: &str, expires_at: DateTime<Utc>) -> IssuedToken {
        let token = generate_token();
        self.entries.insert(
            digest(&token),
            SessionToken {
                email: email.to_string(),
                expires_at,
            },
        );

        IssuedToken {
            token,
            email: email.to_string(),
            expires_at,
        }
    }

    /// Resolve a token, dropping it if it has expired.
    pub(crate) fn resolve(&mut self, token: &str, now: DateTime<Utc>) -> Option<SessionToken> {
        let key = digest(token);
        match self.entries.get(&key) {
            Some(session) if now < session.expires_at => Some(session.clone()),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn revoke(&mut self, token: &str) -> bool {
        self.entries.remove(&digest(token)).is_some()
    }

    /// Drop every token belonging to `email`. Returns how many were removed.
    pub(crate) fn revoke_email(&mut self, email: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, session| session.email != email);
        before - self.entries.len()
    }

    pub(crate) fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, session| now < session.expires_at);
        before - self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
