//! Two-phase admin verification: a one-time code proves control of an
//! email, and a successful exchange grants a short-lived admin session.
//!
//! This path is deliberately independent of the application's own user
//! sessions. All state lives in this process; running several instances
//! requires moving the maps to a shared store with atomic updates, the same
//! way the rate limiter's counters are shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::code::{generate_code, normalize_email, IssuedCode, VerificationCode, VerificationError};
use super::cookie::{SessionCookie, DEFAULT_COOKIE_NAME};
use super::token::{IssuedToken, SessionToken, TokenTable};
use crate::clock::{add_duration, Clock, SystemClock};
use crate::error::{BulwarkError, Result};

/// Lifetimes and limits for the admin verification flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminVerificationConfig {
    /// How long an issued code is accepted
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,

    /// How long a granted session lasts
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Wrong guesses allowed before a code is discarded
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Mark the session cookie `Secure`
    #[serde(default = "default_secure_cookie")]
    pub secure_cookie: bool,

    /// Name of the session cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for AdminVerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_code_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            max_attempts: default_max_attempts(),
            secure_cookie: default_secure_cookie(),
            cookie_name: default_cookie_name(),
        }
    }
}

fn default_code_ttl_secs() -> u64 {
    300
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_max_attempts() -> u32 {
    5
}

fn default_secure_cookie() -> bool {
    true
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

impl AdminVerificationConfig {
    /// Code validity window.
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    /// Session validity window.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Reject settings that would make codes or sessions unusable.
    pub fn validate(&self) -> Result<()> {
        if self.code_ttl_secs == 0 || self.session_ttl_secs == 0 {
            return Err(BulwarkError::Config(
                "admin code and session lifetimes must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(BulwarkError::Config("admin max_attempts must be at least 1".into()));
        }
        if self.cookie_name.is_empty()
            || !self.cookie_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BulwarkError::Config(format!(
                "invalid admin cookie name '{}'",
                self.cookie_name
            )));
        }
        Ok(())
    }
}

/// A verified admin session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    /// Normalized email
    pub email: String,
    /// When the code exchange succeeded
    pub verified_at: DateTime<Utc>,
    /// When the session lapses
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AdminState {
    codes: HashMap<String, VerificationCode>,
    sessions: HashMap<String, AdminSession>,
    tokens: TokenTable,
}

/// Issues and checks admin verification codes and sessions.
pub struct AdminVerificationStore {
    config: AdminVerificationConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<AdminState>,
}

impl AdminVerificationStore {
    /// Create a store reading the system clock.
    pub fn new(config: AdminVerificationConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with an explicit clock.
    pub fn with_clock(config: AdminVerificationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(AdminState::default()),
        }
    }

    /// The store's configuration.
    pub fn config(&self) -> &AdminVerificationConfig {
        &self.config
    }

    /// Issue a fresh code for `email`, replacing any code still pending.
    ///
    /// The caller delivers the returned code out of band.
    pub fn store_verification_code(&self, email: &str) -> IssuedCode {
        let email = normalize_email(email);
        let code = generate_code();
        let expires_at = add_duration(self.clock.now(), self.config.code_ttl());

        let replaced = self
            .state
            .lock()
            .codes
            .insert(email.clone(), VerificationCode::new(&code, expires_at))
            .is_some();

        debug!(email = %email, replaced, "Issued admin verification code");
        IssuedCode { code, expires_at }
    }

    /// Exchange a code for an admin session.
    ///
    /// A matching code is consumed; a wrong one burns an attempt. Once the
    /// attempt budget is spent the code is discarded on the next try.
    pub fn verify_code_and_grant_session(
        &self,
        email: &str,
        code: &str,
    ) -> std::result::Result<AdminSession, VerificationError> {
        let email = normalize_email(email);
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::consume_code(&mut state, &email, code, now, self.config.max_attempts)?;
        Ok(self.grant_session(&mut state, email, now))
    }

    /// Exchange a code for an admin session and mint an opaque token for it.
    pub fn verify_code_and_issue_token(
        &self,
        email: &str,
        code: &str,
    ) -> std::result::Result<IssuedToken, VerificationError> {
        let email = normalize_email(email);
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::consume_code(&mut state, &email, code, now, self.config.max_attempts)?;
        let session = self.grant_session(&mut state, email, now);
        Ok(state.tokens.mint(&session.email, session.expires_at))
    }

    /// Whether `email` holds a live admin session.
    ///
    /// Expired sessions for every email are swept as a side effect.
    pub fn has_valid_admin_session(&self, email: &str) -> bool {
        let email = normalize_email(email);
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.sessions.retain(|_, session| now < session.expires_at);
        state.sessions.contains_key(&email)
    }

    /// End the admin session for `email`, including any tokens minted for it.
    pub fn invalidate_admin_session(&self, email: &str) {
        let email = normalize_email(email);
        let mut state = self.state.lock();
        let had_session = state.sessions.remove(&email).is_some();
        let tokens = state.tokens.revoke_email(&email);
        debug!(email = %email, had_session, tokens, "Invalidated admin session");
    }

    /// Map a cookie token back to its session, if still live.
    pub fn resolve_session_token(&self, token: &str) -> Option<SessionToken> {
        let now = self.clock.now();
        self.state.lock().tokens.resolve(token, now)
    }

    /// Revoke one token. Returns whether it existed.
    pub fn revoke_session_token(&self, token: &str) -> bool {
        self.state.lock().tokens.revoke(token)
    }

    /// The `Set-Cookie` value carrying a minted token.
    pub fn session_cookie(&self, issued: &IssuedToken) -> SessionCookie {
        SessionCookie::new(
            &self.config.cookie_name,
            &issued.token,
            self.config.session_ttl(),
            self.config.secure_cookie,
        )
    }

    /// The `Set-Cookie` value that logs the browser out.
    pub fn clear_session_cookie(&self) -> SessionCookie {
        SessionCookie::clear(&self.config.cookie_name, self.config.secure_cookie)
    }

    /// Drop every expired code, session and token. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let before = state.codes.len() + state.sessions.len();
        state.codes.retain(|_, code| !code.is_expired(now));
        state.sessions.retain(|_, session| now < session.expires_at);
        let removed = before - (state.codes.len() + state.sessions.len())
            + state.tokens.purge_expired(now);

        if removed > 0 {
            info!(removed, "Purged expired admin verification state");
        }
        removed
    }

    fn consume_code(
        state: &mut AdminState,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> std::result::Result<(), VerificationError> {
        let outcome = match state.codes.get_mut(email) {
            None => {
                debug!(email = %email, "No admin verification code pending");
                return Err(VerificationError::NoCode);
            }
            Some(record) if record.is_expired(now) => Err(VerificationError::Expired),
            Some(record) if record.attempts >= max_attempts => {
                Err(VerificationError::TooManyAttempts)
            }
            Some(record) if !record.matches(code) => {
                record.attempts += 1;
                let remaining = max_attempts.saturating_sub(record.attempts);
                debug!(email = %email, remaining, "Wrong admin verification code");
                return Err(VerificationError::InvalidCode { remaining });
            }
            Some(_) => Ok(()),
        };

        // Expired, exhausted and consumed codes are all single use from here.
        state.codes.remove(email);
        if let Err(ref e) = outcome {
            debug!(email = %email, reason = %e, "Discarded admin verification code");
        }
        outcome
    }

    fn grant_session(&self, state: &mut AdminState, email: String, now: DateTime<Utc>) -> AdminSession {
        let session = AdminSession {
            email: email.clone(),
            verified_at: now,
            expires_at: add_duration(now, self.config.session_ttl()),
        };
        state.sessions.insert(email, session.clone());
        info!(email = %session.email, expires_at = %session.expires_at, "Granted admin session");
        session
    }
}

impl std::fmt::Debug for AdminVerificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminVerificationStore")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
