//! Admin verification: one-time codes, admin sessions and session tokens.

mod code;
mod cookie;
mod store;
mod token;

pub use code::{generate_code, normalize_email, IssuedCode, VerificationError, CODE_DIGITS};
pub use cookie::{token_from_cookie_header, SessionCookie, DEFAULT_COOKIE_NAME};
pub use store::{AdminSession, AdminVerificationConfig, AdminVerificationStore};
pub use token::{IssuedToken, SessionToken, TOKEN_BYTES};
