//! The cookie that carries an admin session token.

use std::fmt;
use std::time::Duration;

/// Default cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "admin_session";

/// A `Set-Cookie` value for the admin session.
///
/// Always `HttpOnly`, `SameSite=Strict` and `Path=/`; `Secure` when serving
/// production traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    name: String,
    value: String,
    max_age: Duration,
    secure: bool,
}

impl SessionCookie {
    /// A cookie carrying `token` for `max_age`.
    pub fn new(name: &str, token: &str, max_age: Duration, secure: bool) -> Self {
        Self {
            name: name.to_string(),
            value: token.to_string(),
            max_age,
            secure,
        }
    }

    /// A cookie that makes the browser discard the session.
    pub fn clear(name: &str, secure: bool) -> Self {
        Self::new(name, "", Duration::ZERO, secure)
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value (the opaque token).
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Render the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict",
            self.name,
            self.value,
            self.max_age.as_secs()
        )?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}

/// Find the value of cookie `name` in a `Cookie` request header.
pub fn token_from_cookie_header<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_cookie_attributes() {
        let cookie = SessionCookie::new("admin_session", "abc123", Duration::from_secs(1800), true);
        assert_eq!(
            cookie.header_value(),
            "admin_session=abc123; Max-Age=1800; Path=/; HttpOnly; SameSite=Strict; Secure"
        );
    }

    #[test]
    fn test_insecure_cookie_for_local_development() {
        let cookie = SessionCookie::new("admin_session", "abc123", Duration::from_secs(60), false);
        assert!(!cookie.header_value().contains("Secure"));
        assert!(cookie.header_value().contains("HttpOnly"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = SessionCookie::clear(DEFAULT_COOKIE_NAME, true);
        assert!(cookie.header_value().starts_with("admin_session=; Max-Age=0;"));
    }

    #[test]
    fn test_token_from_cookie_header() {
        let header = "theme=dark; admin_session=f00d; other=1";
        assert_eq!(token_from_cookie_header(header, "admin_session"), Some("f00d"));
        assert_eq!(token_from_cookie_header(header, "missing"), None);
        assert_eq!(token_from_cookie_header("admin_session=", "admin_session"), None);
    }
}
