//! Session identity
//!
//! The session subsystem owns the cookie and the session lifecycle.
//! The guard only needs the opaque token value.

use http::HeaderMap;
use std::fmt;

/// Opaque session identifier supplied by the session subsystem
///
/// Treated as a secret: `Debug` is redacted and [`SessionToken::fingerprint`]
/// is what goes into logs and counter keys.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Returns `None` for an empty value
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Non-reversible short identifier (URL-safe base64 of the first 12 bytes of SHA-256)
    pub fn fingerprint(&self) -> String {
        let digest = platform::crypto::sha256(self.as_bytes());
        platform::crypto::to_base64url(&digest[..12])
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.fingerprint())
    }
}

/// Resolves the caller's session from request headers
pub trait SessionResolver: Send + Sync + 'static {
    fn resolve(&self, headers: &HeaderMap) -> Option<SessionToken>;
}

/// Reads the session token from a named cookie
#[derive(Debug, Clone)]
pub struct CookieSessionResolver {
    cookie_name: String,
}

impl CookieSessionResolver {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

impl SessionResolver for CookieSessionResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<SessionToken> {
        platform::cookie::extract_cookie(headers, &self.cookie_name).and_then(SessionToken::new)
    }
}
