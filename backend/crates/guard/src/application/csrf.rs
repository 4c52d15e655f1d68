//! CSRF Token Service
//!
//! Stateless, session-bound anti-forgery tokens.
//!
//! A token is `v<key_version>.<base64url(HMAC-SHA256(secret, context))>` where
//! the MAC input is `CONTEXT || 0 || key_version || 0 || session_token`.
//! Nothing is stored: verification re-derives the expected token from the
//! current session and secret. A token stays valid for as long as both the
//! session and the signing key do; rotating `csrf_secret` (and bumping
//! `csrf_key_version`) invalidates every outstanding token at once.

use crate::application::config::GuardConfig;
use crate::domain::session::SessionToken;
use platform::crypto::{constant_time_eq, from_base64url, hmac_sha256, to_base64url};
use std::fmt;

const TOKEN_CONTEXT: &[u8] = b"guard/csrf-token";
const MAC_LEN: usize = 32;

/// Why a candidate token was rejected (or not)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfVerification {
    Valid,
    /// Not of the form `v<n>.<base64url>` or wrong MAC length
    Malformed,
    /// Well-formed but minted under another key version
    StaleKeyVersion,
    /// Well-formed, current version, but bound to another session or secret
    Mismatch,
}

impl CsrfVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, CsrfVerification::Valid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CsrfVerification::Valid => "valid",
            CsrfVerification::Malformed => "malformed",
            CsrfVerification::StaleKeyVersion => "stale_key_version",
            CsrfVerification::Mismatch => "mismatch",
        }
    }
}

/// Mints and verifies CSRF tokens
#[derive(Clone)]
pub struct CsrfTokenService {
    secret: [u8; 32],
    key_version: u8,
}

impl fmt::Debug for CsrfTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfTokenService")
            .field("secret", &"<redacted>")
            .field("key_version", &self.key_version)
            .finish()
    }
}

impl CsrfTokenService {
    pub fn new(secret: [u8; 32], key_version: u8) -> Self {
        Self {
            secret,
            key_version,
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.csrf_secret, config.csrf_key_version)
    }

    pub fn key_version(&self) -> u8 {
        self.key_version
    }

    /// Derive the token for `session`. Pure: same session and key, same token.
    pub fn generate(&self, session: &SessionToken) -> String {
        let mac = self.mac(session);
        format!("{}.{}", self.version_prefix(), to_base64url(&mac))
    }

    /// `true` only if `candidate` is exactly the token for `session` under the current key
    pub fn verify(&self, candidate: &str, session: &SessionToken) -> bool {
        self.inspect(candidate, session).is_valid()
    }

    /// Verify and report the reason for a rejection
    pub fn inspect(&self, candidate: &str, session: &SessionToken) -> CsrfVerification {
        let Some((prefix, encoded)) = candidate.split_once('.') else {
            return CsrfVerification::Malformed;
        };

        // Exactly one spelling per version: no sign, no leading zeros.
        let Some(version) = prefix.strip_prefix('v') else {
            return CsrfVerification::Malformed;
        };
        let canonical = !version.is_empty()
            && version.bytes().all(|b| b.is_ascii_digit())
            && (version.len() == 1 || !version.starts_with('0'));
        if !canonical || version.parse::<u8>().is_err() {
            return CsrfVerification::Malformed;
        }

        let Ok(provided) = from_base64url(encoded) else {
            return CsrfVerification::Malformed;
        };

        if provided.len() != MAC_LEN {
            return CsrfVerification::Malformed;
        }

        if prefix != self.version_prefix() {
            return CsrfVerification::StaleKeyVersion;
        }

        let expected = self.mac(session);
        if constant_time_eq(&provided, &expected) {
            CsrfVerification::Valid
        } else {
            CsrfVerification::Mismatch
        }
    }

    fn version_prefix(&self) -> String {
        format!("v{}", self.key_version)
    }

    fn mac(&self, session: &SessionToken) -> [u8; MAC_LEN] {
        hmac_sha256(
            &self.secret,
            &[
                TOKEN_CONTEXT,
                &[0],
                &[self.key_version],
                &[0],
                session.as_bytes(),
            ],
        )
    }
}
