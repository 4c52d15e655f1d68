//! Guard Middleware
//!
//! `require_csrf` and `enforce_rate_limit` wrap business routes. Both run
//! strictly before the wrapped handler; a rejection short-circuits with a
//! [`GuardError`] response and the handler never runs.

use crate::application::csrf::{CsrfTokenService, CsrfVerification};
use crate::application::rate_limiter::RateLimiter;
use crate::domain::session::{SessionResolver, SessionToken};
use crate::error::GuardError;
use crate::presentation::headers::RateLimitHeaders;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, Method};
use axum::middleware::Next;
use axum::response::Response;
use platform::client::extract_client_ip;
use platform::rate_limit::{CounterStore, RateLimitWindow};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Subject placeholder when the subject cannot be determined
const ANONYMOUS: &str = "anonymous";

/// `GET`, `HEAD` and `OPTIONS` skip CSRF verification
pub fn is_safe_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD || method == Method::OPTIONS
}

/// Middleware state for [`require_csrf`]
#[derive(Clone)]
pub struct CsrfState {
    pub tokens: Arc<CsrfTokenService>,
    pub sessions: Arc<dyn SessionResolver>,
    pub header_name: HeaderName,
}

/// Middleware that requires a valid CSRF token on unsafe methods
///
/// On success the verified [`SessionToken`] is added to the request
/// extensions; nothing else in the request is touched.
pub async fn require_csrf(
    State(state): State<CsrfState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    if is_safe_method(req.method()) {
        return Ok(next.run(req).await);
    }

    let Some(session) = state.sessions.resolve(req.headers()) else {
        tracing::debug!(method = %req.method(), path = %req.uri().path(), "No session on unsafe request");
        return Err(GuardError::SessionRequired);
    };

    let verification = match req.headers().get(&state.header_name) {
        None => None,
        Some(value) => match value.to_str().map(str::trim) {
            Ok("") => None,
            Ok(candidate) => Some(state.tokens.inspect(candidate, &session)),
            Err(_) => Some(CsrfVerification::Malformed),
        },
    };

    match verification {
        None => {
            tracing::info!(path = %req.uri().path(), session = %session.fingerprint(), "CSRF token missing");
            Err(GuardError::CsrfTokenMissing)
        }
        Some(CsrfVerification::Valid) => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        Some(rejected) => {
            tracing::warn!(
                path = %req.uri().path(),
                session = %session.fingerprint(),
                reason = rejected.as_str(),
                "CSRF token invalid"
            );
            Err(GuardError::CsrfTokenInvalid)
        }
    }
}

type KeyFn = dyn Fn(&Request) -> Option<String> + Send + Sync;

/// Whose quota a request spends
#[derive(Clone)]
pub enum RateLimitSubject {
    /// Client IP: the socket address, or the `X-Forwarded-For` entry written
    /// by the outermost trusted proxy when proxy hops are configured
    ClientIp,
    /// Session fingerprint; the raw session token never reaches the store
    Session,
    /// Caller-derived subject, e.g. a user id
    Custom(Arc<KeyFn>),
}

impl fmt::Debug for RateLimitSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitSubject::ClientIp => f.write_str("ClientIp"),
            RateLimitSubject::Session => f.write_str("Session"),
            RateLimitSubject::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Rate limit policy for a route group: `<scope>:<subject>` under `window`
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub scope: String,
    pub window: RateLimitWindow,
    pub subject: RateLimitSubject,
}

impl RateLimitPolicy {
    pub fn new(
        scope: impl Into<String>,
        limit: u32,
        window_secs: u64,
        subject: RateLimitSubject,
    ) -> Self {
        Self {
            scope: scope.into(),
            window: RateLimitWindow::new(limit, window_secs),
            subject,
        }
    }

    pub fn per_ip(scope: impl Into<String>, limit: u32, window_secs: u64) -> Self {
        Self::new(scope, limit, window_secs, RateLimitSubject::ClientIp)
    }

    pub fn per_session(scope: impl Into<String>, limit: u32, window_secs: u64) -> Self {
        Self::new(scope, limit, window_secs, RateLimitSubject::Session)
    }

    pub fn custom<F>(scope: impl Into<String>, limit: u32, window_secs: u64, key: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(scope, limit, window_secs, RateLimitSubject::Custom(Arc::new(key)))
    }

    /// Counter key for `req`
    pub fn key_for(
        &self,
        req: &Request,
        sessions: &dyn SessionResolver,
        trusted_proxy_hops: usize,
    ) -> String {
        let subject = match &self.subject {
            RateLimitSubject::ClientIp => {
                let direct = req
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.ip());
                extract_client_ip(req.headers(), direct, trusted_proxy_hops)
                    .map(|ip| ip.to_string())
            }
            RateLimitSubject::Session => sessions
                .resolve(req.headers())
                .map(|session| session.fingerprint()),
            RateLimitSubject::Custom(key) => key(req),
        };

        format!(
            "{}:{}",
            self.scope,
            subject.as_deref().unwrap_or(ANONYMOUS)
        )
    }
}

/// Middleware state for [`enforce_rate_limit`]
pub struct RateLimitState<S> {
    pub limiter: Arc<RateLimiter<S>>,
    pub policy: Arc<RateLimitPolicy>,
    pub sessions: Arc<dyn SessionResolver>,
    pub trusted_proxy_hops: usize,
}

impl<S> Clone for RateLimitState<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            policy: self.policy.clone(),
            sessions: self.sessions.clone(),
            trusted_proxy_hops: self.trusted_proxy_hops,
        }
    }
}

/// Middleware that spends one unit of quota and decorates the response
pub async fn enforce_rate_limit<S>(
    State(state): State<RateLimitState<S>>,
    req: Request,
    next: Next,
) -> Result<Response, GuardError>
where
    S: CounterStore + Send + Sync + 'static,
{
    let key = state
        .policy
        .key_for(&req, state.sessions.as_ref(), state.trusted_proxy_hops);
    let result = state.limiter.enforce(&key, state.policy.window).await?;

    let mut response = next.run(req).await;
    RateLimitHeaders::from(&result).apply(response.headers_mut());
    Ok(response)
}

/// Session verified by [`require_csrf`], for handlers behind it
pub fn verified_session(req: &Request) -> Option<&SessionToken> {
    req.extensions().get::<SessionToken>()
}
