//! Guard Router
//!
//! [`Guard`] bundles the CSRF state and the limiter so route groups can be
//! protected in one call.

use crate::application::config::GuardConfig;
use crate::application::csrf::CsrfTokenService;
use crate::application::rate_limiter::RateLimiter;
use crate::domain::session::{CookieSessionResolver, SessionResolver};
use crate::presentation::handlers;
use crate::presentation::middleware::{
    CsrfState, RateLimitPolicy, RateLimitState, enforce_rate_limit, require_csrf,
};
use axum::{Router, middleware, routing::get};
use platform::rate_limit::CounterStore;
use std::sync::Arc;

/// Create the guard router (`GET /csrf-token`)
pub fn guard_router(csrf: CsrfState) -> Router {
    Router::new()
        .route("/csrf-token", get(handlers::issue_csrf_token))
        .with_state(csrf)
}

/// CSRF verification and rate limiting for a set of routes
pub struct Guard<S> {
    csrf: CsrfState,
    limiter: Arc<RateLimiter<S>>,
    trusted_proxy_hops: usize,
}

impl<S> Clone for Guard<S> {
    fn clone(&self) -> Self {
        Self {
            csrf: self.csrf.clone(),
            limiter: self.limiter.clone(),
            trusted_proxy_hops: self.trusted_proxy_hops,
        }
    }
}

impl<S> Guard<S>
where
    S: CounterStore + Send + Sync + 'static,
{
    /// Sessions are read from `config.session_cookie_name`
    pub fn new(config: &GuardConfig, limiter: RateLimiter<S>) -> Self {
        Self {
            csrf: CsrfState {
                tokens: Arc::new(CsrfTokenService::from_config(config)),
                sessions: Arc::new(CookieSessionResolver::new(&config.session_cookie_name)),
                header_name: config.csrf_header_name.clone(),
            },
            limiter: Arc::new(limiter),
            trusted_proxy_hops: config.trusted_proxy_hops,
        }
    }

    /// Replace the cookie-based session lookup
    pub fn with_session_resolver(mut self, sessions: impl SessionResolver) -> Self {
        self.csrf.sessions = Arc::new(sessions);
        self
    }

    pub fn csrf_state(&self) -> CsrfState {
        self.csrf.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter<S>> {
        self.limiter.clone()
    }

    pub fn rate_limit_state(&self, policy: RateLimitPolicy) -> RateLimitState<S> {
        RateLimitState {
            limiter: self.limiter.clone(),
            policy: Arc::new(policy),
            sessions: self.csrf.sessions.clone(),
            trusted_proxy_hops: self.trusted_proxy_hops,
        }
    }

    /// `GET /csrf-token`
    pub fn router(&self) -> Router {
        guard_router(self.csrf_state())
    }

    /// CSRF check first, then `policy`, then the routes of `router`
    pub fn protect<T>(&self, router: Router<T>, policy: RateLimitPolicy) -> Router<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        // The last route_layer added runs first.
        router
            .route_layer(middleware::from_fn_with_state(
                self.rate_limit_state(policy),
                enforce_rate_limit::<S>,
            ))
            .route_layer(middleware::from_fn_with_state(self.csrf_state(), require_csrf))
    }

    /// CSRF check only
    pub fn csrf_only<T>(&self, router: Router<T>) -> Router<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(self.csrf_state(), require_csrf))
    }

    /// Rate limiting only, e.g. for sign-in where no session exists yet
    pub fn rate_limit_only<T>(&self, router: Router<T>, policy: RateLimitPolicy) -> Router<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(
            self.rate_limit_state(policy),
            enforce_rate_limit::<S>,
        ))
    }
}
