//! Scenario tests for the guard crate
//! Drives routers end to end with `tower::ServiceExt::oneshot`.

#[cfg(test)]
mod support {
    use crate::application::config::{GuardConfig, StoreFailurePolicy};
    use crate::application::rate_limiter::{RateLimiter, RateLimiterSettings};
    use crate::presentation::middleware::RateLimitPolicy;
    use crate::presentation::router::Guard;
    use crate::{CsrfTokenService, MemoryCounterStore, SessionToken};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use axum::routing::get;
    use platform::rate_limit::{CounterStore, CounterStoreError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    pub const SESSION: &str = "s-1";

    pub fn config() -> GuardConfig {
        GuardConfig {
            csrf_secret: [7u8; 32],
            ..GuardConfig::default()
        }
    }

    pub fn settings(policy: StoreFailurePolicy) -> RateLimiterSettings {
        RateLimiterSettings {
            store_timeout: Duration::from_millis(20),
            store_retry_after: Duration::from_secs(60),
            failure_policy: policy,
            key_prefix: "rl:".to_string(),
        }
    }

    pub fn token_for(session: &str) -> String {
        CsrfTokenService::from_config(&config()).generate(&SessionToken::new(session).unwrap())
    }

    /// Always errors
    #[derive(Default)]
    pub struct FailingStore {
        pub calls: AtomicUsize,
    }

    impl CounterStore for FailingStore {
        async fn increment(&self, _: &str, _: u64, _: u64) -> Result<u64, CounterStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CounterStoreError::backend(
                "failing",
                std::io::Error::other("connection refused"),
            ))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    /// Never answers within any reasonable timeout
    pub struct SlowStore;

    impl CounterStore for SlowStore {
        async fn increment(&self, _: &str, _: u64, _: u64) -> Result<u64, CounterStoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    /// Memory-backed store that can be switched off
    #[derive(Default)]
    pub struct FlakyStore {
        pub down: AtomicBool,
        pub calls: AtomicUsize,
        pub inner: MemoryCounterStore,
    }

    impl CounterStore for FlakyStore {
        async fn increment(
            &self,
            key: &str,
            bucket: u64,
            window_secs: u64,
        ) -> Result<u64, CounterStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(CounterStoreError::backend(
                    "flaky",
                    std::io::Error::other("down"),
                ));
            }
            Ok(self.inner.increment_sync(key, bucket, window_secs))
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    /// `/workspaces` (GET + POST) protected by CSRF and 5/3600 per session,
    /// plus `/csrf-token`. Returns the router and the handler hit counter.
    pub fn app<S>(limiter: RateLimiter<S>) -> (Router, Arc<AtomicUsize>)
    where
        S: CounterStore + Send + Sync + 'static,
    {
        let guard = Guard::new(&config(), limiter);
        let hits = Arc::new(AtomicUsize::new(0));

        let handler = {
            let hits = hits.clone();
            move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::CREATED
                }
            }
        };

        let protected = guard.protect(
            Router::new().route("/workspaces", get(handler.clone()).post(handler)),
            RateLimitPolicy::per_session("create-workspace", 5, 3600),
        );

        (protected.merge(guard.router()), hits)
    }

    pub fn memory_app() -> (Router, Arc<AtomicUsize>) {
        app(RateLimiter::<MemoryCounterStore>::in_process(settings(
            StoreFailurePolicy::Fallback,
        )))
    }

    pub fn post(session: Option<&str>, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/workspaces");
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("session={session}"));
        }
        if let Some(token) = token {
            builder = builder.header("x-csrf-token", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    pub fn get_req(uri: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("session={session}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    pub fn header_str<'a>(res: &'a Response, name: &str) -> &'a str {
        res.headers().get(name).unwrap().to_str().unwrap()
    }

    pub async fn json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod rate_limit_scenario_tests {
    use super::support::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_five_per_hour_then_429() {
        let (app, hits) = memory_app();
        let token = token_for(SESSION);

        for expected_remaining in ["4", "3", "2", "1", "0"] {
            let res = app
                .clone()
                .oneshot(post(Some(SESSION), Some(&token)))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::CREATED);
            assert_eq!(header_str(&res, "x-ratelimit-limit"), "5");
            assert_eq!(header_str(&res, "x-ratelimit-remaining"), expected_remaining);
            assert!(header_str(&res, "x-ratelimit-reset").parse::<i64>().unwrap() > 0);
            assert!(res.headers().get("retry-after").is_none());
        }

        let res = app
            .clone()
            .oneshot(post(Some(SESSION), Some(&token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header_str(&res, "x-ratelimit-limit"), "5");
        assert_eq!(header_str(&res, "x-ratelimit-remaining"), "0");

        let retry_after: u64 = header_str(&res, "retry-after").parse().unwrap();
        assert!((1..=3600).contains(&retry_after));

        let body = json(res).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("RATE_LIMITED"));
        assert_eq!(body["retryAfter"], json!(retry_after));
        assert!(body["message"].is_string());

        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_sessions_have_separate_quotas() {
        let (app, _) = memory_app();

        for _ in 0..5 {
            let res = app
                .clone()
                .oneshot(post(Some("s-a"), Some(&token_for("s-a"))))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::CREATED);
        }

        let res = app
            .clone()
            .oneshot(post(Some("s-b"), Some(&token_for("s-b"))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(header_str(&res, "x-ratelimit-remaining"), "4");
    }
}

#[cfg(test)]
mod client_ip_scenario_tests {
    use super::support::*;
    use crate::application::config::{GuardConfig, StoreFailurePolicy};
    use crate::application::rate_limiter::RateLimiter;
    use crate::presentation::middleware::RateLimitPolicy;
    use crate::presentation::router::Guard;
    use crate::MemoryCounterStore;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::routing::post as post_route;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn sign_in_app(trusted_proxy_hops: usize) -> Router {
        let config = GuardConfig {
            trusted_proxy_hops,
            ..config()
        };
        let limiter = RateLimiter::<MemoryCounterStore>::in_process(settings(
            StoreFailurePolicy::Fallback,
        ));
        Guard::new(&config, limiter).rate_limit_only(
            Router::new().route("/sign-in", post_route(|| async { StatusCode::OK })),
            RateLimitPolicy::per_ip("auth:sign-in", 3, 3600),
        )
    }

    fn sign_in(peer: [u8; 4], forwarded_for: &str) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/sign-in")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 52000))));
        req
    }

    async fn accepted(app: &Router, requests: impl IntoIterator<Item = Request<Body>>) -> usize {
        let mut accepted = 0;
        for req in requests {
            let res = app.clone().oneshot(req).await.unwrap();
            if res.status() == StatusCode::OK {
                accepted += 1;
            } else {
                assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
            }
        }
        accepted
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_does_not_reset_quota() {
        let app = sign_in_app(0);
        let requests = (0..20).map(|i| sign_in([198, 51, 100, 7], &format!("203.0.113.{i}")));

        assert_eq!(accepted(&app, requests).await, 3);
    }

    #[tokio::test]
    async fn test_trusted_proxy_entry_is_the_subject() {
        let app = sign_in_app(1);

        // Client-written prefixes vary; the proxy-appended hop stays the same.
        let same_client =
            (0..20).map(|i| sign_in([10, 0, 0, 2], &format!("1.1.1.{i}, 203.0.113.7")));
        assert_eq!(accepted(&app, same_client).await, 3);

        let other_client = (0..2).map(|_| sign_in([10, 0, 0, 2], "203.0.113.8"));
        assert_eq!(accepted(&app, other_client).await, 2);
    }
}

#[cfg(test)]
mod csrf_scenario_tests {
    use super::support::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_bypasses_csrf() {
        let (app, hits) = memory_app();
        let res = app
            .clone()
            .oneshot(get_req("/workspaces", Some(SESSION)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_without_token() {
        let (app, hits) = memory_app();
        let res = app.clone().oneshot(post(Some(SESSION), None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            json(res).await,
            json!({ "success": false, "error": { "code": "CSRF_TOKEN_MISSING" } })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_post_with_empty_token_counts_as_missing() {
        let (app, _) = memory_app();
        let res = app
            .clone()
            .oneshot(post(Some(SESSION), Some("  ")))
            .await
            .unwrap();
        assert_eq!(json(res).await["error"]["code"], json!("CSRF_TOKEN_MISSING"));
    }

    #[tokio::test]
    async fn test_post_with_invalid_token() {
        let (app, hits) = memory_app();
        for token in ["garbage".to_string(), token_for("someone-else")] {
            let res = app
                .clone()
                .oneshot(post(Some(SESSION), Some(&token)))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
            assert_eq!(
                json(res).await,
                json!({ "success": false, "error": { "code": "CSRF_TOKEN_INVALID" } })
            );
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_post_without_session() {
        let (app, hits) = memory_app();
        let res = app
            .clone()
            .oneshot(post(None, Some(&token_for(SESSION))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(res).await["error"]["code"], json!("SESSION_REQUIRED"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_csrf_does_not_spend_quota() {
        let (app, _) = memory_app();
        for _ in 0..10 {
            let res = app.clone().oneshot(post(Some(SESSION), None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
        }

        let res = app
            .clone()
            .oneshot(post(Some(SESSION), Some(&token_for(SESSION))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(header_str(&res, "x-ratelimit-remaining"), "4");
    }

    #[tokio::test]
    async fn test_token_endpoint() {
        let (app, _) = memory_app();

        let res = app
            .clone()
            .oneshot(get_req("/csrf-token", Some(SESSION)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header_str(&res, "cache-control"), "no-store");

        let body = json(res).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["headerName"], json!("x-csrf-token"));
        let token = body["csrfToken"].as_str().unwrap().to_string();
        assert_eq!(token, token_for(SESSION));

        // The minted token is accepted
        let res = app
            .clone()
            .oneshot(post(Some(SESSION), Some(&token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = app
            .clone()
            .oneshot(get_req("/csrf-token", None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[cfg(test)]
mod store_failure_tests {
    use super::support::*;
    use crate::application::config::StoreFailurePolicy;
    use crate::application::rate_limiter::RateLimiter;
    use crate::error::GuardError;
    use crate::RedisCounterStore;
    use axum::http::StatusCode;
    use platform::rate_limit::{CounterStoreError, RateLimitWindow};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_fallback_counts_locally_and_suspends_store() {
        let store = Arc::new(FailingStore::default());
        let limiter = RateLimiter::from_shared(store.clone(), settings(StoreFailurePolicy::Fallback));
        let window = RateLimitWindow::new(1, 3600);

        let first = limiter.check_rate_limit("k", window).await.unwrap();
        let second = limiter.check_rate_limit("k", window).await.unwrap();
        assert!(!first.is_rate_limited);
        assert!(second.is_rate_limited);

        // Suspended after the first failure
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_open_allows_without_counting() {
        let store = Arc::new(FailingStore::default());
        let limiter = RateLimiter::from_shared(store.clone(), settings(StoreFailurePolicy::FailOpen));
        let window = RateLimitWindow::new(1, 3600);

        for _ in 0..3 {
            let result = limiter.check_rate_limit("k", window).await.unwrap();
            assert!(!result.is_rate_limited);
            assert_eq!(result.remaining, 1);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_while_suspended() {
        let store = Arc::new(FailingStore::default());
        let limiter = RateLimiter::from_shared(store.clone(), settings(StoreFailurePolicy::FailClosed));
        let window = RateLimitWindow::new(5, 60);

        let first = limiter.check_rate_limit("k", window).await;
        assert!(matches!(
            first,
            Err(GuardError::StoreUnavailable(CounterStoreError::Backend { .. }))
        ));

        let second = limiter.check_rate_limit("k", window).await;
        assert!(matches!(
            second,
            Err(GuardError::StoreUnavailable(CounterStoreError::Suspended { .. }))
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_applies_policy() {
        let limiter = RateLimiter::new(SlowStore, settings(StoreFailurePolicy::FailClosed));
        let result = limiter.check_rate_limit("k", RateLimitWindow::new(5, 60)).await;
        assert!(matches!(
            result,
            Err(GuardError::StoreUnavailable(CounterStoreError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_store_is_probed_again_after_retry_delay() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);

        let mut settings = settings(StoreFailurePolicy::Fallback);
        settings.store_retry_after = Duration::ZERO;
        let limiter = RateLimiter::from_shared(store.clone(), settings);
        let window = RateLimitWindow::new(5, 3600);

        let degraded = limiter.check_rate_limit("k", window).await.unwrap();
        assert_eq!(degraded.remaining, 4);

        store.down.store(false, Ordering::SeqCst);
        let recovered = limiter.check_rate_limit("k", window).await.unwrap();
        assert_eq!(recovered.remaining, 4);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_redis_goes_through_failure_policy() {
        let window = RateLimitWindow::new(5, 3600);

        let closed = RateLimiter::new(
            RedisCounterStore::open("redis://127.0.0.1:1/").unwrap(),
            settings(StoreFailurePolicy::FailClosed),
        );
        assert!(closed.has_shared_store());
        assert!(matches!(
            closed.check_rate_limit("k", window).await,
            Err(GuardError::StoreUnavailable(_))
        ));

        let open = RateLimiter::new(
            RedisCounterStore::open("redis://127.0.0.1:1/").unwrap(),
            settings(StoreFailurePolicy::FailOpen),
        );
        for _ in 0..3 {
            let result = open.check_rate_limit("k", window).await.unwrap();
            assert!(!result.is_rate_limited);
            assert_eq!(result.remaining, 5);
        }
    }

    #[tokio::test]
    async fn test_fail_closed_http_response() {
        let (app, hits) = app(RateLimiter::new(
            FailingStore::default(),
            settings(StoreFailurePolicy::FailClosed),
        ));

        let res = app
            .clone()
            .oneshot(post(Some(SESSION), Some(&token_for(SESSION))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json(res).await,
            json!({ "success": false, "error": { "code": "SERVICE_UNAVAILABLE" } })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::support::settings;
    use crate::application::config::StoreFailurePolicy;
    use crate::application::rate_limiter::RateLimiter;
    use crate::infra::memory::MemoryCounterStore;
    use platform::rate_limit::RateLimitWindow;
    use std::sync::Arc;

    async fn accepted_of(limiter: Arc<RateLimiter<MemoryCounterStore>>, n: usize) -> usize {
        let window = RateLimitWindow::new(10, 3600);
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_rate_limit("fresh", window).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            if !result.is_rate_limited {
                accepted += 1;
            }
        }
        accepted
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_store_admits_exactly_limit() {
        let limiter = Arc::new(RateLimiter::new(
            MemoryCounterStore::new(),
            settings(StoreFailurePolicy::FailClosed),
        ));
        assert_eq!(accepted_of(limiter, 64).await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_process_admits_exactly_limit() {
        let limiter = Arc::new(RateLimiter::<MemoryCounterStore>::in_process(settings(
            StoreFailurePolicy::Fallback,
        )));
        assert_eq!(accepted_of(limiter, 64).await, 10);
    }
}
