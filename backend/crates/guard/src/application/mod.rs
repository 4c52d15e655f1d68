//! Application Layer
//!
//! Configuration and the two guard services: the rate limiter and the
//! CSRF token service.

pub mod config;
pub mod csrf;
pub mod rate_limiter;
