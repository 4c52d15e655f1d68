//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Cryptographic utilities (SHA-256, HMAC, constant-time comparison, Base64)
//! - Cookie extraction
//! - Client identification
//! - Fixed-window rate limiting vocabulary and the counter store seam

pub mod client;
pub mod cookie;
pub mod crypto;
pub mod rate_limit;
