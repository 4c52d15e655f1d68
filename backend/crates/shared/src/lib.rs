//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the "smallest core" of the error vocabulary:
//! - Error classification mapped to HTTP status codes
//! - The unified application error and result alias
//! - The uniform JSON error envelope (behind the `axum` feature)
//!
//! **Design Principle**: Only include things that are "hard to change"
//! and have consistent meaning across all feature crates.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
