//! Domain Layer
//!
//! This layer contains:
//! - The session identity the guard binds CSRF tokens to
//! - The `SessionResolver` seam to the external session subsystem

pub mod session;
