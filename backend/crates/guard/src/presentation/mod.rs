//! Presentation Layer
//!
//! HTTP middleware, handlers, headers and DTOs.

pub mod dto;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod router;
