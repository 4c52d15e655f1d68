//! Infrastructure Layer
//!
//! Counter store implementations:
//! - `memory` - process-local table, also the degraded-mode fallback
//! - `redis` - Lua-scripted increment with first-hit expiry
//! - `postgres` - single-statement upsert

pub mod memory;
pub mod postgres;
pub mod redis;
