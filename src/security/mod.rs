//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-IP token bucket, 429 on trip)
//!     → auth.rs (bearer credential, epoch check against the store)
//!     → auth.rs (role gate, admin routes only)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - The limiter runs first, so a rejected request costs no store lookup
//! - Every authentication failure gets the same 401 body; the cause is only
//!   logged and counted

pub mod auth;
pub mod rate_limit;

pub use auth::{require_auth, require_role, AuthContext, AuthGateway, AuthRejection};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
