//! Revocable, versioned session credentials.
//!
//! # Data Flow
//! ```text
//! login ──▶ SessionAuthority::issue(id, role, epoch) ──▶ access + refresh
//! request ──▶ verify_access (signature, expiry, type)
//!         ──▶ gateway compares claims.epoch with the stored epoch
//! logout / password change / role change ──▶ revoke ──▶ epoch += 1
//! ```
//!
//! # Design Decisions
//! - No per-token blacklist: one epoch increment invalidates every
//!   credential issued before it
//! - Claims are a tagged enum, so an access credential can never decode as
//!   a refresh credential
//! - Refresh credentials carry the epoch and are checked against it unless
//!   `session.bind_refresh_to_epoch` is off

pub mod authority;
pub mod claims;
pub mod codec;
pub mod error;

pub use authority::{CredentialPair, SessionAuthority};
pub use claims::{AccessClaims, Claims, RefreshClaims};
pub use error::SessionError;
