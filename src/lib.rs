//! Account API library.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http (request ID, trace, timeout)
//!                       │
//!                       ▼
//!                     security::rate_limit ── 429 ──▶ client
//!                       │
//!                       ▼
//!                     security::auth ──────── 401/403 ──▶ client
//!                       │      ▲
//!                       │      └── session (verify) + accounts::store (epoch)
//!                       ▼
//!                     accounts::service ───▶ tasks (bounded pool) ───▶ mail
//!                       │
//!                       ▼
//!     Client Response ◀─┘
//! ```
//!
//! Cross-cutting: `config`, `observability`, `lifecycle`, `clock`.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mail;
pub mod observability;
pub mod security;
pub mod session;
pub mod tasks;

pub use config::AppConfig;
pub use lifecycle::{App, Shutdown};
