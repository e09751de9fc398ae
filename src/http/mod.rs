//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, trace span, timeout, body limit)
//!     → security (rate limit on /auth, bearer auth, role gate)
//!     → handlers.rs (parse JSON, call AccountService)
//!     → response.rs / error.rs (JSON envelope)
//! ```

pub mod error;
pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use error::{ApiError, ErrorBody};
pub use response::ApiResponse;
pub use server::{build_router, ApiServer, AppState};
