//! Background work subsystem.
//!
//! # Data Flow
//! ```text
//! Request handler
//!     → TaskPool::submit (non-blocking; full queue = drop + report)
//!     → bounded queue
//!     → one of N workers (panic boundary per job)
//!     → side effect (mail delivery, file cleanup)
//! ```
//!
//! Pool lifecycle: Uninitialized → Running → Draining → Terminated.

pub mod pool;

pub use pool::{global, Job, PoolState, ShutdownOutcome, SubmitError, TaskPool};
