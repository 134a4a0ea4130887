//! Application Layer
//!
//! Relay use cases and the worker that hosts them.

pub mod relay_service;
pub mod worker;

pub use relay_service::{RelayError, RelayService};
pub use worker::{build_router, run_worker, Worker};
