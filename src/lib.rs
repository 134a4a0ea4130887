//! metric-relay Library
//!
//! Exposes the relay components for use in integration tests and as a
//! library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{ConsistentHashRouter, RulesRouter};
pub use application::{RelayError, RelayService, Worker};
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{Batches, Datum, Sample};
pub use domain::ports::Router;
pub use domain::value_objects::{ConnectionState, DestinationKey};
pub use infrastructure::{Destination, DestinationConfig};
