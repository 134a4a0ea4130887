//! Adapters Layer
//!
//! Inbound adapters accept producer connections; outbound adapters
//! implement the routing port.

pub mod inbound;
pub mod outbound;
