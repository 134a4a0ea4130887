//! Domain Layer
//!
//! Samples, destination identities, and the routing port.

pub mod entities;
pub mod ports;
pub mod value_objects;
