//! Infrastructure Layer
//!
//! Wire codec, backend connections, and process lifecycle.

pub mod codec;
pub mod destination;
pub mod outbound_queue;
pub mod shutdown;
pub mod supervisor;

pub use codec::CodecError;
pub use destination::{Destination, DestinationConfig, DestinationStats};
pub use outbound_queue::OutboundQueue;
pub use shutdown::{shutdown_signal, ConnectionGuard, ShutdownController};
pub use supervisor::{worker_count, worker_id_from_env, Supervisor, WORKER_ID_ENV};
