//! Router Port
//!
//! Defines the interface for metric placement.
//! Implementations may use consistent hashing or pattern rules.

use crate::domain::value_objects::DestinationKey;

/// Resolver from metric name to the destinations that must store it.
///
/// This is an outbound port: the relay asks it where a metric goes without
/// knowing how placement is decided. Implementations are immutable after
/// construction, so the same metric always resolves to the same keys.
pub trait Router: Send + Sync {
    /// Ordered destination keys for a metric.
    ///
    /// For replicated placement the list holds `replication_factor()`
    /// distinct keys.
    fn resolve(&self, metric: &str) -> Vec<DestinationKey>;

    /// Number of distinct destinations each metric is sent to.
    fn replication_factor(&self) -> usize;

    /// Total number of destinations the router knows about.
    fn destination_count(&self) -> usize;

    /// Whether every destination receives every metric.
    fn is_broadcast(&self) -> bool {
        self.destination_count() == self.replication_factor()
    }
}
