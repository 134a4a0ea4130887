//! Relay Service
//!
//! Turns decoded samples into per-destination batches and hands the
//! serialized batches to the destinations' queues.

use crate::domain::entities::{Batches, Sample};
use crate::domain::ports::Router;
use crate::domain::value_objects::DestinationKey;
use crate::infrastructure::codec::{self, CodecError};
use crate::infrastructure::destination::{Destination, DestinationStats};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("router returned {0}, which is not a configured destination")]
    UnknownDestination(DestinationKey),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Shared by every inbound connection of one worker.
pub struct RelayService {
    router: Arc<dyn Router>,
    destinations: BTreeMap<DestinationKey, Arc<Destination>>,
    broadcast: bool,
}

impl RelayService {
    pub fn new(router: Arc<dyn Router>, destinations: Vec<Arc<Destination>>) -> Self {
        let destinations: BTreeMap<_, _> = destinations
            .into_iter()
            .map(|d| (d.key().clone(), d))
            .collect();
        // Every metric goes everywhere, so the router can be skipped.
        let broadcast = router.is_broadcast();
        if broadcast {
            tracing::info!(
                "replication factor equals destination count ({}), broadcasting",
                router.destination_count()
            );
        }
        Self {
            router,
            destinations,
            broadcast,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    pub fn destination(&self, key: &DestinationKey) -> Option<&Arc<Destination>> {
        self.destinations.get(key)
    }

    /// All destinations, in key order.
    pub fn destinations(&self) -> impl Iterator<Item = &Arc<Destination>> {
        self.destinations.values()
    }

    /// Spawn the connection task of every destination.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.destinations.values().map(|d| d.start()).collect()
    }

    pub fn stats(&self) -> Vec<(DestinationKey, DestinationStats)> {
        self.destinations
            .iter()
            .map(|(key, d)| (key.clone(), d.stats()))
            .collect()
    }

    /// Group samples by destination, keeping read order within each group.
    ///
    /// In broadcast mode every destination gets every sample and the router
    /// is not consulted.
    pub fn route<I>(&self, samples: I) -> Batches
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut batches = Batches::new();
        for sample in samples {
            if self.broadcast {
                for key in self.destinations.keys() {
                    batches.entry(key.clone()).or_default().push(sample.clone());
                }
            } else {
                for key in self.router.resolve(&sample.metric) {
                    batches.entry(key).or_default().push(sample.clone());
                }
            }
        }
        batches
    }

    /// Serialize each batch and queue it on its destination.
    ///
    /// Every key is checked before anything is queued, so an unknown key
    /// leaves all queues untouched. Returns the number of payloads queued.
    pub fn dispatch(&self, batches: Batches) -> Result<usize, RelayError> {
        let mut resolved = Vec::with_capacity(batches.len());
        for (key, samples) in batches {
            match self.destinations.get(&key) {
                Some(destination) => resolved.push((destination, samples)),
                None => return Err(RelayError::UnknownDestination(key)),
            }
        }

        let mut queued = 0;
        for (destination, samples) in resolved {
            if samples.is_empty() {
                continue;
            }
            let payload = codec::encode_samples(&samples)?;
            destination.enqueue(payload);
            queued += 1;
        }
        Ok(queued)
    }

    /// Queue the same payload on every destination.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        for destination in self.destinations.values() {
            destination.enqueue(payload.clone());
        }
        self.destinations.len()
    }
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService")
            .field("destinations", &self.destinations.keys().collect::<Vec<_>>())
            .field("broadcast", &self.broadcast)
            .finish()
    }
}
