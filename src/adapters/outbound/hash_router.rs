//! Consistent Hashing Router
//!
//! Places each metric on `replication_factor` distinct destinations by
//! walking a hash ring clockwise from the metric's position.

use crate::domain::ports::Router;
use crate::domain::value_objects::DestinationKey;
use std::collections::BTreeMap;

/// Virtual nodes per destination.
pub const VIRTUAL_NODES: usize = 100;

/// Hash ring router.
///
/// Ring positions are CRC32 values, so placement is identical across worker
/// processes and relay hosts running the same destination list.
pub struct ConsistentHashRouter {
    /// Ring position -> index into `destinations`
    ring: BTreeMap<u32, usize>,
    destinations: Vec<DestinationKey>,
    replication_factor: usize,
}

impl ConsistentHashRouter {
    /// Build a ring over `destinations`. Duplicate keys are ignored.
    pub fn new(destinations: Vec<DestinationKey>, replication_factor: usize) -> Self {
        let mut router = Self {
            ring: BTreeMap::new(),
            destinations: Vec::with_capacity(destinations.len()),
            replication_factor,
        };
        for key in destinations {
            router.add_destination(key);
        }
        router
    }

    fn add_destination(&mut self, key: DestinationKey) {
        if self.destinations.contains(&key) {
            return;
        }
        let index = self.destinations.len();
        for i in 0..VIRTUAL_NODES {
            let mut position = Self::position(&format!("{}:{}", key, i));
            // Probe past collisions so every destination keeps all its nodes.
            while self.ring.contains_key(&position) {
                position = position.wrapping_add(1);
            }
            self.ring.insert(position, index);
        }
        self.destinations.push(key);
    }

    fn position(key: &str) -> u32 {
        crc32fast::hash(key.as_bytes())
    }
}

impl Router for ConsistentHashRouter {
    fn resolve(&self, metric: &str) -> Vec<DestinationKey> {
        let wanted = self.replication_factor.min(self.destinations.len());
        if wanted == 0 {
            return Vec::new();
        }
        let mut picked: Vec<usize> = Vec::with_capacity(wanted);

        let start = Self::position(metric);
        let clockwise = self.ring.range(start..).chain(self.ring.range(..start));
        for (_, &index) in clockwise {
            if !picked.contains(&index) {
                picked.push(index);
                if picked.len() == wanted {
                    break;
                }
            }
        }

        picked
            .into_iter()
            .map(|index| self.destinations[index].clone())
            .collect()
    }

    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn destination_count(&self) -> usize {
        self.destinations.len()
    }
}
