mod hash_router;
mod rules_router;

pub use hash_router::{ConsistentHashRouter, VIRTUAL_NODES};
pub use rules_router::{RulesError, RulesRouter};
