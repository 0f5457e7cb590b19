//! Standings cache collaborator
//!
//! Purchases change scores, so the transactor invalidates whatever cached
//! scoreboard view the deployment keeps. Invalidation happens after commit
//! and its failure never undoes a purchase.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

pub trait StandingsCache: Send + Sync {
    fn invalidate(&self) -> Result<()>;
}

/// Process-local cached standings snapshot
#[derive(Default)]
pub struct MemoryStandings {
    snapshot: RwLock<Option<Value>>,
    generation: AtomicU64,
}

impl MemoryStandings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Value> {
        self.snapshot.read().clone()
    }

    pub fn put(&self, standings: Value) {
        *self.snapshot.write() = Some(standings);
    }

    /// Number of invalidations so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl StandingsCache for MemoryStandings {
    fn invalidate(&self) -> Result<()> {
        self.snapshot.write().take();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Standings cache invalidated (generation {})", generation);
        Ok(())
    }
}

/// For deployments without a standings cache
pub struct NoopStandings;

impl StandingsCache for NoopStandings {
    fn invalidate(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalidate_clears_snapshot() {
        let cache = MemoryStandings::new();
        cache.put(json!([{"account_id": 1, "score": 500}]));
        assert!(cache.get().is_some());

        cache.invalidate().unwrap();
        assert!(cache.get().is_none());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_noop_never_fails() {
        assert!(NoopStandings.invalidate().is_ok());
    }
}
