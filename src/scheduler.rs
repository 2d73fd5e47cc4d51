//! Finalization scheduler
//!
//! A thin periodic loop over [`GovernanceEngine::process_due_proposals`].
//! The scheduler polls; it never sleeps on a per-proposal timer. Any
//! number of workers may run ticks concurrently: the per-proposal claim
//! inside the engine guarantees a single finalizer per proposal, so extra
//! workers only cost wasted scans.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::GovernanceEngine;

/// Periodic driver for proposal finalization and execution retries
pub struct Scheduler {
    engine: Arc<GovernanceEngine>,
    interval: Duration,
}

impl Scheduler {
    /// Create a scheduler with the engine's configured interval
    pub fn new(engine: Arc<GovernanceEngine>) -> Self {
        let interval = Duration::from_secs(engine.config().scheduler_interval_secs);
        Self { engine, interval }
    }

    /// Create a scheduler with an explicit interval
    pub fn with_interval(engine: Arc<GovernanceEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run one sweep, returning how many proposals were settled or executed
    pub async fn tick(&self) -> usize {
        match self.engine.process_due_proposals().await {
            Ok(settled) => {
                if settled > 0 {
                    debug!("Scheduler tick settled {} proposals", settled);
                }
                settled
            }
            Err(e) => {
                error!("Scheduler tick failed: {}", e);
                0
            }
        }
    }

    /// Spawn the periodic loop onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // A slow sweep should not cause a burst of catch-up ticks
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}
