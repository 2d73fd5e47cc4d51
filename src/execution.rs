//! Action executor boundary
//!
//! The engine decides whether and when an action runs; performing it is
//! the executor's job. Implementations are expected to be idempotent and
//! retry-safe: the scheduler will re-dispatch a passed proposal whose
//! earlier execution attempt failed.

use async_trait::async_trait;
use tracing::info;

use crate::presets::ActionKind;
use crate::GovernanceResult;

/// External capability that performs the real-world effect of an action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Dispatch an action with its opaque payload
    async fn dispatch(&self, action: ActionKind, action_data: &serde_json::Value)
        -> GovernanceResult<()>;
}

/// An executor that logs actions without performing them
pub struct LoggingActionExecutor;

impl LoggingActionExecutor {
    /// Create a new logging executor
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for LoggingActionExecutor {
    async fn dispatch(
        &self,
        action: ActionKind,
        action_data: &serde_json::Value,
    ) -> GovernanceResult<()> {
        info!("Would execute action {}: {}", action, action_data);
        Ok(())
    }
}
