//! Event sink for status transitions
//!
//! The engine announces lifecycle transitions to a sink for notification
//! delivery. Emission is fire-and-forget: the engine spawns the publish
//! and never awaits or inspects its result, so a slow or failing sink
//! cannot stall or fail a governance operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::voting::VoteChoice;
use crate::{GroupId, MemberId, Percentage, ProposalId};

/// Governance lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// A proposal opened for voting
    ProposalPublished {
        proposal_id: ProposalId,
        group_id: GroupId,
    },
    /// A vote was recorded (or replaced an earlier ballot)
    VoteRecorded {
        proposal_id: ProposalId,
        voter_id: MemberId,
        choice: VoteChoice,
    },
    /// Voting settled in favour
    ProposalPassed {
        proposal_id: ProposalId,
        group_id: GroupId,
        yes_ratio: Percentage,
    },
    /// Voting settled against
    ProposalFailed {
        proposal_id: ProposalId,
        group_id: GroupId,
        yes_ratio: Percentage,
    },
    /// A proposal was withdrawn pre-terminally
    ProposalCancelled {
        proposal_id: ProposalId,
        group_id: GroupId,
        cancelled_by: MemberId,
    },
    /// The action executor confirmed execution
    ProposalExecuted {
        proposal_id: ProposalId,
        group_id: GroupId,
    },
}

/// Destination for governance events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver an event; errors are the sink's problem, not the engine's
    async fn publish(&self, event: GovernanceEvent);
}

/// A sink that logs events through tracing
pub struct TracingEventSink;

impl TracingEventSink {
    /// Create a new tracing sink
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: GovernanceEvent) {
        info!("Governance event: {:?}", event);
    }
}
