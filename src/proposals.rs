//! Proposal model and lifecycle state machine
//!
//! A proposal moves Draft -> Active -> (Passed | Failed), with Passed ->
//! Executed once the action executor confirms, and Draft/Active ->
//! Cancelled as the only other exits. `Resolving` is a short-lived claim
//! marker taken by exactly one finalizing worker; it either settles to a
//! terminal outcome or reverts to Active. Every other move is an
//! `InvalidTransition`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::presets::ActionKind;
use crate::{GovernanceError, GovernanceResult, GroupId, MemberId, Percentage, ProposalId};

/// Status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Created but not yet published for voting
    Draft,
    /// Open for voting
    Active,
    /// Claimed by a finalizing worker; settles or reverts to Active
    Resolving,
    /// Voting settled in favour; awaiting execution
    Passed,
    /// Voting settled against
    Failed,
    /// The action executor confirmed execution
    Executed,
    /// Withdrawn before a terminal outcome
    Cancelled,
}

impl ProposalStatus {
    /// Whether the status permits no further mutation of any kind
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Failed | ProposalStatus::Executed | ProposalStatus::Cancelled
        )
    }
}

/// Types of proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    General,
    Treasury,
    Membership,
    Governance,
    Employment,
}

impl ProposalType {
    /// Whether proposals of this type may only be raised by a founder,
    /// independent of the general permission resolution
    pub fn requires_founder(&self) -> bool {
        matches!(self, ProposalType::Governance)
    }
}

/// The time window during which votes are accepted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VotingWindow {
    /// When voting opens
    pub starts_at: DateTime<Utc>,
    /// When voting closes
    pub ends_at: DateTime<Utc>,
}

impl VotingWindow {
    /// A window opening now and lasting for the given period
    pub fn starting_now(period: Duration) -> Self {
        let starts_at = Utc::now();
        Self {
            starts_at,
            ends_at: starts_at + period,
        }
    }

    /// Validate that the window is non-empty
    pub fn validate(&self) -> GovernanceResult<()> {
        if self.ends_at <= self.starts_at {
            return Err(GovernanceError::InvalidTransition(format!(
                "voting window ends at {} before it starts at {}",
                self.ends_at, self.starts_at
            )));
        }
        Ok(())
    }
}

/// A proposal for a governed group action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier for this proposal
    pub id: ProposalId,
    /// The group this proposal belongs to
    pub group_id: GroupId,
    /// The member that raised the proposal
    pub proposer_id: MemberId,
    /// The type of proposal
    pub proposal_type: ProposalType,
    /// The current status
    pub status: ProposalStatus,
    /// Short title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// The governed action a passed proposal will execute
    pub action_type: ActionKind,
    /// Opaque payload handed to the action executor, never interpreted here
    pub action_data: serde_json::Value,
    /// Threshold frozen when the proposal went Active; computed as
    /// proposal override, else group override, else preset default.
    /// Always present once the proposal has been voted on.
    pub resolved_threshold: Option<Percentage>,
    /// Per-proposal threshold override supplied at creation
    pub threshold_override: Option<Percentage>,
    /// When voting opens
    pub voting_starts_at: DateTime<Utc>,
    /// When voting closes
    pub voting_ends_at: DateTime<Utc>,
    /// When the proposal was created
    pub created_at: DateTime<Utc>,
    /// When execution was confirmed; set at most once
    pub executed_at: Option<DateTime<Utc>>,
    /// Whether the proposal is visible outside the group
    pub is_public: bool,
}

impl Proposal {
    /// Create a new draft proposal
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_id: GroupId,
        proposer_id: MemberId,
        proposal_type: ProposalType,
        title: String,
        description: String,
        action_type: ActionKind,
        action_data: serde_json::Value,
        window: VotingWindow,
        threshold_override: Option<Percentage>,
        is_public: bool,
    ) -> Self {
        Self {
            id: format!("proposal-{}", Uuid::new_v4()),
            group_id,
            proposer_id,
            proposal_type,
            status: ProposalStatus::Draft,
            title,
            description,
            action_type,
            action_data,
            resolved_threshold: None,
            threshold_override,
            voting_starts_at: window.starts_at,
            voting_ends_at: window.ends_at,
            created_at: Utc::now(),
            executed_at: None,
            is_public,
        }
    }

    /// Whether votes are currently accepted
    pub fn is_open_for_voting(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Active
            && now >= self.voting_starts_at
            && now < self.voting_ends_at
    }

    /// Whether the voting deadline has passed
    pub fn voting_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.voting_ends_at
    }

    /// Draft -> Active, freezing the resolved threshold
    pub fn begin_voting(&mut self, threshold: Percentage) -> GovernanceResult<()> {
        if self.status != ProposalStatus::Draft {
            return Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot begin voting from {:?}",
                self.id, self.status
            )));
        }
        self.status = ProposalStatus::Active;
        self.resolved_threshold = Some(threshold);
        Ok(())
    }

    /// Draft | Active -> Cancelled
    pub fn cancel(&mut self) -> GovernanceResult<()> {
        match self.status {
            ProposalStatus::Draft | ProposalStatus::Active => {
                self.status = ProposalStatus::Cancelled;
                Ok(())
            }
            status => Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot be cancelled from {:?}",
                self.id, status
            ))),
        }
    }

    /// Resolving -> Passed; only the claim holder may call this
    pub fn mark_passed(&mut self) -> GovernanceResult<()> {
        if self.status != ProposalStatus::Resolving {
            return Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot pass from {:?}",
                self.id, self.status
            )));
        }
        self.status = ProposalStatus::Passed;
        Ok(())
    }

    /// Resolving -> Failed; only the claim holder may call this
    pub fn mark_failed(&mut self) -> GovernanceResult<()> {
        if self.status != ProposalStatus::Resolving {
            return Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot fail from {:?}",
                self.id, self.status
            )));
        }
        self.status = ProposalStatus::Failed;
        Ok(())
    }

    /// Passed -> Executed, stamping `executed_at` exactly once
    pub fn mark_executed(&mut self, now: DateTime<Utc>) -> GovernanceResult<()> {
        if self.status != ProposalStatus::Passed || self.executed_at.is_some() {
            return Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot be executed from {:?}",
                self.id, self.status
            )));
        }
        self.status = ProposalStatus::Executed;
        self.executed_at = Some(now);
        Ok(())
    }
}
