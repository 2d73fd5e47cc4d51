//! Group governance and proposal voting engine
//!
//! This crate decides, for a member of a collective, whether a requested
//! action is permitted outright, forbidden outright, or must be escalated
//! to a group vote, and carries qualifying actions through a time-boxed
//! voting lifecycle to a final, idempotently-executed outcome.
//!
//! Permission policy is layered: a named governance preset supplies a
//! role-by-action matrix and a default voting threshold, the group may
//! override the threshold, and individual members may carry sparse
//! per-action overrides that always win. Actions that resolve to
//! `VoteRequired` go through the proposal lifecycle; `Allow` actions are
//! dispatched directly; `Deny` actions are never executed.

use thiserror::Error;

pub mod engine;
pub mod events;
pub mod execution;
pub mod permissions;
pub mod presets;
pub mod proposals;
pub mod scheduler;
pub mod store;
pub mod voting;

// Re-exports
pub use engine::{CreateProposalParams, EngineConfig, GovernanceEngine};
pub use events::{EventSink, GovernanceEvent, TracingEventSink};
pub use execution::{ActionExecutor, LoggingActionExecutor};
pub use permissions::{resolve_permission, PermissionOverrides};
pub use presets::{ActionKind, GovernancePreset, Permission, PresetRegistry, Role};
pub use proposals::{Proposal, ProposalStatus, ProposalType, VotingWindow};
pub use scheduler::Scheduler;
pub use store::{Group, GroupMember, GroupStore, MemoryStore, ProposalStore};
pub use voting::{tally, EligibleVoter, TallyOutcome, TallyResult, Vote, VoteChoice};

/// Identifier for a group
pub type GroupId = String;
/// Identifier for a group member
pub type MemberId = String;
/// Identifier for a proposal
pub type ProposalId = String;

/// A percentage in the range 0 to 100
pub type Percentage = f64;

/// Error types for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Action resolved to Deny, or the actor lacks the role required
    /// by a founder-gated proposal type
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Illegal state-machine move
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Vote cast outside the Active voting window
    #[error("Voting closed: {0}")]
    VotingClosed(String),

    /// Invalid vote
    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    /// Action kind absent from both the member overrides and the preset
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Preset name not present in the registry
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// Preset definition violates a load-time invariant
    #[error("Invalid preset configuration: {0}")]
    InvalidPresetConfig(String),

    /// Action Executor failure; recoverable, the scheduler retries
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Unknown proposal, group or member id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error from a store implementation
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;
