//! Governance engine
//!
//! The facade the outer API layer talks to: permission checks, the
//! proposal lifecycle, vote casting with early resolution, and the
//! direct-execution path for Allow-resolved actions. All collaborators
//! (preset registry, stores, action executor, event sink) are injected at
//! construction; the engine holds no global state.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{EventSink, GovernanceEvent};
use crate::execution::ActionExecutor;
use crate::permissions::resolve_permission;
use crate::presets::{ActionKind, Permission, PresetRegistry, Role};
use crate::proposals::{Proposal, ProposalStatus, ProposalType, VotingWindow};
use crate::store::{Group, GroupMember, GroupStore, ProposalStore};
use crate::voting::{tally, TallyOutcome, Vote, VoteChoice};
use crate::{GovernanceError, GovernanceResult, Percentage};

/// Configuration for the governance engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Voting period applied when a proposal is created without an
    /// explicit window, in seconds
    pub default_voting_period_secs: u64,
    /// How often the scheduler sweeps for due proposals, in seconds
    pub scheduler_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_voting_period_secs: 86400, // 24 hours
            scheduler_interval_secs: 60,
        }
    }
}

/// Parameters for creating a proposal
#[derive(Debug, Clone)]
pub struct CreateProposalParams {
    /// The group the proposal belongs to
    pub group_id: String,
    /// The proposing member
    pub proposer_id: String,
    /// The type of proposal
    pub proposal_type: ProposalType,
    /// Short title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// The governed action a passed proposal will execute
    pub action_type: ActionKind,
    /// Opaque payload for the action executor
    pub action_data: serde_json::Value,
    /// Explicit voting window; defaults to a window opening now for the
    /// configured default period
    pub voting_window: Option<VotingWindow>,
    /// Per-proposal threshold override
    pub threshold_override: Option<Percentage>,
    /// Whether the proposal is visible outside the group
    pub is_public: bool,
}

/// The group governance and proposal voting engine
pub struct GovernanceEngine {
    registry: PresetRegistry,
    groups: Arc<dyn GroupStore>,
    proposals: Arc<dyn ProposalStore>,
    executor: Arc<dyn ActionExecutor>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl GovernanceEngine {
    /// Create a new engine from its collaborators
    pub fn new(
        registry: PresetRegistry,
        groups: Arc<dyn GroupStore>,
        proposals: Arc<dyn ProposalStore>,
        executor: Arc<dyn ActionExecutor>,
        events: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            groups,
            proposals,
            executor,
            events,
            config,
        }
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn group_and_member(
        &self,
        group_id: &str,
        member_id: &str,
    ) -> GovernanceResult<(Group, GroupMember)> {
        let group = self.groups.group(group_id).await?;
        let member = self.groups.member(group_id, member_id).await?;
        Ok((group, member))
    }

    fn resolve_for(
        &self,
        group: &Group,
        member: &GroupMember,
        action: ActionKind,
    ) -> GovernanceResult<Permission> {
        let preset = self.registry.get(&group.governance_preset)?;
        resolve_permission(preset, member.role, &member.permission_overrides, action)
    }

    /// Fire-and-forget event emission; the engine never awaits the sink
    fn emit(&self, event: GovernanceEvent) {
        let sink = Arc::clone(&self.events);
        tokio::spawn(async move {
            sink.publish(event).await;
        });
    }

    /// Resolve a member's effective permission for an action
    pub async fn check_permission(
        &self,
        group_id: &str,
        member_id: &str,
        action: ActionKind,
    ) -> GovernanceResult<Permission> {
        let (group, member) = self.group_and_member(group_id, member_id).await?;
        self.resolve_for(&group, &member, action)
    }

    /// Execute an Allow-resolved action directly, bypassing the proposal
    /// mechanism
    pub async fn execute_allowed(
        &self,
        group_id: &str,
        member_id: &str,
        action: ActionKind,
        action_data: &serde_json::Value,
    ) -> GovernanceResult<()> {
        match self.check_permission(group_id, member_id, action).await? {
            Permission::Allow => {
                debug!("Member {} executing allowed action {}", member_id, action);
                self.executor.dispatch(action, action_data).await
            }
            Permission::Deny => Err(GovernanceError::PermissionDenied(format!(
                "member {} may not perform {}",
                member_id, action
            ))),
            Permission::VoteRequired => Err(GovernanceError::InvalidTransition(format!(
                "action {} requires a proposal for member {}",
                action, member_id
            ))),
        }
    }

    /// Create a draft proposal
    ///
    /// Only actions that resolve to VoteRequired may be proposed: a Deny
    /// action can never be executed, and an Allow action belongs on the
    /// direct path, not in the voting machinery.
    pub async fn create_proposal(&self, params: CreateProposalParams) -> GovernanceResult<Proposal> {
        let (group, member) = self
            .group_and_member(&params.group_id, &params.proposer_id)
            .await?;

        if group.archived {
            return Err(GovernanceError::InvalidTransition(format!(
                "group {} is archived",
                group.id
            )));
        }

        if params.proposal_type.requires_founder() && member.role != Role::Founder {
            return Err(GovernanceError::PermissionDenied(format!(
                "{:?} proposals require the Founder role, {} is {:?}",
                params.proposal_type, member.id, member.role
            )));
        }

        match self.resolve_for(&group, &member, params.action_type)? {
            Permission::Deny => {
                return Err(GovernanceError::PermissionDenied(format!(
                    "member {} may not perform {}",
                    member.id, params.action_type
                )))
            }
            Permission::Allow => {
                return Err(GovernanceError::InvalidTransition(format!(
                    "action {} resolves to Allow for member {}; execute it directly",
                    params.action_type, member.id
                )))
            }
            Permission::VoteRequired => {}
        }

        let window = params.voting_window.unwrap_or_else(|| {
            VotingWindow::starting_now(Duration::seconds(
                self.config.default_voting_period_secs as i64,
            ))
        });
        window.validate()?;

        let proposal = Proposal::new(
            params.group_id,
            params.proposer_id,
            params.proposal_type,
            params.title,
            params.description,
            params.action_type,
            params.action_data,
            window,
            params.threshold_override,
            params.is_public,
        );
        self.proposals.put_proposal(&proposal).await?;

        info!(
            "Created {:?} proposal {} in group {}",
            proposal.proposal_type, proposal.id, proposal.group_id
        );
        Ok(proposal)
    }

    /// Publish a draft proposal, opening it for voting
    ///
    /// The resolved threshold is frozen here: the proposal's own override
    /// if present, else the group's, else the preset default.
    pub async fn publish_proposal(
        &self,
        proposal_id: &str,
        actor_id: &str,
    ) -> GovernanceResult<Proposal> {
        let mut proposal = self.proposals.proposal(proposal_id).await?;

        if proposal.proposer_id != actor_id {
            return Err(GovernanceError::PermissionDenied(format!(
                "only the proposer may publish proposal {}",
                proposal_id
            )));
        }

        let group = self.groups.group(&proposal.group_id).await?;
        let preset = self.registry.get(&group.governance_preset)?;
        let threshold = proposal
            .threshold_override
            .or(group.voting_threshold_override)
            .or(preset.voting_threshold)
            .ok_or_else(|| {
                GovernanceError::InvalidTransition(format!(
                    "preset '{}' has no voting mechanism",
                    preset.name
                ))
            })?;

        proposal.begin_voting(threshold)?;
        self.proposals.put_proposal(&proposal).await?;

        info!(
            "Proposal {} is open for voting until {} (threshold {}%)",
            proposal.id, proposal.voting_ends_at, threshold
        );
        self.emit(GovernanceEvent::ProposalPublished {
            proposal_id: proposal.id.clone(),
            group_id: proposal.group_id.clone(),
        });
        Ok(proposal)
    }

    /// Cast or replace a member's vote on an active proposal
    ///
    /// After the ballot lands the engine attempts early resolution; a
    /// mathematically settled proposal is finalized without waiting for
    /// the deadline or the next scheduler sweep.
    pub async fn cast_vote(
        &self,
        proposal_id: &str,
        voter_id: &str,
        choice: VoteChoice,
        voting_power: f64,
    ) -> GovernanceResult<Vote> {
        let proposal = self.proposals.proposal(proposal_id).await?;
        let now = Utc::now();

        if !proposal.is_open_for_voting(now) {
            return Err(GovernanceError::VotingClosed(format!(
                "proposal {} is not accepting votes (status {:?}, window {}..{})",
                proposal.id, proposal.status, proposal.voting_starts_at, proposal.voting_ends_at
            )));
        }

        // Voting is for members only; the store is the membership oracle
        self.groups.member(&proposal.group_id, voter_id).await?;

        let vote = Vote::new(
            proposal.id.clone(),
            voter_id.to_string(),
            choice,
            voting_power,
        )?;
        let vote = self.proposals.upsert_vote(vote).await?;

        debug!(
            "Recorded {:?} vote by {} on proposal {}",
            choice, voter_id, proposal.id
        );
        self.emit(GovernanceEvent::VoteRecorded {
            proposal_id: proposal.id.clone(),
            voter_id: voter_id.to_string(),
            choice,
        });

        // The ballot is durably recorded at this point; a failure in the
        // resolution attempt must not be reported as a failed vote. The
        // scheduler sweep retries resolution.
        if let Err(e) = self.try_finalize(proposal_id).await {
            warn!(
                "Post-vote resolution attempt for proposal {} failed: {}",
                proposal.id, e
            );
        }
        Ok(vote)
    }

    /// Cancel a draft or active proposal
    ///
    /// Allowed for the proposer, or for any member whose resolved
    /// permission for managing members is Allow.
    pub async fn cancel_proposal(
        &self,
        proposal_id: &str,
        actor_id: &str,
    ) -> GovernanceResult<Proposal> {
        let mut proposal = self.proposals.proposal(proposal_id).await?;

        if proposal.proposer_id != actor_id {
            let (group, actor) = self.group_and_member(&proposal.group_id, actor_id).await?;
            let permission = self.resolve_for(&group, &actor, ActionKind::ManageMembers)?;
            if permission != Permission::Allow {
                return Err(GovernanceError::PermissionDenied(format!(
                    "member {} may not cancel proposal {}",
                    actor_id, proposal_id
                )));
            }
        }

        proposal.cancel()?;
        self.proposals.put_proposal(&proposal).await?;

        info!("Proposal {} cancelled by {}", proposal.id, actor_id);
        self.emit(GovernanceEvent::ProposalCancelled {
            proposal_id: proposal.id.clone(),
            group_id: proposal.group_id.clone(),
            cancelled_by: actor_id.to_string(),
        });
        Ok(proposal)
    }

    /// Fetch the current state of a proposal
    pub async fn get_proposal_state(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.proposals.proposal(proposal_id).await
    }

    /// All proposals of a group, newest first
    pub async fn list_proposals(&self, group_id: &str) -> GovernanceResult<Vec<Proposal>> {
        self.proposals.list_proposals(group_id).await
    }

    /// Attempt to finalize a proposal through the claim path
    ///
    /// Starts with an unclaimed tally: while the claim is held the store
    /// refuses ballots, so an unsettled proposal must never be claimed
    /// just to find out it is unsettled. Only a due outcome proceeds to
    /// the claim, where exactly one concurrent caller wins the Active ->
    /// Resolving transition; everyone else gets `Ok(None)` and moves on.
    /// The winner re-tallies a consistent snapshot of the votes and
    /// either settles the proposal or releases the claim. A passed
    /// proposal is executed immediately; executor failure leaves it
    /// Passed for the scheduler to retry.
    pub async fn try_finalize(&self, proposal_id: &str) -> GovernanceResult<Option<TallyOutcome>> {
        let proposal = self.proposals.proposal(proposal_id).await?;
        if proposal.status != ProposalStatus::Active {
            return Ok(None);
        }
        let votes = self.proposals.votes(proposal_id).await?;
        let eligible = self.groups.eligible_voters(&proposal.group_id).await?;
        if !tally(&proposal, &votes, &eligible, Utc::now())?.resolved {
            return Ok(None);
        }

        let claimed = match self.proposals.claim_for_resolution(proposal_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let outcome = match self.resolve_claimed(claimed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Never strand a proposal in Resolving
                if let Err(release_err) = self.proposals.release_claim(proposal_id).await {
                    warn!(
                        "Failed to release claim on proposal {}: {}",
                        proposal_id, release_err
                    );
                }
                return Err(e);
            }
        };

        Ok(outcome)
    }

    async fn resolve_claimed(&self, mut proposal: Proposal) -> GovernanceResult<Option<TallyOutcome>> {
        // Re-tally under the claim: a ballot may have landed between the
        // unclaimed pre-check and the claim
        let votes = self.proposals.votes(&proposal.id).await?;
        let eligible = self.groups.eligible_voters(&proposal.group_id).await?;
        let result = tally(&proposal, &votes, &eligible, Utc::now())?;

        let outcome = match result.outcome {
            Some(outcome) if result.resolved => outcome,
            _ => {
                self.proposals.release_claim(&proposal.id).await?;
                return Ok(None);
            }
        };

        match outcome {
            TallyOutcome::Passed => {
                proposal.mark_passed()?;
                self.proposals.finalize(&proposal).await?;
                info!(
                    "Proposal {} passed with {:.1}% yes of {:.1}% required",
                    proposal.id,
                    result.yes_ratio,
                    proposal.resolved_threshold.unwrap_or_default()
                );
                self.emit(GovernanceEvent::ProposalPassed {
                    proposal_id: proposal.id.clone(),
                    group_id: proposal.group_id.clone(),
                    yes_ratio: result.yes_ratio,
                });

                // Execution failure is recoverable and must not surface as
                // a change in proposal state; the scheduler retries
                if let Err(e) = self.execute_passed(&mut proposal).await {
                    warn!("Execution of proposal {} deferred: {}", proposal.id, e);
                }
            }
            TallyOutcome::Failed => {
                proposal.mark_failed()?;
                self.proposals.finalize(&proposal).await?;
                info!(
                    "Proposal {} failed with {:.1}% yes of {:.1}% required",
                    proposal.id,
                    result.yes_ratio,
                    proposal.resolved_threshold.unwrap_or_default()
                );
                self.emit(GovernanceEvent::ProposalFailed {
                    proposal_id: proposal.id.clone(),
                    group_id: proposal.group_id.clone(),
                    yes_ratio: result.yes_ratio,
                });
            }
        }

        Ok(Some(outcome))
    }

    /// Execute a passed proposal, idempotently
    ///
    /// A proposal that is already Executed is a no-op returning its
    /// current state; the executor is never dispatched a second time.
    pub async fn execute_proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        let proposal = self.proposals.proposal(proposal_id).await?;
        match proposal.status {
            ProposalStatus::Executed => Ok(proposal),
            ProposalStatus::Passed => {
                let mut proposal = proposal;
                self.execute_passed(&mut proposal).await?;
                Ok(proposal)
            }
            status => Err(GovernanceError::InvalidTransition(format!(
                "proposal {} cannot be executed from {:?}",
                proposal_id, status
            ))),
        }
    }

    async fn execute_passed(&self, proposal: &mut Proposal) -> GovernanceResult<()> {
        // Guarded by the executed_at null-check: set at most once
        if proposal.executed_at.is_some() {
            return Ok(());
        }

        self.executor
            .dispatch(proposal.action_type, &proposal.action_data)
            .await
            .map_err(|e| GovernanceError::ExecutionFailed(e.to_string()))?;

        proposal.mark_executed(Utc::now())?;
        self.proposals.finalize(proposal).await?;

        info!("Proposal {} executed", proposal.id);
        self.emit(GovernanceEvent::ProposalExecuted {
            proposal_id: proposal.id.clone(),
            group_id: proposal.group_id.clone(),
        });
        Ok(())
    }

    /// Sweep due proposals: finalize Active ones whose outcome is settled
    /// or whose window has elapsed, and retry execution of Passed ones.
    /// Per-proposal failures are logged and do not abort the sweep.
    pub async fn process_due_proposals(&self) -> GovernanceResult<usize> {
        let mut settled = 0;

        for proposal in self.proposals.active_proposals().await? {
            // The tally decides; expired windows and mathematically
            // settled outcomes both resolve here, everything else is
            // left Active without ever taking the claim
            match self.try_finalize(&proposal.id).await {
                Ok(Some(outcome)) => {
                    debug!("Scheduler settled proposal {}: {:?}", proposal.id, outcome);
                    settled += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to finalize proposal {}: {}", proposal.id, e),
            }
        }

        for proposal in self.proposals.passed_unexecuted().await? {
            match self.execute_proposal(&proposal.id).await {
                Ok(_) => settled += 1,
                Err(e) => warn!("Execution retry for proposal {} failed: {}", proposal.id, e),
            }
        }

        Ok(settled)
    }
}
