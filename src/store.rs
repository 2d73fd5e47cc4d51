//! Store boundary for groups, members, proposals and votes
//!
//! The engine reads group and member records through [`GroupStore`] and
//! owns proposal and vote records through [`ProposalStore`]. The two
//! operations with atomicity requirements are spelled out on the trait:
//! the vote upsert (one row per proposal/voter, latest choice wins) and
//! the finalization claim (Active -> Resolving for exactly one caller).
//! [`MemoryStore`] implements both for embedding and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::permissions::PermissionOverrides;
use crate::presets::Role;
use crate::proposals::{Proposal, ProposalStatus};
use crate::voting::{EligibleVoter, Vote};
use crate::{GovernanceError, GovernanceResult, GroupId, MemberId, Percentage};

/// A governed group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier
    pub id: GroupId,
    /// Name of the governance preset this group runs under
    pub governance_preset: String,
    /// Group-level override of the preset's default voting threshold
    pub voting_threshold_override: Option<Percentage>,
    /// Groups are never deleted, only archived
    pub archived: bool,
}

/// A member of a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    /// Unique identifier within the group
    pub id: MemberId,
    /// The group this membership belongs to
    pub group_id: GroupId,
    /// The platform user behind the membership
    pub user_id: String,
    /// The member's role, used to look up default permissions
    pub role: Role,
    /// Sparse per-action permission overrides; override always wins
    pub permission_overrides: PermissionOverrides,
}

/// Read access to group and member records
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Fetch a group by id
    async fn group(&self, group_id: &str) -> GovernanceResult<Group>;

    /// Fetch a member of a group
    async fn member(&self, group_id: &str, member_id: &str) -> GovernanceResult<GroupMember>;

    /// Members whose voting power counts toward tally denominators.
    /// Power assignment (equal-weight, stake-weighted, ...) is the group
    /// collaborator's decision, not the engine's.
    async fn eligible_voters(&self, group_id: &str) -> GovernanceResult<Vec<EligibleVoter>>;
}

/// Ownership of proposal and vote records
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Create or update a proposal in a pre-finalization state
    async fn put_proposal(&self, proposal: &Proposal) -> GovernanceResult<()>;

    /// Fetch a proposal by id
    async fn proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal>;

    /// All proposals of a group, newest first
    async fn list_proposals(&self, group_id: &str) -> GovernanceResult<Vec<Proposal>>;

    /// All currently Active proposals
    async fn active_proposals(&self) -> GovernanceResult<Vec<Proposal>>;

    /// Passed proposals still awaiting execution
    async fn passed_unexecuted(&self) -> GovernanceResult<Vec<Proposal>>;

    /// Atomically move a proposal from Active to Resolving. Returns the
    /// claimed proposal, or `None` when the proposal is not Active — which
    /// is how a losing concurrent claimer finds out. Exactly one of any
    /// set of concurrent callers can receive `Some`.
    async fn claim_for_resolution(&self, proposal_id: &str) -> GovernanceResult<Option<Proposal>>;

    /// Revert an unresolved claim, Resolving -> Active
    async fn release_claim(&self, proposal_id: &str) -> GovernanceResult<()>;

    /// Persist the outcome written by the claim holder (Passed, Failed,
    /// or the later Passed -> Executed update)
    async fn finalize(&self, proposal: &Proposal) -> GovernanceResult<()>;

    /// Upsert the vote row for `(proposal, voter)`: at most one row
    /// exists, a later ballot replaces the earlier one. Implementations
    /// must reject the upsert when the proposal is no longer Active, as
    /// part of the same atomic operation, so no ballot lands after a
    /// finalizer has claimed the proposal.
    async fn upsert_vote(&self, vote: Vote) -> GovernanceResult<Vote>;

    /// All current vote rows for a proposal
    async fn votes(&self, proposal_id: &str) -> GovernanceResult<Vec<Vote>>;
}

/// In-memory store for tests and single-process embedding
pub struct MemoryStore {
    groups: DashMap<GroupId, Group>,
    /// Members keyed by `group_id/member_id`
    members: DashMap<String, GroupMember>,
    eligible: DashMap<GroupId, Vec<EligibleVoter>>,
    proposals: DashMap<String, Proposal>,
    /// Votes per proposal, keyed by voter within
    votes: DashMap<String, HashMap<MemberId, Vote>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            members: DashMap::new(),
            eligible: DashMap::new(),
            proposals: DashMap::new(),
            votes: DashMap::new(),
        }
    }

    fn member_key(group_id: &str, member_id: &str) -> String {
        format!("{}/{}", group_id, member_id)
    }

    /// Register a group
    pub fn insert_group(&self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Register a member
    pub fn insert_member(&self, member: GroupMember) {
        self.members
            .insert(Self::member_key(&member.group_id, &member.id), member);
    }

    /// Set the eligible voter roll for a group
    pub fn set_eligible_voters(&self, group_id: &str, voters: Vec<EligibleVoter>) {
        self.eligible.insert(group_id.to_string(), voters);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn group(&self, group_id: &str) -> GovernanceResult<Group> {
        self.groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("group {}", group_id)))
    }

    async fn member(&self, group_id: &str, member_id: &str) -> GovernanceResult<GroupMember> {
        self.members
            .get(&Self::member_key(group_id, member_id))
            .map(|m| m.clone())
            .ok_or_else(|| {
                GovernanceError::NotFound(format!("member {} in group {}", member_id, group_id))
            })
    }

    async fn eligible_voters(&self, group_id: &str) -> GovernanceResult<Vec<EligibleVoter>> {
        self.eligible
            .get(group_id)
            .map(|v| v.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("voter roll for group {}", group_id)))
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn put_proposal(&self, proposal: &Proposal) -> GovernanceResult<()> {
        self.proposals
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.proposals
            .get(proposal_id)
            .map(|p| p.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", proposal_id)))
    }

    async fn list_proposals(&self, group_id: &str) -> GovernanceResult<Vec<Proposal>> {
        let mut result: Vec<Proposal> = self
            .proposals
            .iter()
            .filter(|p| p.group_id == group_id)
            .map(|p| p.clone())
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn active_proposals(&self) -> GovernanceResult<Vec<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Active)
            .map(|p| p.clone())
            .collect())
    }

    async fn passed_unexecuted(&self) -> GovernanceResult<Vec<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Passed && p.executed_at.is_none())
            .map(|p| p.clone())
            .collect())
    }

    async fn claim_for_resolution(&self, proposal_id: &str) -> GovernanceResult<Option<Proposal>> {
        // get_mut holds the shard lock, so the check-and-set is atomic
        let mut entry = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", proposal_id)))?;

        if entry.status != ProposalStatus::Active {
            return Ok(None);
        }
        entry.status = ProposalStatus::Resolving;
        Ok(Some(entry.clone()))
    }

    async fn release_claim(&self, proposal_id: &str) -> GovernanceResult<()> {
        let mut entry = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", proposal_id)))?;

        if entry.status != ProposalStatus::Resolving {
            return Err(GovernanceError::InvalidTransition(format!(
                "cannot release claim on proposal {} in {:?}",
                proposal_id, entry.status
            )));
        }
        entry.status = ProposalStatus::Active;
        Ok(())
    }

    async fn finalize(&self, proposal: &Proposal) -> GovernanceResult<()> {
        let mut entry = self
            .proposals
            .get_mut(&proposal.id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", proposal.id)))?;

        // Only the claim holder writes here; the stored record must be the
        // one it claimed or a Passed record it is now executing
        if !matches!(entry.status, ProposalStatus::Resolving | ProposalStatus::Passed) {
            return Err(GovernanceError::InvalidTransition(format!(
                "cannot finalize proposal {} from {:?}",
                proposal.id, entry.status
            )));
        }
        *entry = proposal.clone();
        Ok(())
    }

    async fn upsert_vote(&self, vote: Vote) -> GovernanceResult<Vote> {
        // Hold the proposal entry across the upsert so a concurrent claim
        // cannot slip between the status check and the insert. Lock order
        // is always proposals before votes.
        let proposal = self
            .proposals
            .get(&vote.proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", vote.proposal_id)))?;

        if proposal.status != ProposalStatus::Active {
            return Err(GovernanceError::VotingClosed(format!(
                "proposal {} is {:?}",
                vote.proposal_id, proposal.status
            )));
        }

        self.votes
            .entry(vote.proposal_id.clone())
            .or_default()
            .insert(vote.voter_id.clone(), vote.clone());
        Ok(vote)
    }

    async fn votes(&self, proposal_id: &str) -> GovernanceResult<Vec<Vote>> {
        Ok(self
            .votes
            .get(proposal_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::ActionKind;
    use crate::proposals::{ProposalType, VotingWindow};
    use crate::voting::VoteChoice;
    use chrono::Duration;

    async fn active_proposal(store: &MemoryStore) -> Proposal {
        let mut proposal = Proposal::new(
            "group-1".to_string(),
            "alice".to_string(),
            ProposalType::Treasury,
            "Spend".to_string(),
            String::new(),
            ActionKind::SpendFunds,
            serde_json::json!({}),
            VotingWindow::starting_now(Duration::hours(1)),
            None,
            true,
        );
        proposal.begin_voting(51.0).unwrap();
        store.put_proposal(&proposal).await.unwrap();
        proposal
    }

    #[tokio::test]
    async fn test_vote_upsert_replaces_earlier_ballot() {
        let store = MemoryStore::new();
        let proposal = active_proposal(&store).await;

        let first =
            Vote::new(proposal.id.clone(), "bob".to_string(), VoteChoice::Yes, 1.0).unwrap();
        store.upsert_vote(first).await.unwrap();

        let second =
            Vote::new(proposal.id.clone(), "bob".to_string(), VoteChoice::No, 1.0).unwrap();
        store.upsert_vote(second).await.unwrap();

        let votes = store.votes(&proposal.id).await.unwrap();
        assert_eq!(votes.len(), 1, "exactly one row per (proposal, voter)");
        assert_eq!(votes[0].choice, VoteChoice::No, "latest choice counts");
    }

    #[tokio::test]
    async fn test_claim_succeeds_once() {
        let store = MemoryStore::new();
        let proposal = active_proposal(&store).await;

        let first = store.claim_for_resolution(&proposal.id).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, ProposalStatus::Resolving);

        let second = store.claim_for_resolution(&proposal.id).await.unwrap();
        assert!(second.is_none(), "the loser skips");
    }

    #[tokio::test]
    async fn test_release_claim_restores_active() {
        let store = MemoryStore::new();
        let proposal = active_proposal(&store).await;

        store.claim_for_resolution(&proposal.id).await.unwrap().unwrap();
        store.release_claim(&proposal.id).await.unwrap();

        let stored = store.proposal(&proposal.id).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Active);

        // And the proposal can be claimed again
        assert!(store.claim_for_resolution(&proposal.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_votes_rejected_once_claimed() {
        let store = MemoryStore::new();
        let proposal = active_proposal(&store).await;
        store.claim_for_resolution(&proposal.id).await.unwrap().unwrap();

        let late = Vote::new(proposal.id.clone(), "bob".to_string(), VoteChoice::Yes, 1.0).unwrap();
        let err = store.upsert_vote(late).await.unwrap_err();
        assert!(matches!(err, GovernanceError::VotingClosed(_)));
    }

    #[tokio::test]
    async fn test_scans() {
        let store = MemoryStore::new();
        let proposal = active_proposal(&store).await;

        assert_eq!(store.active_proposals().await.unwrap().len(), 1);
        assert!(store.passed_unexecuted().await.unwrap().is_empty());

        let mut claimed = store.claim_for_resolution(&proposal.id).await.unwrap().unwrap();
        claimed.mark_passed().unwrap();
        store.finalize(&claimed).await.unwrap();

        assert!(store.active_proposals().await.unwrap().is_empty());
        assert_eq!(store.passed_unexecuted().await.unwrap().len(), 1);
    }

    #[test]
    fn test_default_store_is_empty() {
        let store = MemoryStore::default();
        let votes = tokio_test::block_on(store.votes("proposal-x")).unwrap();
        assert!(votes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.proposal("proposal-missing").await.unwrap_err(),
            GovernanceError::NotFound(_)
        ));
    }
}
