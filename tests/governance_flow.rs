//! End-to-end governance lifecycle tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use collective_governance::{
    ActionExecutor, ActionKind, CreateProposalParams, EligibleVoter, EngineConfig, GovernanceEngine,
    GovernanceError, GovernanceResult, Group, GroupMember, MemoryStore, Permission,
    PermissionOverrides, PresetRegistry, Proposal, ProposalStatus, ProposalStore, ProposalType,
    Role, TallyOutcome, TracingEventSink, Vote, VoteChoice, VotingWindow,
};

/// Executor that counts dispatches and optionally fails the first N
struct CountingExecutor {
    calls: AtomicUsize,
    fail_first: AtomicUsize,
}

impl CountingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        })
    }

    fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(n),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for CountingExecutor {
    async fn dispatch(
        &self,
        _action: ActionKind,
        _action_data: &serde_json::Value,
    ) -> GovernanceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GovernanceError::ExecutionFailed(
                "transient downstream outage".to_string(),
            ));
        }
        Ok(())
    }
}

/// Proposal store that counts how often the resolution claim is taken
struct ClaimCountingStore {
    inner: Arc<MemoryStore>,
    claims: AtomicUsize,
}

impl ClaimCountingStore {
    fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            claims: AtomicUsize::new(0),
        })
    }

    fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProposalStore for ClaimCountingStore {
    async fn put_proposal(&self, proposal: &Proposal) -> GovernanceResult<()> {
        self.inner.put_proposal(proposal).await
    }

    async fn proposal(&self, proposal_id: &str) -> GovernanceResult<Proposal> {
        self.inner.proposal(proposal_id).await
    }

    async fn list_proposals(&self, group_id: &str) -> GovernanceResult<Vec<Proposal>> {
        self.inner.list_proposals(group_id).await
    }

    async fn active_proposals(&self) -> GovernanceResult<Vec<Proposal>> {
        self.inner.active_proposals().await
    }

    async fn passed_unexecuted(&self) -> GovernanceResult<Vec<Proposal>> {
        self.inner.passed_unexecuted().await
    }

    async fn claim_for_resolution(&self, proposal_id: &str) -> GovernanceResult<Option<Proposal>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.inner.claim_for_resolution(proposal_id).await
    }

    async fn release_claim(&self, proposal_id: &str) -> GovernanceResult<()> {
        self.inner.release_claim(proposal_id).await
    }

    async fn finalize(&self, proposal: &Proposal) -> GovernanceResult<()> {
        self.inner.finalize(proposal).await
    }

    async fn upsert_vote(&self, vote: Vote) -> GovernanceResult<Vote> {
        self.inner.upsert_vote(vote).await
    }

    async fn votes(&self, proposal_id: &str) -> GovernanceResult<Vec<Vote>> {
        self.inner.votes(proposal_id).await
    }
}

fn seeded_store(preset: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_group(Group {
        id: "group-1".to_string(),
        governance_preset: preset.to_string(),
        voting_threshold_override: None,
        archived: false,
    });
    for (id, role) in [
        ("alice", Role::Founder),
        ("bob", Role::Admin),
        ("carol", Role::Member),
    ] {
        store.insert_member(GroupMember {
            id: id.to_string(),
            group_id: "group-1".to_string(),
            user_id: format!("user-{}", id),
            role,
            permission_overrides: PermissionOverrides::new(),
        });
    }
    store.set_eligible_voters(
        "group-1",
        ["alice", "bob", "carol"]
            .iter()
            .map(|id| EligibleVoter {
                member_id: id.to_string(),
                voting_power: 1.0,
            })
            .collect(),
    );
    store
}

fn build_engine(store: Arc<MemoryStore>, executor: Arc<dyn ActionExecutor>) -> Arc<GovernanceEngine> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Arc::new(GovernanceEngine::new(
        PresetRegistry::builtin().unwrap(),
        store.clone(),
        store,
        executor,
        Arc::new(TracingEventSink::new()),
        EngineConfig::default(),
    ))
}

fn spend_params() -> CreateProposalParams {
    CreateProposalParams {
        group_id: "group-1".to_string(),
        proposer_id: "alice".to_string(),
        proposal_type: ProposalType::Treasury,
        title: "Buy a coffee machine".to_string(),
        description: "For the shared kitchen".to_string(),
        action_type: ActionKind::SpendFunds,
        action_data: serde_json::json!({ "amount": 120, "currency": "EUR" }),
        voting_window: None,
        threshold_override: None,
        is_public: true,
    }
}

fn expired_window() -> VotingWindow {
    let now = Utc::now();
    VotingWindow {
        starts_at: now - Duration::hours(2),
        ends_at: now - Duration::hours(1),
    }
}

#[tokio::test]
async fn test_propose_vote_pass_execute() -> anyhow::Result<()> {
    let executor = CountingExecutor::new();
    let engine = build_engine(seeded_store("democratic"), executor.clone());

    let proposal = engine.create_proposal(spend_params()).await?;
    assert_eq!(proposal.status, ProposalStatus::Draft);

    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;
    assert_eq!(proposal.status, ProposalStatus::Active);
    assert_eq!(proposal.resolved_threshold, Some(51.0));

    // One of three yes ballots is not settled yet
    engine.cast_vote(&proposal.id, "alice", VoteChoice::Yes, 1.0).await?;
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Active);

    // The second yes takes it to 66.7% >= 51%: early pass and immediate
    // execution, well before the deadline
    engine.cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0).await?;
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Executed);
    assert!(state.executed_at.is_some());
    assert_eq!(executor.calls(), 1);

    // Re-running execution logic is a no-op, never a second dispatch
    let again = engine.execute_proposal(&proposal.id).await?;
    assert_eq!(again.status, ProposalStatus::Executed);
    assert_eq!(again.executed_at, state.executed_at);
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deny_and_allow_actions_cannot_be_proposed() {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    // Members of a democratic group are denied catalogue management
    let err = engine
        .create_proposal(CreateProposalParams {
            proposer_id: "carol".to_string(),
            action_type: ActionKind::ManageProducts,
            ..spend_params()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::PermissionDenied(_)));

    // Leadership holds Allow for the same action: direct execution, not a
    // proposal
    let err = engine
        .create_proposal(CreateProposalParams {
            action_type: ActionKind::ManageProducts,
            ..spend_params()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_direct_execution_paths() {
    let executor = CountingExecutor::new();
    let engine = build_engine(seeded_store("democratic"), executor.clone());
    let payload = serde_json::json!({ "product": "honey" });

    // Allow: dispatched directly
    engine
        .execute_allowed("group-1", "alice", ActionKind::ManageProducts, &payload)
        .await
        .unwrap();
    assert_eq!(executor.calls(), 1);

    // Deny: never executed
    let err = engine
        .execute_allowed("group-1", "carol", ActionKind::ManageProducts, &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::PermissionDenied(_)));

    // VoteRequired: never invoked directly
    let err = engine
        .execute_allowed("group-1", "alice", ActionKind::SpendFunds, &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition(_)));

    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_hierarchical_preset_never_accepts_proposals() {
    let engine = build_engine(seeded_store("hierarchical"), CountingExecutor::new());

    // The founder holds Allow for everything: every action belongs on the
    // direct path
    for action in ActionKind::ALL {
        let err = engine
            .create_proposal(CreateProposalParams {
                proposal_type: ProposalType::General,
                action_type: action,
                ..spend_params()
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, GovernanceError::InvalidTransition(_)),
            "expected InvalidTransition for {}, got {:?}",
            action,
            err
        );
    }

    // Plain members are denied outright
    let err = engine
        .create_proposal(CreateProposalParams {
            proposer_id: "carol".to_string(),
            proposal_type: ProposalType::General,
            ..spend_params()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_governance_proposals_are_founder_gated() {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    // Admins resolve VoteRequired for manage_governance, but the type gate
    // is independent of the resolver outcome
    let err = engine
        .create_proposal(CreateProposalParams {
            proposer_id: "bob".to_string(),
            proposal_type: ProposalType::Governance,
            action_type: ActionKind::ManageGovernance,
            ..spend_params()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::PermissionDenied(_)));

    let proposal = engine
        .create_proposal(CreateProposalParams {
            proposal_type: ProposalType::Governance,
            action_type: ActionKind::ManageGovernance,
            ..spend_params()
        })
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Draft);
}

#[tokio::test]
async fn test_threshold_precedence() {
    // Group override beats the preset default
    let store = seeded_store("democratic");
    store.insert_group(Group {
        id: "group-1".to_string(),
        governance_preset: "democratic".to_string(),
        voting_threshold_override: Some(30.0),
        archived: false,
    });
    let engine = build_engine(store, CountingExecutor::new());

    let proposal = engine.create_proposal(spend_params()).await.unwrap();
    let proposal = engine.publish_proposal(&proposal.id, "alice").await.unwrap();
    assert_eq!(proposal.resolved_threshold, Some(30.0));

    // And the proposal-level override beats both
    let proposal = engine
        .create_proposal(CreateProposalParams {
            threshold_override: Some(80.0),
            ..spend_params()
        })
        .await
        .unwrap();
    let proposal = engine.publish_proposal(&proposal.id, "alice").await.unwrap();
    assert_eq!(proposal.resolved_threshold, Some(80.0));
}

#[tokio::test]
async fn test_revote_replaces_ballot_and_flips_outcome() -> anyhow::Result<()> {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    let proposal = engine.create_proposal(spend_params()).await?;
    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;

    engine.cast_vote(&proposal.id, "alice", VoteChoice::No, 1.0).await?;
    engine.cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0).await?;

    // Alice changes her mind; her earlier No is replaced, not added to,
    // and the second Yes settles the proposal
    engine.cast_vote(&proposal.id, "alice", VoteChoice::Yes, 1.0).await?;

    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Executed);
    Ok(())
}

#[tokio::test]
async fn test_votes_rejected_outside_active_window() {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    // Draft proposals do not accept votes
    let proposal = engine.create_proposal(spend_params()).await.unwrap();
    let err = engine
        .cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::VotingClosed(_)));

    // Neither do proposals whose window has elapsed
    let proposal = engine
        .create_proposal(CreateProposalParams {
            voting_window: Some(expired_window()),
            ..spend_params()
        })
        .await
        .unwrap();
    engine.publish_proposal(&proposal.id, "alice").await.unwrap();
    let err = engine
        .cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::VotingClosed(_)));
}

#[tokio::test]
async fn test_non_members_cannot_vote() {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    let proposal = engine.create_proposal(spend_params()).await.unwrap();
    let proposal = engine.publish_proposal(&proposal.id, "alice").await.unwrap();

    let err = engine
        .cast_vote(&proposal.id, "mallory", VoteChoice::Yes, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

#[tokio::test]
async fn test_cancellation_permissions() {
    let store = seeded_store("democratic");
    // Give bob an explicit member-management override so he can moderate
    store.insert_member(GroupMember {
        id: "bob".to_string(),
        group_id: "group-1".to_string(),
        user_id: "user-bob".to_string(),
        role: Role::Admin,
        permission_overrides: [(ActionKind::ManageMembers, Permission::Allow)]
            .into_iter()
            .collect(),
    });
    let engine = build_engine(store, CountingExecutor::new());

    // The proposer may always cancel pre-terminally
    let proposal = engine.create_proposal(spend_params()).await.unwrap();
    let cancelled = engine.cancel_proposal(&proposal.id, "alice").await.unwrap();
    assert_eq!(cancelled.status, ProposalStatus::Cancelled);

    // A plain member without moderation rights may not
    let proposal = engine.create_proposal(spend_params()).await.unwrap();
    let err = engine.cancel_proposal(&proposal.id, "carol").await.unwrap_err();
    assert!(matches!(err, GovernanceError::PermissionDenied(_)));

    // A member whose manage_members permission resolves Allow may
    let cancelled = engine.cancel_proposal(&proposal.id, "bob").await.unwrap();
    assert_eq!(cancelled.status, ProposalStatus::Cancelled);

    // Cancellation is pre-terminal only
    let err = engine.cancel_proposal(&proposal.id, "alice").await.unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_concurrent_finalizers_settle_exactly_once() -> anyhow::Result<()> {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    let proposal = engine
        .create_proposal(CreateProposalParams {
            voting_window: Some(expired_window()),
            ..spend_params()
        })
        .await?;
    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;

    // A pool of workers races to finalize the same expired proposal
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = proposal.id.clone();
        handles.push(tokio::spawn(async move { engine.try_finalize(&id).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if let Some(outcome) = handle.await?? {
            assert_eq!(outcome, TallyOutcome::Failed);
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one worker performs the transition");

    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_execution_failure_leaves_proposal_passed_and_retries() -> anyhow::Result<()> {
    let executor = CountingExecutor::failing_first(1);
    let engine = build_engine(seeded_store("democratic"), executor.clone());

    let proposal = engine.create_proposal(spend_params()).await?;
    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;

    engine.cast_vote(&proposal.id, "alice", VoteChoice::Yes, 1.0).await?;
    engine.cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0).await?;

    // The tally passed but the first dispatch failed: the proposal stays
    // Passed, never reverts, and is not yet executed
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Passed);
    assert!(state.executed_at.is_none());
    assert_eq!(executor.calls(), 1);

    // The next scheduler sweep retries and succeeds
    let settled = engine.process_due_proposals().await?;
    assert_eq!(settled, 1);
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Executed);
    assert_eq!(executor.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_open_proposals_are_never_claimed() -> anyhow::Result<()> {
    let store = seeded_store("democratic");
    let proposals = ClaimCountingStore::new(store.clone());
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = Arc::new(GovernanceEngine::new(
        PresetRegistry::builtin().unwrap(),
        store.clone(),
        proposals.clone(),
        CountingExecutor::new(),
        Arc::new(TracingEventSink::new()),
        EngineConfig::default(),
    ));

    let proposal = engine.create_proposal(spend_params()).await?;
    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;

    // One yes of three cannot settle a 51% threshold. The ballot box must
    // stay open the whole time: while a claim is held the store refuses
    // votes, so an unsettled proposal must never be claimed, neither after
    // a cast vote nor by a scheduler sweep.
    engine.cast_vote(&proposal.id, "alice", VoteChoice::Yes, 1.0).await?;
    assert_eq!(proposals.claims(), 0, "unsettled after a vote: no claim");

    assert_eq!(engine.process_due_proposals().await?, 0);
    assert_eq!(proposals.claims(), 0, "unsettled on a sweep: no claim");

    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Active);

    // A second valid ballot is accepted, settles the outcome, and takes
    // exactly one claim
    engine.cast_vote(&proposal.id, "bob", VoteChoice::Yes, 1.0).await?;
    assert_eq!(proposals.claims(), 1);
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Executed);
    Ok(())
}

#[tokio::test]
async fn test_vote_counts_even_when_resolution_attempt_fails() -> anyhow::Result<()> {
    // Group and member exist but no eligible-voter roll is registered, so
    // every post-vote tally attempt errors with NotFound
    let store = Arc::new(MemoryStore::new());
    store.insert_group(Group {
        id: "group-1".to_string(),
        governance_preset: "democratic".to_string(),
        voting_threshold_override: None,
        archived: false,
    });
    store.insert_member(GroupMember {
        id: "alice".to_string(),
        group_id: "group-1".to_string(),
        user_id: "user-alice".to_string(),
        role: Role::Founder,
        permission_overrides: PermissionOverrides::new(),
    });
    let engine = build_engine(store.clone(), CountingExecutor::new());

    let proposal = engine.create_proposal(spend_params()).await?;
    let proposal = engine.publish_proposal(&proposal.id, "alice").await?;

    // The ballot lands durably before the resolution attempt runs; a
    // failure there must not be reported back as a failed vote
    let vote = engine
        .cast_vote(&proposal.id, "alice", VoteChoice::Yes, 1.0)
        .await?;
    assert_eq!(vote.choice, VoteChoice::Yes);

    let votes = store.votes(&proposal.id).await?;
    assert_eq!(votes.len(), 1);
    let state = engine.get_proposal_state(&proposal.id).await?;
    assert_eq!(state.status, ProposalStatus::Active);
    Ok(())
}

#[tokio::test]
async fn test_archived_groups_accept_no_proposals() {
    let store = seeded_store("democratic");
    store.insert_group(Group {
        id: "group-1".to_string(),
        governance_preset: "democratic".to_string(),
        voting_threshold_override: None,
        archived: true,
    });
    let engine = build_engine(store, CountingExecutor::new());

    let err = engine.create_proposal(spend_params()).await.unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_list_proposals_newest_first() -> anyhow::Result<()> {
    let engine = build_engine(seeded_store("democratic"), CountingExecutor::new());

    let first = engine.create_proposal(spend_params()).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = engine.create_proposal(spend_params()).await?;

    let listed = engine.list_proposals("group-1").await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);
    Ok(())
}
