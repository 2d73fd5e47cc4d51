//! Vote model and tally engine
//!
//! A proposal passes when its yes-power reaches `resolved_threshold`
//! percent of the total eligible voting power. The tally settles early in
//! either direction once the outcome is mathematically fixed: a pass as
//! soon as yes-power clears the bar, a fail as soon as the bar is out of
//! reach even if every still-undecided voter went yes. Ballots replace
//! earlier ones until the deadline, so an abstention is undecided, not
//! spent: its power stays in the achievable ceiling alongside the uncast.
//! A recorded No is fixed opposition. Anything not settled early is
//! decided at the deadline by the final ratio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proposals::Proposal;
use crate::{GovernanceError, GovernanceResult, MemberId, Percentage, ProposalId};

/// A voter's choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
    /// Contributes nothing toward passing, but the abstainer may still
    /// revote until the deadline, so the power is not written off early
    Abstain,
}

/// A single member's vote on a proposal
///
/// At most one vote exists per `(proposal, voter)`; casting again replaces
/// the earlier ballot and only the latest choice counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// The proposal this vote is for
    pub proposal_id: ProposalId,
    /// The voting member
    pub voter_id: MemberId,
    /// The vote choice
    pub choice: VoteChoice,
    /// The voter's weight, supplied by the group collaborator; always > 0
    pub voting_power: f64,
    /// When the vote was cast
    pub voted_at: DateTime<Utc>,
}

impl Vote {
    /// Create a new vote, rejecting non-positive voting power
    pub fn new(
        proposal_id: ProposalId,
        voter_id: MemberId,
        choice: VoteChoice,
        voting_power: f64,
    ) -> GovernanceResult<Self> {
        if voting_power <= 0.0 || !voting_power.is_finite() {
            return Err(GovernanceError::InvalidVote(format!(
                "voting power must be positive, got {}",
                voting_power
            )));
        }
        Ok(Self {
            proposal_id,
            voter_id,
            choice,
            voting_power,
            voted_at: Utc::now(),
        })
    }
}

/// A member whose voting power counts toward the tally denominator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleVoter {
    /// The member's identifier
    pub member_id: MemberId,
    /// The member's voting power
    pub voting_power: f64,
}

/// Settled direction of a resolved tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TallyOutcome {
    Passed,
    Failed,
}

/// Result of tallying votes against a proposal's threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyResult {
    /// Total yes-power cast
    pub yes_power: f64,
    /// Total power of all eligible voters
    pub total_eligible_power: f64,
    /// Yes-power as a percentage of total eligible power
    pub yes_ratio: Percentage,
    /// Highest yes-ratio still reachable if every uncast and abstaining
    /// ballot went yes
    pub max_achievable_ratio: Percentage,
    /// Whether the outcome is settled
    pub resolved: bool,
    /// The settled direction, present iff `resolved`
    pub outcome: Option<TallyOutcome>,
}

/// Tally votes for a proposal against its resolved threshold
///
/// Early resolution is a normal outcome of this computation, never an
/// error: the result is settled before the deadline whenever the ratio
/// already clears the threshold, or mathematically can no longer reach it.
pub fn tally(
    proposal: &Proposal,
    votes: &[Vote],
    eligible: &[EligibleVoter],
    now: DateTime<Utc>,
) -> GovernanceResult<TallyResult> {
    let threshold = proposal.resolved_threshold.ok_or_else(|| {
        GovernanceError::InvalidTransition(format!(
            "proposal {} has no resolved threshold; was it ever published?",
            proposal.id
        ))
    })?;

    let total_eligible_power: f64 = eligible.iter().map(|v| v.voting_power).sum();

    let mut yes_power = 0.0;
    let mut abstain_power = 0.0;
    for vote in votes {
        match vote.choice {
            VoteChoice::Yes => yes_power += vote.voting_power,
            VoteChoice::Abstain => abstain_power += vote.voting_power,
            VoteChoice::No => {}
        }
    }

    // Power of eligible voters who have not cast any ballot
    let uncast_power: f64 = eligible
        .iter()
        .filter(|v| !votes.iter().any(|vote| vote.voter_id == v.member_id))
        .map(|v| v.voting_power)
        .sum();

    let ratio_of = |power: f64| -> Percentage {
        if total_eligible_power > 0.0 {
            power / total_eligible_power * 100.0
        } else {
            0.0
        }
    };

    let yes_ratio = ratio_of(yes_power);
    // Uncast and abstaining power could still flip to yes before the
    // deadline; a recorded No could not
    let max_achievable_ratio = ratio_of(yes_power + uncast_power + abstain_power);

    let (resolved, outcome) = if yes_ratio >= threshold {
        // Early pass: already over the bar, remaining votes cannot undo it
        (true, Some(TallyOutcome::Passed))
    } else if max_achievable_ratio < threshold {
        // Early fail: even unanimous yes from the uncast cannot reach the bar
        (true, Some(TallyOutcome::Failed))
    } else if proposal.voting_expired(now) {
        (true, Some(TallyOutcome::Failed))
    } else {
        (false, None)
    };

    Ok(TallyResult {
        yes_power,
        total_eligible_power,
        yes_ratio,
        max_achievable_ratio,
        resolved,
        outcome,
    })
}
