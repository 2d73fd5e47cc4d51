//! Governance preset registry
//!
//! Presets are named, immutable templates mapping roles to permission
//! matrices plus a default voting threshold. They are loaded once when the
//! engine is constructed and validated up front; changing a preset means
//! registering a new named version, never editing in place, so proposals
//! created under an old preset remain interpretable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{GovernanceError, GovernanceResult, Percentage};

/// A member's standing within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Founder,
    Admin,
    Member,
}

/// Governed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Spend from the group treasury
    SpendFunds,
    /// Add, remove or re-role members
    ManageMembers,
    /// Change the group's preset or voting threshold
    ManageGovernance,
    /// Create a proposal of any type
    CreateProposal,
    /// Manage the group's product catalogue
    ManageProducts,
    /// Manage employment arrangements within the group
    ManageEmployment,
}

impl ActionKind {
    /// All known action kinds
    pub const ALL: [ActionKind; 6] = [
        ActionKind::SpendFunds,
        ActionKind::ManageMembers,
        ActionKind::ManageGovernance,
        ActionKind::CreateProposal,
        ActionKind::ManageProducts,
        ActionKind::ManageEmployment,
    ];

    /// The wire name of the action, as stored in permission matrices
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SpendFunds => "spend_funds",
            ActionKind::ManageMembers => "manage_members",
            ActionKind::ManageGovernance => "manage_governance",
            ActionKind::CreateProposal => "create_proposal",
            ActionKind::ManageProducts => "manage_products",
            ActionKind::ManageEmployment => "manage_employment",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a member's permission for an action
///
/// Kept as a three-way variant on purpose: the execution path differs
/// completely between `Allow` (direct dispatch) and `VoteRequired`
/// (proposal-gated), so this must never collapse to a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// The action may be executed directly, bypassing the proposal
    /// mechanism entirely
    Allow,
    /// The action can never be executed, with or without a proposal
    Deny,
    /// The action can be executed only via a passed proposal
    VoteRequired,
}

/// A named, immutable governance template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernancePreset {
    /// Name of the preset, unique within a registry
    pub name: String,
    /// Default voting threshold as a percentage of eligible voting power.
    /// `None` means the preset has no voting mechanism at all: every
    /// permission must resolve to Allow or Deny, never VoteRequired.
    pub voting_threshold: Option<Percentage>,
    /// Permission matrix, per role per action
    pub roles: HashMap<Role, HashMap<ActionKind, Permission>>,
}

impl GovernancePreset {
    /// Look up the permission a role holds for an action
    pub fn permission_for(&self, role: Role, action: ActionKind) -> Option<Permission> {
        self.roles.get(&role).and_then(|m| m.get(&action)).copied()
    }

    /// Validate the preset's load-time invariants
    pub fn validate(&self) -> GovernanceResult<()> {
        if let Some(threshold) = self.voting_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(GovernanceError::InvalidPresetConfig(format!(
                    "preset '{}' has voting threshold {} outside 0..=100",
                    self.name, threshold
                )));
            }
        }

        // A preset without a voting mechanism must not require votes anywhere
        if self.voting_threshold.is_none() {
            for (role, matrix) in &self.roles {
                for (action, permission) in matrix {
                    if *permission == Permission::VoteRequired {
                        return Err(GovernanceError::InvalidPresetConfig(format!(
                            "preset '{}' has no voting threshold but maps {:?}/{} to VoteRequired",
                            self.name, role, action
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// The consensus preset: every consequential action requires a vote
    /// and passing requires the full weight of the group
    pub fn consensus() -> Self {
        let matrix = |create: Permission| {
            HashMap::from([
                (ActionKind::SpendFunds, Permission::VoteRequired),
                (ActionKind::ManageMembers, Permission::VoteRequired),
                (ActionKind::ManageGovernance, Permission::VoteRequired),
                (ActionKind::CreateProposal, create),
                (ActionKind::ManageProducts, Permission::VoteRequired),
                (ActionKind::ManageEmployment, Permission::VoteRequired),
            ])
        };

        Self {
            name: "consensus".to_string(),
            voting_threshold: Some(100.0),
            roles: HashMap::from([
                (Role::Founder, matrix(Permission::Allow)),
                (Role::Admin, matrix(Permission::Allow)),
                (Role::Member, matrix(Permission::Allow)),
            ]),
        }
    }

    /// The democratic preset: simple majority, day-to-day catalogue work
    /// delegated to admins, governance changes proposable by leadership
    pub fn democratic() -> Self {
        let leadership = HashMap::from([
            (ActionKind::SpendFunds, Permission::VoteRequired),
            (ActionKind::ManageMembers, Permission::VoteRequired),
            (ActionKind::ManageGovernance, Permission::VoteRequired),
            (ActionKind::CreateProposal, Permission::Allow),
            (ActionKind::ManageProducts, Permission::Allow),
            (ActionKind::ManageEmployment, Permission::VoteRequired),
        ]);
        let member = HashMap::from([
            (ActionKind::SpendFunds, Permission::VoteRequired),
            (ActionKind::ManageMembers, Permission::VoteRequired),
            (ActionKind::ManageGovernance, Permission::Deny),
            (ActionKind::CreateProposal, Permission::Allow),
            (ActionKind::ManageProducts, Permission::Deny),
            (ActionKind::ManageEmployment, Permission::Deny),
        ]);

        Self {
            name: "democratic".to_string(),
            voting_threshold: Some(51.0),
            roles: HashMap::from([
                (Role::Founder, leadership.clone()),
                (Role::Admin, leadership),
                (Role::Member, member),
            ]),
        }
    }

    /// The hierarchical preset: no voting mechanism, authority flows from
    /// role alone
    pub fn hierarchical() -> Self {
        let founder = ActionKind::ALL
            .iter()
            .map(|a| (*a, Permission::Allow))
            .collect();
        let admin = HashMap::from([
            (ActionKind::SpendFunds, Permission::Allow),
            (ActionKind::ManageMembers, Permission::Allow),
            (ActionKind::ManageGovernance, Permission::Deny),
            (ActionKind::CreateProposal, Permission::Deny),
            (ActionKind::ManageProducts, Permission::Allow),
            (ActionKind::ManageEmployment, Permission::Allow),
        ]);
        let member = ActionKind::ALL
            .iter()
            .map(|a| (*a, Permission::Deny))
            .collect();

        Self {
            name: "hierarchical".to_string(),
            voting_threshold: None,
            roles: HashMap::from([
                (Role::Founder, founder),
                (Role::Admin, admin),
                (Role::Member, member),
            ]),
        }
    }
}

/// Read-only catalogue of governance presets
///
/// Built once at startup and injected into the engine, so tests can
/// substitute custom presets without touching global state. Construction
/// fails fast if any preset violates a load-time invariant.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: HashMap<String, GovernancePreset>,
}

impl PresetRegistry {
    /// Build a registry from a set of preset definitions, validating each
    pub fn new(presets: Vec<GovernancePreset>) -> GovernanceResult<Self> {
        let mut map = HashMap::new();
        for preset in presets {
            preset.validate()?;
            if map.contains_key(&preset.name) {
                return Err(GovernanceError::InvalidPresetConfig(format!(
                    "duplicate preset name '{}'",
                    preset.name
                )));
            }
            map.insert(preset.name.clone(), preset);
        }

        info!("Loaded {} governance presets", map.len());
        Ok(Self { presets: map })
    }

    /// Build the registry of builtin presets
    pub fn builtin() -> GovernanceResult<Self> {
        Self::new(vec![
            GovernancePreset::consensus(),
            GovernancePreset::democratic(),
            GovernancePreset::hierarchical(),
        ])
    }

    /// Parse preset definitions from JSON configuration and build a registry
    pub fn from_json(config: &str) -> GovernanceResult<Self> {
        let presets: Vec<GovernancePreset> = serde_json::from_str(config)
            .map_err(|e| GovernanceError::InvalidPresetConfig(e.to_string()))?;
        Self::new(presets)
    }

    /// Look up a preset by name
    pub fn get(&self, name: &str) -> GovernanceResult<&GovernancePreset> {
        self.presets
            .get(name)
            .ok_or_else(|| GovernanceError::UnknownPreset(name.to_string()))
    }

    /// Names of all registered presets
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(|s| s.as_str()).collect()
    }
}
