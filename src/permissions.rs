//! Permission resolution
//!
//! Resolution is a pure function over three policy layers: a member's
//! sparse per-action overrides, then the preset's role matrix. The
//! override always wins. An action absent from both layers is a
//! configuration error, never a silent default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::presets::{ActionKind, GovernancePreset, Permission, Role};
use crate::{GovernanceError, GovernanceResult};

/// Sparse per-member permission overrides
///
/// Only overridden actions are present. Keys deserialize through the
/// closed [`ActionKind`] enum, so an unknown action name in stored JSON is
/// rejected at the boundary rather than silently carried along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionOverrides(HashMap<ActionKind, Permission>);

impl PermissionOverrides {
    /// An empty override set
    pub fn new() -> Self {
        Self::default()
    }

    /// The override for an action, if one exists
    pub fn get(&self, action: ActionKind) -> Option<Permission> {
        self.0.get(&action).copied()
    }

    /// Set or replace the override for an action
    pub fn set(&mut self, action: ActionKind, permission: Permission) {
        self.0.insert(action, permission);
    }

    /// Remove the override for an action, restoring the role default
    pub fn clear(&mut self, action: ActionKind) {
        self.0.remove(&action);
    }

    /// Whether any overrides are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ActionKind, Permission)> for PermissionOverrides {
    fn from_iter<I: IntoIterator<Item = (ActionKind, Permission)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Resolve the effective permission for a member's action
///
/// Order: the member's override if present, else the preset's role matrix.
/// Fails with `UnknownAction` when the action appears in neither, rather
/// than defaulting to Allow or Deny.
pub fn resolve_permission(
    preset: &GovernancePreset,
    role: Role,
    overrides: &PermissionOverrides,
    action: ActionKind,
) -> GovernanceResult<Permission> {
    if let Some(permission) = overrides.get(action) {
        return Ok(permission);
    }

    preset.permission_for(role, action).ok_or_else(|| {
        GovernanceError::UnknownAction(format!(
            "action '{}' not configured for role {:?} in preset '{}'",
            action, role, preset.name
        ))
    })
}
