use std::collections::HashMap;

use thiserror::Error;

use crate::{Capability, CapabilitySet, RoleName, UserIdentity};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing capability '{0}'")]
    Forbidden(String),
}

/// Check a resolved capability set against a requirement.
///
/// - No IO
/// - No panics
pub fn authorize(granted: &CapabilitySet, required: &Capability) -> Result<(), AuthzError> {
    if granted.allows(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Static role → capability mapping used when capabilities are derived locally.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    grants: HashMap<RoleName, Vec<Capability>>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The console's built-in roles.
    ///
    /// Convention: `"admin"` holds the wildcard.
    pub fn standard() -> Self {
        Self::new()
            .grant("admin", [Capability::new(Capability::WILDCARD)])
            .grant(
                "auditor",
                [Capability::new("rbac:read"), Capability::new("users:read")],
            )
            .grant("user", [Capability::new("users:read")])
    }

    pub fn grant(
        mut self,
        role: impl Into<RoleName>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.grants
            .entry(role.into())
            .or_default()
            .extend(capabilities);
        self
    }

    pub fn capabilities_for_role(&self, role: &RoleName) -> &[Capability] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Union of the capabilities of every role the identity holds.
    ///
    /// Inactive accounts get nothing.
    pub fn capabilities_for(&self, identity: &UserIdentity) -> CapabilitySet {
        if !identity.is_active {
            return CapabilitySet::new();
        }
        identity
            .roles
            .iter()
            .flat_map(|role| self.capabilities_for_role(role).iter().cloned())
            .collect()
    }
}
