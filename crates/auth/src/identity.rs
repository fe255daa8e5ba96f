use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nexus_core::UserId;

use crate::RoleName;

/// Snapshot of the authenticated user, as returned by the API's user endpoints.
///
/// Never patched in place: a profile change produces a new value that replaces
/// the old one wholesale in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Roles used for local capability derivation; absent in older payloads.
    #[serde(default)]
    pub roles: BTreeSet<RoleName>,
}

impl UserIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }

    /// Name to show in the UI: the display name, or the email when unnamed.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.email,
        }
    }
}
