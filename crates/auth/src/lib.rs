//! `nexus-auth` — client-side session and authorization guard.
//!
//! This crate is intentionally decoupled from HTTP: remote capability lookups
//! come in through [`CapabilityResolver`].

pub mod authorize;
pub mod guard;
pub mod identity;
pub mod navigation;
pub mod permissions;
pub mod roles;
pub mod session;
pub mod storage;

pub use authorize::{AuthzError, RolePolicy, authorize};
pub use guard::{
    CapabilityResolver, GuardConfig, GuardError, GuardOutcome, Redirect, RedirectReason,
    RolePolicyResolver, RouteGuard,
};
pub use identity::UserIdentity;
pub use navigation::{NavigationOutcome, NavigationToken, NavigationTracker, Navigator};
pub use permissions::{Capability, CapabilitySet};
pub use roles::RoleName;
pub use session::{
    AuthInvalidated, AuthInvalidationListener, SESSION_STORAGE_KEY, SessionState, SessionStore,
    SubscriptionId,
};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError};
