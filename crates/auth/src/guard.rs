//! Pre-navigation guard for protected views.
//!
//! [`RouteGuard::evaluate`] decides, before a protected view is constructed,
//! whether the current session may enter it. Authentication is checked first,
//! then the capability. Nothing ambiguous ever turns into [`GuardOutcome::Allow`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use nexus_core::{Failure, FailureKind, MessageOverrides, classify};

use crate::authorize::{RolePolicy, authorize};
use crate::session::SessionStore;
use crate::{Capability, CapabilitySet, UserIdentity};

/// Source of the capabilities currently granted to an identity.
///
/// Usually remote: the capability set can be broader (or narrower) than what
/// was known at login.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    async fn resolve(&self, identity: &UserIdentity) -> Result<CapabilitySet, Failure>;
}

/// Resolves capabilities locally from the identity's roles.
#[derive(Debug, Clone, Default)]
pub struct RolePolicyResolver {
    policy: RolePolicy,
}

impl RolePolicyResolver {
    pub fn new(policy: RolePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl CapabilityResolver for RolePolicyResolver {
    async fn resolve(&self, identity: &UserIdentity) -> Result<CapabilitySet, Failure> {
        Ok(self.policy.capabilities_for(identity))
    }
}

/// Where the guard sends people it turns away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub login_path: String,
    pub forbidden_path: String,
    /// Query parameter carrying the originally requested location.
    pub return_param: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            forbidden_path: "/forbidden".to_string(),
            return_param: "redirect".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    NotAuthenticated,
    NotAuthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub return_param: String,
    /// Location to resume at after logging in.
    pub return_to: Option<String>,
    pub reason: RedirectReason,
}

impl Redirect {
    pub fn preserve_return_url(&self) -> bool {
        self.return_to.is_some()
    }

    /// Target location including the return-path query parameter.
    ///
    /// Path separators in the return path stay readable; every segment is
    /// percent-encoded.
    pub fn href(&self) -> String {
        match &self.return_to {
            Some(return_to) => {
                let encoded = return_to
                    .split('/')
                    .map(|segment| urlencoding::encode(segment).into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                format!("{}?{}={}", self.path, self.return_param, encoded)
            }
            None => self.path.clone(),
        }
    }
}

/// Result of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    RedirectTo(Redirect),
}

impl GuardOutcome {
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardOutcome::Allow)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Capability resolution failed for a reason other than authentication or
    /// authorization; the view stays blocked.
    #[error("capability resolution failed: {message}")]
    Resolution {
        kind: FailureKind,
        status_code: u16,
        message: String,
    },

    /// The session kept changing underneath the evaluation.
    #[error("session changed during authorization")]
    SessionUnstable,
}

const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Gate for protected views.
pub struct RouteGuard {
    session: Arc<SessionStore>,
    resolver: Arc<dyn CapabilityResolver>,
    config: GuardConfig,
    overrides: MessageOverrides,
}

impl core::fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RouteGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RouteGuard {
    pub fn new(
        session: Arc<SessionStore>,
        resolver: Arc<dyn CapabilityResolver>,
        config: GuardConfig,
    ) -> Self {
        Self {
            session,
            resolver,
            config,
            overrides: MessageOverrides::standard(),
        }
    }

    pub fn with_overrides(mut self, overrides: MessageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Decide whether the current session may enter a view requiring `required`.
    ///
    /// `current_location` is the attempted location, preserved in the login
    /// redirect so the post-login flow can resume there.
    pub async fn evaluate(
        &self,
        required: &Capability,
        current_location: &str,
    ) -> Result<GuardOutcome, GuardError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let Some(identity) = self.session.current_identity() else {
                tracing::debug!(capability = %required, location = current_location, "guard: anonymous");
                return Ok(self.login_redirect(current_location));
            };

            let resolved = self.resolver.resolve(&identity).await;

            // Only act on a result that still describes the current session.
            let still_current = self
                .session
                .current_identity()
                .is_some_and(|current| Arc::ptr_eq(&current, &identity));
            if !still_current {
                tracing::debug!(user_id = %identity.id, "guard: session changed while resolving");
                continue;
            }

            return self.decide(&identity, required, current_location, resolved);
        }

        tracing::warn!(capability = %required, "guard: session unstable, denying");
        Err(GuardError::SessionUnstable)
    }

    /// Gate for views that only need a logged-in user.
    pub fn evaluate_authenticated(&self, current_location: &str) -> GuardOutcome {
        if self.session.is_authenticated() {
            GuardOutcome::Allow
        } else {
            self.login_redirect(current_location)
        }
    }

    fn decide(
        &self,
        identity: &UserIdentity,
        required: &Capability,
        current_location: &str,
        resolved: Result<CapabilitySet, Failure>,
    ) -> Result<GuardOutcome, GuardError> {
        match resolved {
            Ok(granted) => match authorize(&granted, required) {
                Ok(()) => {
                    tracing::debug!(user_id = %identity.id, capability = %required, "guard: allow");
                    Ok(GuardOutcome::Allow)
                }
                Err(err) => {
                    tracing::info!(user_id = %identity.id, error = %err, "guard: not authorized");
                    Ok(self.forbidden_redirect())
                }
            },
            Err(failure) => {
                let classification = classify(&failure, &self.overrides, None);
                match classification.kind {
                    FailureKind::Authentication => {
                        tracing::info!(
                            user_id = %identity.id,
                            status_code = classification.descriptor.status_code,
                            "guard: credentials rejected, clearing session"
                        );
                        self.session.clear();
                        Ok(self.login_redirect(current_location))
                    }
                    FailureKind::Authorization => {
                        tracing::info!(user_id = %identity.id, capability = %required, "guard: not authorized");
                        Ok(self.forbidden_redirect())
                    }
                    kind => {
                        tracing::warn!(
                            user_id = %identity.id,
                            ?kind,
                            failure = %failure,
                            "guard: capability resolution failed, blocking"
                        );
                        Err(GuardError::Resolution {
                            kind,
                            status_code: classification.descriptor.status_code,
                            message: classification.message,
                        })
                    }
                }
            }
        }
    }

    fn login_redirect(&self, current_location: &str) -> GuardOutcome {
        GuardOutcome::RedirectTo(Redirect {
            path: self.config.login_path.clone(),
            return_param: self.config.return_param.clone(),
            return_to: Some(current_location.to_string()),
            reason: RedirectReason::NotAuthenticated,
        })
    }

    fn forbidden_redirect(&self) -> GuardOutcome {
        GuardOutcome::RedirectTo(Redirect {
            path: self.config.forbidden_path.clone(),
            return_param: self.config.return_param.clone(),
            return_to: None,
            reason: RedirectReason::NotAuthorized,
        })
    }
}
