//! The console shell: wires session, guard, API client and error facade.

use std::sync::Arc;

use thiserror::Error;

use nexus_auth::{
    Capability, CapabilityResolver, NavigationOutcome, Navigator, Redirect, RedirectReason,
    RouteGuard, SessionStore, UserIdentity,
};
use nexus_core::{Failure, FailureKind, describe};

use crate::api::{AccountApi, ApiClient, HttpCapabilityResolver};
use crate::config::ConsoleConfig;
use crate::facade::{ErrorFacade, HandleOptions, HandledError};
use crate::notify::Notifier;

pub const LOGIN_FAILED_MESSAGE: &str = "Login failed, please check your email and password";
pub const PASSWORD_CHANGE_FAILED_MESSAGE: &str =
    "Password change failed, please check your input";
pub const PROFILE_LOAD_FAILED_MESSAGE: &str = "Unable to load your profile";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

pub struct Console {
    config: ConsoleConfig,
    session: Arc<SessionStore>,
    account: Arc<dyn AccountApi>,
    facade: ErrorFacade,
    navigator: Navigator,
}

impl core::fmt::Debug for Console {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Console")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Build a console talking to the configured API, restoring any persisted
    /// session.
    pub fn bootstrap(config: ConsoleConfig, notifier: Arc<dyn Notifier>) -> Result<Self, ConsoleError> {
        let session = Arc::new(SessionStore::rehydrate(config.storage()));
        let client = Arc::new(
            ApiClient::new(config.api_base_url.clone(), config.request_timeout)
                .map_err(ConsoleError::HttpClient)?,
        );
        let resolver = Arc::new(HttpCapabilityResolver::new(client.clone()));

        tracing::info!(
            api = %config.api_base_url,
            authenticated = session.is_authenticated(),
            "console ready"
        );
        Ok(Self::with_parts(config, session, client, resolver, notifier))
    }

    /// Assemble a console from explicit parts.
    pub fn with_parts(
        config: ConsoleConfig,
        session: Arc<SessionStore>,
        account: Arc<dyn AccountApi>,
        resolver: Arc<dyn CapabilityResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let facade = ErrorFacade::new(notifier).subscribe_invalidation(session.clone());
        let guard = Arc::new(RouteGuard::new(session.clone(), resolver, config.guard.clone()));
        Self {
            config,
            session,
            account,
            facade,
            navigator: Navigator::new(guard),
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn facade(&self) -> &ErrorFacade {
        &self.facade
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Log in and establish the session.
    ///
    /// Failures are handled inline (no notification) and returned for display
    /// next to the form.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, HandledError> {
        match self.account.login(email, password).await {
            Ok(identity) => {
                tracing::info!(user = identity.display_name(), "logged in");
                self.session.establish(identity.clone());
                Ok(identity)
            }
            Err(failure) => Err(self.facade.handle(
                failure,
                HandleOptions::silent().with_default_message(LOGIN_FAILED_MESSAGE),
            )),
        }
    }

    /// Log out on the server if possible; the local session is cleared either way.
    pub async fn logout(&self) {
        if let Err(failure) = self.account.logout().await {
            tracing::warn!(error = %failure, "server logout failed; clearing local session anyway");
        }
        self.session.clear();
    }

    /// Reload the identity from the API.
    ///
    /// An expired access cookie gets one refresh attempt before the failure is
    /// handed to the facade.
    pub async fn refresh_profile(&self) -> Result<UserIdentity, HandledError> {
        let failure = match self.account.me().await {
            Ok(identity) => return Ok(self.adopt(identity)),
            Err(failure) => failure,
        };

        if is_authentication_failure(&failure) {
            match self.account.refresh().await {
                Ok(identity) => {
                    tracing::debug!(user_id = %identity.id, "access refreshed");
                    return Ok(self.adopt(identity));
                }
                Err(refresh_failure) => {
                    tracing::debug!(error = %refresh_failure, "refresh rejected");
                }
            }
        }

        Err(self.facade.handle(
            failure,
            HandleOptions::default().with_default_message(PROFILE_LOAD_FAILED_MESSAGE),
        ))
    }

    /// Change the password. The server revokes every existing token, so on
    /// success the session is cleared and the caller is sent to the login page.
    pub async fn change_password(&self, current: &str, new: &str) -> Result<Redirect, HandledError> {
        match self.account.change_password(current, new).await {
            Ok(()) => {
                self.session.clear();
                let guard = &self.config.guard;
                Ok(Redirect {
                    path: guard.login_path.clone(),
                    return_param: guard.return_param.clone(),
                    return_to: None,
                    reason: RedirectReason::NotAuthenticated,
                })
            }
            Err(failure) => Err(self.facade.handle(
                failure,
                HandleOptions::silent().with_default_message(PASSWORD_CHANGE_FAILED_MESSAGE),
            )),
        }
    }

    /// Handle a failure from some other call site with default options.
    pub fn report(&self, failure: Failure) -> HandledError {
        self.facade.handle(failure, HandleOptions::default())
    }

    pub async fn navigate(&self, required: &Capability, location: &str) -> NavigationOutcome {
        self.navigator.navigate(required, location).await
    }

    pub fn navigate_authenticated(&self, location: &str) -> NavigationOutcome {
        self.navigator.navigate_authenticated(location)
    }

    fn adopt(&self, identity: UserIdentity) -> UserIdentity {
        self.session.establish(identity.clone());
        identity
    }
}

fn is_authentication_failure(failure: &Failure) -> bool {
    FailureKind::of(&describe(failure.clone())) == FailureKind::Authentication
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use async_trait::async_trait;
    use chrono::Utc;
    use nexus_auth::{MemoryStorage, RoleName, RolePolicy, RolePolicyResolver};
    use nexus_core::{ApiErrorBody, UserId};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn identity(roles: &[&'static str]) -> UserIdentity {
        UserIdentity {
            id: UserId::new(7),
            email: "lin@example.com".to_string(),
            name: Some("Lin".to_string()),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            roles: roles.iter().map(|r| RoleName::new(*r)).collect(),
        }
    }

    fn unauthorized(code: Option<&str>) -> Failure {
        let body = ApiErrorBody::new(401, "Unauthorized");
        Failure::Api(match code {
            Some(code) => body.with_code(code),
            None => body,
        })
    }

    #[derive(Default)]
    struct FakeAccount {
        login: Mutex<VecDeque<Result<UserIdentity, Failure>>>,
        me: Mutex<VecDeque<Result<UserIdentity, Failure>>>,
        refresh: Mutex<VecDeque<Result<UserIdentity, Failure>>>,
        logout: Mutex<Option<Failure>>,
        change_password: Mutex<Option<Failure>>,
    }

    fn next(queue: &Mutex<VecDeque<Result<UserIdentity, Failure>>>) -> Result<UserIdentity, Failure> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Failure::unknown("unscripted call")))
    }

    #[async_trait]
    impl AccountApi for FakeAccount {
        async fn login(&self, _email: &str, _password: &str) -> Result<UserIdentity, Failure> {
            next(&self.login)
        }

        async fn logout(&self) -> Result<(), Failure> {
            self.logout.lock().unwrap().take().map_or(Ok(()), Err)
        }

        async fn me(&self) -> Result<UserIdentity, Failure> {
            next(&self.me)
        }

        async fn refresh(&self) -> Result<UserIdentity, Failure> {
            next(&self.refresh)
        }

        async fn change_password(&self, _current: &str, _new: &str) -> Result<(), Failure> {
            self.change_password.lock().unwrap().take().map_or(Ok(()), Err)
        }
    }

    struct Harness {
        console: Console,
        account: Arc<FakeAccount>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let account = Arc::new(FakeAccount::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStorage::new())));
        let console = Console::with_parts(
            ConsoleConfig::default(),
            session,
            account.clone(),
            Arc::new(RolePolicyResolver::new(RolePolicy::standard())),
            notifier.clone(),
        );
        Harness {
            console,
            account,
            notifier,
        }
    }

    #[tokio::test]
    async fn login_establishes_session_and_unlocks_views() {
        let h = harness();
        h.account.login.lock().unwrap().push_back(Ok(identity(&["user"])));

        let user = h.console.login("lin@example.com", "secret").await.unwrap();
        assert_eq!(user.email, "lin@example.com");
        assert!(h.console.session().is_authenticated());

        assert_eq!(
            h.console.navigate(&Capability::new("users:read"), "/users").await,
            NavigationOutcome::Proceed
        );
        let NavigationOutcome::Redirect(redirect) =
            h.console.navigate(&Capability::new("rbac:read"), "/admin/audit").await
        else {
            panic!("expected forbidden redirect");
        };
        assert_eq!(redirect.path, "/forbidden");
    }

    #[tokio::test]
    async fn failed_login_is_inline_with_override_message() {
        let h = harness();
        h.account
            .login
            .lock()
            .unwrap()
            .push_back(Err(unauthorized(Some("INVALID_CREDENTIALS"))));

        let err = h.console.login("lin@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.message, "Incorrect email or password");
        assert!(!err.notified);
        assert!(h.notifier.snapshot().is_empty());
        assert!(!h.console.session().is_authenticated());
    }

    #[tokio::test]
    async fn failed_login_without_code_uses_login_message() {
        let h = harness();
        h.account
            .login
            .lock()
            .unwrap()
            .push_back(Err(Failure::Api(ApiErrorBody::new(400, "Bad Request"))));

        let err = h.console.login("lin@example.com", "x").await.unwrap_err();
        assert_eq!(err.message, LOGIN_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        *h.account.logout.lock().unwrap() = Some(Failure::transport("connection refused"));

        h.console.logout().await;
        assert!(!h.console.session().is_authenticated());
    }

    #[tokio::test]
    async fn refresh_profile_replaces_identity() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        let mut updated = identity(&["user"]);
        updated.name = Some("Lin Q".to_string());
        h.account.me.lock().unwrap().push_back(Ok(updated));

        h.console.refresh_profile().await.unwrap();
        let current = h.console.session().current_identity().unwrap();
        assert_eq!(current.name.as_deref(), Some("Lin Q"));
    }

    #[tokio::test]
    async fn expired_access_is_refreshed_once() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        h.account.me.lock().unwrap().push_back(Err(unauthorized(Some("TOKEN_ERROR"))));
        h.account.refresh.lock().unwrap().push_back(Ok(identity(&["admin"])));

        let user = h.console.refresh_profile().await.unwrap();
        assert!(user.has_role("admin"));
        assert!(h.console.session().is_authenticated());
        assert!(h.notifier.snapshot().is_empty());
    }

    #[tokio::test]
    async fn rejected_refresh_clears_session_and_notifies() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        h.account.me.lock().unwrap().push_back(Err(unauthorized(Some("TOKEN_ERROR"))));
        h.account.refresh.lock().unwrap().push_back(Err(unauthorized(None)));

        let err = h.console.refresh_profile().await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Authentication);
        assert_eq!(err.message, "Your session has expired, please sign in again");
        assert!(!h.console.session().is_authenticated());
        assert_eq!(h.notifier.drain().len(), 1);

        let NavigationOutcome::Redirect(redirect) =
            h.console.navigate(&Capability::new("users:read"), "/users").await
        else {
            panic!("expected login redirect");
        };
        assert_eq!(redirect.href(), "/login?redirect=/users");
    }

    #[tokio::test]
    async fn server_error_on_profile_keeps_session() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        h.account
            .me
            .lock()
            .unwrap()
            .push_back(Err(Failure::Api(ApiErrorBody::new(500, "Internal Server Error"))));

        let err = h.console.refresh_profile().await.unwrap_err();
        assert_eq!(err.message, PROFILE_LOAD_FAILED_MESSAGE);
        assert!(h.console.session().is_authenticated());
        assert_eq!(h.notifier.drain()[0].description.as_deref(), Some(crate::facade::SERVER_ERROR_HINT));
    }

    #[tokio::test]
    async fn password_change_signs_out() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));

        let redirect = h.console.change_password("old", "new-secret").await.unwrap();
        assert_eq!(redirect.href(), "/login");
        assert!(!h.console.session().is_authenticated());
    }

    #[tokio::test]
    async fn password_change_validation_error_stays_inline() {
        let h = harness();
        h.console.session().establish(identity(&["user"]));
        *h.account.change_password.lock().unwrap() = Some(Failure::Api(
            ApiErrorBody::new(422, "Validation Error")
                .with_code("VALIDATION_ERROR")
                .with_detail(nexus_core::Detail::Single("Password too short".into())),
        ));

        let err = h.console.change_password("old", "x").await.unwrap_err();
        assert_eq!(err.message, "Password too short");
        assert!(h.console.session().is_authenticated());
        assert!(h.notifier.snapshot().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_rehydrates_from_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleConfig {
            session_dir: Some(dir.path().to_path_buf()),
            ..ConsoleConfig::default()
        };

        let first = Console::bootstrap(config.clone(), Arc::new(RecordingNotifier::new())).unwrap();
        assert!(!first.session().is_authenticated());
        first.session().establish(identity(&["auditor"]));

        let second = Console::bootstrap(config, Arc::new(RecordingNotifier::new())).unwrap();
        let restored = second.session().current_identity().unwrap();
        assert_eq!(restored.id, UserId::new(7));
        assert!(restored.has_role("auditor"));
    }

    #[test]
    fn report_routes_through_facade() {
        let h = harness();
        h.console.session().establish(identity(&[]));
        let handled = h.console.report(unauthorized(None));
        assert!(handled.notified);
        assert!(!h.console.session().is_authenticated());
    }
}
