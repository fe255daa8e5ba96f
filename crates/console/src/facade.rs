//! Single entry point for handling a failed operation at a call site.
//!
//! [`ErrorFacade::handle`] classifies the failure, optionally raises a
//! transient notification, emits [`AuthInvalidated`] for credential failures,
//! and always hands back a [`HandledError`] the caller can render inline.

use std::sync::Arc;

use serde::Serialize;

use nexus_auth::{AuthInvalidated, AuthInvalidationListener};
use nexus_core::{Classification, Failure, FailureKind, MessageOverrides, classify};

use crate::notify::{Notification, Notifier, Severity};

pub const SERVER_ERROR_HINT: &str = "Server error, please try again later";
pub const SESSION_EXPIRED_HINT: &str = "Please sign in again";
pub const FORBIDDEN_HINT: &str = "You do not have permission to perform this action";

/// Whether a failure should raise a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notify {
    /// Notify for everything except validation failures, which belong next to
    /// the offending form field.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleOptions {
    pub notify: Notify,
    /// Replaces the failure's own text unless a code override or validation
    /// detail applies.
    pub default_message: Option<String>,
}

impl HandleOptions {
    /// Inline-only: never raise a notification.
    pub fn silent() -> Self {
        Self {
            notify: Notify::Never,
            default_message: None,
        }
    }

    pub fn notify(mut self, notify: Notify) -> Self {
        self.notify = notify;
        self
    }

    pub fn with_default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = Some(message.into());
        self
    }
}

/// Outcome of handling one failure; always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandledError {
    pub message: String,
    pub code: Option<String>,
    pub kind: FailureKind,
    pub status_code: u16,
    pub is_api_error: bool,
    pub notified: bool,
    pub original_error: Failure,
}

pub struct ErrorFacade {
    overrides: MessageOverrides,
    notifier: Arc<dyn Notifier>,
    listeners: Vec<Arc<dyn AuthInvalidationListener>>,
}

impl core::fmt::Debug for ErrorFacade {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorFacade")
            .field("overrides", &self.overrides)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ErrorFacade {
    /// A facade using the standard message overrides.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            overrides: MessageOverrides::standard(),
            notifier,
            listeners: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: MessageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Register a receiver for [`AuthInvalidated`] events.
    pub fn subscribe_invalidation(mut self, listener: Arc<dyn AuthInvalidationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn handle(&self, failure: Failure, options: HandleOptions) -> HandledError {
        let classification = classify(&failure, &self.overrides, options.default_message.as_deref());

        if classification.kind.invalidates_session() {
            let event = AuthInvalidated {
                status_code: classification.descriptor.status_code,
                code: classification.descriptor.code.clone(),
            };
            for listener in &self.listeners {
                listener.on_auth_invalidated(&event);
            }
        }

        let notified = should_notify(options.notify, classification.kind);
        if notified {
            self.notifier.notify(notification_for(&classification));
        }

        tracing::debug!(
            kind = ?classification.kind,
            status_code = classification.descriptor.status_code,
            notified,
            "handled failure"
        );

        HandledError {
            code: classification.descriptor.code.clone(),
            kind: classification.kind,
            status_code: classification.descriptor.status_code,
            is_api_error: classification.descriptor.is_api_error(),
            message: classification.message,
            notified,
            original_error: failure,
        }
    }
}

fn should_notify(notify: Notify, kind: FailureKind) -> bool {
    match notify {
        Notify::Always => true,
        Notify::Never => false,
        Notify::Auto => kind != FailureKind::Validation,
    }
}

fn notification_for(classification: &Classification) -> Notification {
    let descriptor = &classification.descriptor;
    let (severity, description) = if !descriptor.is_api_error() {
        (Severity::Error, None)
    } else {
        match descriptor.status_code {
            500.. => (Severity::Error, Some(SERVER_ERROR_HINT)),
            401 => (Severity::Warning, Some(SESSION_EXPIRED_HINT)),
            403 => (Severity::Warning, Some(FORBIDDEN_HINT)),
            _ => (Severity::Error, None),
        }
    };

    Notification {
        severity,
        message: classification.message.clone(),
        description: description.map(str::to_string),
        kind: classification.kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use chrono::Utc;
    use nexus_auth::{MemoryStorage, SessionStore, UserIdentity};
    use nexus_core::{ApiErrorBody, UserId};
    use serde_json::json;

    fn identity() -> UserIdentity {
        UserIdentity {
            id: UserId::new(5),
            email: "grace@example.com".to_string(),
            name: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            roles: Default::default(),
        }
    }

    struct Harness {
        session: Arc<SessionStore>,
        notifier: Arc<RecordingNotifier>,
        facade: ErrorFacade,
    }

    fn harness(overrides: MessageOverrides) -> Harness {
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStorage::new())));
        session.establish(identity());
        let notifier = Arc::new(RecordingNotifier::new());
        let facade = ErrorFacade::new(notifier.clone())
            .with_overrides(overrides)
            .subscribe_invalidation(session.clone());
        Harness {
            session,
            notifier,
            facade,
        }
    }

    #[test]
    fn invalid_credentials_override_and_session_cleared() {
        let h = harness(MessageOverrides::new().with("INVALID_CREDENTIALS", "Incorrect email or password"));
        let failure = Failure::from_value(json!({
            "error": "Error",
            "detail": "bad creds",
            "status_code": 401,
            "code": "INVALID_CREDENTIALS"
        }));

        let handled = h.facade.handle(failure.clone(), HandleOptions::default());

        assert_eq!(handled.message, "Incorrect email or password");
        assert_eq!(handled.code.as_deref(), Some("INVALID_CREDENTIALS"));
        assert!(handled.is_api_error);
        assert_eq!(handled.original_error, failure);
        assert!(!h.session.is_authenticated());

        let notes = h.notifier.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].description.as_deref(), Some(SESSION_EXPIRED_HINT));
    }

    #[test]
    fn validation_failure_stays_inline_and_keeps_session() {
        let h = harness(MessageOverrides::standard());
        let failure = Failure::from_value(json!({
            "error": "Error",
            "detail": ["email required", "name required"],
            "status_code": 422,
            "code": "VALIDATION_ERROR"
        }));

        let handled = h.facade.handle(failure, HandleOptions::default());

        assert_eq!(handled.message, "email required; name required");
        assert_eq!(handled.kind, FailureKind::Validation);
        assert!(!handled.notified);
        assert!(h.notifier.snapshot().is_empty());
        assert!(h.session.is_authenticated());
    }

    #[test]
    fn validation_failure_can_be_forced_to_notify() {
        let h = harness(MessageOverrides::standard());
        let failure = Failure::Api(ApiErrorBody::new(422, "Validation Error").with_code("VALIDATION_ERROR"));
        let handled = h.facade.handle(failure, HandleOptions::default().notify(Notify::Always));
        assert!(handled.notified);
        assert_eq!(h.notifier.drain().len(), 1);
    }

    #[test]
    fn any_401_clears_even_when_silent() {
        let h = harness(MessageOverrides::standard());
        let handled = h.facade.handle(
            Failure::Api(ApiErrorBody::new(401, "Not authenticated")),
            HandleOptions::silent(),
        );
        assert_eq!(handled.kind, FailureKind::Authentication);
        assert!(!handled.notified);
        assert!(h.notifier.snapshot().is_empty());
        assert!(!h.session.is_authenticated());
    }

    #[test]
    fn status_bands_pick_descriptions() {
        let h = harness(MessageOverrides::standard());

        h.facade.handle(
            Failure::Api(ApiErrorBody::new(503, "Service Unavailable")),
            HandleOptions::default(),
        );
        h.facade.handle(
            Failure::Api(ApiErrorBody::new(403, "Forbidden")),
            HandleOptions::default(),
        );
        h.facade.handle(
            Failure::Api(ApiErrorBody::new(404, "Not Found").with_code("USER_NOT_FOUND")),
            HandleOptions::default(),
        );

        let notes = h.notifier.drain();
        let descriptions: Vec<_> = notes.iter().map(|n| n.description.as_deref()).collect();
        assert_eq!(
            descriptions,
            vec![Some(SERVER_ERROR_HINT), Some(FORBIDDEN_HINT), None]
        );
        assert_eq!(notes[2].message, "User not found");
        assert!(h.session.is_authenticated());
    }

    #[test]
    fn transport_failure_is_generic_and_keeps_session() {
        let h = harness(MessageOverrides::standard());
        let handled = h.facade.handle(
            Failure::transport("dns error: no such host"),
            HandleOptions::default().with_default_message("Could not load users"),
        );
        assert_eq!(handled.message, "Could not load users");
        assert_eq!(handled.status_code, 0);
        assert!(!handled.is_api_error);
        assert!(h.session.is_authenticated());
        assert_eq!(h.notifier.drain()[0].description, None);
    }

    #[test]
    fn default_message_applies_to_uncoded_api_errors() {
        let h = harness(MessageOverrides::standard());
        let handled = h.facade.handle(
            Failure::Api(ApiErrorBody::new(400, "Bad Request")),
            HandleOptions::silent().with_default_message("Login failed"),
        );
        assert_eq!(handled.message, "Login failed");
    }
}
