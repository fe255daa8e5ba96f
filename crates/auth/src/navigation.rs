//! Navigation attempts and their cancellation.
//!
//! Every navigation gets a [`NavigationToken`]. Starting a new navigation
//! supersedes all earlier tokens, so a guard evaluation that finishes after
//! the user has already moved on is discarded instead of reaching the UI.

use std::sync::Arc;

use tokio::sync::watch;

use crate::Capability;
use crate::guard::{GuardError, GuardOutcome, Redirect, RouteGuard};

/// Issues navigation tokens; the latest one is the only live one.
#[derive(Debug)]
pub struct NavigationTracker {
    current: watch::Sender<u64>,
}

impl Default for NavigationTracker {
    fn default() -> Self {
        let (current, _) = watch::channel(0);
        Self { current }
    }
}

impl NavigationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a navigation attempt, superseding every earlier one.
    pub fn begin(&self) -> NavigationToken {
        let mut attempt = 0;
        self.current.send_modify(|current| {
            *current += 1;
            attempt = *current;
        });
        NavigationToken {
            attempt,
            current: self.current.subscribe(),
        }
    }

    /// Abandon the pending attempt without starting a new one.
    pub fn cancel(&self) {
        self.current.send_modify(|current| *current += 1);
    }

    pub fn latest_attempt(&self) -> u64 {
        *self.current.borrow()
    }
}

/// Handle for one navigation attempt.
#[derive(Debug)]
pub struct NavigationToken {
    attempt: u64,
    current: watch::Receiver<u64>,
}

impl NavigationToken {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn is_current(&self) -> bool {
        *self.current.borrow() == self.attempt
    }

    /// Resolves once this attempt is superseded or cancelled.
    ///
    /// A dropped tracker counts as cancellation.
    pub async fn superseded(&mut self) {
        loop {
            if *self.current.borrow_and_update() != self.attempt {
                return;
            }
            if self.current.changed().await.is_err() {
                return;
            }
        }
    }
}

/// What the navigation layer should do with an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Render the target view.
    Proceed,
    /// Go somewhere else instead.
    Redirect(Redirect),
    /// Authorization could not be established; show a blocking error.
    Blocked(GuardError),
    /// A newer navigation replaced this one; do nothing.
    Superseded,
}

impl From<Result<GuardOutcome, GuardError>> for NavigationOutcome {
    fn from(value: Result<GuardOutcome, GuardError>) -> Self {
        match value {
            Ok(GuardOutcome::Allow) => NavigationOutcome::Proceed,
            Ok(GuardOutcome::RedirectTo(redirect)) => NavigationOutcome::Redirect(redirect),
            Err(err) => NavigationOutcome::Blocked(err),
        }
    }
}

/// Runs guard evaluations under navigation tokens.
#[derive(Debug)]
pub struct Navigator {
    guard: Arc<RouteGuard>,
    tracker: NavigationTracker,
}

impl Navigator {
    pub fn new(guard: Arc<RouteGuard>) -> Self {
        Self {
            guard,
            tracker: NavigationTracker::new(),
        }
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn tracker(&self) -> &NavigationTracker {
        &self.tracker
    }

    /// Navigate to a view requiring `required`.
    ///
    /// Returns [`NavigationOutcome::Superseded`] as soon as a newer navigation
    /// starts, and also when the guard finishes after being superseded.
    pub async fn navigate(&self, required: &Capability, location: &str) -> NavigationOutcome {
        let mut token = self.tracker.begin();
        let attempt = token.attempt();
        tracing::debug!(attempt, capability = %required, location, "navigation started");

        let result = tokio::select! {
            biased;
            _ = token.superseded() => None,
            result = self.guard.evaluate(required, location) => Some(result),
        };

        match result {
            Some(result) if token.is_current() => {
                let outcome = NavigationOutcome::from(result);
                tracing::debug!(attempt, ?outcome, "navigation resolved");
                outcome
            }
            _ => {
                tracing::debug!(attempt, "navigation superseded, result discarded");
                NavigationOutcome::Superseded
            }
        }
    }

    /// Navigate to a view that only needs a logged-in user.
    pub fn navigate_authenticated(&self, location: &str) -> NavigationOutcome {
        let _token = self.tracker.begin();
        NavigationOutcome::from(Ok(self.guard.evaluate_authenticated(location)))
    }

    /// Abandon whatever navigation is pending.
    pub fn cancel(&self) {
        self.tracker.cancel();
    }
}
