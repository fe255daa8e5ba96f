//! Transient user notifications (toasts).

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use nexus_core::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// Secondary line, e.g. what the user can do about it.
    pub description: Option<String>,
    pub kind: FailureKind,
}

/// Channel for transient notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log; the default for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let description = notification.description.as_deref().unwrap_or("");
        match notification.severity {
            Severity::Error => tracing::error!(
                kind = ?notification.kind,
                description,
                "{}",
                notification.message
            ),
            Severity::Warning => tracing::warn!(
                kind = ?notification.kind,
                description,
                "{}",
                notification.message
            ),
            Severity::Info => tracing::info!(
                kind = ?notification.kind,
                description,
                "{}",
                notification.message
            ),
        }
    }
}

/// Keeps every notification so a UI layer (or a test) can drain them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    items: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
