//! Error classification: failure value in, descriptor and user-facing message out.
//!
//! Everything here is pure. The same failure, override table and default
//! message always produce the same [`Classification`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Detail, Failure};

/// Code the API uses for request validation failures.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
pub const TOKEN_ERROR: &str = "TOKEN_ERROR";
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const EMAIL_ALREADY_EXISTS: &str = "EMAIL_ALREADY_EXISTS";
pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";

/// Status code recorded for failures that never produced an API response.
pub const NO_STATUS: u16 = 0;

pub const GENERIC_API_MESSAGE: &str = "An error occurred";
pub const GENERIC_UNKNOWN_MESSAGE: &str = "An unknown error occurred";
pub const GENERIC_TRANSPORT_MESSAGE: &str = "Unable to reach the server, please check your connection";

/// Normalized view of any failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiErrorDescriptor {
    /// HTTP status, or [`NO_STATUS`] when the failure was not an API error.
    pub status_code: u16,
    pub code: Option<String>,
    pub error: Option<String>,
    pub detail: Option<Detail>,
    /// Original value, for diagnostics only.
    pub raw_error: Failure,
}

impl ApiErrorDescriptor {
    pub fn is_api_error(&self) -> bool {
        self.raw_error.is_api_error()
    }

    fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Turn any failure into exactly one descriptor.
pub fn describe(failure: Failure) -> ApiErrorDescriptor {
    match &failure {
        Failure::Api(body) => ApiErrorDescriptor {
            status_code: body.status_code,
            code: body.code.clone(),
            error: non_blank(&body.error),
            detail: body.detail.clone(),
            raw_error: failure,
        },
        Failure::Transport { message } => ApiErrorDescriptor {
            status_code: NO_STATUS,
            code: None,
            error: non_blank(message),
            detail: None,
            raw_error: failure,
        },
        Failure::Unknown { message } => ApiErrorDescriptor {
            status_code: NO_STATUS,
            code: None,
            error: message.as_deref().and_then(non_blank),
            detail: None,
            raw_error: failure,
        },
    }
}

/// Failure taxonomy driving routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No structured response at all.
    Transport,
    /// Expired or invalid credentials.
    Authentication,
    /// Authenticated but not allowed.
    Authorization,
    /// Field-level validation messages.
    Validation,
    /// Backend failure (5xx).
    Server,
    /// Any other structured API error.
    Client,
    Unknown,
}

impl FailureKind {
    pub fn of(descriptor: &ApiErrorDescriptor) -> Self {
        match &descriptor.raw_error {
            Failure::Transport { .. } => FailureKind::Transport,
            Failure::Unknown { .. } => FailureKind::Unknown,
            Failure::Api(_) => {
                let status = descriptor.status_code;
                if status == 401
                    || descriptor.has_code(INVALID_CREDENTIALS)
                    || descriptor.has_code(TOKEN_ERROR)
                {
                    FailureKind::Authentication
                } else if status == 403 || descriptor.has_code(PERMISSION_DENIED) {
                    FailureKind::Authorization
                } else if descriptor.has_code(VALIDATION_ERROR) {
                    FailureKind::Validation
                } else if status >= 500 {
                    FailureKind::Server
                } else {
                    FailureKind::Client
                }
            }
        }
    }

    /// Whether this failure must force the session back to anonymous.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, FailureKind::Authentication)
    }
}

/// Table of `code → message` replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOverrides {
    entries: BTreeMap<String, String>,
}

impl MessageOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// The console's standard replacements for well-known API codes.
    pub fn standard() -> Self {
        Self::new()
            .with(INVALID_CREDENTIALS, "Incorrect email or password")
            .with(EMAIL_ALREADY_EXISTS, "This email is already registered")
            .with(USER_NOT_FOUND, "User not found")
            .with(PERMISSION_DENIED, "Permission denied")
            .with(TOKEN_ERROR, "Your session has expired, please sign in again")
    }

    pub fn with(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.entries.insert(code.into(), message.into());
        self
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MessageOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub descriptor: ApiErrorDescriptor,
    pub kind: FailureKind,
    /// Never empty.
    pub message: String,
}

/// Classify a failure and resolve the message to show for it.
///
/// For API errors the message is, in order: the override for its code; for
/// validation errors the detail verbatim, else the error text; the caller's
/// default; the error's own detail or text. Transport failures never show their raw text. Other failures use the
/// caller's default, then their own message.
pub fn classify(
    failure: &Failure,
    overrides: &MessageOverrides,
    default_message: Option<&str>,
) -> Classification {
    let descriptor = describe(failure.clone());
    let kind = FailureKind::of(&descriptor);
    let default_message = default_message.and_then(non_blank);

    let message = match kind {
        FailureKind::Transport => {
            default_message.unwrap_or_else(|| GENERIC_TRANSPORT_MESSAGE.to_string())
        }
        _ if descriptor.is_api_error() => api_message(&descriptor, overrides, default_message),
        _ => default_message
            .or_else(|| descriptor.error.clone())
            .unwrap_or_else(|| GENERIC_UNKNOWN_MESSAGE.to_string()),
    };

    tracing::trace!(
        status_code = descriptor.status_code,
        code = descriptor.code.as_deref().unwrap_or(""),
        ?kind,
        "classified failure"
    );

    Classification {
        descriptor,
        kind,
        message,
    }
}

fn api_message(
    descriptor: &ApiErrorDescriptor,
    overrides: &MessageOverrides,
    default_message: Option<String>,
) -> String {
    let own_text = || {
        descriptor
            .detail
            .as_ref()
            .and_then(Detail::to_text)
            .or_else(|| descriptor.error.clone())
    };

    if let Some(code) = descriptor.code.as_deref() {
        if let Some(message) = overrides.get(code).and_then(non_blank) {
            return message;
        }
        if code == VALIDATION_ERROR {
            return validation_message(descriptor);
        }
    }

    default_message
        .or_else(own_text)
        .unwrap_or_else(|| GENERIC_API_MESSAGE.to_string())
}

/// Validation messages are shown as the API wrote them, joined with `"; "`.
/// The caller's default never replaces them.
fn validation_message(descriptor: &ApiErrorDescriptor) -> String {
    descriptor
        .detail
        .as_ref()
        .filter(|detail| detail.to_text().is_some())
        .map(Detail::verbatim)
        .or_else(|| descriptor.error.clone())
        .unwrap_or_else(|| GENERIC_API_MESSAGE.to_string())
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
