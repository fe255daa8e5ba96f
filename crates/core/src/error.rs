//! Failure model for everything crossing the API boundary.
//!
//! A failed call can surface almost anything: a structured error body from the
//! API, a transport error with no response at all, or some unrelated value.
//! [`Failure`] is the closed set those are folded into, and
//! [`Failure::from_value`] is the only place that inspects raw JSON shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An identifier failed to parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct InvalidId(pub String);

/// Human-readable detail attached to an API error.
///
/// Validation failures carry one message per offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    Single(String),
    Many(Vec<String>),
}

impl Detail {
    /// The messages exactly as sent, joined with `"; "`.
    pub fn verbatim(&self) -> String {
        match self {
            Detail::Single(s) => s.clone(),
            Detail::Many(items) => items.join("; "),
        }
    }

    /// Render as a single line; multiple messages are joined with `"; "`.
    ///
    /// Returns `None` when there is nothing non-blank to show.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Detail::Single(s) => s.trim().to_string(),
            Detail::Many(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// The API's error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default)]
    pub detail: Option<Detail>,
    pub status_code: u16,
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiErrorBody {
    pub fn new(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
            status_code,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Any failure value reaching the error pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// No structured response (network unreachable, timeout, refused).
    Transport { message: String },
    /// Structured error returned by the API.
    Api(ApiErrorBody),
    /// Anything else; `message` is whatever text could be extracted.
    Unknown { message: Option<String> },
}

impl Failure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: Some(message.into()),
        }
    }

    /// Wrap an arbitrary error, keeping only its display text.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::unknown(err.to_string())
    }

    /// Fold a raw JSON value into a [`Failure`].
    ///
    /// An object carrying both `error` and `status_code` is an API error; its
    /// fields are read leniently so a slightly malformed body still keeps its
    /// status code. Objects with a string `message` and bare strings keep that
    /// text. Everything else becomes `Unknown` with no message.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key("error") && map.contains_key("status_code") => {
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let status_code = map.get("status_code").and_then(status_from_value).unwrap_or(0);
                let detail = map
                    .get("detail")
                    .cloned()
                    .and_then(|d| serde_json::from_value::<Detail>(d).ok());
                let code = map
                    .get("code")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Self::Api(ApiErrorBody {
                    error,
                    detail,
                    status_code,
                    code,
                })
            }
            Value::Object(map) => Self::Unknown {
                message: map.get("message").and_then(Value::as_str).map(str::to_string),
            },
            Value::String(s) => Self::Unknown { message: Some(s) },
            _ => Self::Unknown { message: None },
        }
    }

    pub fn is_api_error(&self) -> bool {
        matches!(self, Failure::Api(_))
    }

    pub fn as_api(&self) -> Option<&ApiErrorBody> {
        match self {
            Failure::Api(body) => Some(body),
            _ => None,
        }
    }
}

impl From<ApiErrorBody> for Failure {
    fn from(value: ApiErrorBody) -> Self {
        Self::Api(value)
    }
}

impl core::fmt::Display for Failure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Failure::Transport { message } => write!(f, "transport failure: {message}"),
            Failure::Api(body) => match &body.code {
                Some(code) => write!(f, "api error {} ({code}): {}", body.status_code, body.error),
                None => write!(f, "api error {}: {}", body.status_code, body.error),
            },
            Failure::Unknown { message: Some(m) } => write!(f, "failure: {m}"),
            Failure::Unknown { message: None } => f.write_str("unknown failure"),
        }
    }
}

fn status_from_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_shaped_value_is_recognised() {
        let failure = Failure::from_value(json!({
            "error": "Error",
            "detail": ["email required", "name required"],
            "status_code": 422,
            "code": "VALIDATION_ERROR"
        }));

        let Failure::Api(body) = failure else {
            panic!("expected api failure");
        };
        assert_eq!(body.status_code, 422);
        assert_eq!(body.code.as_deref(), Some("VALIDATION_ERROR"));
        assert_eq!(
            body.detail,
            Some(Detail::Many(vec!["email required".into(), "name required".into()]))
        );
    }

    #[test]
    fn status_code_as_string_is_tolerated() {
        let failure = Failure::from_value(json!({"error": "Nope", "status_code": "401"}));
        assert_eq!(failure.as_api().map(|b| b.status_code), Some(401));
    }

    #[test]
    fn garbled_detail_is_dropped_not_fatal() {
        let failure = Failure::from_value(json!({"error": "x", "status_code": 400, "detail": {"a": 1}}));
        assert_eq!(failure.as_api().and_then(|b| b.detail.clone()), None);
    }

    #[test]
    fn value_missing_status_code_is_not_an_api_error() {
        let failure = Failure::from_value(json!({"detail": "Bad Gateway"}));
        assert_eq!(failure, Failure::Unknown { message: None });
        assert!(!failure.is_api_error());
    }

    #[test]
    fn exception_like_values_keep_their_message() {
        assert_eq!(
            Failure::from_value(json!({"message": "boom"})),
            Failure::unknown("boom")
        );
        assert_eq!(Failure::from_value(json!("plain")), Failure::unknown("plain"));
        assert_eq!(Failure::from_value(Value::Null), Failure::Unknown { message: None });
    }

    #[test]
    fn detail_text_joins_and_skips_blanks() {
        let detail = Detail::Many(vec!["a".into(), " ".into(), "b".into()]);
        assert_eq!(detail.to_text().as_deref(), Some("a; b"));
        assert_eq!(Detail::Single("   ".into()).to_text(), None);
        assert_eq!(detail.verbatim(), "a;  ; b");
    }

    #[test]
    fn foreign_errors_keep_their_text() {
        let err = serde_json::from_str::<Value>("{").unwrap_err();
        let expected = err.to_string();
        assert_eq!(Failure::from_error(&err), Failure::unknown(expected));
    }
}
