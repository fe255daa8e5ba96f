//! HTTP client for the console's account endpoints.
//!
//! Every call resolves to `Result<_, Failure>`: non-2xx responses become
//! [`Failure::Api`], request errors become [`Failure::Transport`], and bodies
//! that cannot be decoded become [`Failure::Unknown`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nexus_auth::{Capability, CapabilityResolver, CapabilitySet, UserIdentity};
use nexus_core::{ApiErrorBody, Detail, Failure};

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";
pub const ME_PATH: &str = "/api/v1/auth/me";
pub const MY_PERMISSIONS_PATH: &str = "/api/v1/auth/me/permissions";
pub const CHANGE_PASSWORD_PATH: &str = "/api/v1/auth/change-password";

/// Account operations the console shell needs from the API.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, Failure>;
    async fn logout(&self) -> Result<(), Failure>;
    async fn me(&self) -> Result<UserIdentity, Failure>;
    /// Exchange the refresh cookie for a new access cookie.
    async fn refresh(&self) -> Result<UserIdentity, Failure>;
    async fn change_password(&self, current: &str, new: &str) -> Result<(), Failure>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct ChangePasswordRequest<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Deserialize)]
struct PermissionsResponse {
    permissions: Vec<String>,
}

/// Cookie-authenticated client for the Nexus API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Capabilities the API currently grants the logged-in user.
    pub async fn my_capabilities(&self) -> Result<CapabilitySet, Failure> {
        let body: PermissionsResponse = self.fetch(self.http.get(self.url(MY_PERMISSIONS_PATH))).await?;
        Ok(body.permissions.into_iter().map(Capability::new).collect())
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Failure> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(|err| failure_from_reqwest(&err))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, Failure> {
        let response = request.send().await.map_err(|err| failure_from_reqwest(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = response.bytes().await.unwrap_or_default();
        let failure = failure_from_response(status.as_u16(), status.canonical_reason(), &body);
        tracing::debug!(status = status.as_u16(), path = %url, "api request failed");
        Err(failure)
    }
}

#[async_trait]
impl AccountApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, Failure> {
        let request = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { email, password });
        self.fetch(request).await
    }

    async fn logout(&self) -> Result<(), Failure> {
        self.execute(self.http.post(self.url(LOGOUT_PATH))).await?;
        Ok(())
    }

    async fn me(&self) -> Result<UserIdentity, Failure> {
        self.fetch(self.http.get(self.url(ME_PATH))).await
    }

    async fn refresh(&self) -> Result<UserIdentity, Failure> {
        self.fetch(self.http.post(self.url(REFRESH_PATH))).await
    }

    async fn change_password(&self, current: &str, new: &str) -> Result<(), Failure> {
        let request = self
            .http
            .post(self.url(CHANGE_PASSWORD_PATH))
            .json(&ChangePasswordRequest {
                current_password: current,
                new_password: new,
            });
        self.execute(request).await?;
        Ok(())
    }
}

/// Resolves capabilities by asking the API.
#[derive(Debug, Clone)]
pub struct HttpCapabilityResolver {
    client: Arc<ApiClient>,
}

impl HttpCapabilityResolver {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CapabilityResolver for HttpCapabilityResolver {
    async fn resolve(&self, identity: &UserIdentity) -> Result<CapabilitySet, Failure> {
        let granted = self.client.my_capabilities().await?;
        tracing::debug!(user_id = %identity.id, capabilities = granted.len(), "capabilities resolved");
        Ok(granted)
    }
}

/// Turn a non-2xx response into a [`Failure::Api`].
///
/// Bodies in the API's error shape are decoded as-is (falling back to the
/// HTTP status when theirs is missing). Anything else is synthesised from the
/// status line, keeping a `detail` or `code` field if the body has one.
pub fn failure_from_response(status: u16, reason: Option<&str>, body: &[u8]) -> Failure {
    let reason = reason.unwrap_or("Error");

    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        let text = String::from_utf8_lossy(body).trim().to_string();
        let mut synthesized = ApiErrorBody::new(status, reason);
        if !text.is_empty() && !text.starts_with('<') {
            synthesized = synthesized.with_detail(Detail::Single(text));
        }
        return Failure::Api(synthesized);
    };

    match Failure::from_value(value.clone()) {
        Failure::Api(mut decoded) => {
            if decoded.status_code == 0 {
                decoded.status_code = status;
            }
            Failure::Api(decoded)
        }
        _ => {
            let mut synthesized = ApiErrorBody::new(status, reason);
            if let Some(detail) = value
                .get("detail")
                .cloned()
                .and_then(|d| serde_json::from_value::<Detail>(d).ok())
            {
                synthesized = synthesized.with_detail(detail);
            }
            if let Some(code) = value.get("code").and_then(Value::as_str) {
                synthesized = synthesized.with_code(code);
            }
            Failure::Api(synthesized)
        }
    }
}

/// Map a reqwest error that produced no usable response.
pub fn failure_from_reqwest(err: &reqwest::Error) -> Failure {
    if err.is_decode() {
        Failure::from_error(err)
    } else {
        Failure::transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(failure: Failure) -> ApiErrorBody {
        match failure {
            Failure::Api(body) => body,
            other => panic!("expected api failure, got {other:?}"),
        }
    }

    #[test]
    fn api_shaped_body_is_kept() {
        let body = br#"{"error":"Error","detail":"bad creds","status_code":401,"code":"INVALID_CREDENTIALS"}"#;
        let decoded = api(failure_from_response(401, Some("Unauthorized"), body));
        assert_eq!(decoded.code.as_deref(), Some("INVALID_CREDENTIALS"));
        assert_eq!(decoded.detail, Some(Detail::Single("bad creds".into())));
        assert_eq!(decoded.status_code, 401);
    }

    #[test]
    fn garbled_status_falls_back_to_http_status() {
        let body = br#"{"error":"Error","status_code":null}"#;
        assert_eq!(api(failure_from_response(503, None, body)).status_code, 503);
    }

    #[test]
    fn framework_detail_body_is_synthesised() {
        let body = br#"{"detail":"Not authenticated"}"#;
        let decoded = api(failure_from_response(401, Some("Unauthorized"), body));
        assert_eq!(decoded.status_code, 401);
        assert_eq!(decoded.error, "Unauthorized");
        assert_eq!(decoded.detail, Some(Detail::Single("Not authenticated".into())));
        assert_eq!(decoded.code, None);
    }

    #[test]
    fn structured_validation_detail_is_dropped() {
        let body = br#"{"detail":[{"loc":["body","email"],"msg":"field required"}]}"#;
        let decoded = api(failure_from_response(422, Some("Unprocessable Entity"), body));
        assert_eq!(decoded.status_code, 422);
        assert_eq!(decoded.detail, None);
    }

    #[test]
    fn non_json_bodies() {
        let decoded = api(failure_from_response(502, Some("Bad Gateway"), b"upstream timed out"));
        assert_eq!(decoded.detail, Some(Detail::Single("upstream timed out".into())));

        let decoded = api(failure_from_response(502, Some("Bad Gateway"), b"<html>oops</html>"));
        assert_eq!(decoded.detail, None);

        let decoded = api(failure_from_response(500, None, b""));
        assert_eq!(decoded.error, "Error");
        assert_eq!(decoded.status_code, 500);
    }

    #[test]
    fn base_url_is_normalised() {
        let client = ApiClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url(ME_PATH), "http://localhost:8000/api/v1/auth/me");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        // Port 9 (discard) on loopback is not expected to accept HTTP.
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let failure = client.me().await.unwrap_err();
        assert!(matches!(failure, Failure::Transport { .. }), "{failure:?}");
    }
}
