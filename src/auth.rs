//! HTTP client for creating CLI sessions.
//!
//! `authorize` is a single form-encoded POST against the sessions endpoint.
//! Failures are fatal and surfaced with the raw response body; there is no
//! retry here by design of the delivery service.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE,
    USER_AGENT,
};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::info;

use crate::listener::proto::Session;

/// Production API endpoint for session creation.
pub const API_BASE_URL: &str = "https://api.stripe.com";
/// Path of the session-creation call.
pub const SESSION_PATH: &str = "/v1/stripecli/sessions";
/// CLI version advertised in the identity headers.
pub const CLI_VERSION: &str = "1.21.0";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced by the authorization exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Request never produced a usable response.
    #[error("authorize request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response; `body` is the raw response body, verbatim.
    #[error("authorize failed (http {status}): {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// Response body did not decode into a session.
    #[error("failed to decode session: {0}")]
    Decode(#[from] serde_json::Error),

    /// A header value could not be constructed.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Client for `POST /v1/stripecli/sessions`.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl AuthClient {
    pub fn new(api_key: SecretString) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(AuthError::Transport)?;

        Ok(Self {
            http,
            api_key,
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Sets an explicit API base URL override.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// API base URL in effect for the authorize call.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a CLI session.
    ///
    /// Sends `device_name` and one `websocket_features[]` entry per requested
    /// feature. The bearer token is attached to this call only; the websocket
    /// dial reuses the identity headers without it.
    pub async fn authorize(
        &self,
        device_name: &str,
        websocket_features: &[String],
    ) -> Result<Session, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![("device_name", device_name)];
        for feature in websocket_features {
            form.push(("websocket_features[]", feature));
        }

        let mut headers = identity_headers()?;
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        let response = self
            .http
            .post(format!("{}{}", self.base_url, SESSION_PATH))
            .headers(headers)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::HttpStatus { status, body });
        }

        let session: Session = serde_json::from_str(&body)?;
        info!(
            event = "session_created",
            websocket_id = %session.websocket_id,
            feature = %session.websocket_authorized_feature,
        );
        Ok(session)
    }
}

/// Builds the identity headers shared by the authorize call and the dial.
pub(crate) fn identity_headers() -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("Stripe/v1 stripe-cli/{CLI_VERSION}"))?,
    );

    let identity = serde_json::json!({
        "name": "stripe-cli",
        "version": CLI_VERSION,
        "publisher": "stripe",
        "os": std::env::consts::OS,
        "uname": format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
    });
    headers.insert(
        "X-Stripe-Client-User-Agent",
        HeaderValue::from_str(&identity.to_string())?,
    );

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{identity_headers, AuthClient, API_BASE_URL, CLI_VERSION};

    fn client() -> AuthClient {
        AuthClient::new(SecretString::new("sk_test_123".to_string())).expect("build client")
    }

    #[test]
    fn uses_production_base_url_by_default() {
        assert_eq!(client().base_url(), API_BASE_URL);
    }

    #[test]
    fn base_url_override_strips_trailing_slash() {
        let client = client().with_base_url("http://127.0.0.1:9900/");
        assert_eq!(client.base_url(), "http://127.0.0.1:9900");
    }

    #[test]
    fn identity_headers_carry_wire_contract() {
        let headers = identity_headers().expect("build headers");
        assert_eq!(
            headers.get("Accept-Encoding").and_then(|v| v.to_str().ok()),
            Some("identity")
        );
        assert_eq!(
            headers.get("User-Agent").and_then(|v| v.to_str().ok()),
            Some(format!("Stripe/v1 stripe-cli/{CLI_VERSION}").as_str())
        );

        let identity = headers
            .get("X-Stripe-Client-User-Agent")
            .and_then(|v| v.to_str().ok())
            .expect("client identity header");
        let parsed: serde_json::Value = serde_json::from_str(identity).expect("identity is JSON");
        assert_eq!(parsed["name"], "stripe-cli");
        assert_eq!(parsed["publisher"], "stripe");
        assert_eq!(parsed["version"], CLI_VERSION);
        assert!(parsed["os"].is_string());
    }
}
