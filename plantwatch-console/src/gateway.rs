//! Authenticated HTTP gateway
//!
//! Every REST call goes through [`Gateway::dispatch`], which is the single
//! place where:
//! - the bearer token is attached (and refused locally when required but absent)
//! - a 401 expires the session and forces navigation to the login view
//! - a client-side timeout is reported as its own condition
//! - any other failure is turned into a message taken from the body

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::ApiConfig;
use crate::events::{Route, UiEvents};
use crate::session::SessionStore;

pub const SESSION_EXPIRED_MSG: &str = "Session expired. Please login again.";
pub const TIMEOUT_MSG: &str = "Connection timeout to the monitoring cluster.";
pub const GENERIC_ERROR_MSG: &str = "An API error occurred";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", SESSION_EXPIRED_MSG)]
    SessionExpired,
    #[error("{}", TIMEOUT_MSG)]
    Timeout,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("{message} (HTTP {status})")]
    Api {
        status: StatusCode,
        message: String,
        /// Raw `detail` field of the body, if any
        detail: Option<String>,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text shown to the operator
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api { message, .. } => message.clone(),
            ApiError::Network(_) | ApiError::Decode(_) => GENERIC_ERROR_MSG.to_string(),
            other => other.to_string(),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}

/// Authentication requirement of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Bearer token mandatory; failures are announced globally
    Required,
    /// No token sent; failures are left to the caller (login, register).
    /// Timeouts are still announced.
    Public,
}

#[derive(Clone)]
pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    session: SessionStore,
    events: UiEvents,
}

impl Gateway {
    pub fn new(api: &ApiConfig, session: SessionStore, events: UiEvents) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(api.timeout())
            .user_agent(concat!("plantwatch-console/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url().to_string(),
            session,
            events,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn events(&self) -> &UiEvents {
        &self.events
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.dispatch(self.request(Method::GET, path), Auth::Required).await
    }

    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.dispatch(self.request(Method::GET, path).query(query), Auth::Required)
            .await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.dispatch(self.request(Method::POST, path).json(body), Auth::Required)
            .await
    }

    pub async fn post_public<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.dispatch(self.request(Method::POST, path).json(body), Auth::Public)
            .await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.dispatch(self.request(Method::PUT, path).json(body), Auth::Required)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.dispatch(self.request(Method::DELETE, path), Auth::Required).await
    }

    /// Send one request and decode its JSON answer.
    ///
    /// An empty body decodes as JSON `null`, so `()` and `Value` both work
    /// for endpoints that answer 204.
    pub async fn dispatch<T: DeserializeOwned>(&self, builder: RequestBuilder, auth: Auth) -> Result<T, ApiError> {
        let builder = match auth {
            Auth::Required => match self.session.token() {
                Some(token) => builder.bearer_auth(token),
                None => return Err(ApiError::NotAuthenticated),
            },
            Auth::Public => builder,
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.transport_failure(e, auth)),
        };

        let status = response.status();
        let url = response.url().path().to_string();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Err(self.transport_failure(e, auth)),
        };

        if status == StatusCode::UNAUTHORIZED && auth == Auth::Required {
            // concurrent requests may all come back 401; only the first one
            // to clear the session notifies
            if self.session.expire() {
                warn!("{url}: authorization rejected, clearing session");
                self.events.error(SESSION_EXPIRED_MSG);
                self.events.navigate(Route::Login);
            }
            return Err(ApiError::SessionExpired);
        }

        if !status.is_success() {
            let message = error_message(&text);
            let detail = body_field(&text, &["detail"]);
            debug!("{url}: HTTP {status}: {message}");
            if auth == Auth::Required {
                self.events.error(message.clone());
            }
            return Err(ApiError::Api { status, message, detail });
        }

        let body = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| {
            error!("{url}: undecodable response: {e}");
            if auth == Auth::Required {
                self.events.error(GENERIC_ERROR_MSG);
            }
            ApiError::Decode(e.to_string())
        })
    }

    fn transport_failure(&self, e: reqwest::Error, auth: Auth) -> ApiError {
        if e.is_timeout() {
            warn!("request timed out: {e}");
            self.events.error(TIMEOUT_MSG);
            return ApiError::Timeout;
        }
        error!("request failed: {e}");
        if auth == Auth::Required {
            self.events.error(GENERIC_ERROR_MSG);
        }
        ApiError::Network(e)
    }
}

/// `message`, then `detail`, then the generic fallback
pub fn error_message(body: &str) -> String {
    body_field(body, &["message", "detail"]).unwrap_or_else(|| GENERIC_ERROR_MSG.to_string())
}

/// First non-empty string among `keys` in a JSON error body
pub(crate) fn body_field(body: &str, keys: &[&str]) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_then_detail() {
        assert_eq!(error_message(r#"{"message":"quota","detail":"x"}"#), "quota");
        assert_eq!(error_message(r#"{"detail":"Device not found"}"#), "Device not found");
        assert_eq!(error_message(r#"{"detail":[{"loc":["body"]}]}"#), GENERIC_ERROR_MSG);
        assert_eq!(error_message("<html>502</html>"), GENERIC_ERROR_MSG);
        assert_eq!(error_message(""), GENERIC_ERROR_MSG);
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(ApiError::Timeout.user_message(), TIMEOUT_MSG);
        assert_eq!(ApiError::SessionExpired.user_message(), SESSION_EXPIRED_MSG);
        assert_eq!(ApiError::Decode("eof".into()).user_message(), GENERIC_ERROR_MSG);
        let api = ApiError::Api { status: StatusCode::BAD_REQUEST, message: "bad name".into(), detail: None };
        assert_eq!(api.user_message(), "bad name");
        assert_eq!(api.status(), Some(StatusCode::BAD_REQUEST));
    }
}
