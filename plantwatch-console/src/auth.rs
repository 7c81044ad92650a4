//! Login, registration and logout flows
//!
//! Authentication failures stay inline: the gateway does not announce them,
//! these flows do, with the server `detail` when there is one.

use tracing::{error, info};

use crate::api;
use crate::events::Route;
use crate::gateway::{ApiError, Gateway};
use crate::models::{AuthResponse, Credentials, Role, User};
use crate::session::{Session, SessionError};

pub const LOGIN_FAILED_MSG: &str = "Authentication failed. Please check your credentials.";
pub const REGISTER_FAILED_MSG: &str = "Registration failed. This email might already be in use.";
pub const PASSWORD_MISMATCH_MSG: &str = "Passwords do not match.";
pub const REGISTERED_MSG: &str = "Registration successful! Please log in.";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{}", PASSWORD_MISMATCH_MSG)]
    PasswordMismatch,
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not persist session: {0}")]
    Storage(#[from] SessionError),
}

/// Build the session user from the token claims
pub fn user_from_claims(response: &AuthResponse) -> User {
    let role = Role::from(response.payload.role);
    User {
        id: response.payload.user_id.clone(),
        email: response.payload.sub.clone(),
        role,
        name: role.display_name().to_string(),
    }
}

pub async fn login(gateway: &Gateway, email: &str, password: &str) -> Result<User, AuthError> {
    let credentials = Credentials { email: email.trim().to_string(), password: password.to_string() };
    let events = gateway.events();

    let response = match api::authenticate(gateway, &credentials).await {
        Ok(response) => response,
        Err(ApiError::Timeout) => return Err(ApiError::Timeout.into()),
        Err(e) => {
            error!("login error: {e}");
            let message = e.detail().unwrap_or(LOGIN_FAILED_MSG).to_string();
            events.error(message.clone());
            return Err(AuthError::Rejected(message));
        }
    };

    let user = user_from_claims(&response);
    gateway.session().login(Session { token: response.token, user: user.clone() })?;
    info!("logged in as {} ({})", user.email, user.role.title());

    events.success(format!("Welcome back, {}!", user.name));
    events.navigate(Route::Dashboard);
    Ok(user)
}

pub async fn register(gateway: &Gateway, email: &str, password: &str, confirm: &str) -> Result<(), AuthError> {
    let events = gateway.events();
    if password != confirm {
        events.error(PASSWORD_MISMATCH_MSG);
        return Err(AuthError::PasswordMismatch);
    }

    let credentials = Credentials { email: email.trim().to_string(), password: password.to_string() };
    match api::register(gateway, &credentials).await {
        Ok(_) => {
            events.success(REGISTERED_MSG);
            events.navigate(Route::Login);
            Ok(())
        }
        Err(ApiError::Timeout) => Err(ApiError::Timeout.into()),
        Err(e) => {
            error!("register error: {e}");
            let message = e.detail().unwrap_or(REGISTER_FAILED_MSG).to_string();
            events.error(message.clone());
            Err(AuthError::Rejected(message))
        }
    }
}

pub fn logout(gateway: &Gateway) -> Result<(), SessionError> {
    let result = gateway.session().logout();
    gateway.events().navigate(Route::Login);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::events::{UiEvent, UiEvents};
    use crate::models::AuthClaims;
    use crate::session::{MemoryBackend, SessionStore};

    #[test]
    fn test_user_from_claims() {
        let response = AuthResponse {
            token: "jwt".into(),
            payload: AuthClaims { user_id: "17".into(), sub: "lead@plant.io".into(), role: false },
        };
        let user = user_from_claims(&response);
        assert_eq!(user.id, "17");
        assert_eq!(user.email, "lead@plant.io");
        assert_eq!(user.role, Role::Standard);
        assert_eq!(user.name, "Standard Operator");
    }

    #[tokio::test]
    async fn test_password_mismatch_sends_nothing() {
        let events = UiEvents::default();
        let mut rx = events.subscribe();
        let api = ApiConfig { url: "http://127.0.0.1:9".into(), timeout_secs: 1 };
        let gateway = Gateway::new(&api, SessionStore::new(Box::new(MemoryBackend::default())), events).unwrap();

        let err = register(&gateway, "a@b.c", "one", "two").await.unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));
        match rx.recv().await.unwrap() {
            UiEvent::Toast(toast) => assert_eq!(toast.message, PASSWORD_MISMATCH_MSG),
            other => panic!("unexpected {other:?}"),
        }
    }
}
