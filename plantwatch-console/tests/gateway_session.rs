use std::time::Duration;
use tokio::sync::broadcast;

use plantwatch::analytics::{load_cards, CategoryFilter, DatePreset};
use plantwatch::auth::{self, AuthError};
use plantwatch::config::ApiConfig;
use plantwatch::gateway::{SESSION_EXPIRED_MSG, TIMEOUT_MSG};
use plantwatch::session::MemoryBackend;
use plantwatch::{api, ApiError, Fleet, Gateway, Role, Route, SessionStore, ToastLevel, UiEvent, UiEvents};
use plantwatch_devkit::test_utils::{TestHarness, ADMIN_EMAIL, OPERATOR_EMAIL, PASSWORD};
use plantwatch_devkit::StubApi;

fn client(url: String, timeout_secs: u64) -> (Gateway, broadcast::Receiver<UiEvent>) {
    let events = UiEvents::default();
    let rx = events.subscribe();
    let session = SessionStore::new(Box::new(MemoryBackend::default()));
    let config = ApiConfig { url, timeout_secs };
    (Gateway::new(&config, session, events).unwrap(), rx)
}

fn drain(rx: &mut broadcast::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn error_toasts(events: &[UiEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::Toast(t) if t.level == ToastLevel::Error => Some(t.message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_login_then_requests_carry_bearer_token() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 5);

    let user = auth::login(&gateway, OPERATOR_EMAIL, PASSWORD).await.unwrap();
    assert_eq!(user.role, Role::Standard);
    assert_eq!(user.id, harness.operator_id.to_string());
    assert_eq!(user.name, "Standard Operator");
    assert!(gateway.session().is_authenticated());

    let events = drain(&mut rx);
    assert!(events.contains(&UiEvent::Navigate(Route::Dashboard)));
    assert!(events.iter().any(|e| matches!(e, UiEvent::Toast(t) if t.message == "Welcome back, Standard Operator!")));

    api::my_devices(&gateway).await.unwrap();

    let login = harness.api.requests_to("/users/auth");
    assert_eq!(login.len(), 1);
    assert_eq!(login[0].authorization, None);

    let listed = harness.api.requests_to("/devices/my-devices");
    let expected = StubApi::token_for(harness.operator_id);
    assert_eq!(listed[0].bearer(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_unauthorized_response_expires_session_once() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 5);
    auth::login(&gateway, ADMIN_EMAIL, PASSWORD).await.unwrap();
    drain(&mut rx);

    harness.api.revoke_tokens();
    let err = api::all_devices(&gateway).await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert!(!gateway.session().is_authenticated());
    assert_eq!(gateway.session().token(), None);

    let events = drain(&mut rx);
    assert_eq!(error_toasts(&events), vec![SESSION_EXPIRED_MSG.to_string()]);
    assert!(events.contains(&UiEvent::Navigate(Route::Login)));

    // no stale token goes out after expiry
    let sent = harness.api.requests_to("/devices/admin/all").len();
    let err = api::all_devices(&gateway).await.unwrap_err();
    assert!(matches!(err, ApiError::NotAuthenticated));
    assert_eq!(harness.api.requests_to("/devices/admin/all").len(), sent);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_concurrent_unauthorized_responses_notify_once() {
    let harness = TestHarness::start().await.unwrap();
    harness.seed_fleet();
    let (gateway, mut rx) = client(harness.api_url(), 5);
    auth::login(&gateway, ADMIN_EMAIL, PASSWORD).await.unwrap();

    let mut fleet = Fleet::new(gateway.clone());
    assert_eq!(fleet.refresh_devices().await.len(), 3);
    drain(&mut rx);

    harness.api.revoke_tokens();
    let range = DatePreset::LastHour.resolve(chrono::Utc::now());
    let cards = load_cards(&gateway, fleet.devices(), CategoryFilter::All, range, 200).await;
    assert_eq!(cards.len(), 3);
    assert!(cards.iter().all(|c| c.is_empty()));

    // all three fetches went out with the revoked token
    let rejected = harness
        .api
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with("/monitoring/filter/") && r.bearer().is_some())
        .count();
    assert_eq!(rejected, 3);

    let events = drain(&mut rx);
    assert_eq!(error_toasts(&events), vec![SESSION_EXPIRED_MSG.to_string()]);
    let navigations = events.iter().filter(|e| **e == UiEvent::Navigate(Route::Login)).count();
    assert_eq!(navigations, 1);
    assert!(!gateway.session().is_authenticated());
}

#[tokio::test]
async fn test_rejected_login_shows_server_detail() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 5);

    let err = auth::login(&gateway, OPERATOR_EMAIL, "wrong").await.unwrap_err();
    match err {
        AuthError::Rejected(message) => assert_eq!(message, "Invalid email or password"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!gateway.session().is_authenticated());

    let toasts = error_toasts(&drain(&mut rx));
    assert_eq!(toasts, vec!["Invalid email or password".to_string()]);
}

#[tokio::test]
async fn test_register_checks_confirmation_locally() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, _rx) = client(harness.api_url(), 5);

    let err = auth::register(&gateway, "new@plant.io", "one", "two").await.unwrap_err();
    assert!(matches!(err, AuthError::PasswordMismatch));
    assert!(harness.api.requests_to("/users/add").is_empty());

    auth::register(&gateway, "new@plant.io", "pw", "pw").await.unwrap();
    let user = auth::login(&gateway, "new@plant.io", "pw").await.unwrap();
    assert_eq!(user.email, "new@plant.io");

    let err = auth::register(&gateway, "new@plant.io", "pw", "pw").await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected(ref m) if m == "Email already registered"));
}

#[tokio::test]
async fn test_forbidden_keeps_session_and_toasts_message() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 5);
    auth::login(&gateway, OPERATOR_EMAIL, PASSWORD).await.unwrap();
    drain(&mut rx);

    let err = api::list_users(&gateway).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(403));
    assert!(gateway.session().is_authenticated());
    assert_eq!(error_toasts(&drain(&mut rx)), vec!["Admin privileges required".to_string()]);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 1);
    auth::login(&gateway, OPERATOR_EMAIL, PASSWORD).await.unwrap();
    drain(&mut rx);

    harness.api.set_delay(Some(Duration::from_millis(2500)));
    let err = api::my_devices(&gateway).await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout));
    assert!(gateway.session().is_authenticated());
    assert_eq!(error_toasts(&drain(&mut rx)), vec![TIMEOUT_MSG.to_string()]);
}

#[tokio::test]
async fn test_logout_clears_session_and_navigates() {
    let harness = TestHarness::start().await.unwrap();
    let (gateway, mut rx) = client(harness.api_url(), 5);
    auth::login(&gateway, OPERATOR_EMAIL, PASSWORD).await.unwrap();
    drain(&mut rx);

    auth::logout(&gateway).unwrap();
    assert!(!gateway.session().is_authenticated());
    assert_eq!(drain(&mut rx), vec![UiEvent::Navigate(Route::Login)]);
    assert_eq!(Route::resolve(Route::Devices, gateway.session()), Route::Login);
}
