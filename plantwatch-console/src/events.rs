//! UI side effects: transient notifications and forced navigation
//!
//! The gateway and the orchestration layer never print; they publish here and
//! whoever renders (the CLI, a test) subscribes.

use tokio::sync::broadcast;
use tracing::debug;

use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Devices,
    Analytics,
    AdminUsers,
    Settings,
}

impl Route {
    pub fn requires_auth(self) -> bool {
        !matches!(self, Route::Login | Route::Register)
    }

    pub fn requires_admin(self) -> bool {
        self == Route::AdminUsers
    }

    /// Where a request for `requested` actually lands for this session
    pub fn resolve(requested: Route, session: &SessionStore) -> Route {
        match session.user() {
            None if requested.requires_auth() => Route::Login,
            None => requested,
            Some(_) if !requested.requires_auth() => Route::Dashboard,
            Some(user) if requested.requires_admin() && !user.is_admin() => Route::Dashboard,
            Some(_) => requested,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/",
            Route::Devices => "/devices",
            Route::Analytics => "/analytics",
            Route::AdminUsers => "/admin/users",
            Route::Settings => "/settings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Toast(Toast),
    Navigate(Route),
}

/// Cloneable publisher; events with no subscriber are dropped.
#[derive(Debug, Clone)]
pub struct UiEvents {
    tx: broadcast::Sender<UiEvent>,
}

impl Default for UiEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

impl UiEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            debug!("ui event dropped: no subscriber");
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.toast(ToastLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.toast(ToastLevel::Error, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.toast(ToastLevel::Info, message);
    }

    pub fn navigate(&self, route: Route) {
        self.publish(UiEvent::Navigate(route));
    }

    fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.publish(UiEvent::Toast(Toast { level, message: message.into() }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, User};
    use crate::session::{MemoryBackend, Session};

    fn store_with(role: Option<Role>) -> SessionStore {
        let store = SessionStore::new(Box::new(MemoryBackend::default()));
        if let Some(role) = role {
            let user = User { id: "1".into(), email: "op@plant.io".into(), role, name: role.display_name().into() };
            store.login(Session { token: "t".into(), user }).unwrap();
        }
        store
    }

    #[test]
    fn test_routes_without_session() {
        let store = store_with(None);
        assert_eq!(Route::resolve(Route::Devices, &store), Route::Login);
        assert_eq!(Route::resolve(Route::Register, &store), Route::Register);
    }

    #[test]
    fn test_admin_page_is_admin_only() {
        assert_eq!(Route::resolve(Route::AdminUsers, &store_with(Some(Role::Standard))), Route::Dashboard);
        assert_eq!(Route::resolve(Route::AdminUsers, &store_with(Some(Role::Admin))), Route::AdminUsers);
        assert_eq!(Route::resolve(Route::Login, &store_with(Some(Role::Admin))), Route::Dashboard);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let events = UiEvents::default();
        let mut rx = events.subscribe();
        events.error("boom");
        events.navigate(Route::Login);

        assert_eq!(
            rx.recv().await.unwrap(),
            UiEvent::Toast(Toast { level: ToastLevel::Error, message: "boom".into() })
        );
        assert_eq!(rx.recv().await.unwrap(), UiEvent::Navigate(Route::Login));
    }

    #[test]
    fn test_publish_without_subscriber_is_silent() {
        UiEvents::new(1).info("nobody listens");
    }
}
