//! PlantWatch Console - operator client for the PlantWatch IoT platform
//!
//! Everything the operator sees is computed remotely; this crate only talks to
//! the platform and shapes what comes back:
//! - Session lifecycle (login, logout, expiry) with durable storage
//! - Authenticated REST gateway with global error handling
//! - Realtime telemetry stream (Socket.IO over WebSocket) with bounded reconnect
//! - Metric normalization into one canonical record
//! - Device inventory, history windows, analytics sampling and live logs
//! - Terminal views for the `plantwatch` binary

pub mod analytics;
pub mod api;
pub mod auth;
pub mod config;
pub mod engineio;
pub mod events;
pub mod fleet;
pub mod gateway;
pub mod inventory;
pub mod logs;
pub mod models;
pub mod normalize;
pub mod realtime;
pub mod session;
pub mod views;
pub mod window;

pub use config::ConsoleConfig;
pub use events::{Route, Toast, ToastLevel, UiEvent, UiEvents};
pub use fleet::{Fleet, HistoryQuery};
pub use gateway::{ApiError, Gateway};
pub use models::{Device, DeviceCategory, DeviceStatus, MetricRecord, Role, User};
pub use realtime::{ConnectionState, RealtimeHandle, RealtimeOptions};
pub use session::{Session, SessionStore};
pub use window::BoundedWindow;
