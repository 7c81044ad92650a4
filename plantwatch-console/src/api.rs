//! Typed REST endpoints of the platform

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::{ApiError, Gateway};
use crate::models::{
    AuthResponse, Credentials, Device, DeviceUpdate, NewDevice, UserRecord, WeatherReport,
};

/// Inclusive time range of a filtered history query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// History answers come either bare or wrapped in `{ "history": [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryPayload {
    Wrapped { history: Vec<Value> },
    Bare(Vec<Value>),
}

impl HistoryPayload {
    pub fn into_items(self) -> Vec<Value> {
        match self {
            HistoryPayload::Wrapped { history } => history,
            HistoryPayload::Bare(items) => items,
        }
    }
}

#[derive(Serialize)]
struct FilterQuery {
    start: String,
    end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn authenticate(gateway: &Gateway, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
    gateway.post_public("/users/auth", credentials).await
}

pub async fn register(gateway: &Gateway, credentials: &Credentials) -> Result<Value, ApiError> {
    gateway.post_public("/users/add", credentials).await
}

pub async fn list_users(gateway: &Gateway) -> Result<Vec<UserRecord>, ApiError> {
    gateway.get("/users/").await
}

pub async fn my_devices(gateway: &Gateway) -> Result<Vec<Device>, ApiError> {
    gateway.get("/devices/my-devices").await
}

pub async fn all_devices(gateway: &Gateway) -> Result<Vec<Device>, ApiError> {
    gateway.get("/devices/admin/all").await
}

pub async fn add_device(gateway: &Gateway, device: &NewDevice) -> Result<Device, ApiError> {
    gateway.post("/devices/add", device).await
}

pub async fn update_device(gateway: &Gateway, id: &str, update: &DeviceUpdate) -> Result<Device, ApiError> {
    gateway.put(&format!("/devices/{id}"), update).await
}

pub async fn delete_device(gateway: &Gateway, id: &str) -> Result<(), ApiError> {
    let _: Value = gateway.delete(&format!("/devices/{id}")).await?;
    Ok(())
}

pub async fn metric_history(gateway: &Gateway, device_id: &str, limit: u32) -> Result<Vec<Value>, ApiError> {
    let payload: HistoryPayload = gateway
        .get_query(&format!("/monitoring/history/{device_id}"), &[("limit", limit)])
        .await?;
    Ok(payload.into_items())
}

pub async fn metric_filter(
    gateway: &Gateway,
    device_id: &str,
    range: TimeRange,
    limit: Option<u32>,
) -> Result<Vec<Value>, ApiError> {
    let query = FilterQuery {
        start: iso(range.start),
        end: iso(range.end),
        limit,
    };
    let payload: HistoryPayload = gateway
        .get_query(&format!("/monitoring/filter/{device_id}"), &query)
        .await?;
    Ok(payload.into_items())
}

pub async fn current_weather(gateway: &Gateway) -> Result<WeatherReport, ApiError> {
    gateway.get("/monitoring/weather/current").await
}
