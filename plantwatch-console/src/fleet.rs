//! Device and metric orchestration
//!
//! Owns the device list, the selected device and its chart series. Every
//! mutation is applied locally only after the server accepted it. Fetch
//! failures degrade to empty results; the gateway already told the operator.

use chrono::Utc;
use tracing::{error, info};

use crate::api::{self, TimeRange};
use crate::gateway::{ApiError, Gateway};
use crate::models::{Device, DeviceUpdate, MetricRecord, NewDevice, User};
use crate::normalize::normalize_history;
use crate::window::BoundedWindow;

pub const RECENT_LIMIT: u32 = 100;
pub const RANGED_LIMIT: u32 = 500;
pub const CHART_CAPACITY: usize = 50;

/// Which history to fetch for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub range: Option<TimeRange>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    /// Latest records, no range
    pub fn recent() -> Self {
        Self { range: None, limit: Some(RECENT_LIMIT) }
    }

    pub fn ranged(range: TimeRange) -> Self {
        Self { range: Some(range), limit: Some(RANGED_LIMIT) }
    }

    /// Ranged, letting the server pick the limit
    pub fn unbounded(range: TimeRange) -> Self {
        Self { range: Some(range), limit: None }
    }
}

/// Fetch and normalize one device's history, ascending by timestamp
pub async fn fetch_history(gateway: &Gateway, device_id: &str, query: HistoryQuery) -> Result<Vec<MetricRecord>, ApiError> {
    let items = match query.range {
        Some(range) => api::metric_filter(gateway, device_id, range, query.limit).await?,
        None => api::metric_history(gateway, device_id, query.limit.unwrap_or(RECENT_LIMIT)).await?,
    };
    let mut records = normalize_history(&items, Utc::now());
    if let Some(viewer) = gateway.session().user() {
        records.retain(|record| viewer.can_see(record.owner_id));
    }
    Ok(records)
}

/// Devices the viewer may see; administrators see everything
pub fn scope_devices(devices: Vec<Device>, viewer: &User) -> Vec<Device> {
    if viewer.is_admin() {
        return devices;
    }
    devices
        .into_iter()
        .filter(|device| viewer.can_see(Some(device.owner_id)))
        .collect()
}

pub struct Fleet {
    gateway: Gateway,
    devices: Vec<Device>,
    selected: Option<String>,
    series: BoundedWindow<MetricRecord>,
}

impl Fleet {
    pub fn new(gateway: Gateway) -> Self {
        Self::with_capacity(gateway, CHART_CAPACITY)
    }

    pub fn with_capacity(gateway: Gateway, chart_points: usize) -> Self {
        Self {
            gateway,
            devices: Vec::new(),
            selected: None,
            series: BoundedWindow::new(chart_points),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_device(&self) -> Option<&Device> {
        self.selected.as_deref().and_then(|id| self.device(id))
    }

    pub fn series(&self) -> &[MetricRecord] {
        self.series.as_slice()
    }

    /// Role-scoped device fetch, followed by selection sync
    pub async fn refresh_devices(&mut self) -> &[Device] {
        let Some(viewer) = self.gateway.session().user() else {
            self.devices.clear();
            self.selected = None;
            return &self.devices;
        };

        let fetched = if viewer.is_admin() {
            api::all_devices(&self.gateway).await
        } else {
            api::my_devices(&self.gateway).await
        };

        self.devices = match fetched {
            Ok(devices) => scope_devices(devices, &viewer),
            Err(e) => {
                error!("failed to fetch devices: {e}");
                Vec::new()
            }
        };
        self.sync_selection();
        &self.devices
    }

    /// Keep the selection pointing at a listed device
    fn sync_selection(&mut self) {
        let listed = self
            .selected
            .as_deref()
            .is_some_and(|id| self.devices.iter().any(|d| d.id == id));
        if !listed {
            let next = self.devices.first().map(|d| d.id.clone());
            if next != self.selected {
                self.series.clear();
            }
            self.selected = next;
        }
    }

    /// Select a listed device; the series is cleared until the next load
    pub fn select(&mut self, id: &str) -> bool {
        if self.device(id).is_none() {
            return false;
        }
        if self.selected.as_deref() != Some(id) {
            self.selected = Some(id.to_string());
            self.series.clear();
        }
        true
    }

    pub async fn add_device(&mut self, device: NewDevice) -> bool {
        let events = self.gateway.events().clone();
        match api::add_device(&self.gateway, &device).await {
            Ok(created) => {
                info!("device {} registered as {}", device.name, created.id);
                self.devices.insert(0, created);
                events.success(format!("Device {} successfully registered.", device.name));
                true
            }
            Err(e) => {
                error!("add device failed: {e}");
                events.error("Failed to register device.");
                false
            }
        }
    }

    pub async fn update_device(&mut self, id: &str, update: DeviceUpdate) -> bool {
        let events = self.gateway.events().clone();
        match api::update_device(&self.gateway, id, &update).await {
            Ok(updated) => {
                if let Some(slot) = self.devices.iter_mut().find(|d| d.id == id) {
                    *slot = updated;
                }
                events.success("Device configuration updated.");
                true
            }
            Err(e) => {
                error!("update device {id} failed: {e}");
                events.error("Failed to update device.");
                false
            }
        }
    }

    pub async fn remove_device(&mut self, id: &str) -> bool {
        let events = self.gateway.events().clone();
        match api::delete_device(&self.gateway, id).await {
            Ok(()) => {
                self.devices.retain(|d| d.id != id);
                self.sync_selection();
                events.success("Device removed from inventory.");
                true
            }
            Err(e) => {
                error!("remove device {id} failed: {e}");
                events.error("Failed to remove device.");
                false
            }
        }
    }

    /// Replace the series with the selected device's history
    pub async fn load_history(&mut self, query: HistoryQuery) -> &[MetricRecord] {
        let Some(device_id) = self.selected.clone() else {
            return self.series.as_slice();
        };

        let fetched = fetch_history(&self.gateway, &device_id, query).await;

        match fetched {
            Ok(records) => self.series.replace(records),
            Err(e) => {
                error!("failed to fetch history for {device_id}: {e}");
                self.series.clear();
            }
        }
        self.series.as_slice()
    }

    /// Merge a live record into the series of the selected device
    pub fn apply_live(&mut self, record: MetricRecord) -> bool {
        if self.selected.as_deref() != Some(record.device_id.as_str()) {
            return false;
        }
        let visible = self
            .gateway
            .session()
            .user()
            .is_some_and(|viewer| viewer.can_see(record.owner_id));
        if !visible {
            return false;
        }
        self.series.push(record);
        true
    }
}
