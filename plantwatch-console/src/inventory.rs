//! Device inventory view model: search, status filter, column sort, KPIs

use std::str::FromStr;

use crate::models::{Device, DeviceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Online,
    Maintenance,
    Offline,
}

impl StatusFilter {
    pub fn matches(self, status: DeviceStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Online => status == DeviceStatus::Online,
            StatusFilter::Maintenance => status == DeviceStatus::Maintenance,
            StatusFilter::Offline => status == DeviceStatus::Offline,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "online" => Ok(StatusFilter::Online),
            "maintenance" => Ok(StatusFilter::Maintenance),
            "offline" => Ok(StatusFilter::Offline),
            other => Err(format!("unknown status {other:?}, expected all, online, maintenance or offline")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Name,
    Category,
    Type,
    Status,
    Owner,
    LastSeen,
}

impl SortKey {
    /// Column value as compared by the table (plain string order)
    fn text(self, device: &Device) -> String {
        match self {
            SortKey::Id => device.id.clone(),
            SortKey::Name => device.name.clone(),
            SortKey::Category => device.category.as_str().to_string(),
            SortKey::Type => device.device_type.as_str().to_string(),
            SortKey::Status => device.status.as_str().to_string(),
            SortKey::Owner => device.owner_id.to_string(),
            SortKey::LastSeen => device.last_seen.clone().unwrap_or_default(),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(SortKey::Id),
            "name" => Ok(SortKey::Name),
            "category" => Ok(SortKey::Category),
            "type" => Ok(SortKey::Type),
            "status" => Ok(SortKey::Status),
            "owner" | "owner_id" => Ok(SortKey::Owner),
            "last_seen" | "last-seen" => Ok(SortKey::LastSeen),
            other => Err(format!("unknown sort column {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortConfig {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self { key: SortKey::Name, direction: SortDirection::Asc }
    }
}

impl SortConfig {
    /// Clicking a column: same ascending column flips to descending,
    /// anything else sorts ascending.
    pub fn toggle(self, key: SortKey) -> Self {
        let direction = if self.key == key && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        Self { key, direction }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InventoryQuery {
    pub search: String,
    pub status: StatusFilter,
    pub sort: Option<SortConfig>,
}

impl InventoryQuery {
    /// Filtered and sorted view of `devices`. The sort is stable.
    pub fn apply<'a>(&self, devices: &'a [Device]) -> Vec<&'a Device> {
        let needle = self.search.trim().to_lowercase();
        let mut rows: Vec<&Device> = devices
            .iter()
            .filter(|d| {
                needle.is_empty()
                    || d.name.to_lowercase().contains(&needle)
                    || d.id.to_lowercase().contains(&needle)
            })
            .filter(|d| self.status.matches(d.status))
            .collect();

        if let Some(sort) = self.sort {
            rows.sort_by(|a, b| {
                let ord = sort.key.text(a).cmp(&sort.key.text(b));
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        rows
    }
}

/// Dashboard KPI block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kpis {
    pub active_devices: usize,
    /// Devices whose status is anything but online
    pub critical: usize,
}

impl Kpis {
    pub fn from_devices(devices: &[Device]) -> Self {
        Self {
            active_devices: devices.len(),
            critical: devices.iter().filter(|d| d.status != DeviceStatus::Online).count(),
        }
    }
}
