//! Fleet analytics: date presets, category filter and per-device sampled history

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use tracing::error;

use crate::api::TimeRange;
use crate::fleet::{fetch_history, HistoryQuery};
use crate::gateway::Gateway;
use crate::models::{Device, DeviceCategory, MetricRecord};

pub const SAMPLE_TARGET: usize = 200;

/// Index step that brings `len` points down to about `target`
pub fn stride(len: usize, target: usize) -> usize {
    if target == 0 || len <= target {
        1
    } else {
        len.div_ceil(target)
    }
}

/// Keep every `stride`-th point, starting with the first. No averaging.
pub fn downsample<T: Clone>(points: &[T], target: usize) -> Vec<T> {
    let step = stride(points.len(), target);
    points.iter().step_by(step).cloned().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    Last2Minutes,
    Last5Minutes,
    Last15Minutes,
    Last30Minutes,
    LastHour,
    Last6Hours,
    Last24Hours,
    Last7Days,
    Last30Days,
    Today,
    Yesterday,
}

impl DatePreset {
    pub const ALL: [DatePreset; 11] = [
        DatePreset::Last2Minutes,
        DatePreset::Last5Minutes,
        DatePreset::Last15Minutes,
        DatePreset::Last30Minutes,
        DatePreset::LastHour,
        DatePreset::Last6Hours,
        DatePreset::Last24Hours,
        DatePreset::Last7Days,
        DatePreset::Last30Days,
        DatePreset::Today,
        DatePreset::Yesterday,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DatePreset::Last2Minutes => "2m",
            DatePreset::Last5Minutes => "5m",
            DatePreset::Last15Minutes => "15m",
            DatePreset::Last30Minutes => "30m",
            DatePreset::LastHour => "1h",
            DatePreset::Last6Hours => "6h",
            DatePreset::Last24Hours => "24h",
            DatePreset::Last7Days => "7d",
            DatePreset::Last30Days => "30d",
            DatePreset::Today => "today",
            DatePreset::Yesterday => "yesterday",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DatePreset::Last2Minutes => "Last 2 Minutes",
            DatePreset::Last5Minutes => "Last 5 Minutes",
            DatePreset::Last15Minutes => "Last 15 Minutes",
            DatePreset::Last30Minutes => "Last 30 Minutes",
            DatePreset::LastHour => "Last Hour",
            DatePreset::Last6Hours => "Last 6 Hours",
            DatePreset::Last24Hours => "Last 24 Hours",
            DatePreset::Last7Days => "Last 7 Days",
            DatePreset::Last30Days => "Last 30 Days",
            DatePreset::Today => "Today",
            DatePreset::Yesterday => "Yesterday",
        }
    }

    /// Range ending at `now`. `Today`/`Yesterday` follow the calendar of
    /// `now`'s timezone.
    pub fn resolve<Tz: TimeZone>(self, now: DateTime<Tz>) -> TimeRange {
        let end = now.with_timezone(&Utc);
        let back = |d: Duration| TimeRange::new(end - d, end);
        match self {
            DatePreset::Last2Minutes => back(Duration::minutes(2)),
            DatePreset::Last5Minutes => back(Duration::minutes(5)),
            DatePreset::Last15Minutes => back(Duration::minutes(15)),
            DatePreset::Last30Minutes => back(Duration::minutes(30)),
            DatePreset::LastHour => back(Duration::hours(1)),
            DatePreset::Last6Hours => back(Duration::hours(6)),
            DatePreset::Last24Hours => back(Duration::hours(24)),
            DatePreset::Last7Days => back(Duration::days(7)),
            DatePreset::Last30Days => back(Duration::days(30)),
            DatePreset::Today => {
                let start = local_midnight(&now, 0).unwrap_or(end);
                TimeRange::new(start, end)
            }
            DatePreset::Yesterday => {
                let start = local_midnight(&now, 1).unwrap_or(end);
                let end = local_midnight(&now, 0)
                    .map(|midnight| midnight - Duration::milliseconds(1))
                    .unwrap_or(end);
                TimeRange::new(start, end)
            }
        }
    }
}

/// Midnight `days_back` days before `now`, in `now`'s timezone
fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>, days_back: u64) -> Option<DateTime<Utc>> {
    let day = now.date_naive().checked_sub_days(Days::new(days_back))?;
    now.timezone()
        .from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for DatePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DatePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DatePreset::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(wanted) || p.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let keys: Vec<_> = DatePreset::ALL.iter().map(|p| p.key()).collect();
                format!("unknown range {wanted:?}, expected one of {}", keys.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(DeviceCategory),
}

impl CategoryFilter {
    pub fn matches(self, device: &Device) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(category) => device.category == category,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CategoryFilter::All => "All nodes",
            CategoryFilter::Only(DeviceCategory::IotDevice) => "IoT Sensors",
            CategoryFilter::Only(DeviceCategory::EndDevice) => "Workstations",
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(CategoryFilter::All),
            "iot_device" | "iot" => Ok(CategoryFilter::Only(DeviceCategory::IotDevice)),
            "end_device" | "end" => Ok(CategoryFilter::Only(DeviceCategory::EndDevice)),
            other => Err(format!("unknown category {other:?}, expected all, iot_device or end_device")),
        }
    }
}

/// One device's sampled history for the analytics grid
#[derive(Debug, Clone)]
pub struct AnalyticsCard {
    pub device: Device,
    pub points: Vec<MetricRecord>,
    /// Size of the series before sampling
    pub fetched: usize,
}

impl AnalyticsCard {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Fetch the cards of every device matching `filter`, concurrently.
/// A failed fetch yields an empty card.
pub async fn load_cards(
    gateway: &Gateway,
    devices: &[Device],
    filter: CategoryFilter,
    range: TimeRange,
    target: usize,
) -> Vec<AnalyticsCard> {
    let fetches = devices.iter().filter(|d| filter.matches(d)).map(|device| async move {
        let series = match fetch_history(gateway, &device.id, HistoryQuery::unbounded(range)).await {
            Ok(series) => series,
            Err(e) => {
                error!("failed to fetch history for device {}: {e}", device.id);
                Vec::new()
            }
        };
        AnalyticsCard {
            device: device.clone(),
            fetched: series.len(),
            points: downsample(&series, target),
        }
    });
    join_all(fetches).await
}
