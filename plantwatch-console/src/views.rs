//! Terminal renderings of the console pages
//!
//! Pure functions from view state to text; nothing here talks to the network.

use chrono::{DateTime, Local, Utc};
use std::path::Path;

use crate::analytics::{AnalyticsCard, CategoryFilter, DatePreset};
use crate::config::{ConsoleConfig, SessionBackendKind};
use crate::events::{Toast, ToastLevel};
use crate::inventory::Kpis;
use crate::logs::{LiveLog, LogEntry};
use crate::models::{Device, MetricRecord, User, UserRecord, WeatherCondition, WeatherReport};
use crate::normalize::parse_timestamp;
use crate::realtime::ConnectionState;

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Everything the dashboard page shows at once
pub struct DashboardView<'a> {
    pub user: &'a User,
    pub devices: &'a [Device],
    pub selected: Option<&'a Device>,
    pub series: &'a [MetricRecord],
    pub weather: Option<&'a WeatherReport>,
    pub log: Option<&'a LiveLog>,
    pub connection: ConnectionState,
    pub range_label: &'a str,
}

pub fn render_dashboard(view: &DashboardView<'_>) -> String {
    let mut sections = vec![
        format!(
            "Operational Overview | {} ({}) | range: {} | stream: {}",
            view.user.name,
            view.user.role.title(),
            view.range_label,
            connection_label(view.connection)
        ),
        render_kpis(&Kpis::from_devices(view.devices)),
        render_device_picker(view.devices, view.selected.map(|d| d.id.as_str())),
        render_series(view.selected, view.series),
    ];
    if let Some(weather) = view.weather {
        sections.push(render_weather(weather));
    }
    if let Some(log) = view.log {
        sections.push(render_logs(log, view.connection));
    }
    sections.join("\n\n")
}

pub fn connection_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connected => "connected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Disconnected => "disconnected",
    }
}

pub fn render_kpis(kpis: &Kpis) -> String {
    format!(
        "Active Devices: {:<6} Critical Alerts: {:<6} Network Status: Nominal",
        kpis.active_devices, kpis.critical
    )
}

fn render_device_picker(devices: &[Device], selected: Option<&str>) -> String {
    if devices.is_empty() {
        return "No devices registered.".to_string();
    }
    let mut lines = vec!["Devices:".to_string()];
    for device in devices {
        let marker = if Some(device.id.as_str()) == selected { '>' } else { ' ' };
        lines.push(format!(
            " {marker} {:<8} {:<24} {}",
            device.id,
            device.name,
            device.status.as_str()
        ));
    }
    lines.join("\n")
}

/// Sparkline scaled between the series' own min and max
pub fn sparkline(values: &[f64]) -> String {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = max - min;
    values
        .iter()
        .map(|v| {
            if span <= f64::EPSILON {
                SPARK[SPARK.len() / 2]
            } else {
                let level = ((v - min) / span * (SPARK.len() - 1) as f64).round() as usize;
                SPARK[level.min(SPARK.len() - 1)]
            }
        })
        .collect()
}

fn series_line(name: &str, values: &[f64], unit: &str) -> String {
    match values.last() {
        Some(last) => format!("  {name:<13} {} last {last:.1}{unit}", sparkline(values)),
        None => format!("  {name:<13} no data"),
    }
}

/// IoT devices chart `value`; end devices chart cpu/ram/disk
pub fn render_series(device: Option<&Device>, series: &[MetricRecord]) -> String {
    let Some(device) = device else {
        return "No device selected.".to_string();
    };
    if series.is_empty() {
        return format!("{} ({}): no telemetry in this period.", device.name, device.id);
    }

    let first = format_time(series[0].timestamp);
    let last = format_time(series[series.len() - 1].timestamp);
    let mut lines = vec![format!(
        "{} ({}) {} points, {first} -> {last}",
        device.name,
        device.id,
        series.len()
    )];

    if device.is_iot() {
        let values: Vec<f64> = series.iter().map(|m| m.value).collect();
        let unit = series
            .iter()
            .rev()
            .find_map(|m| m.unit.as_deref())
            .map(|u| format!(" {u}"))
            .unwrap_or_default();
        lines.push(series_line("Sensor Value", &values, &unit));
    } else {
        let cpu: Vec<f64> = series.iter().filter_map(|m| m.cpu).collect();
        let ram: Vec<f64> = series.iter().filter_map(|m| m.ram).collect();
        let disk: Vec<f64> = series.iter().filter_map(|m| m.disk).collect();
        lines.push(series_line("CPU Usage", &cpu, "%"));
        lines.push(series_line("RAM Usage", &ram, "%"));
        if !disk.is_empty() {
            lines.push(series_line("Disk Usage", &disk, "%"));
        }
    }
    lines.join("\n")
}

pub fn render_devices_table(rows: &[&Device]) -> String {
    if rows.is_empty() {
        return "No nodes found matching your criteria.".to_string();
    }
    let mut lines = vec![format!(
        "{:<8} {:<24} {:<11} {:<12} {:<12} {:<6} {}",
        "ID", "NAME", "CATEGORY", "TYPE", "STATUS", "OWNER", "LAST SEEN"
    )];
    for device in rows {
        lines.push(format!(
            "{:<8} {:<24} {:<11} {:<12} {:<12} {:<6} {}",
            device.id,
            device.name,
            device.category.as_str(),
            device.device_type.as_str(),
            device.status.as_str(),
            device.owner_id,
            device.last_seen.as_deref().map(format_raw_time).unwrap_or_else(|| "-".to_string())
        ));
    }
    lines.join("\n")
}

pub fn render_logs(log: &LiveLog, connection: ConnectionState) -> String {
    let mut lines = vec![format!(
        "Live Telemetry Stream [{}] buf_size: {}/{}",
        connection_label(connection),
        log.len(),
        log.capacity()
    )];
    if log.is_empty() {
        lines.push(if connection == ConnectionState::Connected {
            "Waiting for incoming telemetry packets...".to_string()
        } else {
            "Connecting to Stream...".to_string()
        });
    }
    lines.extend(log.entries().iter().map(render_log_line));
    lines.join("\n")
}

pub fn render_log_line(entry: &LogEntry) -> String {
    format!(
        "[{}] {:<12} {:<12} >> {}",
        entry.received_at.with_timezone(&Local).format("%H:%M:%S%.3f"),
        entry.device_label(),
        entry.metric_type,
        entry.display_value
    )
}

pub fn render_users(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return "No users found\nThe identity database appears to be empty.".to_string();
    }
    let admins = users.iter().filter(|u| u.is_admin).count();
    let mut lines = vec![
        format!("Global Admins: {admins}   Standard Users: {}", users.len() - admins),
        format!("{:<32} {:<18} {}", "USER IDENTITY", "SYSTEM ROLE", "AUTHORIZED SINCE"),
    ];
    for user in users {
        let role = if user.is_admin { "Administrator" } else { "Standard Operator" };
        let since = user
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|ts| ts.with_timezone(&Local).format("%d %b %Y").to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!("{:<32} {:<18} {}", user.email, role, since));
    }
    lines.join("\n")
}

pub fn render_weather(report: &WeatherReport) -> String {
    match report {
        WeatherReport::Pending { message, .. } => format!("Weather: {message}"),
        WeatherReport::Snapshot(snapshot) => {
            let condition = match snapshot.condition() {
                WeatherCondition::Clear => "Clear",
                WeatherCondition::Cloudy => "Cloudy",
                WeatherCondition::Rain => "Rain",
                WeatherCondition::Variable => "Variable",
            };
            format!(
                "Weather @ {}: {:.1}°C {condition}, wind {} km/h",
                snapshot.city_or_default(),
                snapshot.temperature,
                snapshot.windspeed
            )
        }
    }
}

pub fn render_settings(user: &User, config: &ConsoleConfig, config_path: Option<&Path>) -> String {
    let backend = match config.session.backend {
        SessionBackendKind::File => "file",
        SessionBackendKind::Keyring => "keyring",
    };
    [
        "Settings & Profile".to_string(),
        format!("  Full Name      {}", user.name),
        format!("  Email Address  {}", user.email),
        format!("  Role           {}", user.role.title()),
        "Cluster Connectivity".to_string(),
        format!("  API            {}", config.api.base_url()),
        format!("  Stream         {}", config.socket_url()),
        format!("  Timeout        {}s", config.api.timeout_secs),
        format!(
            "  Reconnect      {} attempts, {}ms apart",
            config.realtime.reconnect_attempts, config.realtime.reconnect_delay_ms
        ),
        format!("  Session store  {backend}"),
        format!(
            "  Config file    {}",
            config_path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string())
        ),
    ]
    .join("\n")
}

pub fn render_analytics(cards: &[AnalyticsCard], preset: DatePreset, filter: CategoryFilter) -> String {
    let mut sections = vec![format!("Fleet Analytics | {} | {}", filter.label(), preset.label())];
    if cards.is_empty() {
        sections.push("No devices match this filter.".to_string());
    }
    for card in cards {
        let header = format!(
            "{} [{} / {}] ID: {} status: {}",
            card.device.name.to_uppercase(),
            card.device.category.as_str(),
            card.device.device_type.as_str(),
            card.device.id,
            card.device.status.as_str()
        );
        let body = if card.is_empty() {
            "  No Data in Period".to_string()
        } else {
            let values: Vec<f64> = if card.device.is_iot() {
                card.points.iter().map(|m| m.value).collect()
            } else {
                card.points.iter().map(|m| m.cpu.unwrap_or(m.value)).collect()
            };
            format!(
                "  {} {} points (of {})",
                sparkline(&values),
                card.points.len(),
                card.fetched
            )
        };
        sections.push(format!("{header}\n{body}"));
    }
    sections.join("\n\n")
}

pub fn render_toast(toast: &Toast) -> String {
    let tag = match toast.level {
        ToastLevel::Success => "ok",
        ToastLevel::Error => "error",
        ToastLevel::Info => "info",
    };
    format!("[{tag}] {}", toast.message)
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_raw_time(raw: &str) -> String {
    parse_timestamp(raw).map(format_time).unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceCategory, DeviceStatus, DeviceType, Role, WeatherSnapshot};
    use chrono::TimeZone;

    fn device(category: DeviceCategory) -> Device {
        Device {
            id: "7".into(),
            name: "line-7".into(),
            category,
            device_type: DeviceType::Server,
            status: DeviceStatus::Online,
            owner_id: 1,
            last_seen: None,
            configuration: None,
        }
    }

    fn point(secs: i64, cpu: f64) -> MetricRecord {
        MetricRecord {
            timestamp: Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap(),
            device_id: "7".into(),
            value: cpu,
            cpu: Some(cpu),
            ram: Some(50.0),
            disk: None,
            unit: None,
            data_type: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_sparkline_scales_to_range() {
        assert_eq!(sparkline(&[0.0, 50.0, 100.0]), "▁▅█");
        assert_eq!(sparkline(&[3.0, 3.0]), "▅▅");
        assert_eq!(sparkline(&[]), "");
    }

    #[test]
    fn test_series_by_category() {
        let series = vec![point(0, 10.0), point(1, 20.0)];
        let end = render_series(Some(&device(DeviceCategory::EndDevice)), &series);
        assert!(end.contains("CPU Usage"));
        assert!(end.contains("RAM Usage"));
        assert!(!end.contains("Disk Usage"));

        let iot = render_series(Some(&device(DeviceCategory::IotDevice)), &series);
        assert!(iot.contains("Sensor Value"));

        assert!(render_series(Some(&device(DeviceCategory::IotDevice)), &[]).contains("no telemetry"));
    }

    #[test]
    fn test_empty_placeholders() {
        assert_eq!(render_devices_table(&[]), "No nodes found matching your criteria.");
        assert!(render_users(&[]).starts_with("No users found"));
        assert!(render_logs(&LiveLog::default(), ConnectionState::Connected).contains("Waiting for incoming"));
    }

    #[test]
    fn test_users_counts() {
        let users = vec![
            UserRecord { email: "a@p.io".into(), is_admin: true, created_at: Some("2024-01-02T03:04:05".into()), updated_at: None },
            UserRecord { email: "b@p.io".into(), is_admin: false, created_at: None, updated_at: None },
        ];
        let text = render_users(&users);
        assert!(text.contains("Global Admins: 1   Standard Users: 1"));
        assert!(text.contains("Standard Operator"));
    }

    #[test]
    fn test_weather_rendering() {
        let snapshot = WeatherReport::Snapshot(WeatherSnapshot {
            city: None,
            temperature: 12.34,
            windspeed: 8.0,
            weathercode: 0,
            time: None,
            timestamp: None,
        });
        assert_eq!(render_weather(&snapshot), "Weather @ Industrial Site: 12.3°C Clear, wind 8 km/h");

        let pending = WeatherReport::Pending { status: "pending".into(), message: "Weather data sync in progress".into() };
        assert_eq!(render_weather(&pending), "Weather: Weather data sync in progress");
    }

    #[test]
    fn test_toast_and_dashboard_header() {
        assert_eq!(render_toast(&Toast { level: ToastLevel::Success, message: "saved".into() }), "[ok] saved");

        let user = User { id: "1".into(), email: "a@p.io".into(), role: Role::Admin, name: "Admin User".into() };
        let devices = vec![device(DeviceCategory::EndDevice)];
        let text = render_dashboard(&DashboardView {
            user: &user,
            devices: &devices,
            selected: devices.first(),
            series: &[],
            weather: None,
            log: None,
            connection: ConnectionState::Connecting,
            range_label: "Today",
        });
        assert!(text.contains("Admin User (Administrator)"));
        assert!(text.contains("Active Devices: 1"));
        assert!(text.contains(" > 7"));
    }
}
