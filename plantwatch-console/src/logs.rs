//! Live telemetry log: one line per accepted realtime metric

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{MetricRecord, User};

pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub device_id: String,
    pub metric_type: String,
    pub display_value: String,
    pub raw: MetricRecord,
}

impl LogEntry {
    pub fn from_metric(raw: MetricRecord, received_at: DateTime<Utc>) -> Self {
        let (metric_type, display_value) = describe(&raw);
        Self {
            id: Uuid::new_v4(),
            received_at,
            device_id: raw.device_id.clone(),
            metric_type,
            display_value,
            raw,
        }
    }

    pub fn device_label(&self) -> String {
        device_label(&self.device_id)
    }
}

/// Metric type label and display value of one record
pub fn describe(metric: &MetricRecord) -> (String, String) {
    let mut parts = Vec::with_capacity(3);
    if let Some(cpu) = metric.cpu {
        parts.push(format!("CPU:{cpu:.1}%"));
    }
    if let Some(ram) = metric.ram {
        parts.push(format!("RAM:{ram:.1}%"));
    }
    if let Some(disk) = metric.disk {
        parts.push(format!("DSK:{disk:.1}%"));
    }

    if parts.is_empty() {
        parts.push(match &metric.unit {
            Some(unit) => format!("{} {unit}", metric.value),
            None => metric.value.to_string(),
        });
    } else if metric.cpu.is_none() {
        parts.push(format!("VAL:{}", metric.value));
    }

    let metric_type = if parts.len() > 1 {
        "SYS_METRICS".to_string()
    } else if let Some(data_type) = &metric.data_type {
        data_type.to_uppercase()
    } else if metric.cpu.is_some() {
        "CPU_LOAD".to_string()
    } else if metric.ram.is_some() {
        "RAM_USAGE".to_string()
    } else if metric.disk.is_some() {
        "DISK_USAGE".to_string()
    } else {
        "SENSOR_VAL".to_string()
    };

    (metric_type, parts.join(" | "))
}

pub fn device_label(device_id: &str) -> String {
    if device_id.starts_with("temp") {
        "TEMP_SENS".to_string()
    } else if device_id.starts_with("gate") {
        "GATEWAY".to_string()
    } else {
        format!("DEVICE_{device_id}")
    }
}

/// Bounded log buffer in arrival order, filtered by the viewer's role
#[derive(Debug, Clone)]
pub struct LiveLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LiveLog {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl LiveLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append `metric` unless `viewer` may not see it
    pub fn accept(&mut self, metric: MetricRecord, viewer: &User) -> bool {
        self.accept_at(metric, viewer, Utc::now())
    }

    pub fn accept_at(&mut self, metric: MetricRecord, viewer: &User, received_at: DateTime<Utc>) -> bool {
        if !viewer.can_see(metric.owner_id) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry::from_metric(metric, received_at));
        true
    }

    /// Oldest first
    pub fn entries(&self) -> &VecDeque<LogEntry> {
        &self.entries
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{Duration, TimeZone};

    fn metric(device: &str, owner: Option<i64>) -> MetricRecord {
        MetricRecord {
            timestamp: Utc.timestamp_opt(1_714_557_600, 0).unwrap(),
            device_id: device.into(),
            value: 21.5,
            cpu: None,
            ram: None,
            disk: None,
            unit: Some("°C".into()),
            data_type: None,
            owner_id: owner,
        }
    }

    fn user(role: Role) -> User {
        User { id: "3".into(), email: "op@plant.io".into(), role, name: role.display_name().into() }
    }

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let mut log = LiveLog::default();
        let viewer = user(Role::Admin);
        let start = Utc.timestamp_opt(1_714_557_600, 0).unwrap();
        for i in 0..150 {
            let mut m = metric("temp-01", None);
            m.value = i as f64;
            assert!(log.accept_at(m, &viewer, start + Duration::milliseconds(i)));
            assert!(log.len() <= 100);
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.entries()[0].raw.value, 50.0);
        assert_eq!(log.entries()[99].raw.value, 149.0);
    }

    #[test]
    fn test_entries_keep_arrival_order() {
        let mut log = LiveLog::new(3);
        let viewer = user(Role::Admin);
        let start = Utc.timestamp_opt(1_714_557_600, 0).unwrap();

        // a late clock reading still lands at the end
        for (i, offset) in [10, 20, 5, 15].into_iter().enumerate() {
            let mut m = metric("temp-01", None);
            m.value = i as f64;
            assert!(log.accept_at(m, &viewer, start + Duration::seconds(offset)));
        }

        let values: Vec<_> = log.entries().iter().map(|e| e.raw.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(log.latest().map(|e| e.received_at), Some(start + Duration::seconds(15)));
        assert_eq!(log.capacity(), 3);
    }

    #[test]
    fn test_standard_viewer_drops_foreign_metrics() {
        let mut log = LiveLog::default();
        let viewer = user(Role::Standard);
        assert!(!log.accept(metric("7", Some(4)), &viewer));
        assert!(log.accept(metric("7", Some(3)), &viewer));
        assert!(log.accept(metric("7", None), &viewer));
        assert_eq!(log.len(), 2);

        assert!(log.accept(metric("7", Some(4)), &user(Role::Admin)));
    }

    #[test]
    fn test_describe_sensor_and_system() {
        let sensor = metric("temp-01", None);
        assert_eq!(describe(&sensor), ("SENSOR_VAL".to_string(), "21.5 °C".to_string()));

        let mut system = metric("12", None);
        system.cpu = Some(42.0);
        system.ram = Some(61.24);
        system.value = 42.0;
        assert_eq!(describe(&system), ("SYS_METRICS".to_string(), "CPU:42.0% | RAM:61.2%".to_string()));

        system.ram = None;
        assert_eq!(describe(&system).0, "CPU_LOAD");

        let mut ram_only = metric("12", None);
        ram_only.ram = Some(10.0);
        ram_only.value = 0.0;
        assert_eq!(describe(&ram_only), ("SYS_METRICS".to_string(), "RAM:10.0% | VAL:0".to_string()));

        let mut typed = metric("hum-2", None);
        typed.data_type = Some("humidity".into());
        assert_eq!(describe(&typed).0, "HUMIDITY");
    }

    #[test]
    fn test_device_labels() {
        assert_eq!(device_label("temp-01"), "TEMP_SENS");
        assert_eq!(device_label("gate-north"), "GATEWAY");
        assert_eq!(device_label("12"), "DEVICE_12");
    }
}
