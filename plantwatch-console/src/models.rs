//! Wire and domain types shared by the gateway, the stream and the views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Operator privilege. Travels as a boolean (`true` = administrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum Role {
    Admin,
    Standard,
}

impl From<bool> for Role {
    fn from(is_admin: bool) -> Self {
        if is_admin { Role::Admin } else { Role::Standard }
    }
}

impl From<Role> for bool {
    fn from(role: Role) -> Self {
        role == Role::Admin
    }
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Admin => "Admin User",
            Role::Standard => "Standard Operator",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::Standard => "Standard Operator",
        }
    }
}

/// Authenticated operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Whether a record owned by `owner_id` may be shown to this user
    pub fn can_see(&self, owner_id: Option<i64>) -> bool {
        match owner_id {
            _ if self.is_admin() => true,
            Some(owner) => owner.to_string() == self.id,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    IotDevice,
    EndDevice,
}

impl DeviceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::IotDevice => "iot_device",
            DeviceCategory::EndDevice => "end_device",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Maintenance,
    Warning,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Maintenance => "maintenance",
            DeviceStatus::Warning => "warning",
        }
    }
}

/// Hardware kind as declared at provisioning time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Temperature,
    Humidity,
    Light,
    Pressure,
    Server,
    Workstation,
    Gateway,
    #[serde(other)]
    Other,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Temperature => "temperature",
            DeviceType::Humidity => "humidity",
            DeviceType::Light => "light",
            DeviceType::Pressure => "pressure",
            DeviceType::Server => "server",
            DeviceType::Workstation => "workstation",
            DeviceType::Gateway => "gateway",
            DeviceType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    pub category: DeviceCategory,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub owner_id: i64,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub configuration: Option<Value>,
}

impl Device {
    pub fn is_iot(&self) -> bool {
        self.category == DeviceCategory::IotDevice
    }
}

/// Provisioning request (`POST /devices/add`)
#[derive(Debug, Clone, Serialize)]
pub struct NewDevice {
    pub name: String,
    pub category: DeviceCategory,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub configuration: Option<Value>,
}

impl NewDevice {
    /// IoT sensors carry no configuration; end devices start with an empty one.
    pub fn new(name: impl Into<String>, category: DeviceCategory, device_type: DeviceType) -> Self {
        let configuration = match category {
            DeviceCategory::IotDevice => None,
            DeviceCategory::EndDevice => Some(Value::Object(Default::default())),
        };
        Self {
            name: name.into(),
            category,
            device_type,
            configuration,
        }
    }
}

/// Partial update (`PUT /devices/{id}`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<DeviceCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
}

impl DeviceUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && self.configuration.is_none()
    }
}

/// Canonical telemetry record produced by [`crate::normalize`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
}

/// Entry of the admin user directory (`GET /users/`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Answer of `POST /users/auth`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub payload: AuthClaims,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthClaims {
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    pub sub: String,
    pub role: bool,
}

/// Current weather as served by the monitoring service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeatherReport {
    Snapshot(WeatherSnapshot),
    Pending { status: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    #[serde(default)]
    pub city: Option<String>,
    pub temperature: f64,
    pub windspeed: f64,
    pub weathercode: i64,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherCondition {
    Clear,
    Cloudy,
    Rain,
    Variable,
}

impl WeatherSnapshot {
    /// WMO weather code bucket
    pub fn condition(&self) -> WeatherCondition {
        match self.weathercode {
            0 => WeatherCondition::Clear,
            c if c <= 3 => WeatherCondition::Cloudy,
            c if c >= 51 => WeatherCondition::Rain,
            _ => WeatherCondition::Variable,
        }
    }

    pub fn city_or_default(&self) -> &str {
        self.city.as_deref().filter(|c| !c.is_empty()).unwrap_or("Industrial Site")
    }
}

/// Identifiers arrive either as JSON numbers or strings; the client keeps strings.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(n) => n.to_string(),
        RawId::Float(f) => f.to_string(),
        RawId::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_accepts_numeric_id() {
        let device: Device = serde_json::from_value(json!({
            "id": 7,
            "name": "press-line-2",
            "category": "end_device",
            "type": "server",
            "status": "maintenance",
            "owner_id": 3,
            "last_seen": "2024-05-01T10:00:00",
            "configuration": {}
        }))
        .unwrap();

        assert_eq!(device.id, "7");
        assert_eq!(device.category, DeviceCategory::EndDevice);
        assert_eq!(device.status, DeviceStatus::Maintenance);
        assert!(!device.is_iot());
    }

    #[test]
    fn test_unknown_device_type_maps_to_other() {
        let device: Device = serde_json::from_value(json!({
            "id": "a1",
            "name": "vibration",
            "category": "iot_device",
            "type": "accelerometer",
            "status": "warning",
            "owner_id": 1
        }))
        .unwrap();
        assert_eq!(device.device_type, DeviceType::Other);
        assert!(device.last_seen.is_none());
    }

    #[test]
    fn test_new_device_configuration_by_category() {
        let iot = serde_json::to_value(NewDevice::new("t1", DeviceCategory::IotDevice, DeviceType::Temperature)).unwrap();
        assert_eq!(iot["configuration"], Value::Null);
        assert_eq!(iot["type"], "temperature");

        let end = serde_json::to_value(NewDevice::new("ws", DeviceCategory::EndDevice, DeviceType::Workstation)).unwrap();
        assert_eq!(end["configuration"], json!({}));
    }

    #[test]
    fn test_role_round_trips_as_bool() {
        let user: User = serde_json::from_value(json!({
            "id": "4", "email": "ops@plant.io", "role": true, "name": "Admin User"
        }))
        .unwrap();
        assert!(user.is_admin());
        assert_eq!(serde_json::to_value(&user).unwrap()["role"], json!(true));
    }

    #[test]
    fn test_visibility_is_role_scoped() {
        let operator = User { id: "4".into(), email: "a@b.c".into(), role: Role::Standard, name: "x".into() };
        assert!(operator.can_see(Some(4)));
        assert!(!operator.can_see(Some(5)));
        assert!(operator.can_see(None));

        let admin = User { role: Role::Admin, ..operator };
        assert!(admin.can_see(Some(5)));
    }

    #[test]
    fn test_weather_report_variants() {
        let pending: WeatherReport = serde_json::from_value(json!({
            "status": "pending", "message": "Weather data sync in progress"
        }))
        .unwrap();
        assert!(matches!(pending, WeatherReport::Pending { .. }));

        let snap: WeatherReport = serde_json::from_value(json!({
            "city": "Fès", "temperature": 21.4, "windspeed": 9.0, "weathercode": 61
        }))
        .unwrap();
        match snap {
            WeatherReport::Snapshot(s) => assert_eq!(s.condition(), WeatherCondition::Rain),
            other => panic!("unexpected {other:?}"),
        }
    }
}
