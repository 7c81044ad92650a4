/*!
Builders de payloads de télémétrie

Produit les trois encodages que les devices envoient réellement :
champs système plats, objet `metrics` imbriqué, alias legacy.
Utilisables pour l'historique (`StubApi::push_history`) comme pour le flux
temps réel (`StubSocket::emit`).
*/

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

/// Constructeur d'enveloppe `{device_id, owner_id, timestamp, data}`
#[derive(Debug, Clone)]
pub struct TelemetryBuilder {
    device_id: Value,
    owner_id: Option<i64>,
    timestamp: Option<String>,
    data: Map<String, Value>,
}

impl TelemetryBuilder {
    pub fn new(device_id: impl Into<Value>) -> Self {
        Self {
            device_id: device_id.into(),
            owner_id: None,
            timestamp: Some(Utc::now().to_rfc3339()),
            data: Map::new(),
        }
    }

    pub fn owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp.to_rfc3339());
        self
    }

    /// Timestamp brut, éventuellement invalide
    pub fn raw_timestamp(mut self, raw: &str) -> Self {
        self.timestamp = Some(raw.to_string());
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    /// Champ arbitraire de `data`
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Encodage plat des stations (`cpu`, `ram`, `disk`)
    pub fn system(self, cpu: f64, ram: f64, disk: f64) -> Self {
        self.field("cpu", cpu).field("ram", ram).field("disk", disk)
    }

    /// Encodage imbriqué `data.metrics`
    pub fn nested(self, cpu: f64, ram: f64, disk: f64) -> Self {
        self.field("metrics", json!({ "cpu": cpu, "ram": ram, "disk": disk }))
    }

    /// Alias legacy (`cpu_load`, `storage`)
    pub fn legacy(self, cpu_load: f64, storage: f64) -> Self {
        self.field("cpu_load", cpu_load).field("storage", storage)
    }

    /// Mesure capteur avec unité
    pub fn sensor(self, value: f64, unit: &str, kind: &str) -> Self {
        self.field("value", value).field("unit", unit).field("type", kind)
    }

    pub fn build(self) -> Value {
        let mut envelope = Map::new();
        envelope.insert("device_id".into(), self.device_id);
        if let Some(owner_id) = self.owner_id {
            envelope.insert("owner_id".into(), owner_id.into());
        }
        if let Some(timestamp) = self.timestamp {
            envelope.insert("timestamp".into(), timestamp.into());
        }
        envelope.insert("data".into(), Value::Object(self.data));
        Value::Object(envelope)
    }
}

/// Rapport météo complet
pub fn weather_snapshot(city: &str, temperature: f64, windspeed: f64, weathercode: i64) -> Value {
    json!({
        "city": city,
        "temperature": temperature,
        "windspeed": windspeed,
        "weathercode": weathercode,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let flat = TelemetryBuilder::new(7).owner(2).system(12.5, 40.0, 70.0).build();
        assert_eq!(flat["device_id"], 7);
        assert_eq!(flat["owner_id"], 2);
        assert_eq!(flat["data"]["cpu"], 12.5);

        let nested = TelemetryBuilder::new("7").nested(1.0, 2.0, 3.0).without_timestamp().build();
        assert_eq!(nested["data"]["metrics"]["disk"], 3.0);
        assert!(nested.get("timestamp").is_none());
        assert!(nested.get("owner_id").is_none());
    }
}
