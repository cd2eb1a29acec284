//! Wire types shared between the catalog, the change stream and the sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sensor definition as published by the catalog.
///
/// Warning thresholds and unit travel with the definition but play no part
/// in simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDefinition {
    /// Catalog row identifier
    pub id: Uuid,

    /// Stable sensor identity (the reconciliation key)
    pub sensor_id: String,

    /// Opaque type tag (e.g., "temperature", "pressure")
    pub sensor_type: String,

    pub unit: String,

    pub operating_min: f64,
    pub operating_max: f64,
    pub warning_min: f64,
    pub warning_max: f64,

    /// Sample interval in milliseconds
    pub interval_ms: i64,

    pub enabled: bool,

    /// Whether this instance should generate readings for the sensor
    pub simulate: bool,

    pub updated_at: DateTime<Utc>,
}

impl SensorDefinition {
    /// Returns true when the definition asks for a running generator.
    pub fn should_simulate(&self) -> bool {
        self.enabled && self.simulate
    }
}

/// Body of the catalog bulk listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorListResponse {
    #[serde(default)]
    pub items: Vec<SensorDefinition>,
}

/// Kind of change carried by a [`ConfigChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Upserted,
    Deleted,
}

/// Incremental change published on the config topic, keyed by `sensor_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    pub action: ChangeAction,
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,

    /// Full definition, present for `upserted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SensorDefinition>,
}

impl ConfigChangeEvent {
    /// Decodes an event from a raw message value.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One synthetic reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,

    /// Rounded to two decimal places
    pub value: f64,
}

impl Measurement {
    /// Creates a new measurement.
    pub fn new(sensor_id: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            value,
        }
    }

    /// Serializes the measurement to its JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSERT: &str = r#"{
        "action": "upserted",
        "sensorId": "temp-1",
        "timestamp": "2024-05-01T10:00:00+02:00",
        "payload": {
            "id": "9b2f6c1e-3f7a-4a53-9d1c-0c1f2d3e4a5b",
            "sensorId": "temp-1",
            "sensorType": "temperature",
            "unit": "C",
            "operatingMin": 50.0,
            "operatingMax": 150.0,
            "warningMin": 60.0,
            "warningMax": 140.0,
            "intervalMs": 2000,
            "enabled": true,
            "simulate": true,
            "updatedAt": "2024-05-01T08:00:00Z"
        }
    }"#;

    #[test]
    fn test_decode_upsert_event() {
        let ev = ConfigChangeEvent::from_slice(UPSERT.as_bytes()).unwrap();

        assert_eq!(ev.action, ChangeAction::Upserted);
        assert_eq!(ev.sensor_id, "temp-1");
        // Offset timestamps are normalized to UTC
        assert_eq!(ev.timestamp.to_rfc3339(), "2024-05-01T08:00:00+00:00");

        let def = ev.payload.unwrap();
        assert_eq!(def.interval_ms, 2000);
        assert_eq!(def.operating_max, 150.0);
        assert!(def.should_simulate());
    }

    #[test]
    fn test_decode_delete_event_without_payload() {
        let raw = r#"{"action":"deleted","sensorId":"temp-1","timestamp":"2024-05-01T08:00:00Z"}"#;
        let ev = ConfigChangeEvent::from_slice(raw.as_bytes()).unwrap();

        assert_eq!(ev.action, ChangeAction::Deleted);
        assert!(ev.payload.is_none());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let raw = r#"{"action":"renamed","sensorId":"temp-1","timestamp":"2024-05-01T08:00:00Z"}"#;
        assert!(ConfigChangeEvent::from_slice(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_list_response_missing_items() {
        let resp: SensorListResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.items.is_empty());
    }

    #[test]
    fn test_measurement_wire_shape() {
        let ts = "2024-05-01T08:00:00Z".parse().unwrap();
        let m = Measurement::new("pressure-1", ts, 3.14);
        let json: serde_json::Value = serde_json::from_slice(&m.to_json().unwrap()).unwrap();

        assert_eq!(json["sensorId"], "pressure-1");
        assert_eq!(json["value"], 3.14);
        assert_eq!(json["timestamp"], "2024-05-01T08:00:00Z");
    }
}
