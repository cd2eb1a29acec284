//! Runtime sensor configuration and the catalog translation rule.

use crate::error::CoreError;
use crate::generator::has_cents_between;
use sensorsim_env::SensorDefinition;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Largest accepted magnitude for either range bound.
///
/// Keeps `max - min` finite for sampling and the values exact on the
/// two-decimal grid.
pub const MAX_BOUND_MAGNITUDE: f64 = 1e9;

/// The parameters one generator runs with.
///
/// A config with `enabled = false` never has a running generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    pub sensor_id: String,
    pub sensor_type: String,

    #[serde(rename = "intervalMs", serialize_with = "as_millis")]
    pub interval: Duration,

    pub min_value: f64,
    pub max_value: f64,
    pub enabled: bool,
}

fn as_millis<S: Serializer>(interval: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(interval.as_millis() as u64)
}

impl SensorConfig {
    /// Creates an enabled config, checking the interval and range.
    pub fn new(
        sensor_id: impl Into<String>,
        sensor_type: impl Into<String>,
        interval: Duration,
        min_value: f64,
        max_value: f64,
    ) -> Result<Self, CoreError> {
        let config = Self {
            sensor_id: sensor_id.into(),
            sensor_type: sensor_type.into(),
            interval,
            min_value,
            max_value,
            enabled: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy with the enabled flag replaced.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.interval.is_zero() {
            return Err(CoreError::invalid(&self.sensor_id, "interval must be positive"));
        }
        if !self.min_value.is_finite() || !self.max_value.is_finite() {
            return Err(CoreError::invalid(&self.sensor_id, "range bounds must be finite"));
        }
        if self.min_value.abs() > MAX_BOUND_MAGNITUDE || self.max_value.abs() > MAX_BOUND_MAGNITUDE {
            return Err(CoreError::invalid(
                &self.sensor_id,
                format!("range bounds must lie within ±{:e}", MAX_BOUND_MAGNITUDE),
            ));
        }
        if self.min_value > self.max_value {
            return Err(CoreError::invalid(
                &self.sensor_id,
                format!("min {} exceeds max {}", self.min_value, self.max_value),
            ));
        }
        if !has_cents_between(self.min_value, self.max_value) {
            return Err(CoreError::invalid(
                &self.sensor_id,
                format!("range [{}, {}] holds no two-decimal value", self.min_value, self.max_value),
            ));
        }
        Ok(())
    }
}

impl TryFrom<&SensorDefinition> for SensorConfig {
    type Error = CoreError;

    fn try_from(def: &SensorDefinition) -> Result<Self, Self::Error> {
        if def.interval_ms <= 0 {
            return Err(CoreError::invalid(
                &def.sensor_id,
                format!("intervalMs {} must be positive", def.interval_ms),
            ));
        }

        let config = Self {
            sensor_id: def.sensor_id.clone(),
            sensor_type: def.sensor_type.clone(),
            interval: Duration::from_millis(def.interval_ms as u64),
            min_value: def.operating_min,
            max_value: def.operating_max,
            enabled: def.enabled,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::testing::sim_definition;

    /// A simulated, enabled definition with sane parameters.
    pub fn definition(sensor_id: &str) -> SensorDefinition {
        sim_definition(sensor_id, 0.0, 10.0, 1000)
    }

    pub fn config(sensor_id: &str) -> SensorConfig {
        SensorConfig::new(sensor_id, "temperature", Duration::from_secs(1), 0.0, 10.0).unwrap()
    }
}
