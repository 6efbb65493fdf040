use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::measurement::{
    Measurement, MeasurementType, SafetyStatus, TEMPERATURE_BORDERLINE_MAX,
    TEMPERATURE_BORDERLINE_MIN,
};

/// Category of a critical alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    /// Critical reading with no more specific category
    CriticalMeasurement,
    HighTemperatureCritical,
    LowTemperatureCritical,
    InvalidWeight,
}

/// Alert severity. Published alerts are always critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
}

/// Temperature bounds used to categorise alerts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub high_temperature: f64,
    pub low_temperature: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_temperature: TEMPERATURE_BORDERLINE_MAX,
            low_temperature: TEMPERATURE_BORDERLINE_MIN,
        }
    }
}

impl AlertType {
    /// Categorise a measurement. Total over all inputs, NaN included.
    pub fn derive(measurement_type: MeasurementType, value: f64, thresholds: &AlertThresholds) -> Self {
        match measurement_type {
            MeasurementType::Temperature if value > thresholds.high_temperature => {
                AlertType::HighTemperatureCritical
            }
            MeasurementType::Temperature if value < thresholds.low_temperature => {
                AlertType::LowTemperatureCritical
            }
            MeasurementType::Weight => AlertType::InvalidWeight,
            _ => AlertType::CriticalMeasurement,
        }
    }
}

/// Event published to the alerts queue for an abnormal measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    baby_id: Uuid,
    measurement: Measurement,
    timestamp: DateTime<Utc>,
    alert_type: AlertType,
    safety_status: SafetyStatus,
    severity: AlertSeverity,
}

impl AlertEvent {
    /// Build the event for `measurement`, stamped now
    pub fn new(baby_id: Uuid, measurement: Measurement, thresholds: &AlertThresholds) -> Self {
        let alert_type = AlertType::derive(measurement.measurement_type, measurement.value, thresholds);
        Self {
            baby_id,
            safety_status: measurement.safety_status,
            measurement,
            timestamp: Utc::now(),
            alert_type,
            severity: AlertSeverity::Critical,
        }
    }

    pub fn baby_id(&self) -> Uuid {
        self.baby_id
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    pub fn safety_status(&self) -> SafetyStatus {
        self.safety_status
    }

    pub fn severity(&self) -> AlertSeverity {
        self.severity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(t: MeasurementType, v: f64) -> AlertType {
        AlertType::derive(t, v, &AlertThresholds::default())
    }

    #[test]
    fn test_temperature_alert_types() {
        assert_eq!(derive(MeasurementType::Temperature, 39.0), AlertType::HighTemperatureCritical);
        assert_eq!(derive(MeasurementType::Temperature, 35.0), AlertType::LowTemperatureCritical);
        assert_eq!(derive(MeasurementType::Temperature, 38.0), AlertType::CriticalMeasurement);
        assert_eq!(derive(MeasurementType::Temperature, 36.0), AlertType::CriticalMeasurement);
        assert_eq!(derive(MeasurementType::Temperature, 37.0), AlertType::CriticalMeasurement);
    }

    #[test]
    fn test_non_temperature_alert_types() {
        assert_eq!(derive(MeasurementType::Weight, -5.0), AlertType::InvalidWeight);
        assert_eq!(derive(MeasurementType::Weight, 3000.0), AlertType::InvalidWeight);
        assert_eq!(derive(MeasurementType::Feeding, 120.0), AlertType::CriticalMeasurement);
        assert_eq!(derive(MeasurementType::Diaper, 0.0), AlertType::CriticalMeasurement);
    }

    #[test]
    fn test_derivation_is_total() {
        for t in [
            MeasurementType::Feeding,
            MeasurementType::Weight,
            MeasurementType::Temperature,
            MeasurementType::Diaper,
        ] {
            for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, -0.0, 1e300] {
                let first = derive(t, v);
                assert_eq!(first, derive(t, v));
            }
        }
        assert_eq!(derive(MeasurementType::Temperature, f64::NAN), AlertType::CriticalMeasurement);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = AlertThresholds {
            high_temperature: 37.8,
            low_temperature: 36.2,
        };
        assert_eq!(
            AlertType::derive(MeasurementType::Temperature, 37.9, &thresholds),
            AlertType::HighTemperatureCritical
        );
        assert_eq!(
            AlertType::derive(MeasurementType::Temperature, 36.1, &thresholds),
            AlertType::LowTemperatureCritical
        );
    }

    #[test]
    fn test_event_wire_shape() {
        let baby_id = Uuid::new_v4();
        let measurement = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 39.0);
        let event = AlertEvent::new(baby_id, measurement, &AlertThresholds::default());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["alert_type"], "high_temperature_critical");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["safety_status"], "red");
        assert_eq!(json["baby_id"], baby_id.to_string());
        assert_eq!(json["measurement"]["value"], 39.0);
    }
}
