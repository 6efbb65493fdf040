use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Normal temperature band (°C)
pub const TEMPERATURE_NORMAL_MIN: f64 = 36.5;
pub const TEMPERATURE_NORMAL_MAX: f64 = 37.5;

/// Borderline band edges (°C); outside them a reading is critical
pub const TEMPERATURE_BORDERLINE_MIN: f64 = 36.0;
pub const TEMPERATURE_BORDERLINE_MAX: f64 = 38.0;

/// Kind of measurement logged for a baby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementType {
    Feeding,
    Weight,
    Temperature,
    Diaper,
}

/// Traffic-light safety classification of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SafetyStatus {
    /// Within the acceptable range
    Green,
    /// Slightly outside the normal range
    Yellow,
    /// Abnormal, requires immediate attention
    Red,
}

/// A measurement taken for a baby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: Uuid,

    /// Parent who logged the measurement
    pub parent_id: Uuid,

    pub baby_id: Uuid,

    #[serde(rename = "type")]
    pub measurement_type: MeasurementType,

    /// Grams for weight, °C for temperature
    pub value: f64,

    pub safety_status: SafetyStatus,

    #[serde(default)]
    pub note: String,

    /// When the measurement was taken
    pub timestamp: DateTime<Utc>,

    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl Measurement {
    /// Create a measurement, classifying it from its type and value
    pub fn new(baby_id: Uuid, parent_id: Uuid, measurement_type: MeasurementType, value: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            baby_id,
            measurement_type,
            value,
            safety_status: SafetyStatus::classify(measurement_type, value),
            note: String::new(),
            timestamp: now,
            created_at: now,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Red measurements are the only ones that raise alerts
    pub fn is_critical(&self) -> bool {
        self.safety_status == SafetyStatus::Red
    }
}

impl SafetyStatus {
    /// Classify a reading.
    ///
    /// Temperature: green in 36.5–37.5 °C, yellow in 36.0–36.5 or 37.5–38.0 °C,
    /// red otherwise. Weight: green when positive, yellow otherwise. Feeding and
    /// diaper entries are always green.
    pub fn classify(measurement_type: MeasurementType, value: f64) -> Self {
        match measurement_type {
            MeasurementType::Temperature => {
                if (TEMPERATURE_NORMAL_MIN..=TEMPERATURE_NORMAL_MAX).contains(&value) {
                    SafetyStatus::Green
                } else if (TEMPERATURE_BORDERLINE_MIN..TEMPERATURE_NORMAL_MIN).contains(&value)
                    || (value > TEMPERATURE_NORMAL_MAX && value <= TEMPERATURE_BORDERLINE_MAX)
                {
                    SafetyStatus::Yellow
                } else {
                    SafetyStatus::Red
                }
            }
            MeasurementType::Weight => {
                if value > 0.0 {
                    SafetyStatus::Green
                } else {
                    SafetyStatus::Yellow
                }
            }
            MeasurementType::Feeding | MeasurementType::Diaper => SafetyStatus::Green,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_classification() {
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 37.0), SafetyStatus::Green);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 36.5), SafetyStatus::Green);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 36.2), SafetyStatus::Yellow);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 37.8), SafetyStatus::Yellow);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 38.0), SafetyStatus::Yellow);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 39.0), SafetyStatus::Red);
        assert_eq!(SafetyStatus::classify(MeasurementType::Temperature, 35.4), SafetyStatus::Red);
    }

    #[test]
    fn test_weight_and_other_classification() {
        assert_eq!(SafetyStatus::classify(MeasurementType::Weight, 3200.0), SafetyStatus::Green);
        assert_eq!(SafetyStatus::classify(MeasurementType::Weight, 0.0), SafetyStatus::Yellow);
        assert_eq!(SafetyStatus::classify(MeasurementType::Feeding, -1.0), SafetyStatus::Green);
        assert_eq!(SafetyStatus::classify(MeasurementType::Diaper, 0.0), SafetyStatus::Green);
    }

    #[test]
    fn test_measurement_serializes_type_field() {
        let m = Measurement::new(Uuid::new_v4(), Uuid::new_v4(), MeasurementType::Temperature, 39.0);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "temperature");
        assert_eq!(json["safety_status"], "red");
        assert!(m.is_critical());
    }
}
