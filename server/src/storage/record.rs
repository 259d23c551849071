//! Vital-sign record type and its fixed-width serialization.
//!
//! Every record occupies exactly `RECORD_SIZE` bytes in the data file, so a
//! record's position is determined purely by allocation order.
//!
//! Layout (little-endian):
//! - `patient_id`: 4 bytes (i32)
//! - `timestamp`: 8 bytes (i64)
//! - `heart_rate`: 4 bytes (i32)
//! - `systolic_bp`: 4 bytes (i32)
//! - `diastolic_bp`: 4 bytes (i32)
//! - `spo2`: 4 bytes (i32)
//! - `temperature`: 4 bytes (f32)
//!
//! Total: 32 bytes

use serde::{Deserialize, Serialize};

/// Size of an encoded record in bytes.
pub const RECORD_SIZE: usize = 32;

/// Field offsets within an encoded record.
mod offsets {
    pub const PATIENT_ID: usize = 0;
    pub const TIMESTAMP: usize = 4;
    pub const HEART_RATE: usize = 12;
    pub const SYSTOLIC_BP: usize = 16;
    pub const DIASTOLIC_BP: usize = 20;
    pub const SPO2: usize = 24;
    pub const TEMPERATURE: usize = 28;
}

/// One vital-sign sample for a patient.
///
/// The JSON field names match the public HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalRecord {
    #[serde(rename = "patientID")]
    pub patient_id: i32,
    /// Seconds since the Unix epoch. Also used as the index key.
    pub timestamp: i64,
    pub heart_rate: i32,
    pub systolic_bp: i32,
    pub diastolic_bp: i32,
    pub spo2: i32,
    /// Body temperature in degrees Celsius.
    pub temperature: f32,
}

impl VitalRecord {
    /// Serialize the record to its fixed-width form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[offsets::PATIENT_ID..offsets::TIMESTAMP].copy_from_slice(&self.patient_id.to_le_bytes());
        buf[offsets::TIMESTAMP..offsets::HEART_RATE].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[offsets::HEART_RATE..offsets::SYSTOLIC_BP]
            .copy_from_slice(&self.heart_rate.to_le_bytes());
        buf[offsets::SYSTOLIC_BP..offsets::DIASTOLIC_BP]
            .copy_from_slice(&self.systolic_bp.to_le_bytes());
        buf[offsets::DIASTOLIC_BP..offsets::SPO2].copy_from_slice(&self.diastolic_bp.to_le_bytes());
        buf[offsets::SPO2..offsets::TEMPERATURE].copy_from_slice(&self.spo2.to_le_bytes());
        buf[offsets::TEMPERATURE..RECORD_SIZE].copy_from_slice(&self.temperature.to_le_bytes());
        buf
    }

    /// Deserialize a record from its fixed-width form.
    ///
    /// The slice must be exactly `RECORD_SIZE` bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let bytes: &[u8; RECORD_SIZE] =
            bytes.try_into().map_err(|_| RecordError::Truncated {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            })?;

        Ok(Self {
            patient_id: i32::from_le_bytes(field(bytes, offsets::PATIENT_ID)),
            timestamp: i64::from_le_bytes(field(bytes, offsets::TIMESTAMP)),
            heart_rate: i32::from_le_bytes(field(bytes, offsets::HEART_RATE)),
            systolic_bp: i32::from_le_bytes(field(bytes, offsets::SYSTOLIC_BP)),
            diastolic_bp: i32::from_le_bytes(field(bytes, offsets::DIASTOLIC_BP)),
            spo2: i32::from_le_bytes(field(bytes, offsets::SPO2)),
            temperature: f32::from_le_bytes(field(bytes, offsets::TEMPERATURE)),
        })
    }
}

/// Copy `N` bytes starting at `offset` out of an encoded record.
fn field<const N: usize>(bytes: &[u8; RECORD_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Errors that can occur when decoding a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// The input was not exactly one record long.
    Truncated { expected: usize, actual: usize },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "record truncated: expected {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for RecordError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VitalRecord {
        VitalRecord {
            patient_id: 101,
            timestamp: 1_733_308_200,
            heart_rate: 75,
            systolic_bp: 120,
            diastolic_bp: 80,
            spo2: 98,
            temperature: 37.2,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample();
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), RECORD_SIZE);

        let restored = VitalRecord::from_bytes(&bytes).expect("should decode");
        assert_eq!(restored, record);
    }

    #[test]
    fn test_record_field_order() {
        let bytes = sample().to_bytes();

        // patient id leads, timestamp follows without padding
        assert_eq!(&bytes[0..4], &101i32.to_le_bytes());
        assert_eq!(&bytes[4..12], &1_733_308_200i64.to_le_bytes());
        assert_eq!(&bytes[28..32], &37.2f32.to_le_bytes());
    }

    #[test]
    fn test_record_size_is_content_independent() {
        let extreme = VitalRecord {
            patient_id: i32::MIN,
            timestamp: i64::MAX,
            heart_rate: i32::MAX,
            systolic_bp: -1,
            diastolic_bp: 0,
            spo2: 100,
            temperature: f32::MIN_POSITIVE,
        };
        assert_eq!(extreme.to_bytes().len(), sample().to_bytes().len());
    }

    #[test]
    fn test_record_short_input() {
        let bytes = sample().to_bytes();
        let result = VitalRecord::from_bytes(&bytes[..20]);
        assert_eq!(
            result,
            Err(RecordError::Truncated {
                expected: RECORD_SIZE,
                actual: 20
            })
        );
    }

    #[test]
    fn test_record_json_field_names() {
        let json = serde_json::to_value(sample()).expect("should serialize");
        assert_eq!(json["patientID"], 101);
        assert_eq!(json["heart_rate"], 75);
        assert!(json.get("patient_id").is_none());

        let parsed: VitalRecord = serde_json::from_value(json).expect("should deserialize");
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_record_json_requires_all_fields() {
        let partial = serde_json::json!({ "patientID": 1, "timestamp": 2 });
        assert!(serde_json::from_value::<VitalRecord>(partial).is_err());
    }
}
