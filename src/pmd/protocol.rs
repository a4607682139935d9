//! # PMD Protocol Constants and Types
//!
//! Core protocol definitions for the PMD control point and data
//! characteristics.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use uuid::Uuid;

/// PMD GATT service
pub const PMD_SERVICE_UUID: Uuid = Uuid::from_u128(0xfb005c80_02e7_f387_1cad_8acd2d8df0c8);

/// PMD control point characteristic (settings, start, stop)
pub const PMD_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);

/// PMD data characteristic (measurement notifications)
pub const PMD_DATA_UUID: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);

/// Seconds between the Unix epoch and the device epoch, 2000-01-01T00:00:00Z
pub const DEVICE_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Leading byte of every control point response
pub const CONTROL_POINT_RESPONSE: u8 = 0xF0;

/// Minimum control point response length: code, command, type, status, more
pub const CONTROL_POINT_RESPONSE_MIN_SIZE: usize = 5;

/// Offset of the status byte in a control point response
pub const RESPONSE_STATUS_OFFSET: usize = 3;

/// Offset of the setting records in a control point response
pub const RESPONSE_PARAMETERS_OFFSET: usize = 5;

/// Data notification offsets
pub const MEASURE_TYPE_OFFSET: usize = 0;
pub const TIMESTAMP_OFFSET: usize = 1;
pub const FRAME_TYPE_OFFSET: usize = 9;
pub const DATA_OFFSET: usize = 10;

/// Number of dispatch table slots (measurement types 0..=12)
pub const MEASUREMENT_TYPES: usize = 13;

/// Wire element widths
pub const UINT8_SIZE: usize = 1;
pub const UINT16_SIZE: usize = 2;
pub const INT24_SIZE: usize = 3;
pub const FLOAT32_SIZE: usize = 4;

/// Control point command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    #[strum(to_string = "get settings")]
    GetSettings = 1,
    #[strum(to_string = "start")]
    Start = 2,
    #[strum(to_string = "stop")]
    Stop = 3,
}

/// Recording mode, carried in the high bit of the measurement type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RecordingType {
    #[default]
    Online = 0,
    Offline = 1,
}

/// Measurement stream type.
///
/// Kept as a raw wire byte: notifications and registrations may carry values
/// outside of the named set, which is validated where it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasureType(pub u8);

impl MeasureType {
    pub const ECG: MeasureType = MeasureType(0);
    pub const PPG: MeasureType = MeasureType(1);
    pub const ACC: MeasureType = MeasureType(2);
    pub const PPI: MeasureType = MeasureType(3);
    pub const GYRO: MeasureType = MeasureType(5);
    pub const MAGNETOMETER: MeasureType = MeasureType(6);
    pub const SDK_MODE: MeasureType = MeasureType(9);
    pub const LOCATION: MeasureType = MeasureType(10);
    pub const PRESSURE: MeasureType = MeasureType(11);
    pub const TEMPERATURE: MeasureType = MeasureType(12);

    /// Dispatch table slot, or `None` when out of range.
    pub fn slot(self) -> Option<usize> {
        let index = self.0 as usize;
        (index < MEASUREMENT_TYPES).then_some(index)
    }

    /// Name of a known measurement type.
    pub fn name(self) -> Option<&'static str> {
        match self {
            MeasureType::ECG => Some("ECG"),
            MeasureType::PPG => Some("PPG"),
            MeasureType::ACC => Some("Acc"),
            MeasureType::PPI => Some("PPI"),
            MeasureType::GYRO => Some("Gyro"),
            MeasureType::MAGNETOMETER => Some("Magnetometer"),
            MeasureType::SDK_MODE => Some("SDKMode"),
            MeasureType::LOCATION => Some("Location"),
            MeasureType::PRESSURE => Some("Pressure"),
            MeasureType::TEMPERATURE => Some("Temperature"),
            _ => None,
        }
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "MeasureType({})", self.0),
        }
    }
}

/// Frame sub-type; its meaning depends on the measurement type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(pub u8);

impl FrameType {
    pub const ECG_0: FrameType = FrameType(0);

    pub const PPG_0: FrameType = FrameType(0);
    pub const PPG_4: FrameType = FrameType(4);
    pub const PPG_5: FrameType = FrameType(5);
    pub const PPG_6: FrameType = FrameType(6);
    pub const PPG_7: FrameType = FrameType(7);
    pub const PPG_8: FrameType = FrameType(8);
    pub const PPG_9: FrameType = FrameType(9);

    /// 8-bit signed components
    pub const ACC_0: FrameType = FrameType(0);
    /// 16-bit signed components
    pub const ACC_1: FrameType = FrameType(1);
    /// 24-bit signed components
    pub const ACC_2: FrameType = FrameType(2);

    pub const PPI_0: FrameType = FrameType(0);
    pub const GYRO_0: FrameType = FrameType(0);
    pub const GYRO_1: FrameType = FrameType(1);
    pub const MAGNETOMETER_0: FrameType = FrameType(0);
    pub const PRESSURE_0: FrameType = FrameType(0);
    pub const TEMPERATURE_0: FrameType = FrameType(0);
}

/// Reads a signed 24-bit little-endian integer.
///
/// The sign is taken from the top bit of `b[2]`.
///
/// # Panics
///
/// Panics if `b` is shorter than 3 bytes.
pub fn le_i24(b: &[u8]) -> i32 {
    i32::from(b[0]) | i32::from(b[1]) << 8 | i32::from(b[2] as i8) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            PMD_SERVICE_UUID.to_string(),
            "fb005c80-02e7-f387-1cad-8acd2d8df0c8"
        );
        assert_eq!(
            PMD_CONTROL_POINT_UUID.to_string(),
            "fb005c81-02e7-f387-1cad-8acd2d8df0c8"
        );
        assert_eq!(
            PMD_DATA_UUID.to_string(),
            "fb005c82-02e7-f387-1cad-8acd2d8df0c8"
        );
    }

    #[test]
    fn test_frame_offsets() {
        assert_eq!(MEASURE_TYPE_OFFSET, 0);
        assert_eq!(TIMESTAMP_OFFSET, 1);
        assert_eq!(FRAME_TYPE_OFFSET, TIMESTAMP_OFFSET + 8);
        assert_eq!(DATA_OFFSET, 10);
    }

    #[test]
    fn test_command_wire_values() {
        assert_eq!(u8::from(Command::GetSettings), 1);
        assert_eq!(u8::from(Command::Start), 2);
        assert_eq!(u8::from(Command::Stop), 3);
        assert_eq!(Command::try_from(2u8).unwrap(), Command::Start);
        assert!(Command::try_from(4u8).is_err());
    }

    #[test]
    fn test_measure_type_slots() {
        assert_eq!(MeasureType::ECG.slot(), Some(0));
        assert_eq!(MeasureType::TEMPERATURE.slot(), Some(12));
        assert_eq!(MeasureType(13).slot(), None);
        assert_eq!(MeasureType(0xFF).slot(), None);
    }

    #[test]
    fn test_measure_type_display() {
        assert_eq!(MeasureType::ACC.to_string(), "Acc");
        assert_eq!(MeasureType(4).to_string(), "MeasureType(4)");
    }

    #[test]
    fn test_le_i24() {
        assert_eq!(le_i24(&[0x01, 0x00, 0x00]), 1);
        assert_eq!(le_i24(&[0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(le_i24(&[0x00, 0x00, 0x80]), -8_388_608);
        assert_eq!(le_i24(&[0xFF, 0xFF, 0x7F]), 8_388_607);
        assert_eq!(le_i24(&[0x34, 0x12, 0x00]), 0x1234);
    }
}
