//! # PMD Measurement Settings
//!
//! Settings are typed, length-prefixed records exchanged over the control
//! point:
//!
//! ```text
//! [SettingType][count][count × element]
//! ```
//!
//! Elements are unsigned 8-bit, unsigned 16-bit little-endian or 32-bit
//! little-endian floats. The element kind, count and width allowed for each
//! setting type on encode are fixed by [`SETTING_TABLE`]. Decoding accepts any
//! count since sensors answer settings queries with lists of options.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::protocol::{FLOAT32_SIZE, UINT16_SIZE, UINT8_SIZE};
use crate::error::{PmdError, Result};

/// Setting record header: type tag and element count
pub const SETTING_HEADER_SIZE: usize = 2;

/// Measurement setting type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SettingType {
    SampleRate = 0,
    Resolution = 1,
    RangeUnit = 2,
    Channels = 4,
    ConversionFactor = 5,
}

/// Element kind of a setting record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    U8,
    U16,
    F32,
}

impl ValueKind {
    /// Element width on the wire in bytes
    pub const fn width(self) -> usize {
        match self {
            ValueKind::U8 => UINT8_SIZE,
            ValueKind::U16 => UINT16_SIZE,
            ValueKind::F32 => FLOAT32_SIZE,
        }
    }
}

/// Encoding constraints for one setting type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingSpec {
    pub kind: ValueKind,
    pub count: usize,
    pub width: usize,
}

const fn spec(kind: ValueKind, count: usize) -> Option<SettingSpec> {
    Some(SettingSpec {
        kind,
        count,
        width: kind.width(),
    })
}

/// Setting type table, indexed by wire tag
pub const SETTING_TABLE: [Option<SettingSpec>; 6] = [
    spec(ValueKind::U16, 1), // SampleRate
    spec(ValueKind::U16, 1), // Resolution
    spec(ValueKind::U16, 1), // RangeUnit
    None,
    spec(ValueKind::U8, 1),  // Channels
    spec(ValueKind::F32, 1), // ConversionFactor
];

/// Looks up the table entry for a wire tag.
pub fn setting_spec(tag: u8) -> Option<SettingSpec> {
    SETTING_TABLE.get(tag as usize).copied().flatten()
}

/// A PMD measurement setting
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    U8 {
        setting_type: SettingType,
        values: Vec<u8>,
    },
    U16 {
        setting_type: SettingType,
        values: Vec<u16>,
    },
    F32 {
        setting_type: SettingType,
        values: Vec<f32>,
    },
}

impl Setting {
    /// Single-valued unsigned 8-bit setting
    pub fn u8(setting_type: SettingType, value: u8) -> Self {
        Setting::U8 { setting_type, values: vec![value] }
    }

    /// Single-valued unsigned 16-bit setting
    pub fn u16(setting_type: SettingType, value: u16) -> Self {
        Setting::U16 { setting_type, values: vec![value] }
    }

    /// Single-valued float setting
    pub fn f32(setting_type: SettingType, value: f32) -> Self {
        Setting::F32 { setting_type, values: vec![value] }
    }

    pub fn setting_type(&self) -> SettingType {
        match self {
            Setting::U8 { setting_type, .. }
            | Setting::U16 { setting_type, .. }
            | Setting::F32 { setting_type, .. } => *setting_type,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Setting::U8 { .. } => ValueKind::U8,
            Setting::U16 { .. } => ValueKind::U16,
            Setting::F32 { .. } => ValueKind::F32,
        }
    }

    /// Number of elements
    pub fn count(&self) -> usize {
        match self {
            Setting::U8 { values, .. } => values.len(),
            Setting::U16 { values, .. } => values.len(),
            Setting::F32 { values, .. } => values.len(),
        }
    }

    /// Values widened to `f64`, for display and comparisons
    pub fn values_f64(&self) -> Vec<f64> {
        match self {
            Setting::U8 { values, .. } => values.iter().map(|&v| f64::from(v)).collect(),
            Setting::U16 { values, .. } => values.iter().map(|&v| f64::from(v)).collect(),
            Setting::F32 { values, .. } => values.iter().map(|&v| f64::from(v)).collect(),
        }
    }

    /// Encoded size: header plus `count × width`
    pub fn size(&self) -> usize {
        SETTING_HEADER_SIZE + self.count() * self.kind().width()
    }

    /// Encodes the setting into `dst`.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of bytes written
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The element kind, count or width disagrees with [`SETTING_TABLE`]
    /// - `dst` is shorter than [`Setting::size`]
    pub fn write(&self, dst: &mut [u8]) -> Result<usize> {
        let tag = u8::from(self.setting_type());
        let count = self.count();
        let kind = self.kind();
        match setting_spec(tag) {
            Some(spec)
                if spec.kind == kind && spec.count == count && spec.width == kind.width() => {}
            _ => {
                return Err(PmdError::InvalidSetting(format!(
                    "{:?} with {} {:?} value(s)",
                    self.setting_type(),
                    count,
                    kind
                )))
            }
        }

        let size = self.size();
        if dst.len() < size {
            return Err(PmdError::BufferTooShort {
                needed: size,
                available: dst.len(),
            });
        }

        dst[0] = tag;
        dst[1] = count as u8;
        let body = &mut dst[SETTING_HEADER_SIZE..size];
        match self {
            Setting::U8 { values, .. } => body.copy_from_slice(values),
            Setting::U16 { values, .. } => {
                for (chunk, value) in body.chunks_exact_mut(UINT16_SIZE).zip(values) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
            Setting::F32 { values, .. } => {
                for (chunk, value) in body.chunks_exact_mut(FLOAT32_SIZE).zip(values) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        Ok(size)
    }

    /// Decodes one record of the given element kind from the start of `data`.
    ///
    /// Trailing bytes beyond the record are ignored; use [`Setting::size`] on
    /// the result to step over it.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Fewer than 2 header bytes are present
    /// - Fewer than `2 + count × width` bytes are present
    /// - The type tag is not a known setting type
    pub fn unmarshal(kind: ValueKind, data: &[u8]) -> Result<Self> {
        if data.len() < SETTING_HEADER_SIZE {
            return Err(PmdError::UnexpectedEof {
                expected: SETTING_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let count = data[1] as usize;
        let size = SETTING_HEADER_SIZE + count * kind.width();
        if data.len() < size {
            return Err(PmdError::UnexpectedEof {
                expected: size,
                actual: data.len(),
            });
        }
        let setting_type =
            SettingType::try_from(data[0]).map_err(|_| PmdError::UnknownSettingType(data[0]))?;

        let body = &data[SETTING_HEADER_SIZE..size];
        let setting = match kind {
            ValueKind::U8 => Setting::U8 {
                setting_type,
                values: body.to_vec(),
            },
            ValueKind::U16 => Setting::U16 {
                setting_type,
                values: body
                    .chunks_exact(UINT16_SIZE)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            },
            ValueKind::F32 => Setting::F32 {
                setting_type,
                values: body
                    .chunks_exact(FLOAT32_SIZE)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            },
        };
        Ok(setting)
    }
}

/// Parses a concatenation of setting records.
///
/// The element kind of each record is taken from [`SETTING_TABLE`].
///
/// # Errors
///
/// Returns the first error encountered: an unknown type tag or a truncated
/// record.
pub fn parse_settings(mut data: &[u8]) -> Result<Vec<Setting>> {
    let mut settings = Vec::new();
    while !data.is_empty() {
        let spec = setting_spec(data[0]).ok_or(PmdError::UnknownSettingType(data[0]))?;
        let setting = Setting::unmarshal(spec.kind, data)?;
        data = &data[setting.size()..];
        settings.push(setting);
    }
    Ok(settings)
}

/// Total encoded size of `settings`.
pub fn settings_size(settings: &[Setting]) -> usize {
    settings.iter().map(Setting::size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(setting: &Setting) -> Vec<u8> {
        let mut buf = vec![0u8; setting.size()];
        let n = setting.write(&mut buf).unwrap();
        assert_eq!(n, setting.size());
        buf
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(setting_spec(0).unwrap().kind, ValueKind::U16);
        assert_eq!(setting_spec(1).unwrap().width, 2);
        assert_eq!(setting_spec(2).unwrap().count, 1);
        assert_eq!(setting_spec(3), None);
        assert_eq!(setting_spec(4).unwrap().kind, ValueKind::U8);
        assert_eq!(setting_spec(5).unwrap().width, 4);
        assert_eq!(setting_spec(6), None);
        assert_eq!(setting_spec(0xFF), None);
    }

    #[test]
    fn test_size() {
        assert_eq!(Setting::u8(SettingType::Channels, 3).size(), 3);
        assert_eq!(Setting::u16(SettingType::SampleRate, 130).size(), 4);
        assert_eq!(Setting::f32(SettingType::ConversionFactor, 1.0).size(), 6);
    }

    #[test]
    fn test_write_sample_rate() {
        let bytes = encode(&Setting::u16(SettingType::SampleRate, 130));
        assert_eq!(bytes, vec![0x00, 0x01, 0x82, 0x00]);
    }

    #[test]
    fn test_write_conversion_factor() {
        let bytes = encode(&Setting::f32(SettingType::ConversionFactor, 1.0));
        assert_eq!(bytes, vec![0x05, 0x01, 0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn test_round_trip_every_table_type() {
        let settings = [
            Setting::u16(SettingType::SampleRate, 200),
            Setting::u16(SettingType::Resolution, 16),
            Setting::u16(SettingType::RangeUnit, 8),
            Setting::u8(SettingType::Channels, 3),
            Setting::f32(SettingType::ConversionFactor, 0.244),
        ];
        for setting in settings {
            let bytes = encode(&setting);
            let spec = setting_spec(bytes[0]).unwrap();
            let decoded = Setting::unmarshal(spec.kind, &bytes).unwrap();
            assert_eq!(decoded, setting);
        }
    }

    #[test]
    fn test_write_rejects_wrong_count() {
        let setting = Setting::U16 {
            setting_type: SettingType::SampleRate,
            values: vec![130, 200],
        };
        let mut buf = [0u8; 16];
        assert!(matches!(setting.write(&mut buf), Err(PmdError::InvalidSetting(_))));
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_write_rejects_empty_values() {
        let setting = Setting::U16 {
            setting_type: SettingType::Resolution,
            values: vec![],
        };
        let mut buf = [0u8; 16];
        assert!(matches!(setting.write(&mut buf), Err(PmdError::InvalidSetting(_))));
    }

    #[test]
    fn test_write_rejects_wrong_width() {
        // SampleRate is a 16-bit setting.
        let setting = Setting::u8(SettingType::SampleRate, 130);
        let mut buf = [0u8; 16];
        assert!(matches!(setting.write(&mut buf), Err(PmdError::InvalidSetting(_))));

        let setting = Setting::u16(SettingType::ConversionFactor, 1);
        assert!(matches!(setting.write(&mut buf), Err(PmdError::InvalidSetting(_))));
    }

    #[test]
    fn test_write_short_buffer() {
        let setting = Setting::u16(SettingType::SampleRate, 130);
        let mut buf = [0u8; 3];
        assert!(matches!(
            setting.write(&mut buf),
            Err(PmdError::BufferTooShort { needed: 4, available: 3 })
        ));
    }

    #[test]
    fn test_unmarshal_short_header() {
        assert!(matches!(
            Setting::unmarshal(ValueKind::U16, &[0x00]),
            Err(PmdError::UnexpectedEof { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_unmarshal_short_body() {
        // Declares two 16-bit values, carries one.
        assert!(matches!(
            Setting::unmarshal(ValueKind::U16, &[0x00, 0x02, 0x82, 0x00]),
            Err(PmdError::UnexpectedEof { expected: 6, actual: 4 })
        ));
    }

    #[test]
    fn test_unmarshal_value_list() {
        let data = [0x00, 0x04, 0x19, 0x00, 0x32, 0x00, 0x64, 0x00, 0xC8, 0x00];
        let setting = Setting::unmarshal(ValueKind::U16, &data).unwrap();
        assert_eq!(
            setting,
            Setting::U16 {
                setting_type: SettingType::SampleRate,
                values: vec![25, 50, 100, 200],
            }
        );
        assert_eq!(setting.values_f64(), vec![25.0, 50.0, 100.0, 200.0]);
    }

    #[test]
    fn test_parse_settings_ecg_response() {
        // Polar H10 ECG settings: 130 Hz, 14 bit.
        let data = [0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00];
        let settings = parse_settings(&data).unwrap();
        assert_eq!(
            settings,
            vec![
                Setting::u16(SettingType::SampleRate, 130),
                Setting::u16(SettingType::Resolution, 14),
            ]
        );
    }

    #[test]
    fn test_parse_settings_mixed_kinds() {
        let data = [
            0x04, 0x01, 0x03, // Channels: 3
            0x05, 0x01, 0x00, 0x00, 0x80, 0x3F, // ConversionFactor: 1.0
        ];
        let settings = parse_settings(&data).unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0], Setting::u8(SettingType::Channels, 3));
        assert_eq!(settings[1], Setting::f32(SettingType::ConversionFactor, 1.0));
    }

    #[test]
    fn test_parse_settings_unknown_type() {
        assert!(matches!(
            parse_settings(&[0x03, 0x01, 0x00]),
            Err(PmdError::UnknownSettingType(0x03))
        ));
    }

    #[test]
    fn test_parse_settings_truncated() {
        assert!(matches!(
            parse_settings(&[0x00, 0x01, 0x82]),
            Err(PmdError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_parse_settings_empty() {
        assert!(parse_settings(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_settings_size() {
        let settings = [
            Setting::u16(SettingType::SampleRate, 130),
            Setting::u16(SettingType::Resolution, 14),
        ];
        assert_eq!(settings_size(&settings), 8);
        assert_eq!(settings_size(&[]), 0);
    }
}
