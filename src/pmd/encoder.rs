//! # PMD Command Encoder
//!
//! Builds control point messages: a two-byte command preface followed by
//! zero or more setting records.

use super::protocol::{Command, MeasureType, RecordingType};
use super::setting::{settings_size, Setting};
use crate::error::{PmdError, Result};

/// Command preface size
pub const COMMAND_PREFACE_SIZE: usize = 2;

/// Command, recording and measurement type of a control point message.
///
/// Wire layout:
/// ```text
/// Byte 0: command
/// Byte 1: recording << 7 | measure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPreface {
    pub command: Command,
    pub recording: RecordingType,
    pub measure: MeasureType,
}

impl CommandPreface {
    pub fn new(command: Command, recording: RecordingType, measure: MeasureType) -> Self {
        Self {
            command,
            recording,
            measure,
        }
    }

    pub fn size(&self) -> usize {
        COMMAND_PREFACE_SIZE
    }

    /// Encodes the preface into `dst`.
    ///
    /// # Errors
    ///
    /// Returns error if `dst` is shorter than 2 bytes or the measurement type
    /// does not fit below the recording bit.
    pub fn write(&self, dst: &mut [u8]) -> Result<usize> {
        if self.measure.0 & 0x80 != 0 {
            return Err(PmdError::InvalidMeasureType(self.measure.0));
        }
        if dst.len() < COMMAND_PREFACE_SIZE {
            return Err(PmdError::BufferTooShort {
                needed: COMMAND_PREFACE_SIZE,
                available: dst.len(),
            });
        }
        dst[0] = u8::from(self.command);
        dst[1] = u8::from(self.recording) << 7 | self.measure.0;
        Ok(COMMAND_PREFACE_SIZE)
    }
}

/// Encode a complete control point message
///
/// # Arguments
///
/// * `preface` - Command, recording type and measurement type
/// * `settings` - Settings appended after the preface, in order
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Message sized exactly to its content
///
/// # Errors
///
/// Returns error if any setting violates the setting type table.
///
/// # Examples
///
/// ```
/// use polar_pmd::pmd::encoder::{encode_command, CommandPreface};
/// use polar_pmd::pmd::protocol::{Command, MeasureType, RecordingType};
/// use polar_pmd::pmd::setting::{Setting, SettingType};
///
/// let preface = CommandPreface::new(Command::Start, RecordingType::Online, MeasureType::ECG);
/// let msg = encode_command(&preface, &[Setting::u16(SettingType::SampleRate, 130)]).unwrap();
/// assert_eq!(msg, vec![0x02, 0x00, 0x00, 0x01, 0x82, 0x00]);
/// ```
pub fn encode_command(preface: &CommandPreface, settings: &[Setting]) -> Result<Vec<u8>> {
    let mut msg = vec![0u8; preface.size() + settings_size(settings)];
    let mut off = preface.write(&mut msg)?;
    for setting in settings {
        off += setting.write(&mut msg[off..])?;
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmd::setting::SettingType;

    #[test]
    fn test_preface_layout() {
        let preface =
            CommandPreface::new(Command::GetSettings, RecordingType::Online, MeasureType::ACC);
        let mut buf = [0u8; 2];
        assert_eq!(preface.write(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0x01, 0x02]);
    }

    #[test]
    fn test_preface_offline_sets_high_bit() {
        let preface = CommandPreface::new(Command::Start, RecordingType::Offline, MeasureType::ECG);
        let mut buf = [0u8; 2];
        preface.write(&mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x80]);
    }

    #[test]
    fn test_preface_short_buffer() {
        let preface = CommandPreface::new(Command::Stop, RecordingType::Online, MeasureType::ECG);
        let mut buf = [0u8; 1];
        assert!(matches!(preface.write(&mut buf), Err(PmdError::BufferTooShort { .. })));
    }

    #[test]
    fn test_preface_rejects_measure_colliding_with_recording_bit() {
        let preface = CommandPreface::new(Command::Start, RecordingType::Online, MeasureType(0x80));
        let mut buf = [0u8; 2];
        assert!(matches!(preface.write(&mut buf), Err(PmdError::InvalidMeasureType(0x80))));
    }

    #[test]
    fn test_encode_get_settings() {
        let preface =
            CommandPreface::new(Command::GetSettings, RecordingType::Online, MeasureType::ECG);
        assert_eq!(encode_command(&preface, &[]).unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn test_encode_start_ecg() {
        let preface = CommandPreface::new(Command::Start, RecordingType::Online, MeasureType::ECG);
        let msg = encode_command(
            &preface,
            &[
                Setting::u16(SettingType::SampleRate, 130),
                Setting::u16(SettingType::Resolution, 14),
            ],
        )
        .unwrap();
        assert_eq!(
            msg,
            vec![0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00]
        );
    }

    #[test]
    fn test_encode_rejects_invalid_setting() {
        let preface = CommandPreface::new(Command::Start, RecordingType::Online, MeasureType::ACC);
        let result = encode_command(&preface, &[Setting::u8(SettingType::RangeUnit, 8)]);
        assert!(matches!(result, Err(PmdError::InvalidSetting(_))));
    }
}
