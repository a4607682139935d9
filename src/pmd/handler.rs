//! # Measurement Handlers
//!
//! A handler describes one measurement stream: which measurement type it
//! targets, the settings it starts with and the callback fed with raw data
//! notifications. A handler without a callback stops the stream.

use std::fmt;
use std::sync::Arc;

use super::protocol::{Command, MeasureType};
use super::setting::{Setting, SettingType};

/// Callback invoked with every raw data notification of one measurement type
pub type SampleCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// ECG sample rate in Hz
pub const ECG_SAMPLE_FREQ: u16 = 130;

/// ECG resolution in bits
pub const ECG_RESOLUTION: u16 = 14;

/// Accelerometer resolution in bits
pub const ACC_RESOLUTION: u16 = 16;

/// Command, target and settings of a handler registration
#[derive(Clone)]
pub struct HandlerSpec {
    pub command: Command,
    pub measure: MeasureType,
    pub settings: Vec<Setting>,
    pub callback: Option<SampleCallback>,
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("command", &self.command)
            .field("measure", &self.measure)
            .field("settings", &self.settings)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Something that can be registered on a session
pub trait Handler {
    fn spec(&self) -> HandlerSpec;
}

/// ECG stream at 130 Hz, 14-bit
#[derive(Clone, Default)]
pub struct EcgHandler(pub Option<SampleCallback>);

impl EcgHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self(Some(Arc::new(callback)))
    }

    /// Handler that stops the ECG stream
    pub fn stop() -> Self {
        Self(None)
    }
}

impl Handler for EcgHandler {
    fn spec(&self) -> HandlerSpec {
        match &self.0 {
            None => HandlerSpec {
                command: Command::Stop,
                measure: MeasureType::ECG,
                settings: Vec::new(),
                callback: None,
            },
            Some(callback) => HandlerSpec {
                command: Command::Start,
                measure: MeasureType::ECG,
                settings: vec![
                    Setting::u16(SettingType::SampleRate, ECG_SAMPLE_FREQ),
                    Setting::u16(SettingType::Resolution, ECG_RESOLUTION),
                ],
                callback: Some(callback.clone()),
            },
        }
    }
}

/// Accelerometer stream
#[derive(Clone)]
pub struct AccHandler {
    /// Hz: 25, 50, 100 or 200
    pub sample_rate: u16,
    /// G: 2, 4 or 8
    pub range: u16,
    pub callback: Option<SampleCallback>,
}

impl AccHandler {
    pub fn new<F>(sample_rate: u16, range: u16, callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self {
            sample_rate,
            range,
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn stop() -> Self {
        Self {
            sample_rate: 0,
            range: 0,
            callback: None,
        }
    }
}

impl Handler for AccHandler {
    fn spec(&self) -> HandlerSpec {
        match &self.callback {
            None => HandlerSpec {
                command: Command::Stop,
                measure: MeasureType::ACC,
                settings: Vec::new(),
                callback: None,
            },
            Some(callback) => HandlerSpec {
                command: Command::Start,
                measure: MeasureType::ACC,
                settings: vec![
                    Setting::u16(SettingType::SampleRate, self.sample_rate),
                    Setting::u16(SettingType::Resolution, ACC_RESOLUTION),
                    Setting::u16(SettingType::RangeUnit, self.range),
                ],
                callback: Some(callback.clone()),
            },
        }
    }
}

impl Handler for HandlerSpec {
    fn spec(&self) -> HandlerSpec {
        self.clone()
    }
}
