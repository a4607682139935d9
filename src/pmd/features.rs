//! # Supported Features
//!
//! The PMD control point characteristic reads back a feature record whose
//! first two bytes describe the measurement types the sensor supports.

use std::fmt;

use strum_macros::Display;

/// Marker in byte 0 of a structured feature record
pub const FEATURE_RECORD_MARKER: u8 = 0x0F;

/// Capability flag in byte 1 of the feature record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Support {
    #[strum(to_string = "ECG")]
    Ecg = 1 << 0,
    #[strum(to_string = "PPG")]
    Ppg = 1 << 1,
    #[strum(to_string = "Acc")]
    Acc = 1 << 2,
    #[strum(to_string = "PPI")]
    Ppi = 1 << 3,
    #[strum(to_string = "BioImpedance")]
    BioImpedance = 1 << 4,
    #[strum(to_string = "Gyro")]
    Gyro = 1 << 5,
    #[strum(to_string = "Mag")]
    Magnetometer = 1 << 6,
}

impl Support {
    /// All flags in bit order
    pub const ALL: [Support; 7] = [
        Support::Ecg,
        Support::Ppg,
        Support::Acc,
        Support::Ppi,
        Support::BioImpedance,
        Support::Gyro,
        Support::Magnetometer,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// Two-byte PMD feature record, read once at session start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet(pub [u8; 2]);

impl FeatureSet {
    /// Builds a feature set from the first two bytes of a control point read.
    ///
    /// Returns `None` if fewer than two bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, ..] => Some(Self([*a, *b])),
            _ => None,
        }
    }

    /// Returns true when the record carries capability flags.
    pub fn is_structured(&self) -> bool {
        self.0[0] == FEATURE_RECORD_MARKER
    }

    /// Returns true when `flag` is advertised.
    pub fn supports(&self, flag: Support) -> bool {
        self.is_structured() && self.0[1] & flag.bit() != 0
    }

    /// Advertised flags in bit order.
    pub fn flags(&self) -> Vec<Support> {
        Support::ALL
            .into_iter()
            .filter(|flag| self.supports(*flag))
            .collect()
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_structured() {
            return write!(f, "{:#06x}", u16::from_be_bytes(self.0));
        }
        let mut names: Vec<String> = self.flags().iter().map(ToString::to_string).collect();
        let known = Support::ALL.iter().fold(0u8, |bits, flag| bits | flag.bit());
        let unknown = self.0[1] & !known;
        for shift in 0..8 {
            let bit = unknown & (1 << shift);
            if bit != 0 {
                names.push(format!("Support({})", bit));
            }
        }
        f.write_str(&names.join("|"))
    }
}
