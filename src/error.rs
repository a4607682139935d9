//! # Error Types
//!
//! Custom error types for the PMD codec and session using `thiserror`.

use thiserror::Error;

/// Main error type for polar-pmd
#[derive(Debug, Error)]
pub enum PmdError {
    /// Notification payload with a wrong tag, frame type or stride
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Input ended before a declared header or element count was satisfied
    #[error("Unexpected end of input: expected {expected} bytes, got {actual}")]
    UnexpectedEof { expected: usize, actual: usize },

    /// Destination buffer cannot hold the encoded value
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Setting value list does not match the setting type table
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// Setting type tag not present in the setting type table
    #[error("Unknown setting type: 0x{0:02X}")]
    UnknownSettingType(u8),

    /// Measurement type outside of the dispatch table
    #[error("Invalid measurement type: {0}")]
    InvalidMeasureType(u8),

    /// Control point response that violates the PMD protocol
    #[error("PMD protocol error: {0}")]
    Protocol(String),

    /// Control point response carrying a nonzero status code
    #[error("PMD command failed with status 0x{0:02X}")]
    Status(u8),

    /// Control point exchange not acknowledged before the deadline
    #[error("Deadline exceeded waiting for control point response")]
    DeadlineExceeded,

    /// Heart rate sensor reports no skin contact
    #[error("No sensor contact")]
    NoContact,

    /// Transport level failure (characteristic missing, disconnected, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bluetooth stack errors
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for polar-pmd
pub type Result<T> = std::result::Result<T, PmdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_offending_byte() {
        let err = PmdError::UnknownSettingType(0x03);
        assert_eq!(err.to_string(), "Unknown setting type: 0x03");

        let err = PmdError::Status(0x05);
        assert!(err.to_string().contains("0x05"));
    }
}
