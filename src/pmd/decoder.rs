//! # PMD Packet Decoder
//!
//! Decodes PMD data notifications (ECG, accelerometer) and control point
//! responses.
//!
//! Data notification layout:
//! ```text
//! Byte 0:     measurement type
//! Bytes 1-8:  timestamp, u64 little-endian, ns since 2000-01-01T00:00:00Z
//! Byte 9:     frame type
//! Bytes 10..: samples
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::protocol::*;
use crate::error::{PmdError, Result};

/// Parsed header of a data notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader<'a> {
    pub measure: MeasureType,
    pub timestamp: DateTime<Utc>,
    pub frame_type: FrameType,
    pub payload: &'a [u8],
}

/// Split a data notification into its header fields and sample payload
///
/// # Errors
///
/// Returns error if the notification is shorter than the 10-byte header.
pub fn decode_header(data: &[u8]) -> Result<FrameHeader<'_>> {
    if data.len() < DATA_OFFSET {
        return Err(PmdError::UnexpectedEof {
            expected: DATA_OFFSET,
            actual: data.len(),
        });
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[TIMESTAMP_OFFSET..FRAME_TYPE_OFFSET]);

    Ok(FrameHeader {
        measure: MeasureType(data[MEASURE_TYPE_OFFSET]),
        timestamp: device_time(u64::from_le_bytes(raw))?,
        frame_type: FrameType(data[FRAME_TYPE_OFFSET]),
        payload: &data[DATA_OFFSET..],
    })
}

/// Convert a raw device clock value to UTC
///
/// The device counts nanoseconds since 2000-01-01T00:00:00Z.
pub fn device_time(raw_ns: u64) -> Result<DateTime<Utc>> {
    let secs = (raw_ns / 1_000_000_000) as i64 + DEVICE_EPOCH_OFFSET_SECS;
    let nanos = (raw_ns % 1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| PmdError::MalformedFrame(format!("timestamp out of range: {}", raw_ns)))
}

/// ECG measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ecg {
    pub timestamp: DateTime<Utc>,
    /// Samples in µV
    pub trace: Vec<i32>,
}

impl Ecg {
    /// Decode an ECG data notification
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The notification is shorter than the header
    /// - Measurement type is not ECG or frame type is not 0
    /// - Sample bytes are not a multiple of 3
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = decode_header(data)?;
        if header.measure != MeasureType::ECG {
            return Err(PmdError::MalformedFrame(format!(
                "expected sample type ECG: 0x{:02X}",
                header.measure.0
            )));
        }
        if header.frame_type != FrameType::ECG_0 {
            return Err(PmdError::MalformedFrame(format!(
                "expected ECG frame type 0: 0x{:02X}",
                header.frame_type.0
            )));
        }
        if header.payload.len() % INT24_SIZE != 0 {
            return Err(PmdError::MalformedFrame(format!(
                "ECG sample bytes not a multiple of 3: {} trailing",
                header.payload.len() % INT24_SIZE
            )));
        }

        let trace = header.payload.chunks_exact(INT24_SIZE).map(le_i24).collect();
        Ok(Ecg {
            timestamp: header.timestamp,
            trace,
        })
    }
}

/// Accelerometer measurement, in the sensor's configured range units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acc {
    pub timestamp: DateTime<Utc>,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Acc {
    /// Decode an accelerometer data notification
    ///
    /// Frame type 0, 1 and 2 select 1, 2 and 3-byte signed little-endian
    /// components.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The notification is shorter than the header plus one XYZ triple
    /// - Measurement type is not Acc or the frame type is unknown
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = decode_header(data)?;
        if header.measure != MeasureType::ACC {
            return Err(PmdError::MalformedFrame(format!(
                "expected sample type Acc: 0x{:02X}",
                header.measure.0
            )));
        }

        let width = match header.frame_type {
            FrameType::ACC_0 => UINT8_SIZE,
            FrameType::ACC_1 => UINT16_SIZE,
            FrameType::ACC_2 => INT24_SIZE,
            other => {
                return Err(PmdError::MalformedFrame(format!(
                    "expected Acc frame type 0/1/2: 0x{:02X}",
                    other.0
                )))
            }
        };
        let needed = 3 * width;
        if header.payload.len() < needed {
            return Err(PmdError::UnexpectedEof {
                expected: DATA_OFFSET + needed,
                actual: data.len(),
            });
        }

        let component = |i: usize| {
            let b = &header.payload[i * width..(i + 1) * width];
            match width {
                UINT8_SIZE => i32::from(b[0] as i8),
                UINT16_SIZE => i32::from(i16::from_le_bytes([b[0], b[1]])),
                _ => le_i24(b),
            }
        };

        Ok(Acc {
            timestamp: header.timestamp,
            x: component(0),
            y: component(1),
            z: component(2),
        })
    }
}

/// Control point response
///
/// ```text
/// Byte 0:  0xF0
/// Byte 1:  echoed command
/// Byte 2:  measurement type
/// Byte 3:  status (0 = success)
/// Byte 4:  more-frames flag
/// Bytes 5..: parameters (setting records for GetSettings)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub command: Command,
    pub measure: MeasureType,
    pub status: u8,
    pub parameters: Bytes,
}

/// Validate a control point response to `expected`
///
/// # Errors
///
/// Returns error if:
/// - The response is shorter than 5 bytes
/// - The leading byte is not 0xF0 or the echoed command differs
/// - The status byte is nonzero
pub fn decode_response(data: &[u8], expected: Command) -> Result<ControlResponse> {
    if data.len() < CONTROL_POINT_RESPONSE_MIN_SIZE {
        return Err(PmdError::Protocol(format!("short response: {:02X?}", data)));
    }
    if data[0] != CONTROL_POINT_RESPONSE || data[1] != u8::from(expected) {
        return Err(PmdError::Protocol(format!(
            "invalid response to {}: {:02X?}",
            expected,
            &data[..CONTROL_POINT_RESPONSE_MIN_SIZE]
        )));
    }
    let status = data[RESPONSE_STATUS_OFFSET];
    if status != 0 {
        return Err(PmdError::Status(status));
    }

    Ok(ControlResponse {
        command: expected,
        measure: MeasureType(data[2]),
        status,
        parameters: Bytes::copy_from_slice(&data[RESPONSE_PARAMETERS_OFFSET..]),
    })
}
