//! # Heart Rate and Battery
//!
//! Standard GATT heart rate measurement (service 0x180D, characteristic
//! 0x2A37) and battery level (service 0x180F, characteristic 0x2A19).
//!
//! Heart rate measurement layout:
//! ```text
//! Byte 0:  flags
//!          0x01 heart rate is u16 (else u8)
//!          0x06 sensor contact detected (both bits)
//!          0x04 sensor contact supported
//!          0x08 energy expended present (u16, kJ)
//!          0x10 RR intervals present (u16 each, 1/1024 s)
//! Then:    heart rate, energy, RR intervals
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PmdError, Result};
use crate::transport::{NotificationSink, Transport};

/// Heart rate GATT service
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Heart rate measurement characteristic
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Battery GATT service
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Battery level characteristic
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

const FLAG_FORMAT_U16: u8 = 0x01;
const FLAG_CONTACT: u8 = 0x06;
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
const FLAG_ENERGY: u8 = 0x08;
const FLAG_RR: u8 = 0x10;

/// RR interval resolution, intervals per second
const RR_UNITS_PER_SECOND: u64 = 1024;

/// Heart rate measurement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartRate {
    /// Beats per minute
    pub hr: u16,
    pub rr: Vec<Duration>,
    /// Energy expended in kJ
    pub energy: Option<u16>,
    pub contact: bool,
    pub contact_supported: bool,
}

impl HeartRate {
    /// Decode a heart rate measurement notification
    ///
    /// A trailing odd RR byte is ignored.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The notification is truncated
    /// - The sensor supports contact detection and reports no contact
    ///   (`NoContact`)
    pub fn decode(data: &[u8]) -> Result<Self> {
        let flags = *data.first().ok_or(PmdError::UnexpectedEof { expected: 2, actual: 0 })?;
        let contact = flags & FLAG_CONTACT == FLAG_CONTACT;
        let contact_supported = flags & FLAG_CONTACT_SUPPORTED != 0;
        if contact_supported && !contact {
            return Err(PmdError::NoContact);
        }

        let mut offset = 1;
        let take = |offset: usize, width: usize| {
            data.get(offset..offset + width).ok_or(PmdError::UnexpectedEof {
                expected: offset + width,
                actual: data.len(),
            })
        };

        let hr = if flags & FLAG_FORMAT_U16 != 0 {
            let b = take(offset, 2)?;
            offset += 2;
            u16::from_le_bytes([b[0], b[1]])
        } else {
            let b = take(offset, 1)?;
            offset += 1;
            u16::from(b[0])
        };

        let energy = if flags & FLAG_ENERGY != 0 {
            let b = take(offset, 2)?;
            offset += 2;
            Some(u16::from_le_bytes([b[0], b[1]]))
        } else {
            None
        };

        let rr = if flags & FLAG_RR != 0 {
            data[offset..]
                .chunks_exact(2)
                .map(|b| {
                    let units = u64::from(u16::from_le_bytes([b[0], b[1]]));
                    Duration::from_nanos(units * 1_000_000_000 / RR_UNITS_PER_SECOND)
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(HeartRate {
            hr,
            rr,
            energy,
            contact,
            contact_supported,
        })
    }

    /// Whether samples taken with this reading should be trusted
    ///
    /// Sensors that cannot detect contact are always trusted.
    pub fn has_signal(&self) -> bool {
        self.contact || !self.contact_supported
    }
}

/// Heart rate notification subscription
pub struct HeartRateListener<T: Transport> {
    transport: Arc<T>,
    measurement: T::Handle,
}

impl<T: Transport> HeartRateListener<T> {
    /// Subscribe to heart rate measurements
    ///
    /// `callback` receives every decoded measurement or its decode error,
    /// on the transport's delivery context.
    pub async fn start<F>(transport: Arc<T>, callback: F) -> Result<Self>
    where
        F: Fn(Result<HeartRate>) + Send + Sync + 'static,
    {
        let measurement = transport
            .discover_characteristic(HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await?;
        let sink: NotificationSink = Arc::new(move |data: &[u8]| callback(HeartRate::decode(data)));
        transport.enable_notifications(&measurement, Some(sink)).await?;
        info!("Heart rate notifications enabled");
        Ok(Self { transport, measurement })
    }

    /// Stop heart rate notifications
    pub async fn close(&self) -> Result<()> {
        self.transport.enable_notifications(&self.measurement, None).await
    }
}

/// Read the battery level in percent
pub async fn battery_level<T: Transport>(transport: &T) -> Result<u8> {
    let level = transport
        .discover_characteristic(BATTERY_SERVICE_UUID, BATTERY_LEVEL_UUID)
        .await?;
    let mut buf = [0u8; 1];
    let n = transport.read_raw(&level, &mut buf).await?;
    if n == 0 {
        return Err(PmdError::UnexpectedEof { expected: 1, actual: 0 });
    }
    debug!("Battery level: {}%", buf[0]);
    Ok(buf[0])
}
