//! # Transport Module
//!
//! Trait abstraction over a connected GATT peripheral so the session can be
//! driven by real Bluetooth hardware or by an in-memory fake in tests.
//!
//! Only notify and write-without-response semantics are used.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

pub mod ble;

pub use ble::BleTransport;

/// Receiver of notifications for one characteristic
///
/// Runs on the transport's delivery context; keep it short and non-blocking.
pub type NotificationSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Connected peripheral operations
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Characteristic handle returned by discovery
    type Handle: Clone + Send + Sync + 'static;

    /// Look up a characteristic of a service
    async fn discover_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self::Handle>;

    /// Read the characteristic value into `buf`, returning the bytes copied
    async fn read_raw(&self, handle: &Self::Handle, buf: &mut [u8]) -> Result<usize>;

    /// Write without response
    async fn write_no_response(&self, handle: &Self::Handle, data: &[u8]) -> Result<()>;

    /// Route notifications to `sink`, or stop them with `None`
    async fn enable_notifications(
        &self,
        handle: &Self::Handle,
        sink: Option<NotificationSink>,
    ) -> Result<()>;

    /// Drop the connection
    async fn disconnect(&self) -> Result<()>;
}
