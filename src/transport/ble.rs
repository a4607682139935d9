//! Bluetooth LE transport on btleplug

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{NotificationSink, Transport};
use crate::config::DeviceConfig;
use crate::error::{PmdError, Result};

/// Interval between peripheral list polls while scanning
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Time allowed for GATT service discovery after connecting
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Connected Polar sensor
pub struct BleTransport {
    peripheral: Peripheral,
    name: String,
    sinks: Arc<Mutex<HashMap<Uuid, NotificationSink>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("name", &self.name)
            .field("address", &self.peripheral.address())
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Scan for a sensor and connect to it
    ///
    /// The first peripheral whose address equals `config.address` or, with no
    /// address configured, whose local name starts with `config.name_prefix`
    /// is used.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No Bluetooth adapter is available
    /// - No matching sensor shows up within `scan_timeout_s`
    /// - Connecting or service discovery fails or times out
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use polar_pmd::config::DeviceConfig;
    /// use polar_pmd::transport::BleTransport;
    ///
    /// # async fn run(config: DeviceConfig) -> polar_pmd::error::Result<()> {
    /// let transport = BleTransport::connect(&config).await?;
    /// println!("connected to {}", transport.name());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PmdError::Transport("no Bluetooth adapter found".to_string()))?;

        info!(
            "Scanning for {} (timeout: {} s)",
            config.address.as_deref().unwrap_or(&config.name_prefix),
            config.scan_timeout_s
        );
        adapter.start_scan(ScanFilter::default()).await?;
        let found = find_first(&adapter, config).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }
        let (peripheral, name) = found?;
        info!("Found {} at {}", name, peripheral.address());

        let connect_timeout = Duration::from_secs(config.connect_timeout_s);
        tokio::time::timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| {
                PmdError::Transport(format!(
                    "connect timed out after {} s",
                    config.connect_timeout_s
                ))
            })??;

        tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| {
                PmdError::Transport(format!(
                    "service discovery timed out after {} s",
                    DISCOVERY_TIMEOUT.as_secs()
                ))
            })??;
        debug!("Discovered {} characteristics", peripheral.characteristics().len());

        let sinks: Arc<Mutex<HashMap<Uuid, NotificationSink>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut notifications = peripheral.notifications().await?;
        let routes = sinks.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let sink = routes.lock().get(&notification.uuid).cloned();
                match sink {
                    Some(sink) => sink(&notification.value),
                    None => trace!("Unrouted notification from {}", notification.uuid),
                }
            }
            info!("Notification stream ended");
        });

        Ok(Self {
            peripheral,
            name,
            sinks,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Advertised local name of the connected sensor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bluetooth address of the connected sensor
    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }
}

async fn find_first(adapter: &Adapter, config: &DeviceConfig) -> Result<(Peripheral, String)> {
    let search = async {
        loop {
            let peripherals = adapter.peripherals().await.unwrap_or_default();
            for p in peripherals {
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                let name = props.local_name.unwrap_or_default();
                let matched = match &config.address {
                    Some(address) => p.address().to_string().eq_ignore_ascii_case(address),
                    None => name.starts_with(&config.name_prefix),
                };
                if matched {
                    return (p, name);
                }
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(config.scan_timeout_s), search)
        .await
        .map_err(|_| {
            PmdError::Transport(format!(
                "no sensor found after {} s of scanning",
                config.scan_timeout_s
            ))
        })
}

#[async_trait]
impl Transport for BleTransport {
    type Handle = Characteristic;

    async fn discover_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| {
                PmdError::Transport(format!(
                    "characteristic {} not found in service {}",
                    characteristic, service
                ))
            })
    }

    async fn read_raw(&self, handle: &Characteristic, buf: &mut [u8]) -> Result<usize> {
        let value = self.peripheral.read(handle).await?;
        let n = value.len().min(buf.len());
        if n < value.len() {
            warn!("Read of {} truncated to {} of {} bytes", handle.uuid, n, value.len());
        }
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    async fn write_no_response(&self, handle: &Characteristic, data: &[u8]) -> Result<()> {
        debug!("Write {}: {:02X?}", handle.uuid, data);
        self.peripheral
            .write(handle, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: &Characteristic,
        sink: Option<NotificationSink>,
    ) -> Result<()> {
        match sink {
            Some(sink) => {
                self.sinks.lock().insert(handle.uuid, sink);
                if let Err(e) = self.peripheral.subscribe(handle).await {
                    self.sinks.lock().remove(&handle.uuid);
                    return Err(e.into());
                }
                debug!("Subscribed to {}", handle.uuid);
            }
            None => {
                self.sinks.lock().remove(&handle.uuid);
                self.peripheral.unsubscribe(handle).await?;
                debug!("Unsubscribed from {}", handle.uuid);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }
        self.sinks.lock().clear();
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.name);
        Ok(())
    }
}
