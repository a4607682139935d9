//! # PMD Session
//!
//! One session per connected sensor. The session owns the control point and
//! data characteristics, the feature snapshot read at open time, and the
//! dispatch table routing data notifications to measurement callbacks.
//!
//! Control point exchanges are request/response over notifications: the
//! session subscribes to the control point, writes the command and waits for
//! exactly one notification or the caller's deadline. Exchanges on one session
//! are serialized.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{PmdError, Result};
use crate::pmd::decoder::{decode_response, ControlResponse};
use crate::pmd::encoder::{encode_command, CommandPreface};
use crate::pmd::features::FeatureSet;
use crate::pmd::handler::{Handler, SampleCallback};
use crate::pmd::protocol::{
    Command, MeasureType, RecordingType, MEASUREMENT_TYPES, MEASURE_TYPE_OFFSET,
    PMD_CONTROL_POINT_UUID, PMD_DATA_UUID, PMD_SERVICE_UUID,
};
use crate::pmd::setting::{parse_settings, Setting};
use crate::transport::{NotificationSink, Transport};

/// Control point read buffer; only the first two bytes carry features
const FEATURE_READ_SIZE: usize = 32;

type DispatchTable = [Option<SampleCallback>; MEASUREMENT_TYPES];

/// PMD session over a connected transport
pub struct Session<T: Transport> {
    transport: Arc<T>,
    control_point: T::Handle,
    data: T::Handle,
    features: FeatureSet,
    handlers: Arc<RwLock<DispatchTable>>,
    exchange_lock: tokio::sync::Mutex<()>,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Open a session on a connected sensor
    ///
    /// Discovers the PMD characteristics, reads the feature record and
    /// starts routing data notifications.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A PMD characteristic is missing
    /// - The feature record is shorter than 2 bytes
    /// - Data notifications cannot be enabled
    pub async fn open(transport: Arc<T>) -> Result<Self> {
        let control_point = transport
            .discover_characteristic(PMD_SERVICE_UUID, PMD_CONTROL_POINT_UUID)
            .await?;

        let mut buf = [0u8; FEATURE_READ_SIZE];
        let n = transport.read_raw(&control_point, &mut buf).await?;
        let features = FeatureSet::from_bytes(&buf[..n]).ok_or_else(|| {
            PmdError::Protocol(format!("device features too short: {:02X?}", &buf[..n]))
        })?;

        let data = transport
            .discover_characteristic(PMD_SERVICE_UUID, PMD_DATA_UUID)
            .await?;

        let handlers: Arc<RwLock<DispatchTable>> = Arc::new(RwLock::new(Default::default()));
        transport
            .enable_notifications(&data, Some(dispatcher(handlers.clone())))
            .await?;

        info!("PMD session open, features: {}", features);
        Ok(Self {
            transport,
            control_point,
            data,
            features,
            handlers,
            exchange_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Feature record read when the session was opened
    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// Query the settings a measurement type supports
    ///
    /// # Arguments
    ///
    /// * `measure` - Measurement type to query
    /// * `deadline` - Time to wait for the control point response
    ///
    /// # Returns
    ///
    /// * `Result<Vec<Setting>>` - Available settings, one record per type
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The sensor does not answer before `deadline` (`DeadlineExceeded`)
    /// - The response is malformed or reports a failure status
    /// - The setting records cannot be parsed
    pub async fn settings(
        &self,
        measure: MeasureType,
        deadline: Duration,
    ) -> Result<Vec<Setting>> {
        let preface = CommandPreface::new(Command::GetSettings, RecordingType::Online, measure);
        let msg = encode_command(&preface, &[])?;
        let _exchange = self.exchange_lock.lock().await;
        let response = self.exchange(Command::GetSettings, &msg, deadline).await?;
        parse_settings(&response.parameters)
    }

    /// Register a handler and start or stop its stream
    ///
    /// A handler with a callback installs it in the dispatch table and sends
    /// Start with its settings; if the exchange fails the previous entry is
    /// restored. A handler without a callback clears the entry and sends Stop.
    /// Registrations are serialized with every other control point exchange.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMeasureType` without touching the dispatch table if the
    /// handler targets a measurement type outside of the table, and any
    /// encoding or exchange error otherwise.
    pub async fn set_handler<H: Handler + ?Sized>(
        &self,
        handler: &H,
        deadline: Duration,
    ) -> Result<ControlResponse> {
        let spec = handler.spec();
        let slot = spec
            .measure
            .slot()
            .ok_or(PmdError::InvalidMeasureType(spec.measure.0))?;
        let command = if spec.callback.is_some() { spec.command } else { Command::Stop };
        let preface = CommandPreface::new(command, RecordingType::Online, spec.measure);
        let msg = encode_command(&preface, &spec.settings)?;

        let _exchange = self.exchange_lock.lock().await;
        let previous = std::mem::replace(&mut self.handlers.write()[slot], spec.callback.clone());
        let result = self.exchange(command, &msg, deadline).await;
        match &result {
            Ok(_) => info!("{} {} stream", command, spec.measure),
            Err(e) if spec.callback.is_some() => {
                warn!("Failed to {} {} stream: {}", command, spec.measure, e);
                self.handlers.write()[slot] = previous;
            }
            Err(e) => warn!("Failed to {} {} stream: {}", command, spec.measure, e),
        }
        result
    }

    /// Disable data notifications and disconnect
    pub async fn close(&self) -> Result<()> {
        let disabled = self.transport.enable_notifications(&self.data, None).await;
        if let Err(e) = &disabled {
            warn!("Failed to disable data notifications: {}", e);
        }
        self.transport.disconnect().await?;
        info!("PMD session closed");
        disabled
    }

    /// One request/response round trip; callers hold `exchange_lock`
    async fn exchange(
        &self,
        command: Command,
        msg: &[u8],
        deadline: Duration,
    ) -> Result<ControlResponse> {
        let (tx, rx) = oneshot::channel::<Vec<u8>>();
        let tx = Mutex::new(Some(tx));
        let sink: NotificationSink = Arc::new(move |data: &[u8]| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(data.to_vec());
            }
        });
        self.transport
            .enable_notifications(&self.control_point, Some(sink))
            .await?;
        let subscription = Subscription::new(self.transport.clone(), self.control_point.clone());

        let result = self.send_and_wait(msg, rx, deadline).await;
        subscription.disable().await;

        let response = result?;
        debug!("Control point response to {}: {:02X?}", command, response);
        decode_response(&response, command)
    }

    async fn send_and_wait(
        &self,
        msg: &[u8],
        rx: oneshot::Receiver<Vec<u8>>,
        deadline: Duration,
    ) -> Result<Vec<u8>> {
        debug!("Control point write: {:02X?}", msg);
        self.transport.write_no_response(&self.control_point, msg).await?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PmdError::Protocol(
                "control point closed before responding".to_string(),
            )),
            Err(_) => Err(PmdError::DeadlineExceeded),
        }
    }
}

/// Temporary control point subscription
///
/// Disabled exactly once: by [`Subscription::disable`] when the exchange
/// completes, or from a spawned task when the exchange future is dropped
/// part way through.
struct Subscription<T: Transport> {
    transport: Arc<T>,
    handle: Option<T::Handle>,
}

impl<T: Transport> Subscription<T> {
    fn new(transport: Arc<T>, handle: T::Handle) -> Self {
        Self {
            transport,
            handle: Some(handle),
        }
    }

    async fn disable(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.transport.enable_notifications(&handle, None).await {
                warn!("Failed to disable control point notifications: {}", e);
            }
        }
    }
}

impl<T: Transport> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Control point subscription dropped outside of a runtime");
            return;
        };
        debug!("Control point exchange cancelled");
        let transport = self.transport.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.enable_notifications(&handle, None).await {
                warn!("Failed to disable control point notifications: {}", e);
            }
        });
    }
}

/// Data notification sink routing by the leading measurement type byte
fn dispatcher(handlers: Arc<RwLock<DispatchTable>>) -> NotificationSink {
    Arc::new(move |data: &[u8]| {
        let Some(&tag) = data.get(MEASURE_TYPE_OFFSET) else {
            trace!("Dropped empty data notification");
            return;
        };
        let callback = MeasureType(tag)
            .slot()
            .and_then(|slot| handlers.read()[slot].clone());
        match callback {
            Some(callback) => callback(data),
            None => trace!("Dropped data notification for {}", MeasureType(tag)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmd::handler::{AccHandler, EcgHandler, HandlerSpec};
    use crate::pmd::setting::SettingType;
    use crate::transport::mocks::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const DEADLINE: Duration = Duration::from_millis(200);

    const ECG_SETTINGS_RESPONSE: [u8; 13] = [
        0xF0, 0x01, 0x00, 0x00, 0x00, //
        0x00, 0x01, 0x82, 0x00, // SampleRate 130
        0x01, 0x01, 0x0E, 0x00, // Resolution 14
    ];

    async fn open() -> (MockTransport, Session<MockTransport>) {
        let mock = MockTransport::new();
        let session = Session::open(Arc::new(mock.clone())).await.unwrap();
        (mock, session)
    }

    fn ecg_frame() -> Vec<u8> {
        let mut frame = vec![0x00];
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.push(0x00);
        frame.extend_from_slice(&[0x01, 0x00, 0x00]);
        frame
    }

    fn counting_handler(count: &Arc<AtomicUsize>) -> EcgHandler {
        let count = count.clone();
        EcgHandler::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_open_reads_features_and_subscribes_data() {
        let (mock, session) = open().await;
        assert_eq!(session.features(), FeatureSet([0x0F, 0x05]));
        assert!(mock.is_subscribed(PMD_DATA_UUID));
    }

    #[tokio::test]
    async fn test_open_rejects_short_features() {
        let mock = MockTransport::new();
        mock.set_value(PMD_CONTROL_POINT_UUID, &[0x0F]);
        let result = Session::open(Arc::new(mock)).await;
        assert!(matches!(result, Err(PmdError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_settings_before_deadline() {
        let (mock, session) = open().await;
        mock.push_response(&ECG_SETTINGS_RESPONSE);

        let settings = session.settings(MeasureType::ECG, DEADLINE).await.unwrap();
        assert_eq!(
            settings,
            vec![
                Setting::u16(SettingType::SampleRate, 130),
                Setting::u16(SettingType::Resolution, 14),
            ]
        );
        assert_eq!(mock.get_written_data(PMD_CONTROL_POINT_UUID), vec![vec![0x01, 0x00]]);
        assert_eq!(mock.disable_count(PMD_CONTROL_POINT_UUID), 1);
    }

    #[tokio::test]
    async fn test_settings_deadline_exceeded() {
        let (mock, session) = open().await;

        let started = Instant::now();
        let result = session.settings(MeasureType::ECG, DEADLINE).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(PmdError::DeadlineExceeded)));
        assert!(elapsed >= DEADLINE);
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(mock.disable_count(PMD_CONTROL_POINT_UUID), 1);
        assert!(!mock.is_subscribed(PMD_CONTROL_POINT_UUID));
    }

    #[tokio::test]
    async fn test_dropped_settings_unsubscribes_control_point() {
        let (mock, session) = open().await;

        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            session.settings(MeasureType::ECG, Duration::from_secs(5)),
        )
        .await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mock.is_subscribed(PMD_CONTROL_POINT_UUID));
        assert_eq!(mock.disable_count(PMD_CONTROL_POINT_UUID), 1);
    }

    #[tokio::test]
    async fn test_settings_error_status() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x01, 0x00, 0x03, 0x00]);

        let result = session.settings(MeasureType::ECG, DEADLINE).await;
        assert!(matches!(result, Err(PmdError::Status(0x03))));
        assert_eq!(mock.disable_count(PMD_CONTROL_POINT_UUID), 1);
    }

    #[tokio::test]
    async fn test_settings_write_failure_disables_once() {
        let (mock, session) = open().await;
        mock.set_write_error("link lost");

        let result = session.settings(MeasureType::ECG, DEADLINE).await;
        assert!(matches!(result, Err(PmdError::Transport(_))));
        assert_eq!(mock.disable_count(PMD_CONTROL_POINT_UUID), 1);
    }

    #[tokio::test]
    async fn test_set_handler_start_and_dispatch() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x02, 0x00, 0x00, 0x00]);

        let count = Arc::new(AtomicUsize::new(0));
        let response = session
            .set_handler(&counting_handler(&count), DEADLINE)
            .await
            .unwrap();
        assert_eq!(response.command, Command::Start);
        assert_eq!(
            mock.get_written_data(PMD_CONTROL_POINT_UUID),
            vec![vec![0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00]]
        );

        mock.notify_data(&ecg_frame());
        mock.notify_data(&ecg_frame());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_drops_unroutable_notifications() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x02, 0x00, 0x00, 0x00]);
        let count = Arc::new(AtomicUsize::new(0));
        session
            .set_handler(&counting_handler(&count), DEADLINE)
            .await
            .unwrap();

        mock.notify_data(&[]);
        mock.notify_data(&[0xFF, 0x00]);
        mock.notify_data(&[MEASUREMENT_TYPES as u8]);
        mock.notify_data(&[0x02, 0x00, 0x00]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_handler_out_of_range_keeps_table() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x02, 0x00, 0x00, 0x00]);
        let count = Arc::new(AtomicUsize::new(0));
        session
            .set_handler(&counting_handler(&count), DEADLINE)
            .await
            .unwrap();

        let invalid = HandlerSpec {
            command: Command::Start,
            measure: MeasureType(13),
            settings: Vec::new(),
            callback: Some(Arc::new(|_: &[u8]| {})),
        };
        let result = session.set_handler(&invalid, DEADLINE).await;
        assert!(matches!(result, Err(PmdError::InvalidMeasureType(13))));
        assert_eq!(mock.get_written_data(PMD_CONTROL_POINT_UUID).len(), 1);

        mock.notify_data(&ecg_frame());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_handler_clears_slot() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x02, 0x00, 0x00, 0x00]);
        mock.push_response(&[0xF0, 0x03, 0x00, 0x00, 0x00]);
        let count = Arc::new(AtomicUsize::new(0));
        session
            .set_handler(&counting_handler(&count), DEADLINE)
            .await
            .unwrap();

        let response = session.set_handler(&EcgHandler::stop(), DEADLINE).await.unwrap();
        assert_eq!(response.command, Command::Stop);
        let written = mock.get_written_data(PMD_CONTROL_POINT_UUID);
        assert_eq!(written.last().unwrap(), &vec![0x03, 0x00]);

        mock.notify_data(&ecg_frame());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_start_restores_slot() {
        let (mock, session) = open().await;
        mock.push_response(&[0xF0, 0x02, 0x02, 0x00, 0x00]);
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        session
            .set_handler(
                &AccHandler::new(50, 8, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                DEADLINE,
            )
            .await
            .unwrap();

        // Rejected restart leaves the running stream's callback in place
        mock.push_response(&[0xF0, 0x02, 0x02, 0x06, 0x00]);
        let result = session.set_handler(&AccHandler::new(200, 2, |_| {}), DEADLINE).await;
        assert!(matches!(result, Err(PmdError::Status(0x06))));

        mock.notify_data(&[0x02, 0x00]);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_first_start_leaves_slot_empty() {
        let (mock, session) = open().await;
        let count = Arc::new(AtomicUsize::new(0));
        let result = session
            .set_handler(&counting_handler(&count), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(PmdError::DeadlineExceeded)));

        mock.notify_data(&ecg_frame());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overlapping_starts_keep_successful_callback() {
        let (mock, session) = open().await;
        mock.push_silence();
        mock.push_response(&[0xF0, 0x02, 0x00, 0x00, 0x00]);

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_handler = counting_handler(&first);
        let second_handler = counting_handler(&second);
        let (first_result, second_result) = tokio::join!(
            session.set_handler(&first_handler, Duration::from_millis(50)),
            session.set_handler(&second_handler, DEADLINE),
        );
        assert!(matches!(first_result, Err(PmdError::DeadlineExceeded)));
        assert!(second_result.is_ok());

        mock.notify_data(&ecg_frame());
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close() {
        let (mock, session) = open().await;
        session.close().await.unwrap();
        assert_eq!(mock.disable_count(PMD_DATA_UUID), 1);
        assert!(mock.is_disconnected());
    }
}
