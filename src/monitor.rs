//! # Monitor Module
//!
//! Consumer side of a live session. ECG notifications are decoded on the
//! transport's delivery context and appended to a sliding sample window under
//! a short lock; a coalescing signal wakes the consumer loop, which summarises
//! the window. Heart rate notifications drive the skin contact flag that gates
//! ECG acceptance.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{PmdError, Result};
use crate::heart::HeartRate;
use crate::pmd::decoder::{Acc, Ecg};
use crate::pmd::handler::ECG_SAMPLE_FREQ;
use crate::ring::RingBuffer;

/// Heart rate readings kept for the running average
pub const HEART_RATE_HISTORY: usize = 130;

/// Skin contact state shared between the heart rate and ECG callbacks
#[derive(Debug, Clone, Default)]
pub struct ContactFlag(Arc<AtomicBool>);

impl ContactFlag {
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initial)))
    }

    pub fn set(&self, contact: bool) {
        self.0.store(contact, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Producer handle onto the ECG sample window
#[derive(Debug, Clone)]
pub struct EcgWindow {
    ring: Arc<Mutex<RingBuffer<i32>>>,
    signal: mpsc::Sender<DateTime<Utc>>,
}

impl EcgWindow {
    /// Append a decoded ECG frame and wake the consumer
    ///
    /// The signal is sent without blocking while the lock is held; a wakeup
    /// already pending absorbs this one.
    pub fn push(&self, ecg: &Ecg) {
        let mut ring = self.ring.lock();
        ring.write(&ecg.trace);
        let _ = self.signal.try_send(ecg.timestamp);
    }

    /// Samples currently held, oldest first
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inputs feeding a [`Monitor`]
#[derive(Debug, Clone)]
pub struct MonitorInputs {
    pub ecg: EcgWindow,
    pub heart_rate: mpsc::Sender<HeartRate>,
    pub contact: ContactFlag,
}

impl MonitorInputs {
    /// Data notification callback for the ECG stream
    ///
    /// Frames arriving without skin contact are dropped before decoding.
    pub fn ecg_callback(&self) -> impl Fn(&[u8]) + Send + Sync + 'static {
        let window = self.ecg.clone();
        let contact = self.contact.clone();
        move |data: &[u8]| {
            if !contact.get() {
                return;
            }
            match Ecg::decode(data) {
                Ok(ecg) => window.push(&ecg),
                Err(e) => warn!("Failed to decode ECG measurement: {}", e),
            }
        }
    }

    /// Heart rate callback updating the contact flag
    pub fn heart_rate_callback(&self) -> impl Fn(Result<HeartRate>) + Send + Sync + 'static {
        let tx = self.heart_rate.clone();
        let contact = self.contact.clone();
        move |measurement: Result<HeartRate>| match measurement {
            Ok(hr) => {
                contact.set(hr.has_signal());
                let _ = tx.try_send(hr);
            }
            Err(PmdError::NoContact) => {
                contact.set(false);
                debug!("No sensor contact");
            }
            Err(e) => {
                contact.set(false);
                warn!("Failed to decode heart rate measurement: {}", e);
            }
        }
    }
}

/// Data notification callback for the accelerometer stream
pub fn acc_callback() -> impl Fn(&[u8]) + Send + Sync + 'static {
    |data: &[u8]| match Acc::decode(data) {
        Ok(acc) => debug!("Acc {}: x={} y={} z={}", acc.timestamp, acc.x, acc.y, acc.z),
        Err(e) => warn!("Failed to decode Acc measurement: {}", e),
    }
}

/// Statistics of one ECG window, in µV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub count: usize,
    pub min: i32,
    pub max: i32,
    pub mean: f64,
}

impl WindowSummary {
    /// Returns `None` for an empty window.
    pub fn from_samples(samples: &[i32]) -> Option<Self> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;
        let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();
        Some(Self {
            count: samples.len(),
            min,
            max,
            mean: sum as f64 / samples.len() as f64,
        })
    }
}

impl fmt::Display for WindowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, min {} µV, max {} µV, mean {:.1} µV",
            self.count, self.min, self.max, self.mean
        )
    }
}

/// Counters returned when the consumer loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub windows: u64,
    pub heart_rates: u64,
}

/// Consumer loop state
pub struct Monitor {
    ring: Arc<Mutex<RingBuffer<i32>>>,
    ecg_rx: mpsc::Receiver<DateTime<Utc>>,
    hr_rx: mpsc::Receiver<HeartRate>,
    hr_history: RingBuffer<u16>,
    scratch: Vec<i32>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("window", &self.scratch.len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor with a window of `window_seconds` of ECG
    ///
    /// Devices without contact detection never clear the contact flag, so it
    /// starts set.
    pub fn new(window_seconds: usize) -> (Self, MonitorInputs) {
        let capacity = window_seconds * ECG_SAMPLE_FREQ as usize;
        let ring = Arc::new(Mutex::new(RingBuffer::new(capacity)));
        let (ecg_tx, ecg_rx) = mpsc::channel(1);
        let (hr_tx, hr_rx) = mpsc::channel(1);

        let monitor = Self {
            ring: ring.clone(),
            ecg_rx,
            hr_rx,
            hr_history: RingBuffer::new(HEART_RATE_HISTORY),
            scratch: vec![0; capacity],
        };
        let inputs = MonitorInputs {
            ecg: EcgWindow { ring, signal: ecg_tx },
            heart_rate: hr_tx,
            contact: ContactFlag::new(true),
        };
        (monitor, inputs)
    }

    /// Run until cancelled or until every input is dropped
    ///
    /// # Examples
    ///
    /// ```
    /// use polar_pmd::monitor::Monitor;
    /// use tokio::sync::watch;
    ///
    /// # tokio_test::block_on(async {
    /// let (monitor, inputs) = Monitor::new(3);
    /// let (cancel_tx, cancel_rx) = watch::channel(false);
    /// let task = tokio::spawn(monitor.run(cancel_rx));
    /// drop(inputs);
    /// cancel_tx.send(true).unwrap();
    /// assert_eq!(task.await.unwrap().windows, 0);
    /// # });
    /// ```
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> MonitorReport {
        let mut report = MonitorReport::default();
        let mut ecg_open = true;
        let mut hr_open = true;

        while ecg_open || hr_open {
            if *cancel.borrow() {
                break;
            }
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                tick = self.ecg_rx.recv(), if ecg_open => match tick {
                    Some(timestamp) => {
                        if self.summarise_window(timestamp) {
                            report.windows += 1;
                        }
                    }
                    None => ecg_open = false,
                },
                hr = self.hr_rx.recv(), if hr_open => match hr {
                    Some(hr) => {
                        self.record_heart_rate(&hr);
                        report.heart_rates += 1;
                    }
                    None => hr_open = false,
                },
            }
        }

        info!(
            "Monitor stopped after {} windows and {} heart rate readings",
            report.windows, report.heart_rates
        );
        report
    }

    fn summarise_window(&mut self, timestamp: DateTime<Utc>) -> bool {
        let copied = {
            let ring = self.ring.lock();
            if ring.len() < ring.size() {
                return false;
            }
            ring.copy_to(&mut self.scratch)
        };
        match WindowSummary::from_samples(&self.scratch[..copied]) {
            Some(summary) => {
                info!("ECG window at {}: {}", timestamp, summary);
                true
            }
            None => false,
        }
    }

    fn record_heart_rate(&mut self, hr: &HeartRate) {
        self.hr_history.write(&[hr.hr]);
        let mut history = [0u16; HEART_RATE_HISTORY];
        let n = self.hr_history.copy_to(&mut history);
        let mean = history[..n].iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
        let rr: Vec<u128> = hr.rr.iter().map(|d| d.as_millis()).collect();
        info!("HR {} bpm (mean {:.0} over {}), RR {:?} ms", hr.hr, mean, n, rr);
    }
}
