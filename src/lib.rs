//! # Polar PMD Library
//!
//! Stream ECG and accelerometer data from Polar sensors over the Bluetooth
//! LE "Measurement Data" (PMD) service.
//!
//! This library provides the PMD wire codec (commands, settings, data frames),
//! a request/response session over a pluggable transport, heart rate decoding
//! and the ring buffer used to hand samples to consumers.

pub mod config;
pub mod error;
pub mod heart;
pub mod monitor;
pub mod pmd;
pub mod ring;
pub mod session;
pub mod transport;
