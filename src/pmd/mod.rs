//! # PMD Protocol Module
//!
//! Implementation of the Polar Measurement Data (PMD) Bluetooth service codec.
//!
//! This module handles:
//! - Control point command framing (command, recording and measurement type)
//! - Typed setting records validated against a static type table
//! - Data notification decoding (ECG trace, accelerometer XYZ)
//! - Control point response validation
//! - Supported feature bitmask rendering

pub mod protocol;
pub mod features;
pub mod setting;
pub mod encoder;
pub mod decoder;
pub mod handler;
