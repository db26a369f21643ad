//! Raw and decoded frame types.
//!
//! A [`RawFrame`] is whatever one socket read returned. Decoders turn it into
//! a [`DecodedFrame`]: a device id plus an ordered list of [`Reading`]s whose
//! first entry is the capture timestamp.
//!
//! # Example
//!
//! ```
//! use umb_ingest::protocol::{DecodedFrame, Reading, ReadingValue};
//! use chrono::Utc;
//!
//! let mut frame = DecodedFrame::new(7, Utc::now());
//! frame.push(Reading::new("AirTemperature", ReadingValue::Float(21.5)));
//!
//! assert_eq!(frame.readings.len(), 2);
//! assert_eq!(frame.measurements()[0].field, "AirTemperature");
//! ```

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Field name of the synthetic timestamp entry.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Bytes received in a single read call.
#[derive(Debug, Clone)]
pub struct RawFrame {
    payload: Bytes,
}

impl RawFrame {
    /// Create a frame from received bytes (copies data).
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    /// Get a reference to the frame bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Get the frame length.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Bytes> for RawFrame {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

/// Value carried by a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    /// Capture time of the frame.
    Timestamp(DateTime<Utc>),
    /// Measurement rounded to two decimals.
    Float(f64),
    /// Enumerated category (e.g. road condition).
    Category(String),
    /// Channel reported an error code instead of a value.
    ErrorCode(u8),
    /// Float bytes were missing or not a finite number.
    InvalidFloat,
}

impl ReadingValue {
    /// Get the float value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            ReadingValue::Float(v) => write!(f, "{}", v),
            ReadingValue::Category(c) => f.write_str(c),
            ReadingValue::ErrorCode(code) => write!(f, "errorcode{}", code),
            ReadingValue::InvalidFloat => f.write_str("InvalidFloat"),
        }
    }
}

impl Serialize for ReadingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReadingValue::Float(v) => serializer.serialize_f64(*v),
            other => serializer.collect_str(other),
        }
    }
}

/// One field/value pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Field name from the catalog (or a placeholder).
    pub field: String,
    /// Decoded value.
    pub value: ReadingValue,
}

impl Reading {
    /// Create a new reading.
    pub fn new(field: impl Into<String>, value: ReadingValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Create the timestamp entry that leads every decoded frame.
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self::new(TIMESTAMP_FIELD, ReadingValue::Timestamp(at))
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    /// Device category id selecting the catalog submap.
    pub device_id: u8,
    /// Timestamp entry followed by channel readings in wire order.
    pub readings: Vec<Reading>,
}

impl DecodedFrame {
    /// Start a decoded frame with its timestamp entry.
    pub fn new(device_id: u8, captured_at: DateTime<Utc>) -> Self {
        Self {
            device_id,
            readings: vec![Reading::timestamp(captured_at)],
        }
    }

    /// Append a channel reading.
    #[inline]
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Capture time recorded when decoding began.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.readings.first().and_then(|r| match r.value {
            ReadingValue::Timestamp(ts) => Some(ts),
            _ => None,
        })
    }

    /// Channel readings without the leading timestamp entry.
    pub fn measurements(&self) -> &[Reading] {
        match self.readings.first() {
            Some(Reading {
                value: ReadingValue::Timestamp(_),
                ..
            }) => &self.readings[1..],
            _ => &self.readings,
        }
    }
}

/// Round to two decimal places, exact halves to even.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
