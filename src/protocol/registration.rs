//! Registration packet parsing.
//!
//! The first packet on a connection identifies the station and selects the
//! wire protocol:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬───────────────────┐
//! │ Project  │ Station  │ Number   │ Protocol tag      │
//! │ 2 bytes  │ 2 bytes  │ 3 bytes  │ rest, whitespace  │
//! │ ASCII    │ ASCII    │ ASCII    │ trimmed           │
//! └──────────┴──────────┴──────────┴───────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use umb_ingest::protocol::Registration;
//!
//! let reg = Registration::parse(b"AABB001UMB\r\n").unwrap();
//! assert_eq!(reg.station.station_id(), "AABB001");
//! assert_eq!(reg.protocol.as_str(), "UMB");
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::{IngestError, Result};

/// Byte range of the project code.
const PROJECT_RANGE: std::ops::Range<usize> = 0..2;
/// Byte range of the station code.
const STATION_RANGE: std::ops::Range<usize> = 2..4;
/// Byte range of the station number.
const NUMBER_RANGE: std::ops::Range<usize> = 4..7;
/// Offset where the protocol tag starts.
const TAG_OFFSET: usize = 7;

/// Identity of the sending station, fixed for the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StationIdentity {
    pub project_code: String,
    pub station_code: String,
    pub station_number: String,
}

impl StationIdentity {
    /// Create a new identity.
    pub fn new(project_code: &str, station_code: &str, station_number: &str) -> Self {
        Self {
            project_code: project_code.to_string(),
            station_code: station_code.to_string(),
            station_number: station_number.to_string(),
        }
    }

    /// Concatenated station id (`project + station + number`).
    pub fn station_id(&self) -> String {
        format!(
            "{}{}{}",
            self.project_code, self.station_code, self.station_number
        )
    }

    /// Check if every component is blank.
    pub fn is_blank(&self) -> bool {
        self.project_code.trim().is_empty()
            && self.station_code.trim().is_empty()
            && self.station_number.trim().is_empty()
    }
}

impl fmt::Display for StationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.project_code, self.station_code, self.station_number
        )
    }
}

/// Normalized protocol tag (trimmed, upper case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProtocolTag(String);

impl ProtocolTag {
    /// Normalize a tag. Returns `None` for blank input.
    pub fn new(raw: &str) -> Option<Self> {
        let tag = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if tag.is_empty() {
            None
        } else {
            Some(Self(tag.to_ascii_uppercase()))
        }
    }

    /// Get the tag as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed registration packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub station: StationIdentity,
    pub protocol: ProtocolTag,
}

impl Registration {
    /// Parse a registration packet.
    ///
    /// Short packets yield short (possibly empty) fields; a blank identity or
    /// a missing tag is rejected.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        let station = StationIdentity {
            project_code: ascii_field(packet, PROJECT_RANGE),
            station_code: ascii_field(packet, STATION_RANGE),
            station_number: ascii_field(packet, NUMBER_RANGE),
        };

        if station.is_blank() {
            return Err(IngestError::Registration(
                "blank station identity".to_string(),
            ));
        }

        let tag = packet
            .get(TAG_OFFSET..)
            .map(decode_lossy)
            .unwrap_or_default();
        let protocol = ProtocolTag::new(&tag).ok_or_else(|| {
            IngestError::Registration(format!("missing protocol tag for station {}", station))
        })?;

        Ok(Self { station, protocol })
    }
}

/// Decode a fixed byte range, clamped to the packet length.
fn ascii_field(packet: &[u8], range: std::ops::Range<usize>) -> String {
    let start = range.start.min(packet.len());
    let end = range.end.min(packet.len());
    decode_lossy(&packet[start..end])
}

/// Decode as UTF-8, dropping undecodable bytes.
fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect()
}
