//! Field catalog: channel index to field name, raw code to category.
//!
//! Loaded once at startup and shared read-only by every session.
//!
//! ```toml
//! [devices.9]
//! 101 = "RoadSurfaceTemperature"
//! 900 = "RoadCondition"
//!
//! [value_codes]
//! 0 = "Dry"
//! 2 = "Wet"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Category returned for codes missing from the catalog.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Catalog embedded in the binary, used when none is configured.
const BUILTIN_CATALOG: &str = include_str!("../config/catalog.toml");

/// On-disk representation; TOML keys are always strings.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    devices: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    value_codes: HashMap<String, String>,
}

/// Per-device field names and the enumerated value map.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    devices: HashMap<u8, HashMap<u16, String>>,
    value_codes: HashMap<u8, String>,
}

impl FieldCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the catalog shipped with the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let mut catalog = Self::new();

        for (device, channels) in file.devices {
            let device_id = parse_key::<u8>(&device, "device id")?;
            for (channel, name) in channels {
                let index = parse_key::<u16>(&channel, "channel index")?;
                catalog.insert_field(device_id, index, name);
            }
        }

        for (code, name) in file.value_codes {
            let code = parse_key::<u8>(&code, "value code")?;
            catalog.insert_value_code(code, name);
        }

        Ok(catalog)
    }

    /// Add a field name for a device channel.
    pub fn insert_field(&mut self, device_id: u8, channel: u16, name: impl Into<String>) {
        self.devices
            .entry(device_id)
            .or_default()
            .insert(channel, name.into());
    }

    /// Add a category name for a raw code.
    pub fn insert_value_code(&mut self, code: u8, name: impl Into<String>) {
        self.value_codes.insert(code, name.into());
    }

    /// Builder form of [`insert_field`](Self::insert_field).
    pub fn with_field(mut self, device_id: u8, channel: u16, name: &str) -> Self {
        self.insert_field(device_id, channel, name);
        self
    }

    /// Builder form of [`insert_value_code`](Self::insert_value_code).
    pub fn with_value_code(mut self, code: u8, name: &str) -> Self {
        self.insert_value_code(code, name);
        self
    }

    /// Field name for a channel, or `UnknownField_<channel>`.
    pub fn field_name(&self, device_id: u8, channel: u16) -> String {
        self.devices
            .get(&device_id)
            .and_then(|channels| channels.get(&channel))
            .cloned()
            .unwrap_or_else(|| format!("UnknownField_{}", channel))
    }

    /// Category for a raw code, or [`UNKNOWN_CATEGORY`].
    pub fn category(&self, code: u8) -> &str {
        self.value_codes
            .get(&code)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Number of devices with at least one named channel.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Total number of named channels across devices.
    pub fn field_count(&self) -> usize {
        self.devices.values().map(HashMap::len).sum()
    }
}

fn parse_key<T: std::str::FromStr>(key: &str, what: &str) -> Result<T> {
    key.trim()
        .parse()
        .map_err(|_| IngestError::Catalog(format!("invalid {}: {:?}", what, key)))
}
