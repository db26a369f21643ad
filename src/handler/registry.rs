//! Protocol registry for dispatching frames by protocol tag.
//!
//! The registry maps normalized tags to decoders. It is built once at
//! startup; sessions resolve their decoder once, right after registration,
//! and keep it for every frame of the connection.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use umb_ingest::catalog::FieldCatalog;
//! use umb_ingest::handler::ProtocolRegistry;
//! use umb_ingest::protocol::{DecodedFrame, ProtocolTag};
//!
//! let mut registry = ProtocolRegistry::with_defaults(Arc::new(FieldCatalog::new()));
//!
//! registry.register_fn("RAW", false, |frame: &[u8]| {
//!     Ok(DecodedFrame::new(frame.first().copied().unwrap_or(0), chrono::Utc::now()))
//! });
//!
//! let tag = ProtocolTag::new("raw").unwrap();
//! assert!(registry.resolve(&tag).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::FieldCatalog;
use crate::error::{self, DecodeError, IngestError};
use crate::protocol::{DecodedFrame, JsonDecoder, ProtocolTag, UmbDecoder};

/// Tag for the binary UMB protocol.
pub const UMB_TAG: &str = "UMB";

/// Tag for the JSON variant.
pub const JSON_TAG: &str = "JSON";

/// Trait for frame decoders.
pub trait FrameDecoder: Send + Sync + 'static {
    /// Whether frames must pass the CRC16 trailer check before decoding.
    fn requires_crc(&self) -> bool {
        false
    }

    /// Decode one raw frame.
    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, DecodeError>;
}

/// Adapter turning a plain function into a [`FrameDecoder`].
pub struct FnDecoder<F>
where
    F: Fn(&[u8]) -> Result<DecodedFrame, DecodeError> + Send + Sync + 'static,
{
    decode: F,
    requires_crc: bool,
}

impl<F> FnDecoder<F>
where
    F: Fn(&[u8]) -> Result<DecodedFrame, DecodeError> + Send + Sync + 'static,
{
    /// Wrap a decode function.
    pub fn new(requires_crc: bool, decode: F) -> Self {
        Self {
            decode,
            requires_crc,
        }
    }
}

impl<F> FrameDecoder for FnDecoder<F>
where
    F: Fn(&[u8]) -> Result<DecodedFrame, DecodeError> + Send + Sync + 'static,
{
    fn requires_crc(&self) -> bool {
        self.requires_crc
    }

    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
        (self.decode)(frame)
    }
}

/// Registry mapping protocol tags to decoders.
#[derive(Default)]
pub struct ProtocolRegistry {
    decoders: HashMap<ProtocolTag, Arc<dyn FrameDecoder>>,
}

impl ProtocolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `UMB` and `JSON` decoders.
    pub fn with_defaults(catalog: Arc<FieldCatalog>) -> Self {
        let mut registry = Self::new();
        registry.register(UMB_TAG, UmbDecoder::new(catalog.clone()));
        registry.register(JSON_TAG, JsonDecoder::new(catalog));
        registry
    }

    /// Register a decoder under a tag, replacing any previous one.
    ///
    /// Blank tags are ignored.
    pub fn register<D: FrameDecoder>(&mut self, tag: &str, decoder: D) {
        match ProtocolTag::new(tag) {
            Some(tag) => {
                self.decoders.insert(tag, Arc::new(decoder));
            }
            None => tracing::warn!("Ignoring decoder registered under a blank tag"),
        }
    }

    /// Register a plain decode function.
    pub fn register_fn<F>(&mut self, tag: &str, requires_crc: bool, decode: F)
    where
        F: Fn(&[u8]) -> Result<DecodedFrame, DecodeError> + Send + Sync + 'static,
    {
        self.register(tag, FnDecoder::new(requires_crc, decode));
    }

    /// Resolve the decoder for a tag.
    pub fn resolve(&self, tag: &ProtocolTag) -> Option<Arc<dyn FrameDecoder>> {
        self.decoders.get(tag).cloned()
    }

    /// Decode one frame with the decoder registered for `tag`.
    ///
    /// The CRC trailer is not checked here.
    pub fn decode(&self, tag: &ProtocolTag, frame: &[u8]) -> error::Result<DecodedFrame> {
        let decoder = self
            .resolve(tag)
            .ok_or_else(|| IngestError::UnknownProtocol(tag.to_string()))?;
        Ok(decoder.decode(frame)?)
    }

    /// Check if a tag is registered.
    pub fn contains(&self, tag: &ProtocolTag) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.decoders.keys().map(ProtocolTag::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Number of registered protocols.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Check if no protocol is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tag(s: &str) -> ProtocolTag {
        ProtocolTag::new(s).unwrap()
    }

    #[test]
    fn test_defaults_registered() {
        let registry = ProtocolRegistry::with_defaults(Arc::new(FieldCatalog::new()));

        assert_eq!(registry.tags(), vec!["JSON", "UMB"]);
        assert!(registry.resolve(&tag("UMB")).unwrap().requires_crc());
        assert!(!registry.resolve(&tag("json")).unwrap().requires_crc());
    }

    #[test]
    fn test_unknown_tag() {
        let registry = ProtocolRegistry::with_defaults(Arc::new(FieldCatalog::new()));

        assert!(registry.resolve(&tag("MODBUS")).is_none());
        assert!(!registry.contains(&tag("MODBUS")));
    }

    #[test]
    fn test_decode_by_tag() {
        let registry = ProtocolRegistry::with_defaults(Arc::new(FieldCatalog::new()));

        let decoded = registry.decode(&tag("JSON"), br#"{"device_id": 4}"#).unwrap();
        assert_eq!(decoded.device_id, 4);

        let err = registry.decode(&tag("JSON"), b"{").unwrap_err();
        assert!(matches!(err, IngestError::Decode(DecodeError::MalformedJson(_))));

        let err = registry.decode(&tag("MODBUS"), b"").unwrap_err();
        assert!(matches!(err, IngestError::UnknownProtocol(ref t) if t == "MODBUS"));
    }

    #[test]
    fn test_register_fn() {
        let mut registry = ProtocolRegistry::new();
        assert!(registry.is_empty());

        registry.register_fn("echo", true, |frame: &[u8]| {
            Ok(DecodedFrame::new(frame.len() as u8, Utc::now()))
        });

        assert_eq!(registry.len(), 1);
        let decoder = registry.resolve(&tag("ECHO")).unwrap();
        assert!(decoder.requires_crc());
        assert_eq!(decoder.decode(b"abc").unwrap().device_id, 3);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ProtocolRegistry::new();
        registry.register_fn("X", false, |_: &[u8]| {
            Err(DecodeError::MalformedJson("first".into()))
        });
        registry.register_fn("x", false, |_: &[u8]| Ok(DecodedFrame::new(1, Utc::now())));

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&tag("X")).unwrap().decode(b"").is_ok());
    }

    #[test]
    fn test_blank_tag_ignored() {
        let mut registry = ProtocolRegistry::new();
        registry.register_fn("  ", false, |_: &[u8]| Ok(DecodedFrame::new(0, Utc::now())));
        assert!(registry.is_empty());
    }
}
