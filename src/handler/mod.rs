//! Handler module - protocol dispatch.
//!
//! Provides:
//! - [`FrameDecoder`] - decodes raw frames of one wire protocol
//! - [`ProtocolRegistry`] - maps protocol tags to decoders
//!
//! Adding a wire format means registering another decoder; the connection
//! session does not change.

mod registry;

pub use registry::{FnDecoder, FrameDecoder, ProtocolRegistry, JSON_TAG, UMB_TAG};
