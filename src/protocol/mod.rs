//! Protocol module - registration, integrity checking, and frame decoding.
//!
//! This module implements the station wire formats:
//! - Registration packet (station identity + protocol tag)
//! - CRC16 trailer check for UMB frames
//! - UMB channel decoder and a JSON variant
//! - Decoded frame types

pub mod crc;
mod frame;
mod json;
mod registration;
mod umb;

pub use frame::{round2, DecodedFrame, RawFrame, Reading, ReadingValue, TIMESTAMP_FIELD};
pub use json::{decode_frame as decode_json, JsonDecoder};
pub use registration::{ProtocolTag, Registration, StationIdentity};
pub use umb::{
    decode_frame as decode_umb, ChannelRecord, UmbDecoder, CHANNELS_OFFSET, CHANNEL_COUNT_OFFSET,
    DEVICE_ID_OFFSET, NO_ERROR, TYPE_SIGNED_CHAR, TYPE_UNSIGNED_CHAR,
};
