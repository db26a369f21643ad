//! CRC16 used by UMB frames.
//!
//! Reflected CRC-16 with polynomial `0x8408` and initial value `0xFFFF`,
//! processed least-significant bit first. Frames end in:
//!
//! ```text
//! ... payload ... │ CRC lo │ CRC hi │ EOT │
//! ```
//!
//! # Example
//!
//! ```
//! use umb_ingest::protocol::crc;
//!
//! assert_eq!(crc::compute(b"123456789"), 0x6F91);
//! ```

/// Initial CRC register value.
pub const CRC_INIT: u16 = 0xFFFF;

/// Reflected feedback polynomial.
pub const CRC_POLY: u16 = 0x8408;

/// Number of trailing bytes (`crc_lo`, `crc_hi`, terminator).
pub const TRAILER_SIZE: usize = 3;

/// Feed one byte into the CRC register.
#[inline]
fn update(mut crc: u16, mut byte: u8) -> u16 {
    for _ in 0..8 {
        let feedback = if (crc ^ byte as u16) & 0x0001 != 0 {
            CRC_POLY
        } else {
            0
        };
        crc = (crc >> 1) ^ feedback;
        byte >>= 1;
    }
    crc
}

/// Compute the CRC16 of `data`.
pub fn compute(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INIT, |crc, &b| update(crc, b))
}

/// Check the trailing CRC of a frame.
///
/// The last three bytes are `{crc_lo, crc_hi, terminator}`; the CRC covers
/// everything before them. Frames shorter than the trailer are invalid.
pub fn validate(frame: &[u8]) -> bool {
    if frame.len() < TRAILER_SIZE {
        return false;
    }
    let (body, trailer) = frame.split_at(frame.len() - TRAILER_SIZE);
    compute(body).to_le_bytes() == trailer[..2]
}

/// Append `{crc_lo, crc_hi, terminator}` to a frame body.
pub fn seal(body: &[u8], terminator: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + TRAILER_SIZE);
    out.extend_from_slice(body);
    out.extend_from_slice(&compute(body).to_le_bytes());
    out.push(terminator);
    out
}
