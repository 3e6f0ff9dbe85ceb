//! Byte-level codecs used at the API edges.
//!
//! The inverter API ships Modbus frames as upper-case hex inside JSON; the
//! cloud API carries the encrypted telemetry payload as Base64. Internally
//! everything is raw bytes — these helpers convert exactly at the boundary.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};

/// Encode bytes as upper-case hex, two characters per byte.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Decode an even-length hex string (either case) into bytes.
///
/// Odd lengths and non-hex characters map to [`Error::InvalidResponse`]
/// because they only ever come from a malformed API reply.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::InvalidResponse);
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks_exact(2) {
        let hi = hex_nibble(chunk[0]).ok_or(Error::InvalidResponse)?;
        let lo = hex_nibble(chunk[1]).ok_or(Error::InvalidResponse)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Standard-alphabet Base64 with padding, as the cloud contract requires.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    BASE64.decode(s).map_err(|_| Error::InvalidResponse)
}
