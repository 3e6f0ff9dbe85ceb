//! Secure telemetry pipeline.
//!
//! A compressed frame travels to the cloud as:
//!
//! ```text
//! envelope  = [method_flag] || compressed_frame || crc16_le
//! body      = IV(16) || AES-256-CBC(PKCS7(envelope), key = SHA-256(PSK))
//! X-MAC     = hmac_sha256_hex(PSK, base64(body))
//! X-Nonce   = monotonic counter, persisted before the request leaves
//! ```
//!
//! The HTTP body is the raw bytes of `IV || ciphertext`; the Base64 form
//! exists only as the MAC input. That asymmetry is the wire contract.

use crate::codec::encode_base64;
use crate::crypto::{derive_upload_key, encrypt_aes256_cbc, hmac_sha256_hex};
use crate::error::Result;
use crate::modbus::append_crc;

/// Method flag prefixed to the envelope.
pub const METHOD_RAW: u8 = 0x00;
pub const METHOD_AGGREGATED: u8 = 0x01;

/// Everything the POST needs: raw body plus the authentication headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredPayload {
    /// Raw `IV || ciphertext` — the request body.
    pub body: Vec<u8>,
    /// Base64 of `body` — the MAC input, kept for the serial log.
    pub encoded: String,
    /// Lowercase hex HMAC for the `X-MAC` header.
    pub mac_hex: String,
    /// Pre-increment nonce for the `X-Nonce` header.
    pub nonce: u32,
}

/// Wrap a compressed frame in the method flag and CRC trailer.
pub fn build_envelope(compressed: &[u8], aggregated: bool) -> Vec<u8> {
    let mut envelope = Vec::with_capacity(compressed.len() + 3);
    envelope.push(if aggregated { METHOD_AGGREGATED } else { METHOD_RAW });
    envelope.extend_from_slice(compressed);
    append_crc(&mut envelope);
    envelope
}

/// Encrypt and authenticate an envelope under the upload PSK.
///
/// The nonce is consumed by the caller *before* this runs, so the counter
/// is already persisted by the time the MAC exists.
pub fn secure_envelope(envelope: &[u8], psk: &str, nonce: u32) -> Result<SecuredPayload> {
    let key = derive_upload_key(psk);
    let (iv, ciphertext) = encrypt_aes256_cbc(&key, envelope)?;

    let mut body = Vec::with_capacity(iv.len() + ciphertext.len());
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);

    let encoded = encode_base64(&body);
    let mac_hex = hmac_sha256_hex(psk.as_bytes(), encoded.as_bytes());

    Ok(SecuredPayload {
        body,
        encoded,
        mac_hex,
        nonce,
    })
}
