//! Cryptographic primitives for the telemetry pipeline and FOTA.
//!
//! - SHA-256 / HMAC-SHA-256 via the `hmac-sha256` crate — pure Rust,
//!   constant-time verification, identical on ESP-IDF and host targets.
//! - AES-256-CBC with PKCS#7 padding via the `aes` + `cbc` crates.
//! - ECDSA P-256 manifest verification via `p256`.
//!
//! The AES key is not stored anywhere: it is derived per boot as
//! `SHA-256(UPLOAD_PSK)` and the PSK itself doubles as the HMAC key.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::warn;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;

use crate::codec::decode_base64;
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_IV_LEN: usize = 16;
pub const SHA256_LEN: usize = 32;

// ── Hashing ───────────────────────────────────────────────────

/// One-shot SHA-256.
pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    hmac_sha256::Hash::hash(data)
}

/// Streaming SHA-256 for the chunked firmware download.
pub struct Sha256Stream {
    inner: hmac_sha256::Hash,
}

impl Sha256Stream {
    pub fn new() -> Self {
        Self {
            inner: hmac_sha256::Hash::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> [u8; SHA256_LEN] {
        self.inner.finalize()
    }
}

impl Default for Sha256Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// HMAC-SHA-256 of `message` under `key`, as lowercase hex.
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mac = hmac_sha256::HMAC::mac(message, key);
    to_hex_lower(&mac)
}

/// Lowercase hex, as carried in `X-MAC` and compared against `shaExpected`.
pub fn to_hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// ── AES-256-CBC ───────────────────────────────────────────────

/// Derive the AES-256 key from the upload pre-shared key.
pub fn derive_upload_key(psk: &str) -> [u8; SHA256_LEN] {
    sha256(psk.as_bytes())
}

/// Encrypt `plaintext` under AES-256-CBC with PKCS#7 padding and a fresh
/// random IV. Returns `(iv, ciphertext)`.
pub fn encrypt_aes256_cbc(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; AES_IV_LEN], Vec<u8>)> {
    let iv = generate_iv()?;
    let ciphertext =
        Aes256CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok((iv, ciphertext))
}

/// Decrypt an AES-256-CBC + PKCS#7 payload. The device never decrypts on
/// the live path; this is the contract verifier used by the test suite and
/// by bench tooling against captured uploads.
pub fn decrypt_aes256_cbc(key: &[u8; 32], iv: &[u8; AES_IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::InvalidResponse)
}

// ── IV generation ─────────────────────────────────────────────

/// Fill a fresh 16-byte IV from the platform CSPRNG.
///
/// ESP-IDF: hardware RNG via `esp_fill_random` (entropy from RF noise once
/// WiFi is up). Host: OS entropy via `getrandom`.
#[cfg(target_os = "espidf")]
pub fn generate_iv() -> Result<[u8; AES_IV_LEN]> {
    let mut iv = [0u8; AES_IV_LEN];
    // SAFETY: esp_fill_random writes exactly `len` bytes into the buffer,
    // which is valid and exclusively owned here.
    unsafe {
        esp_idf_svc::sys::esp_fill_random(iv.as_mut_ptr().cast(), iv.len());
    }
    Ok(iv)
}

#[cfg(not(target_os = "espidf"))]
pub fn generate_iv() -> Result<[u8; AES_IV_LEN]> {
    let mut iv = [0u8; AES_IV_LEN];
    getrandom::getrandom(&mut iv).map_err(|e| {
        warn!("crypto: OS entropy unavailable: {e}");
        Error::InvalidResponse
    })?;
    Ok(iv)
}

/// Random bytes for backoff jitter. Not security-sensitive, but the same
/// entropy source keeps the code path identical on both targets.
pub fn random_u32() -> u32 {
    #[cfg(target_os = "espidf")]
    {
        unsafe { esp_idf_svc::sys::esp_random() }
    }
    #[cfg(not(target_os = "espidf"))]
    {
        let mut buf = [0u8; 4];
        let _ = getrandom::getrandom(&mut buf);
        u32::from_le_bytes(buf)
    }
}

// ── ECDSA manifest verification ───────────────────────────────

/// Verify a Base64-wrapped DER ECDSA P-256 signature over `message`,
/// against a PEM public key. Hashing (SHA-256) happens inside the verifier.
pub fn verify_ecdsa_signature(message: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let der = match decode_base64(signature_b64) {
        Ok(der) => der,
        Err(_) => {
            warn!("crypto: signature is not valid Base64");
            return false;
        }
    };
    let key = match VerifyingKey::from_public_key_pem(public_key_pem) {
        Ok(key) => key,
        Err(e) => {
            warn!("crypto: public key parse error: {e}");
            return false;
        }
    };
    let signature = match Signature::from_der(&der) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("crypto: signature DER parse error: {e}");
            return false;
        }
    };
    key.verify(message, &signature).is_ok()
}
