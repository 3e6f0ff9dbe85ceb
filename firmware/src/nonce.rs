//! Persistent monotonic nonce for upload authentication.
//!
//! A 32-bit counter stored as ASCII digits in the `auth` namespace. Each
//! transmission consumes exactly one value: `next()` loads the counter,
//! persists `n + 1`, and only then returns `n` — so a crash between
//! persist and send skips a nonce rather than reusing one. The counter
//! must only ever increase; a replayed or regressed nonce is rejected by
//! the cloud.

use log::{error, info};

use crate::app::ports::{StorageError, StoragePort};

const NONCE_NAMESPACE: &str = "auth";
const NONCE_KEY: &str = "nonce";

pub struct NonceManager;

impl NonceManager {
    /// Read the counter without consuming it. Missing key means a fresh
    /// device and reads as 0.
    pub fn peek(storage: &dyn StoragePort) -> Result<u32, StorageError> {
        let mut buf = [0u8; 16];
        match storage.read(NONCE_NAMESPACE, NONCE_KEY, &mut buf) {
            Ok(len) => parse_ascii_u32(&buf[..len]),
            Err(StorageError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Consume one nonce: persist the incremented counter, return the
    /// pre-increment value.
    ///
    /// Corruption is not silently healed — losing monotonicity is a
    /// security event, so the caller aborts the upload cycle instead.
    pub fn next(storage: &mut dyn StoragePort) -> Result<u32, StorageError> {
        let current = Self::peek(storage)?;
        let next = current.wrapping_add(1);
        storage.write(NONCE_NAMESPACE, NONCE_KEY, next.to_string().as_bytes())?;
        Ok(current)
    }

    /// First-boot initialisation: make sure the key exists so later reads
    /// don't conflate "fresh device" with "storage failure".
    pub fn init(storage: &mut dyn StoragePort) -> Result<(), StorageError> {
        if !storage.exists(NONCE_NAMESPACE, NONCE_KEY) {
            storage.write(NONCE_NAMESPACE, NONCE_KEY, b"0")?;
            info!("Nonce: initialised at 0");
        }
        Ok(())
    }
}

fn parse_ascii_u32(bytes: &[u8]) -> Result<u32, StorageError> {
    let text = core::str::from_utf8(bytes).map_err(|_| StorageError::Corrupted)?;
    text.trim().parse::<u32>().map_err(|_| {
        error!("Nonce: stored counter is corrupt ({text:?})");
        StorageError::Corrupted
    })
}
