//! Retry policy and system-health tracking.
//!
//! Transport errors are worth retrying with exponential backoff; data
//! integrity errors get a small local cap; protocol errors are final.
//! The [`ErrorMonitor`] keeps the consecutive-error count that feeds the
//! criticality check and the periodic health sweep.

use log::{error, warn};

use crate::config::{
    ERROR_DECAY_MS, HEALTH_CHECK_INTERVAL_MS, MAX_RETRIES, MAX_RETRY_DELAY_MS,
    RETRY_BASE_DELAY_MS,
};
use crate::crypto::random_u32;
use crate::error::Error;

/// Whether `error` is worth another attempt after `retry_count` failures.
pub fn should_retry(error: Error, retry_count: u32) -> bool {
    if retry_count >= MAX_RETRIES {
        return false;
    }
    match error {
        Error::WifiDisconnected | Error::HttpTimeout | Error::HttpFailed => true,
        // Integrity issues get fewer attempts; persistent corruption is
        // not a transient condition.
        Error::InvalidResponse | Error::CrcFailed => retry_count < 2,
        Error::ModbusException(_)
        | Error::InvalidRegister
        | Error::InvalidHttpMethod
        | Error::MaxRetriesExceeded
        | Error::CompressionFailed => false,
    }
}

/// Exponential backoff with jitter: `min(base << n + U[0, base << n / 4), cap)`.
pub fn retry_delay_ms(retry_count: u32) -> u64 {
    let base = RETRY_BASE_DELAY_MS << retry_count.min(16);
    let jitter = if base >= 4 {
        random_u32() as u64 % (base / 4)
    } else {
        0
    };
    (base + jitter).min(MAX_RETRY_DELAY_MS)
}

/// Run `attempt` under the retry policy, sleeping the backoff between
/// tries. Gives up with [`Error::MaxRetriesExceeded`] once the policy says
/// the error is final.
pub fn with_retry<T>(
    what: &str,
    mut attempt: impl FnMut() -> crate::error::Result<T>,
) -> crate::error::Result<T> {
    let mut retry_count = 0;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(e, retry_count) {
                    if retry_count > 0 {
                        error!("{what}: giving up after {} attempts ({e})", retry_count + 1);
                        return Err(Error::MaxRetriesExceeded);
                    }
                    return Err(e);
                }
                let delay = retry_delay_ms(retry_count);
                warn!("{what}: attempt {} failed ({e}), retrying in {delay} ms", retry_count + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay));
                retry_count += 1;
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Error monitor
// ───────────────────────────────────────────────────────────────

/// Tracks error pressure across cycles and drives the periodic health
/// check. Single-threaded like everything else in the task loop.
pub struct ErrorMonitor {
    last_error: Option<Error>,
    last_error_at_ms: u64,
    consecutive_errors: u32,
    last_health_check_ms: u64,
}

impl ErrorMonitor {
    pub fn new() -> Self {
        Self {
            last_error: None,
            last_error_at_ms: 0,
            consecutive_errors: 0,
            last_health_check_ms: 0,
        }
    }

    pub fn record(&mut self, error: Error, now_ms: u64) {
        self.last_error = Some(error);
        self.last_error_at_ms = now_ms;
        self.consecutive_errors += 1;
        error!("ERROR [{error}] (consecutive: {})", self.consecutive_errors);
    }

    /// Clear the error streak after a fully successful cycle.
    pub fn reset(&mut self) {
        self.last_error = None;
        self.consecutive_errors = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Critical means the device is not making progress: either the retry
    /// machinery gave up explicitly or errors keep stacking up.
    pub fn is_critical(&self) -> bool {
        self.last_error == Some(Error::MaxRetriesExceeded)
            || self.consecutive_errors > MAX_RETRIES * 2
    }

    /// Periodic health sweep: verify association and decay stale error
    /// counts. Returns `true` when a check actually ran this call.
    pub fn check_health(
        &mut self,
        now_ms: u64,
        connectivity: &mut impl crate::app::ports::ConnectivityPort,
    ) -> bool {
        if now_ms.saturating_sub(self.last_health_check_ms) < HEALTH_CHECK_INTERVAL_MS {
            return false;
        }
        self.last_health_check_ms = now_ms;

        if !connectivity.is_connected() {
            self.record(Error::WifiDisconnected, now_ms);
            connectivity.poll();
        }

        if self.consecutive_errors > MAX_RETRIES {
            warn!("Health: high error frequency ({})", self.consecutive_errors);
        }

        if self.consecutive_errors > 0 && now_ms.saturating_sub(self.last_error_at_ms) > ERROR_DECAY_MS {
            self.consecutive_errors = 0;
        }
        true
    }
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new()
    }
}
