//! Unified error types for the EcoWatt firmware.
//!
//! Every fallible operation in the polling/upload path funnels into a single
//! `Error` enum so the task loop's error handling stays uniform. Variants are
//! `Copy` so they can be threaded through the retry policy and the error
//! monitor without allocation.

use core::fmt;

/// The firmware-wide error taxonomy.
///
/// Retriability is decided by [`crate::retry::should_retry`]; this type only
/// names *what* went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The station is not associated; no request can be made.
    WifiDisconnected,
    /// An HTTP request timed out (no status received).
    HttpTimeout,
    /// An HTTP request completed with a non-success status.
    HttpFailed,
    /// A response arrived but its shape was wrong (empty body, bad hex,
    /// missing fields, truncated frame).
    InvalidResponse,
    /// A Modbus frame failed its CRC-16 check.
    CrcFailed,
    /// The inverter replied with a Modbus exception; carries the code.
    ModbusException(u8),
    /// A register address or write value is outside its allowed range.
    InvalidRegister,
    /// The retry policy gave up on an operation.
    MaxRetriesExceeded,
    /// An HTTP method other than the ones the API contract allows.
    InvalidHttpMethod,
    /// Delta+RLE compression could not produce a frame within bounds.
    CompressionFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiDisconnected => write!(f, "WiFi disconnected"),
            Self::HttpTimeout => write!(f, "HTTP request timed out"),
            Self::HttpFailed => write!(f, "HTTP request failed"),
            Self::InvalidResponse => write!(f, "invalid response"),
            Self::CrcFailed => write!(f, "CRC validation failed"),
            Self::ModbusException(code) => write!(f, "Modbus exception 0x{code:02X}"),
            Self::InvalidRegister => write!(f, "invalid register or value"),
            Self::MaxRetriesExceeded => write!(f, "max retries exceeded"),
            Self::InvalidHttpMethod => write!(f, "unsupported HTTP method"),
            Self::CompressionFailed => write!(f, "compression failed"),
        }
    }
}

impl std::error::Error for Error {}

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
