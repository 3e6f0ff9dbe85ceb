//! Port traits — the hexagonal boundary between the gateway core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ GatewayService (domain)
//! ```
//!
//! Driven adapters (NVS, HTTP client, clock, OTA partitions) implement
//! these traits. The [`GatewayService`](super::service::GatewayService)
//! consumes them via generics, so the core never touches ESP-IDF directly
//! and the whole upload/FOTA machinery runs under test on the host.

use core::fmt;

use crate::error::{Error, Result};

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for runtime config, the nonce counter and
/// FOTA progress.
///
/// Keys are namespaced (`device_config`, `fota`, `auth`) to keep the
/// subsystems from colliding. Writes MUST be atomic — the ESP-IDF NVS
/// commit guarantees this natively; the in-memory simulation trivially so.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> core::result::Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> core::result::Result<(), StorageError>;

    /// Delete a key. `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Stored blob exists but failed to parse.
    Corrupted,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Time port (monotonic + wall clock)
// ───────────────────────────────────────────────────────────────

/// Clock access for the scheduler and for command timestamps.
pub trait TimePort {
    /// Milliseconds since boot, monotonic.
    fn monotonic_ms(&self) -> u64;

    /// ISO-8601 local timestamp, e.g. `2026-08-02T14:03:21+05:30`.
    /// Pre-NTP this reports the epoch; the cloud side tolerates that.
    fn timestamp_iso8601(&self) -> String;
}

// ───────────────────────────────────────────────────────────────
// HTTP port (domain → inverter API / cloud API)
// ───────────────────────────────────────────────────────────────

/// The HTTP methods the two API contracts use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Body encoding, mapped to the `Content-Type` header by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpBody<'a> {
    Json(&'a str),
    OctetStream(&'a [u8]),
}

/// One outbound request. `headers` carries the extra authentication
/// headers (`X-Nonce`, `X-MAC`) of the telemetry contract.
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub api_key: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: HttpBody<'a>,
}

impl<'a> HttpRequest<'a> {
    pub fn post_json(url: &'a str, api_key: &'a str, body: &'a str) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            api_key,
            headers: &[],
            body: HttpBody::Json(body),
        }
    }
}

/// Blocking HTTP client boundary.
///
/// Transport failures (DNS, TCP, TLS, timeout) and empty bodies are mapped
/// to `Err` by the adapter — the caller never sees an empty-string success.
pub trait HttpPort {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<String>;
}

// ───────────────────────────────────────────────────────────────
// Firmware fetch port (ranged streaming GET for FOTA)
// ───────────────────────────────────────────────────────────────

/// Errors from the firmware download transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// TLS/TCP setup failed before any HTTP status arrived.
    ConnectFailed,
    /// The server answered with something other than 200/206.
    HttpStatus(u16),
    /// The stream died mid-body; the caller may reopen at its offset.
    Interrupted,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Self::Interrupted => write!(f, "stream interrupted"),
        }
    }
}

/// Streaming firmware download over TLS with the pinned root CA.
///
/// The engine owns the 4-KiB chunk buffer and drives the read loop; the
/// adapter only moves bytes. `open` sends `Range: bytes=<offset>-` so an
/// interrupted download resumes where it stopped.
pub trait FirmwareFetch {
    fn open(&mut self, url: &str, offset: u32) -> core::result::Result<(), FetchError>;

    /// Read up to `buf.len()` bytes. `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, FetchError>;

    fn close(&mut self);
}

// ───────────────────────────────────────────────────────────────
// OTA port (two-slot partition primitive)
// ───────────────────────────────────────────────────────────────

/// Errors from the OTA partition primitive, mirrored into the FOTA log
/// reason strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    NoPartition,
    BeginFailed,
    WriteFailed,
    EndFailed,
    SetBootFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no inactive OTA partition"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::EndFailed => write!(f, "OTA end failed"),
            Self::SetBootFailed => write!(f, "set boot partition failed"),
        }
    }
}

/// The two-slot OTA flash primitive. Rollback of a provisional image is the
/// platform bootloader's job, not the engine's.
pub trait OtaPort {
    /// Open the inactive slot for writing. `resume_offset` is where a
    /// previously interrupted download left off.
    fn begin(&mut self, image_size: u32, resume_offset: u32) -> core::result::Result<(), OtaError>;

    /// Append a chunk to the slot.
    fn write(&mut self, chunk: &[u8]) -> core::result::Result<(), OtaError>;

    /// Finalize the image and select the slot as the next boot target.
    fn commit(&mut self) -> core::result::Result<(), OtaError>;

    /// Abandon the in-progress image.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Connectivity port (Wi-Fi association)
// ───────────────────────────────────────────────────────────────

/// Network association boundary. Association itself (scan/auth/DHCP) is an
/// external collaborator; the core only needs connect/check/poll.
pub trait ConnectivityPort {
    fn connect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Drive reconnection with backoff; call once per loop iteration.
    fn poll(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────

/// Map a storage failure onto the upload-cycle error taxonomy.
impl From<StorageError> for Error {
    fn from(_: StorageError) -> Self {
        // Persistent-state trouble aborts the current cycle the same way a
        // malformed response would: retry on the next interval.
        Error::InvalidResponse
    }
}
