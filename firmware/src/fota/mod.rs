//! FOTA engine: signed manifest → resumable download → two-slot commit.
//!
//! The engine is a straight-line state machine driven once per manifest:
//!
//! ```text
//! Idle → VerifyManifest → BeginOta → Download → VerifyHash → Commit → Success
//!             │               │          │           │          │
//!             └───────────────┴──────────┴───────────┴──────────┴─▶ Failed(reason)
//! ```
//!
//! Progress (`job_id`, `offset`) is persisted so an interrupted download
//! resumes with a `Range` request instead of starting over. Signature and
//! hash failures are terminal: they clear the offset so the next attempt
//! starts clean. Every terminal state finalizes and uploads the event log.

pub mod log;

use core::fmt;

use ::log::{info, warn};

use crate::app::ports::{
    FetchError, FirmwareFetch, HttpPort, HttpRequest, OtaError, OtaPort, StoragePort, TimePort,
};
use crate::cloud::FotaManifest;
use crate::config::{
    FIRMWARE_PUBLIC_KEY_PEM, FIRMWARE_VERSION, FOTA_CHUNK_SIZE, FOTA_PERSIST_EVERY, MAX_RETRIES,
    UPLOAD_API_BASE_URL, UPLOAD_API_KEY,
};
use crate::crypto::{to_hex_lower, verify_ecdsa_signature, Sha256Stream};

use self::log::{FinalStatus, FotaLog};

const FOTA_NAMESPACE: &str = "fota";
const JOB_ID_KEY: &str = "job_id";
const OFFSET_KEY: &str = "offset";

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FotaError {
    SignatureInvalid,
    HttpClientFailed,
    HttpError(u16),
    WriteFailed,
    HashMismatch,
    OtaBeginFailed,
    OtaEndFailed,
    SetBootFailed,
}

impl FotaError {
    /// The machine-readable reason string carried in the event log.
    pub fn reason(&self) -> String {
        match self {
            Self::SignatureInvalid => "SIGNATURE_INVALID".into(),
            Self::HttpClientFailed => "HTTP_CLIENT_FAILED".into(),
            Self::HttpError(code) => format!("HTTP_ERROR_{code}"),
            Self::WriteFailed => "WRITE_FAILED".into(),
            Self::HashMismatch => "HASH_MISMATCH".into(),
            Self::OtaBeginFailed => "OTA_BEGIN_FAILED".into(),
            Self::OtaEndFailed => "OTA_END_FAILED".into(),
            Self::SetBootFailed => "SET_BOOT_PARTITION_FAILED".into(),
        }
    }
}

impl fmt::Display for FotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// What the engine did with a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FotaOutcome {
    /// New firmware committed; the caller must reboot.
    Updated,
    /// The manifest's job was already processed; nothing to do.
    AlreadyCurrent,
}

// ── Persistent state ──────────────────────────────────────────

/// `{job_id, offset}` surviving reboots for resumable downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FotaState {
    pub job_id: u32,
    pub offset: u32,
}

pub fn load_state(storage: &impl StoragePort) -> FotaState {
    FotaState {
        job_id: read_u32(storage, JOB_ID_KEY).unwrap_or(0),
        offset: read_u32(storage, OFFSET_KEY).unwrap_or(0),
    }
}

fn read_u32(storage: &impl StoragePort, key: &str) -> Option<u32> {
    let mut buf = [0u8; 4];
    match storage.read(FOTA_NAMESPACE, key, &mut buf) {
        Ok(4) => Some(u32::from_le_bytes(buf)),
        _ => None,
    }
}

fn persist_u32(storage: &mut impl StoragePort, key: &str, value: u32) {
    if let Err(e) = storage.write(FOTA_NAMESPACE, key, &value.to_le_bytes()) {
        warn!("FOTA: persisting {key} failed: {e}");
    }
}

/// Pull the target version out of a `…-vX.Y.Z.bin` firmware URL.
pub fn extract_target_version(fw_url: &str) -> &str {
    if let Some(v_pos) = fw_url.find("-v") {
        if let Some(bin_pos) = fw_url[v_pos..].find(".bin") {
            return &fw_url[v_pos + 2..v_pos + bin_pos];
        }
    }
    "unknown"
}

// ── Engine ────────────────────────────────────────────────────

/// Run one FOTA attempt end to end, verifying the manifest against the
/// firmware public key baked into the build.
///
/// On `Ok(Updated)` the new image is committed as the next boot target and
/// the caller reboots. Errors are terminal for this cycle; transport
/// failures leave `offset` non-zero so the next manifest delivery resumes.
pub fn run(
    manifest: &FotaManifest,
    storage: &mut impl StoragePort,
    fetch: &mut impl FirmwareFetch,
    ota: &mut impl OtaPort,
    http: &mut impl HttpPort,
    clock: &impl TimePort,
) -> Result<FotaOutcome, FotaError> {
    run_with_key(
        manifest,
        FIRMWARE_PUBLIC_KEY_PEM,
        storage,
        fetch,
        ota,
        http,
        clock,
    )
}

/// [`run`] with an explicit verification key — the seam the test suite
/// signs its own manifests through.
pub fn run_with_key(
    manifest: &FotaManifest,
    public_key_pem: &str,
    storage: &mut impl StoragePort,
    fetch: &mut impl FirmwareFetch,
    ota: &mut impl OtaPort,
    http: &mut impl HttpPort,
    clock: &impl TimePort,
) -> Result<FotaOutcome, FotaError> {
    let state = load_state(storage);

    // A job is actionable when it is new, or when it is the same job with
    // download progress left to resume.
    let resumable = manifest.job_id == state.job_id && state.offset > 0;
    if manifest.job_id <= state.job_id && !resumable {
        info!("FOTA: job {} already processed, skipping", manifest.job_id);
        return Ok(FotaOutcome::AlreadyCurrent);
    }

    let to_version = extract_target_version(&manifest.fw_url);
    let mut event_log = FotaLog::start(manifest.job_id, FIRMWARE_VERSION, to_version, clock, storage);
    info!(
        "FOTA: job {} ({} -> {}), {} bytes from {}",
        manifest.job_id, FIRMWARE_VERSION, to_version, manifest.fw_size, manifest.fw_url
    );

    // ── VerifyManifest ────────────────────────────────────────
    let signed = manifest.signed_json();
    if !verify_ecdsa_signature(signed.as_bytes(), &manifest.signature, public_key_pem) {
        warn!("FOTA: manifest signature invalid");
        // No resume for a forged or corrupted manifest.
        persist_u32(storage, OFFSET_KEY, 0);
        return fail(FotaError::SignatureInvalid, &mut event_log, storage, http, clock);
    }
    info!("FOTA: manifest signature verified");
    persist_u32(storage, JOB_ID_KEY, manifest.job_id);

    let mut offset = if resumable { state.offset } else { 0 };
    if offset > 0 {
        info!("FOTA: resuming download at offset {offset}");
    }

    // ── BeginOta ──────────────────────────────────────────────
    if ota.begin(manifest.fw_size as u32, offset).is_err() {
        return fail(FotaError::OtaBeginFailed, &mut event_log, storage, http, clock);
    }

    // ── Download ──────────────────────────────────────────────
    let download = download_image(manifest, fetch, ota, storage, &mut offset);
    persist_u32(storage, OFFSET_KEY, offset);
    let digest = match download {
        Ok(digest) => digest,
        Err(e) => {
            ota.abort();
            return fail(e, &mut event_log, storage, http, clock);
        }
    };

    // ── VerifyHash ────────────────────────────────────────────
    let computed = to_hex_lower(&digest);
    if !computed.eq_ignore_ascii_case(manifest.sha_expected.trim()) {
        warn!("FOTA: SHA mismatch (computed {computed}, expected {})", manifest.sha_expected);
        ota.abort();
        // A corrupt image never resumes; start clean next time.
        persist_u32(storage, OFFSET_KEY, 0);
        return fail(FotaError::HashMismatch, &mut event_log, storage, http, clock);
    }
    info!("FOTA: SHA verified");

    // ── Commit ────────────────────────────────────────────────
    if let Err(e) = ota.commit() {
        let error = match e {
            OtaError::SetBootFailed => FotaError::SetBootFailed,
            _ => FotaError::OtaEndFailed,
        };
        return fail(error, &mut event_log, storage, http, clock);
    }

    // ── Success ───────────────────────────────────────────────
    persist_u32(storage, OFFSET_KEY, 0);
    event_log.success(clock, storage);
    let payload = event_log.finalize(FinalStatus::Success, clock);
    upload_log(http, &payload);
    FotaLog::delete(storage);
    info!("FOTA: firmware validated and ready, reboot pending");
    Ok(FotaOutcome::Updated)
}

/// Stream the image into the OTA slot, keeping a running SHA-256.
///
/// The 4-KiB chunk buffer lives on this frame, so every exit path —
/// including the error ones — releases it. A dropped connection reopens
/// with a `Range` request at the current offset, preserving the hash
/// state, up to the retry cap.
fn download_image(
    manifest: &FotaManifest,
    fetch: &mut impl FirmwareFetch,
    ota: &mut impl OtaPort,
    storage: &mut impl StoragePort,
    offset: &mut u32,
) -> Result<[u8; 32], FotaError> {
    let mut chunk = vec![0u8; FOTA_CHUNK_SIZE];
    let mut sha = Sha256Stream::new();
    let mut reconnects = 0u32;
    let mut last_persisted = *offset;

    open_at(fetch, &manifest.fw_url, *offset)?;

    while (*offset as usize) < manifest.fw_size {
        match fetch.read(&mut chunk) {
            Ok(0) | Err(FetchError::Interrupted) => {
                // Short stream: reconnect and resume, unless we are out of
                // attempts.
                fetch.close();
                reconnects += 1;
                if reconnects > MAX_RETRIES {
                    warn!("FOTA: download interrupted {reconnects} times, giving up");
                    return Err(FotaError::HttpClientFailed);
                }
                info!("FOTA: reconnecting at offset {offset} (attempt {reconnects})");
                open_at(fetch, &manifest.fw_url, *offset)?;
            }
            Ok(n) => {
                let n = n.min(manifest.fw_size - *offset as usize);
                if ota.write(&chunk[..n]).is_err() {
                    fetch.close();
                    return Err(FotaError::WriteFailed);
                }
                sha.update(&chunk[..n]);
                *offset += n as u32;

                if *offset - last_persisted >= FOTA_PERSIST_EVERY {
                    persist_u32(storage, OFFSET_KEY, *offset);
                    last_persisted = *offset;
                }
            }
            Err(FetchError::ConnectFailed) => {
                fetch.close();
                return Err(FotaError::HttpClientFailed);
            }
            Err(FetchError::HttpStatus(code)) => {
                fetch.close();
                return Err(FotaError::HttpError(code));
            }
        }
    }

    fetch.close();
    info!("FOTA: download complete ({} bytes)", *offset);
    Ok(sha.finalize())
}

fn open_at(fetch: &mut impl FirmwareFetch, url: &str, offset: u32) -> Result<(), FotaError> {
    fetch.open(url, offset).map_err(|e| match e {
        FetchError::HttpStatus(code) => FotaError::HttpError(code),
        _ => FotaError::HttpClientFailed,
    })
}

/// Terminal failure: log the reason, finalize, upload, clean up.
fn fail(
    error: FotaError,
    event_log: &mut FotaLog,
    storage: &mut impl StoragePort,
    http: &mut impl HttpPort,
    clock: &impl TimePort,
) -> Result<FotaOutcome, FotaError> {
    event_log.error(&error.reason(), clock, storage);
    let payload = event_log.finalize(FinalStatus::Failure, clock);
    upload_log(http, &payload);
    FotaLog::delete(storage);
    Err(error)
}

fn upload_log(http: &mut impl HttpPort, payload: &str) {
    let url = format!("{UPLOAD_API_BASE_URL}/api/fota/log");
    let request = HttpRequest::post_json(&url, UPLOAD_API_KEY, payload);
    match http.send(&request) {
        Ok(_) => info!("FOTA: log uploaded"),
        Err(e) => warn!("FOTA: log upload failed: {e}"),
    }
}
