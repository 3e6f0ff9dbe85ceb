//! Gateway service — the cooperative task loop's owning context.
//!
//! Owns every piece of state the tasks share: the scheduler, the sample
//! buffer, the runtime config, the single-slot command store and the error
//! monitor. All I/O flows through the port traits in [`super::ports`], so
//! the complete poll → compress → encrypt → upload → demux cycle runs
//! under test on the host with mock adapters.
//!
//! Within one upload cycle the order is fixed:
//!
//! ```text
//! freeze buffer → compress → encrypt → POST
//!   → (on success) command exec → config-ack → promote → FOTA → clear buffer
//!   → release lock
//! ```
//!
//! A FOTA-induced reboot therefore never strands a cleared buffer or an
//! un-ACKed config change.

use log::{error, info, warn};
use serde::Deserialize;

use crate::buffer::{capacity_for, FullPolicy, RegisterReading, SampleBuffer};
use crate::cloud::{
    extract_command, is_success, parse_upload_ack, CommandAction, CommandOutcome, CommandReport,
    PendingCommand, UploadAck,
};
use crate::compress::{aggregate_avg, compress};
use crate::config::{
    register_info, AGG_WINDOW, API_BASE_URL, API_KEY, FUNCTION_CODE_READ, FUNCTION_CODE_WRITE,
    MAX_COMPRESSION_RETRIES, MAX_PAYLOAD_SIZE, MAX_RETRY_DELAY_MS, RETRY_BASE_DELAY_MS,
    UPLOAD_API_BASE_URL, UPLOAD_API_KEY, UPLOAD_PSK,
};
use crate::config_manager::{ConfigManager, RuntimeConfig};
use crate::error::{Error, Result};
use crate::fota::{self, FotaOutcome};
use crate::modbus::{
    decode_registers, exception_code, is_exception, is_valid_write, request_frame_hex,
    validate_response,
};
use crate::nonce::NonceManager;
use crate::retry::{with_retry, ErrorMonitor};
use crate::scheduler::{Scheduler, TaskId};
use crate::codec;
use crate::telemetry::{build_envelope, secure_envelope};

use super::ports::{
    ConnectivityPort, FirmwareFetch, HttpBody, HttpMethod, HttpPort, HttpRequest, OtaPort,
    StoragePort, TimePort,
};

// ── Platform bundle ───────────────────────────────────────────

/// The full set of driven adapters, injected per call so the service owns
/// no I/O handles itself.
pub struct Platform<S, H, F, O, C, W> {
    pub storage: S,
    pub http: H,
    pub fetch: F,
    pub ota: O,
    pub clock: C,
    pub wifi: W,
}

// ── Service ───────────────────────────────────────────────────

pub struct GatewayService {
    scheduler: Scheduler,
    buffer: SampleBuffer,
    config: ConfigManager,
    monitor: ErrorMonitor,
    /// Local copy of the active config, refreshed at the top of each tick;
    /// tasks read this instead of taking the lock mid-cycle.
    active: RuntimeConfig,
    /// Single-slot command store; a newer command overwrites an older one.
    pending_command: Option<PendingCommand>,
    /// Finished command waiting for the `CommandResult` task.
    pending_report: Option<CommandReport>,
    upload_retries: u32,
    last_upload_attempt_ms: u64,
    reboot_requested: bool,
}

impl GatewayService {
    pub fn new(policy: FullPolicy) -> Self {
        let active = RuntimeConfig::default();
        let capacity = capacity_for(active.upload_interval_ms, active.sampling_interval_ms);
        Self {
            scheduler: Scheduler::new(active.sampling_interval_ms, active.upload_interval_ms),
            buffer: SampleBuffer::new(capacity, policy),
            config: ConfigManager::new(),
            monitor: ErrorMonitor::new(),
            active,
            pending_command: None,
            pending_report: None,
            upload_retries: 0,
            last_upload_attempt_ms: 0,
            reboot_requested: false,
        }
    }

    /// Load persisted config and align the scheduler to `now`.
    pub fn init(&mut self, storage: &mut impl StoragePort, now_ms: u64) {
        if let Err(e) = self.config.init(storage) {
            warn!("Service: config init failed ({e}), running on defaults");
        }
        if let Err(e) = NonceManager::init(storage) {
            warn!("Service: nonce init failed ({e})");
        }
        self.refresh_config(true);
        self.scheduler.init_last_run(now_ms);
        info!("Service: initialised (buffer {} slots)", self.buffer.capacity());
    }

    /// One pass of the cooperative dispatcher. Call from the main loop.
    pub fn tick<S, H, F, O, C, W>(&mut self, platform: &mut Platform<S, H, F, O, C, W>)
    where
        S: StoragePort,
        H: HttpPort,
        F: FirmwareFetch,
        O: OtaPort,
        C: TimePort,
        W: ConnectivityPort,
    {
        let now = platform.clock.monotonic_ms();

        // Intervals are only refreshed here, never mid-task.
        self.refresh_config(false);
        self.monitor.check_health(now, &mut platform.wifi);

        for task in self.scheduler.due_tasks(now) {
            match task {
                TaskId::ReadRegisters => self.run_read_task(platform),
                TaskId::UploadData => self.run_upload_task(platform, now),
                TaskId::WriteRegister => self.run_write_task(platform),
                TaskId::CommandResult => self.run_command_result_task(platform),
            }
        }
    }

    /// Idle slack until the next task, for the light-sleep window.
    pub fn next_due_in(&self, now_ms: u64) -> Option<u64> {
        self.scheduler.next_due_in(now_ms)
    }

    /// Set after a committed FOTA update; the main loop restarts the device.
    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn has_pending_report(&self) -> bool {
        self.pending_report.is_some()
    }

    // ── Config refresh / buffer sizing ────────────────────────

    fn refresh_config(&mut self, force: bool) {
        let Some(snapshot) = self.config.snapshot() else {
            // Lock timeout: keep running on the previous copy.
            return;
        };
        let timing_changed = snapshot.sampling_interval_ms != self.active.sampling_interval_ms
            || snapshot.upload_interval_ms != self.active.upload_interval_ms;
        if timing_changed || force {
            self.scheduler
                .set_intervals(snapshot.sampling_interval_ms, snapshot.upload_interval_ms);
            let capacity = capacity_for(snapshot.upload_interval_ms, snapshot.sampling_interval_ms);
            if capacity != self.buffer.capacity() || force {
                self.buffer.reallocate(capacity);
            }
        }
        self.active = snapshot;
    }

    // ── Read task ─────────────────────────────────────────────

    fn run_read_task<S, H, F, O, C, W>(&mut self, platform: &mut Platform<S, H, F, O, C, W>)
    where
        S: StoragePort,
        H: HttpPort,
        C: TimePort,
    {
        match self.poll_registers(&mut platform.http) {
            Ok(values) => {
                self.log_readings(&values);
                let stored = self.buffer.push(RegisterReading::from_slice(&values));
                if stored {
                    self.monitor.reset();
                }
            }
            Err(e) => {
                let now = platform.clock.monotonic_ms();
                self.monitor.record(e, now);
            }
        }
    }

    fn poll_registers(&self, http: &mut impl HttpPort) -> Result<Vec<u16>> {
        let count = self.active.register_count.max(1) as u16;
        let start = self.active.active_registers[0];
        let frame = request_frame_hex(self.active.slave_address, FUNCTION_CODE_READ, start, count);
        let response = inverter_exchange(http, "/api/inverter/read", &frame)?;
        decode_registers(&response, count as usize)
    }

    fn log_readings(&self, values: &[u16]) {
        let mut line = String::new();
        for (i, value) in values.iter().enumerate() {
            let address = self.active.active_registers[i.min(self.active.active_registers.len() - 1)];
            if let Some(reg) = register_info(address) {
                line.push_str(&format!("R{i}:{:.1}{} ", *value as f32 / reg.gain, reg.unit));
            }
        }
        info!("Read: {line}");
    }

    // ── Upload task ───────────────────────────────────────────

    fn run_upload_task<S, H, F, O, C, W>(
        &mut self,
        platform: &mut Platform<S, H, F, O, C, W>,
        now: u64,
    ) where
        S: StoragePort,
        H: HttpPort,
        F: FirmwareFetch,
        O: OtaPort,
        C: TimePort,
    {
        if self.buffer.count() == 0 {
            info!("Upload: no samples to send");
            return;
        }

        // Pace retries after a failed upload: the scheduler keeps firing on
        // its interval, but we honour the exponential backoff window.
        if self.upload_retries > 0 {
            let shift = (self.upload_retries - 1).min(16);
            let delay = (RETRY_BASE_DELAY_MS << shift).min(MAX_RETRY_DELAY_MS);
            if now.saturating_sub(self.last_upload_attempt_ms) < delay {
                info!("Upload: waiting out retry delay");
                return;
            }
        }

        let snapshot = self.buffer.begin_upload();
        info!("Upload: starting with {} samples", snapshot.len());

        let (frame, aggregated) = match self.compress_snapshot(&snapshot) {
            Some(result) => result,
            None => {
                self.fail_upload(Error::CompressionFailed, now);
                return;
            }
        };

        let envelope = build_envelope(&frame, aggregated);

        // The nonce is consumed and persisted before the MAC exists.
        let nonce = match NonceManager::next(&mut platform.storage) {
            Ok(n) => n,
            Err(e) => {
                error!("Upload: nonce unavailable ({e}), aborting cycle");
                self.buffer.finish_upload(false);
                return;
            }
        };

        let payload = match secure_envelope(&envelope, UPLOAD_PSK, nonce) {
            Ok(p) => p,
            Err(e) => {
                // Crypto failure is fatal to the cycle: release the lock,
                // keep the samples.
                error!("Upload: encryption failed ({e})");
                self.buffer.finish_upload(false);
                return;
            }
        };
        info!("Upload: nonce {} mac {}", payload.nonce, payload.mac_hex);

        let url = format!("{UPLOAD_API_BASE_URL}/api/cloud/write");
        let nonce_header = payload.nonce.to_string();
        let headers = [("X-Nonce", nonce_header.as_str()), ("X-MAC", payload.mac_hex.as_str())];
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: &url,
            api_key: UPLOAD_API_KEY,
            headers: &headers,
            body: HttpBody::OctetStream(&payload.body),
        };

        let body = match with_retry("Upload", || platform.http.send(&request)) {
            Ok(body) => body,
            Err(e) => {
                self.fail_upload(e, now);
                return;
            }
        };

        let ack = match parse_upload_ack(&body) {
            Ok(ack) => ack,
            Err(e) => {
                self.fail_upload(e, now);
                return;
            }
        };

        // Commands execute within this same cycle, before the success
        // bookkeeping; their result reports on the next CommandResult tick.
        self.process_command_section(&ack, platform);

        if !is_success(&ack) {
            self.fail_upload(Error::InvalidResponse, now);
            return;
        }

        self.process_config_section(&ack, platform);
        self.process_fota_section(&ack, platform);

        self.buffer.finish_upload(true);
        self.upload_retries = 0;
        self.last_upload_attempt_ms = 0;
        self.monitor.reset();
        info!("Upload: cycle complete, buffer cleared");
    }

    /// Compress the snapshot, falling back to windowed averaging when the
    /// raw frame exceeds the payload limit. Returns the frame and whether
    /// aggregation was applied.
    fn compress_snapshot(&self, snapshot: &[RegisterReading]) -> Option<(Vec<u8>, bool)> {
        let frame = attempt_compression(snapshot)?;
        if frame.len() <= MAX_PAYLOAD_SIZE {
            return Some((frame, false));
        }

        info!(
            "Upload: compressed frame {} bytes exceeds {} byte limit, aggregating",
            frame.len(),
            MAX_PAYLOAD_SIZE
        );
        let reduced = aggregate_avg(snapshot, AGG_WINDOW);
        let frame = attempt_compression(&reduced)?;
        if frame.len() > MAX_PAYLOAD_SIZE {
            warn!("Upload: aggregated frame still {} bytes", frame.len());
        }
        Some((frame, true))
    }

    fn fail_upload(&mut self, error: Error, now: u64) {
        self.buffer.finish_upload(false);
        self.upload_retries += 1;
        self.last_upload_attempt_ms = now;
        self.monitor.record(error, now);
        warn!("Upload: failed ({error}), retry count {}", self.upload_retries);
        if self.monitor.is_critical() {
            error!(
                "Upload: error pressure critical ({} consecutive)",
                self.monitor.consecutive_errors()
            );
        }
    }

    // ── Response sections ─────────────────────────────────────

    fn process_command_section<S, H, F, O, C, W>(
        &mut self,
        ack: &UploadAck,
        platform: &mut Platform<S, H, F, O, C, W>,
    ) where
        H: HttpPort,
        C: TimePort,
    {
        let Some(request) = &ack.command else { return };
        match extract_command(request) {
            Ok(command) => {
                self.pending_command = Some(command);
                // No deferral: the command runs inside this upload cycle.
                self.run_write_task(platform);
            }
            Err(_) => warn!("Command: rejected malformed or unsupported command"),
        }
    }

    fn process_config_section<S, H, F, O, C, W>(
        &mut self,
        ack: &UploadAck,
        platform: &mut Platform<S, H, F, O, C, W>,
    ) where
        S: StoragePort,
        H: HttpPort,
    {
        if let Some(update) = &ack.config_update {
            if let Some(config_ack) = self.config.process_update(update) {
                if !config_ack.is_empty() {
                    let url = format!("{UPLOAD_API_BASE_URL}/api/config_ack");
                    let body = config_ack.to_json();
                    let request = HttpRequest::post_json(&url, UPLOAD_API_KEY, &body);
                    // An ACK delivery failure does not block application.
                    if let Err(e) = with_retry("ConfigAck", || platform.http.send(&request)) {
                        warn!("Config: ack delivery failed ({e})");
                    }
                }
            }
        }

        // Promotion happens strictly after the ACK round-trip.
        if self.config.has_pending() {
            if let Err(e) = self.config.promote_pending(&mut platform.storage) {
                warn!("Config: promoting pending failed ({e})");
                self.config.clear_pending();
            }
        }
    }

    fn process_fota_section<S, H, F, O, C, W>(
        &mut self,
        ack: &UploadAck,
        platform: &mut Platform<S, H, F, O, C, W>,
    ) where
        S: StoragePort,
        H: HttpPort,
        F: FirmwareFetch,
        O: OtaPort,
        C: TimePort,
    {
        let Some(manifest) = &ack.fota else { return };
        match fota::run(
            manifest,
            &mut platform.storage,
            &mut platform.fetch,
            &mut platform.ota,
            &mut platform.http,
            &platform.clock,
        ) {
            Ok(FotaOutcome::Updated) => {
                info!("FOTA: update committed, requesting reboot");
                self.reboot_requested = true;
            }
            Ok(FotaOutcome::AlreadyCurrent) => {}
            Err(e) => warn!("FOTA: update failed ({e}), continuing normal operation"),
        }
    }

    // ── Write command ─────────────────────────────────────────

    fn run_write_task<S, H, F, O, C, W>(&mut self, platform: &mut Platform<S, H, F, O, C, W>)
    where
        H: HttpPort,
        C: TimePort,
    {
        let Some(command) = self.pending_command.take() else {
            self.scheduler.set_enabled(TaskId::WriteRegister, false);
            return;
        };

        let outcome = match command.action {
            CommandAction::WriteRegister => self.execute_write(&command, &mut platform.http),
            CommandAction::ReadRegister => match self.poll_registers(&mut platform.http) {
                Ok(values) => {
                    self.log_readings(&values);
                    self.buffer.push(RegisterReading::from_slice(&values));
                    CommandOutcome::Success
                }
                Err(Error::ModbusException(code)) => CommandOutcome::Exception(code),
                Err(Error::CrcFailed) | Err(Error::InvalidResponse) => CommandOutcome::InvalidResponse,
                Err(_) => CommandOutcome::NoResponse,
            },
        };

        info!("Command: finalized with status '{}'", outcome.describe());
        self.pending_report = Some(CommandReport {
            outcome,
            executed_at: platform.clock.timestamp_iso8601(),
        });
        self.scheduler.set_enabled(TaskId::WriteRegister, false);
        self.scheduler.set_enabled(TaskId::CommandResult, true);
    }

    fn execute_write(&self, command: &PendingCommand, http: &mut impl HttpPort) -> CommandOutcome {
        if !is_valid_write(command.register, command.value) {
            warn!(
                "Command: value {} rejected for register {}",
                command.value, command.register
            );
            return CommandOutcome::InvalidValue;
        }

        let frame = request_frame_hex(
            self.active.slave_address,
            FUNCTION_CODE_WRITE,
            command.register,
            command.value,
        );
        match inverter_exchange(http, "/api/inverter/write", &frame) {
            Ok(response) => {
                if validate_response(&response).is_err() {
                    return CommandOutcome::InvalidResponse;
                }
                if is_exception(&response) {
                    return CommandOutcome::Exception(exception_code(&response));
                }
                info!(
                    "Command: register {} set to {}",
                    command.register, command.value
                );
                CommandOutcome::Success
            }
            Err(Error::CrcFailed) | Err(Error::InvalidResponse) => CommandOutcome::InvalidResponse,
            Err(_) => CommandOutcome::NoResponse,
        }
    }

    // ── Command result task ───────────────────────────────────

    fn run_command_result_task<S, H, F, O, C, W>(&mut self, platform: &mut Platform<S, H, F, O, C, W>)
    where
        H: HttpPort,
    {
        let Some(report) = self.pending_report.take() else {
            self.scheduler.set_enabled(TaskId::CommandResult, false);
            return;
        };

        let url = format!("{UPLOAD_API_BASE_URL}/api/cloud/command_result");
        let body = report.to_json();
        let request = HttpRequest::post_json(&url, UPLOAD_API_KEY, &body);
        match with_retry("CommandResult", || platform.http.send(&request)) {
            Ok(_) => info!("Command: result reported"),
            Err(e) => warn!("Command: result delivery failed ({e})"),
        }
        self.scheduler.set_enabled(TaskId::CommandResult, false);
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// POST a hex frame to the inverter API and decode the hex frame in the
/// reply. Transport errors retry under the policy; the decoded bytes are
/// validated by the caller.
fn inverter_exchange(http: &mut impl HttpPort, path: &str, frame_hex: &str) -> Result<Vec<u8>> {
    #[derive(Deserialize)]
    struct FrameReply {
        frame: String,
    }

    let url = format!("{API_BASE_URL}{path}");
    let body = format!(r#"{{"frame":"{frame_hex}"}}"#);
    let request = HttpRequest::post_json(&url, API_KEY, &body);

    let reply = with_retry("Inverter", || {
        let text = http.send(&request)?;
        let parsed: FrameReply =
            serde_json::from_str(&text).map_err(|_| Error::InvalidResponse)?;
        if parsed.frame.is_empty() || parsed.frame.len() % 2 != 0 {
            return Err(Error::InvalidResponse);
        }
        Ok(parsed.frame)
    })?;

    codec::decode_hex(&reply)
}

/// Compression with the bounded retry ritual. The input does not change
/// between attempts, so this mostly guards against transient allocation
/// pressure on the device.
fn attempt_compression(readings: &[RegisterReading]) -> Option<Vec<u8>> {
    for attempt in 1..=MAX_COMPRESSION_RETRIES {
        match compress(readings) {
            Ok((frame, _metrics)) => return Some(frame),
            Err(e) => warn!("Compression: attempt {attempt} failed ({e})"),
        }
    }
    error!("Compression: giving up after {MAX_COMPRESSION_RETRIES} attempts");
    None
}
