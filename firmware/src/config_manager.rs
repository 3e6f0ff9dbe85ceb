//! Runtime configuration with pending/active staging.
//!
//! Two copies of the runtime config exist: `active` (what the tasks use)
//! and an optional `pending` (staged from a cloud `config_update`).
//! Pending promotes to active only after the upload that delivered it has
//! been acknowledged and the config-ack POSTed, so a mid-cycle failure
//! never leaves the device running half-applied settings.
//!
//! Both copies sit behind a mutex with a 1-second acquisition timeout —
//! on timeout the operation logs and aborts instead of stalling the
//! cooperative scheduler.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;

use crate::app::ports::{StorageError, StoragePort};
use crate::cloud::ConfigUpdate;
use crate::config::{
    register_address, MAX_REGISTERS, POLL_INTERVAL_MS, READ_REGISTER_COUNT, SLAVE_ADDRESS,
    UPLOAD_INTERVAL_MS,
};

const NVS_NAMESPACE: &str = "device_config";
const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const LOCK_RETRY: Duration = Duration::from_millis(10);

// ── Validation limits ─────────────────────────────────────────

pub const MIN_SAMPLING_MS: u32 = 1_000;
pub const MAX_SAMPLING_MS: u32 = 3_600_000;
pub const MIN_UPLOAD_MS: u32 = 5_000;
pub const MAX_UPLOAD_MS: u32 = 86_400_000;
pub const MIN_SLAVE_ADDRESS: u8 = 1;
pub const MAX_SLAVE_ADDRESS: u8 = 247;

// ── Runtime config ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub sampling_interval_ms: u32,
    pub upload_interval_ms: u32,
    pub slave_address: u8,
    pub active_registers: [u16; MAX_REGISTERS],
    pub register_count: u8,
    pub valid: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut active_registers = [0u16; MAX_REGISTERS];
        for (i, reg) in active_registers.iter_mut().enumerate() {
            *reg = i as u16;
        }
        Self {
            sampling_interval_ms: POLL_INTERVAL_MS,
            upload_interval_ms: UPLOAD_INTERVAL_MS,
            slave_address: SLAVE_ADDRESS,
            active_registers,
            register_count: READ_REGISTER_COUNT as u8,
            valid: true,
        }
    }
}

// ── Config-ack payload ────────────────────────────────────────

/// Per-field classification of a cloud config update, POSTed back as
/// `{"config_ack":{...}}`.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ConfigAck {
    pub accepted: Vec<&'static str>,
    pub rejected: Vec<&'static str>,
    pub unchanged: Vec<&'static str>,
}

impl ConfigAck {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty() && self.unchanged.is_empty()
    }

    /// The JSON document the config-ack endpoint expects.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Envelope<'a> {
            config_ack: &'a ConfigAck,
        }
        serde_json::to_string(&Envelope { config_ack: self }).unwrap_or_default()
    }
}

// ── Manager ───────────────────────────────────────────────────

struct ConfigState {
    active: RuntimeConfig,
    pending: Option<RuntimeConfig>,
}

pub struct ConfigManager {
    state: Mutex<ConfigState>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConfigState {
                active: RuntimeConfig::default(),
                pending: None,
            }),
        }
    }

    /// Load persisted config, or persist the defaults on first boot.
    pub fn init(&self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        if storage.exists(NVS_NAMESPACE, "sampling_ms") {
            match load_from_storage(storage) {
                Ok(config) => {
                    if let Some(mut guard) = self.lock_with_timeout("init") {
                        guard.active = config;
                    }
                    info!("Config: loaded from NVS");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Config: stored config unreadable ({e}), using defaults");
                }
            }
        } else {
            info!("Config: first boot, persisting defaults");
        }
        let defaults = RuntimeConfig::default();
        save_to_storage(storage, &defaults)
    }

    /// Snapshot the active config into a local copy. `None` on lock
    /// timeout — the caller skips the operation and retries next tick.
    pub fn snapshot(&self) -> Option<RuntimeConfig> {
        self.lock_with_timeout("snapshot").map(|guard| guard.active)
    }

    /// Classify a cloud config update field-by-field and stage the
    /// accepted changes as pending. Returns `None` on lock timeout.
    pub fn process_update(&self, update: &ConfigUpdate) -> Option<ConfigAck> {
        let mut guard = self.lock_with_timeout("process_update")?;
        let mut ack = ConfigAck::default();
        // Re-staging starts from the live config; a newer update wholly
        // replaces an unpromoted older one.
        let mut staged = guard.active;
        let mut changed = false;

        if let Some(seconds) = update.sampling_interval {
            let ms = seconds.saturating_mul(1_000);
            if !(MIN_SAMPLING_MS..=MAX_SAMPLING_MS).contains(&ms) {
                ack.rejected.push("sampling_interval");
            } else if guard.active.sampling_interval_ms == ms {
                ack.unchanged.push("sampling_interval");
            } else {
                staged.sampling_interval_ms = ms;
                ack.accepted.push("sampling_interval");
                changed = true;
            }
        }

        if let Some(seconds) = update.upload_interval {
            let ms = seconds.saturating_mul(1_000);
            if !(MIN_UPLOAD_MS..=MAX_UPLOAD_MS).contains(&ms) {
                ack.rejected.push("upload_interval");
            } else if guard.active.upload_interval_ms == ms {
                ack.unchanged.push("upload_interval");
            } else {
                staged.upload_interval_ms = ms;
                ack.accepted.push("upload_interval");
                changed = true;
            }
        }

        if let Some(names) = &update.registers {
            match resolve_registers(names) {
                Some((addresses, count)) => {
                    let active_count = guard.active.register_count as usize;
                    let unchanged = count as usize == active_count
                        && addresses[..active_count] == guard.active.active_registers[..active_count];
                    if unchanged {
                        ack.unchanged.push("registers");
                    } else {
                        staged.active_registers = addresses;
                        staged.register_count = count;
                        ack.accepted.push("registers");
                        changed = true;
                    }
                }
                None => ack.rejected.push("registers"),
            }
        }

        if let Some(addr) = update.slave_address {
            if !(MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&addr) {
                ack.rejected.push("slave_address");
            } else if guard.active.slave_address == addr {
                ack.unchanged.push("slave_address");
            } else {
                staged.slave_address = addr;
                ack.accepted.push("slave_address");
                changed = true;
            }
        }

        if changed {
            guard.pending = Some(staged);
            info!(
                "Config: staged pending update (accepted: {:?})",
                ack.accepted
            );
        }
        Some(ack)
    }

    pub fn has_pending(&self) -> bool {
        self.lock_with_timeout("has_pending")
            .map(|guard| guard.pending.is_some())
            .unwrap_or(false)
    }

    /// Promote pending to active and persist. Idempotent; only called from
    /// the upload task after a successful ACK + config-ack POST.
    pub fn promote_pending(&self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        let Some(mut guard) = self.lock_with_timeout("promote_pending") else {
            return Ok(());
        };
        if let Some(pending) = guard.pending.take() {
            guard.active = pending;
            save_to_storage(storage, &guard.active)?;
            info!(
                "Config: pending applied (sampling {} ms, upload {} ms, {} registers)",
                guard.active.sampling_interval_ms,
                guard.active.upload_interval_ms,
                guard.active.register_count
            );
        }
        Ok(())
    }

    pub fn clear_pending(&self) {
        if let Some(mut guard) = self.lock_with_timeout("clear_pending") {
            guard.pending = None;
        }
    }

    fn lock_with_timeout(&self, op: &str) -> Option<MutexGuard<'_, ConfigState>> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => {
                    warn!("Config: recovering poisoned lock in {op}");
                    return Some(poisoned.into_inner());
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        warn!("Config: lock timeout in {op}, aborting");
                        return None;
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve register names against the fixed table. Any unknown name or a
/// bad count rejects the whole field.
fn resolve_registers(names: &[String]) -> Option<([u16; MAX_REGISTERS], u8)> {
    if names.is_empty() || names.len() > MAX_REGISTERS {
        return None;
    }
    let mut addresses = [0u16; MAX_REGISTERS];
    for (i, name) in names.iter().enumerate() {
        addresses[i] = register_address(name)?;
    }
    Some((addresses, names.len() as u8))
}

// ── Persistence (one stable key per field) ────────────────────

fn load_from_storage(storage: &impl StoragePort) -> Result<RuntimeConfig, StorageError> {
    let mut config = RuntimeConfig::default();
    config.sampling_interval_ms = read_u32(storage, "sampling_ms")?;
    config.upload_interval_ms = read_u32(storage, "upload_ms")?;
    config.slave_address = read_u8(storage, "slave_addr")?;
    config.register_count = read_u8(storage, "reg_count")?;

    let mut blob = [0u8; MAX_REGISTERS * 2];
    let len = storage.read(NVS_NAMESPACE, "registers", &mut blob)?;
    if len != blob.len() || config.register_count == 0 || config.register_count as usize > MAX_REGISTERS {
        return Err(StorageError::Corrupted);
    }
    for (i, pair) in blob.chunks_exact(2).enumerate() {
        config.active_registers[i] = u16::from_le_bytes([pair[0], pair[1]]);
    }
    config.valid = true;
    Ok(config)
}

fn save_to_storage(storage: &mut impl StoragePort, config: &RuntimeConfig) -> Result<(), StorageError> {
    storage.write(NVS_NAMESPACE, "sampling_ms", &config.sampling_interval_ms.to_le_bytes())?;
    storage.write(NVS_NAMESPACE, "upload_ms", &config.upload_interval_ms.to_le_bytes())?;
    storage.write(NVS_NAMESPACE, "slave_addr", &[config.slave_address])?;
    storage.write(NVS_NAMESPACE, "reg_count", &[config.register_count])?;

    let mut blob = [0u8; MAX_REGISTERS * 2];
    for (i, reg) in config.active_registers.iter().enumerate() {
        blob[i * 2..i * 2 + 2].copy_from_slice(&reg.to_le_bytes());
    }
    storage.write(NVS_NAMESPACE, "registers", &blob)
}

fn read_u32(storage: &impl StoragePort, key: &str) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    let len = storage.read(NVS_NAMESPACE, key, &mut buf)?;
    if len != 4 {
        return Err(StorageError::Corrupted);
    }
    Ok(u32::from_le_bytes(buf))
}

fn read_u8(storage: &impl StoragePort, key: &str) -> Result<u8, StorageError> {
    let mut buf = [0u8; 1];
    let len = storage.read(NVS_NAMESPACE, key, &mut buf)?;
    if len != 1 {
        return Err(StorageError::Corrupted);
    }
    Ok(buf[0])
}
