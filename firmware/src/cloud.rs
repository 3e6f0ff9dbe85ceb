//! Cloud response demultiplexing: wire types and classification.
//!
//! A single upload acknowledgement may carry any subset of a write/read
//! command, a configuration update, and a FOTA manifest. This module owns
//! the serde shapes and the per-section extraction; driving the sections
//! (execute command, stage config, start FOTA) happens in
//! [`crate::app::service`].

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Upload ACK ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct UploadAck {
    pub status: Option<String>,
    pub error: Option<String>,
    pub command: Option<CommandRequest>,
    pub config_update: Option<ConfigUpdate>,
    pub fota: Option<FotaManifest>,
}

/// Parse the upload ACK body. An empty or non-JSON body is an invalid
/// response — the transport layer never passes those through as success.
pub fn parse_upload_ack(body: &str) -> Result<UploadAck> {
    if body.is_empty() {
        return Err(Error::InvalidResponse);
    }
    serde_json::from_str(body).map_err(|e| {
        warn!("Cloud: unparseable upload ACK: {e}");
        Error::InvalidResponse
    })
}

/// The cycle only commits (buffer clear, config promote) on an explicit
/// success status.
pub fn is_success(ack: &UploadAck) -> bool {
    match ack.status.as_deref() {
        Some("success") => true,
        _ => {
            if let Some(error) = &ack.error {
                warn!("Cloud: upload rejected: {error}");
            }
            false
        }
    }
}

// ── Commands ──────────────────────────────────────────────────

/// Raw command section as it arrives: the register travels as a decimal
/// string, the value as a number (write only).
#[derive(Debug, Deserialize, PartialEq)]
pub struct CommandRequest {
    pub action: String,
    pub target_register: Option<String>,
    pub value: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    WriteRegister,
    ReadRegister,
}

/// A validated command, held in the single-slot store until executed.
/// Newer commands overwrite older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub action: CommandAction,
    pub register: u16,
    pub value: u16,
}

/// Validate the command section. Unsupported actions and malformed
/// registers are rejected here, before anything touches the inverter.
pub fn extract_command(request: &CommandRequest) -> Result<PendingCommand> {
    let action = match request.action.to_ascii_lowercase().as_str() {
        "write_register" => CommandAction::WriteRegister,
        "read_register" => CommandAction::ReadRegister,
        other => {
            warn!("Cloud: unsupported command action '{other}'");
            return Err(Error::InvalidResponse);
        }
    };

    let register = request
        .target_register
        .as_deref()
        .unwrap_or("")
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::InvalidResponse)?;

    let value = match action {
        CommandAction::WriteRegister => request.value.ok_or(Error::InvalidResponse)?,
        CommandAction::ReadRegister => 0,
    };

    info!("Cloud: command {action:?} register={register} value={value}");
    Ok(PendingCommand { action, register, value })
}

// ── Command results ───────────────────────────────────────────

/// Outcome of executing a command against the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    InvalidValue,
    Exception(u8),
    InvalidResponse,
    NoResponse,
}

impl CommandOutcome {
    /// Human-readable classification for the serial log.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidValue => "Failed - Invalid value",
            Self::Exception(_) => "Failed - Exception",
            Self::InvalidResponse => "Failed - Invalid response",
            Self::NoResponse => "Failed - No response",
        }
    }

    fn error_fields(&self) -> Option<(&'static str, String)> {
        match self {
            Self::Success => None,
            Self::InvalidValue => Some(("INVALID_VALUE", "value outside register limits".into())),
            Self::Exception(code) => {
                Some(("MODBUS_EXCEPTION", format!("write failed with exception 0x{code:02X}")))
            }
            Self::InvalidResponse => Some(("INVALID_RESPONSE", "invalid Modbus response".into())),
            Self::NoResponse => Some(("TIMEOUT", "Modbus write timeout".into())),
        }
    }
}

/// A finished command waiting to be reported by the `CommandResult` task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub outcome: CommandOutcome,
    pub executed_at: String,
}

impl CommandReport {
    /// The `{"command_result":{...}}` document for the result endpoint.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Body<'a> {
            status: &'static str,
            executed_at: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            error_code: Option<&'static str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error_message: Option<String>,
        }
        #[derive(Serialize)]
        struct Envelope<'a> {
            command_result: Body<'a>,
        }

        let (status, error_code, error_message) = match self.outcome.error_fields() {
            None => ("success", None, None),
            Some((code, message)) => ("failed", Some(code), Some(message)),
        };
        serde_json::to_string(&Envelope {
            command_result: Body {
                status,
                executed_at: &self.executed_at,
                error_code,
                error_message,
            },
        })
        .unwrap_or_default()
    }
}

// ── Config update ─────────────────────────────────────────────

/// Cloud-side intervals arrive in seconds; validation and the
/// seconds→milliseconds conversion live in [`crate::config_manager`].
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ConfigUpdate {
    pub sampling_interval: Option<u32>,
    pub upload_interval: Option<u32>,
    pub slave_address: Option<u8>,
    pub registers: Option<Vec<String>>,
}

// ── FOTA manifest ─────────────────────────────────────────────

/// Signed firmware-update manifest. The signature covers the compact JSON
/// of the other four fields in declaration order — `signed_json` must stay
/// byte-identical to what the signer produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FotaManifest {
    pub job_id: u32,
    #[serde(rename = "fwUrl")]
    pub fw_url: String,
    #[serde(rename = "fwSize")]
    pub fw_size: usize,
    #[serde(rename = "shaExpected")]
    pub sha_expected: String,
    #[serde(skip_serializing)]
    pub signature: String,
}

impl FotaManifest {
    /// The exact byte sequence the ECDSA signature was made over.
    pub fn signed_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
