//! Structured FOTA event log.
//!
//! Every update attempt produces an append-only sequence of JSON events,
//! bracketed by `FOTA_START` and finalized into a single payload
//! `{jobId, final_status, duration_ms, events}` for the log endpoint.
//! The event list is persisted after every append so a crash mid-update
//! leaves a forensic trail; the persisted copy is deleted once the
//! finalized payload has been handed to the uploader.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StoragePort, TimePort};

const LOG_NAMESPACE: &str = "fota";
const LOG_KEY: &str = "log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FotaEvent {
    pub ts: String,
    pub lvl: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    Failure,
}

impl FinalStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

pub struct FotaLog {
    job_id: String,
    started_ms: u64,
    events: Vec<FotaEvent>,
}

impl FotaLog {
    /// Begin a fresh log for `job_id`, discarding any stale one, and record
    /// the `FOTA_START` event with the version transition.
    pub fn start(
        job_id: u32,
        from_version: &str,
        to_version: &str,
        clock: &impl TimePort,
        storage: &mut impl StoragePort,
    ) -> Self {
        let _ = storage.delete(LOG_NAMESPACE, LOG_KEY);
        let job = format!("fota-job-{job_id}");
        let mut log = Self {
            job_id: job.clone(),
            started_ms: clock.monotonic_ms(),
            events: Vec::new(),
        };
        log.push(
            FotaEvent {
                ts: clock.timestamp_iso8601(),
                lvl: "INFO".into(),
                msg: "FOTA_START".into(),
                job: Some(job),
                from: Some(from_version.into()),
                to: Some(to_version.into()),
                reason: None,
            },
            storage,
        );
        info!("FOTA: log started ({from_version} -> {to_version})");
        log
    }

    /// Record a failure event with its machine-readable reason.
    pub fn error(&mut self, reason: &str, clock: &impl TimePort, storage: &mut impl StoragePort) {
        self.push(
            FotaEvent {
                ts: clock.timestamp_iso8601(),
                lvl: "ERROR".into(),
                msg: "FOTA_FAIL".into(),
                job: None,
                from: None,
                to: None,
                reason: Some(reason.into()),
            },
            storage,
        );
    }

    /// Record the terminal success event.
    pub fn success(&mut self, clock: &impl TimePort, storage: &mut impl StoragePort) {
        self.push(
            FotaEvent {
                ts: clock.timestamp_iso8601(),
                lvl: "INFO".into(),
                msg: "FOTA_SUCCESS".into(),
                job: None,
                from: None,
                to: None,
                reason: None,
            },
            storage,
        );
    }

    /// Wrap the events into the upload payload for the log endpoint.
    pub fn finalize(&self, status: FinalStatus, clock: &impl TimePort) -> String {
        #[derive(Serialize)]
        struct Payload<'a> {
            #[serde(rename = "jobId")]
            job_id: &'a str,
            final_status: &'static str,
            duration_ms: u64,
            events: &'a [FotaEvent],
        }
        let duration_ms = clock.monotonic_ms().saturating_sub(self.started_ms);
        serde_json::to_string(&Payload {
            job_id: &self.job_id,
            final_status: status.as_str(),
            duration_ms,
            events: &self.events,
        })
        .unwrap_or_default()
    }

    /// Remove the persisted copy once the payload has been uploaded.
    pub fn delete(storage: &mut impl StoragePort) {
        let _ = storage.delete(LOG_NAMESPACE, LOG_KEY);
    }

    pub fn events(&self) -> &[FotaEvent] {
        &self.events
    }

    fn push(&mut self, event: FotaEvent, storage: &mut impl StoragePort) {
        self.events.push(event);
        match serde_json::to_vec(&self.events) {
            Ok(blob) => {
                if let Err(e) = storage.write(LOG_NAMESPACE, LOG_KEY, &blob) {
                    warn!("FOTA: log persist failed: {e}");
                }
            }
            Err(e) => warn!("FOTA: log serialize failed: {e}"),
        }
    }
}
