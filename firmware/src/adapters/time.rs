//! Clock adapter.
//!
//! Monotonic milliseconds for the scheduler and ISO-8601 local timestamps
//! for command results and FOTA events.
//!
//! - **`target_os = "espidf"`** — `esp_timer_get_time()` (microsecond
//!   resolution, monotonic) plus the libc wall clock once SNTP has synced.
//! - **host** — `std::time::Instant` and the OS clock.

use chrono::Local;

use crate::app::ports::TimePort;

pub struct ClockAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl ClockAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Kick off SNTP against the configured server. Time sync itself is an
    /// external collaborator; pre-sync timestamps read as the epoch.
    #[cfg(target_os = "espidf")]
    pub fn start_ntp(&self) {
        use esp_idf_svc::sys::*;
        let server = std::ffi::CString::new(crate::config::NTP_SERVER).unwrap();
        // SAFETY: sntp setup runs once from the main task before the loop.
        unsafe {
            esp_sntp_setoperatingmode(esp_sntp_operatingmode_t_ESP_SNTP_OPMODE_POLL);
            esp_sntp_setservername(0, server.as_ptr());
            esp_sntp_init();
        }
        log::info!("Clock: SNTP started ({})", crate::config::NTP_SERVER);
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start_ntp(&self) {
        log::info!("Clock(sim): SNTP skipped, host clock is authoritative");
    }
}

impl Default for ClockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePort for ClockAdapter {
    #[cfg(target_os = "espidf")]
    fn monotonic_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn monotonic_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn timestamp_iso8601(&self) -> String {
        Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }
}
