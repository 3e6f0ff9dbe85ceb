//! Task watchdog (TWDT) adapter.
//!
//! The scheduler feeds the watchdog after every dispatch pass; if the loop
//! stalls longer than the configured timeout the device resets and the
//! bootloader's rollback logic takes over.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use crate::config::WATCHDOG_TIMEOUT_S;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl Watchdog {
    /// Configure the TWDT and subscribe the current task.
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: TWDT configuration runs once from the main task.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms: WATCHDOG_TIMEOUT_S * 1_000,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!("Watchdog: reconfigure returned {ret} (may already be configured)");
                }
                let subscribed = esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK;
                if subscribed {
                    log::info!("Watchdog: subscribed ({WATCHDOG_TIMEOUT_S}s timeout)");
                } else {
                    log::warn!("Watchdog: failed to subscribe");
                }
                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("Watchdog(sim): no-op ({WATCHDOG_TIMEOUT_S}s nominal)");
            Self {}
        }
    }

    /// Feed the watchdog; call at least once per scheduler pass.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the task subscribed in new().
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
