//! Power management: spend idle slack between tasks asleep.
//!
//! When enabled, the main loop hands the scheduler's slack window to
//! [`PowerManager::idle`]. Light sleep powers down the radio, so the
//! adapter re-establishes WiFi association on wake before the next task
//! needs the network. With light sleep off, the slack is burned as a
//! plain delay, which still keeps the loop from spinning.

use log::{info, warn};

use crate::app::ports::ConnectivityPort;

/// Sleeping for less than this is not worth the WiFi re-association cost.
const MIN_SLEEP_MS: u64 = 500;

pub struct PowerManager {
    enabled: bool,
    light_sleep: bool,
}

impl PowerManager {
    pub fn new(enabled: bool, light_sleep: bool) -> Self {
        if enabled {
            info!(
                "Power: management enabled ({})",
                if light_sleep { "light sleep" } else { "idle delay" }
            );
        }
        Self { enabled, light_sleep }
    }

    /// Spend the idle window. Returns `true` if a light sleep happened and
    /// transport state had to be re-established.
    pub fn idle(&self, slack_ms: u64, wifi: &mut impl ConnectivityPort) -> bool {
        if !self.enabled || slack_ms < MIN_SLEEP_MS {
            return false;
        }

        if self.light_sleep {
            self.light_sleep_for(slack_ms);
            // The radio went down with us; bring association back up
            // before the next task fires.
            if !wifi.is_connected() {
                warn!("Power: WiFi lost over light sleep, reconnecting");
                let _ = wifi.connect();
            }
            true
        } else {
            std::thread::sleep(std::time::Duration::from_millis(slack_ms));
            false
        }
    }

    #[cfg(target_os = "espidf")]
    fn light_sleep_for(&self, slack_ms: u64) {
        use esp_idf_svc::sys::*;
        // SAFETY: timer wakeup + light sleep from the main task only.
        unsafe {
            if esp_sleep_enable_timer_wakeup(slack_ms * 1_000) == ESP_OK {
                esp_light_sleep_start();
            }
        }
        info!("Power: woke from light sleep ({slack_ms} ms window)");
    }

    #[cfg(not(target_os = "espidf"))]
    fn light_sleep_for(&self, slack_ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(slack_ms.min(50)));
        info!("Power(sim): light sleep {slack_ms} ms");
    }
}
