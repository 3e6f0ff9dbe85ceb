//! EcoWatt gateway — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  NvsAdapter   HttpClientAdapter   FirmwareDownloader         │
//! │  (Storage)    (Inverter + Cloud)  (FOTA fetch)               │
//! │  OtaAdapter   ClockAdapter        WifiAdapter   Watchdog     │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ────────────────        │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────┐      │
//! │  │           GatewayService (pure logic)              │      │
//! │  │  Scheduler · Buffer · Pipeline · Demux · FOTA      │      │
//! │  └────────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use ecowatt::adapters::http::{FirmwareDownloader, HttpClientAdapter};
use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::adapters::ota;
use ecowatt::adapters::time::ClockAdapter;
use ecowatt::adapters::watchdog::Watchdog;
use ecowatt::adapters::wifi::WifiAdapter;
use ecowatt::app::ports::{ConnectivityPort, TimePort};
use ecowatt::app::service::{GatewayService, Platform};
use ecowatt::buffer::FullPolicy;
use ecowatt::config::{LIGHT_SLEEP, POWER_MANAGEMENT};
use ecowatt::power::PowerManager;

/// Dispatcher pacing; tasks themselves run on their own intervals.
const LOOP_DELAY_MS: u64 = 100;

fn main() -> Result<()> {
    // ── 1. Platform bootstrap ─────────────────────────────────
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }
    #[cfg(not(target_os = "espidf"))]
    env_logger::init();

    info!("EcoWatt gateway v{}", env!("CARGO_PKG_VERSION"));

    // The image we are running just booted far enough to matter — cancel
    // the bootloader's rollback before anything can wedge.
    ota::mark_running_firmware_valid();

    let watchdog = Watchdog::new();

    // ── 2. Adapters ───────────────────────────────────────────
    let storage = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let clock = ClockAdapter::new();

    WifiAdapter::stack_init().map_err(|e| anyhow::anyhow!("WiFi stack init: {e}"))?;
    let mut wifi = WifiAdapter::new();
    if wifi.connect().is_err() {
        warn!("WiFi: initial association failed, reconnect loop will retry");
    }
    clock.start_ntp();

    let mut platform = Platform {
        storage,
        http: HttpClientAdapter::new(),
        fetch: FirmwareDownloader::new(),
        ota: ota::OtaAdapter::new(),
        clock,
        wifi,
    };

    // ── 3. Service ────────────────────────────────────────────
    let mut service = GatewayService::new(FullPolicy::Stop);
    service.init(&mut platform.storage, platform.clock.monotonic_ms());

    let power = PowerManager::new(POWER_MANAGEMENT, LIGHT_SLEEP);

    info!("System ready. Entering task loop.");

    // ── 4. Task loop ──────────────────────────────────────────
    loop {
        service.tick(&mut platform);
        watchdog.feed();

        if service.reboot_requested() {
            info!("Reboot requested after firmware update");
            ota::restart();
        }

        platform.wifi.poll();

        // Spend the slack until the next task asleep where configured;
        // otherwise just yield briefly.
        let now = platform.clock.monotonic_ms();
        let slack = service.next_due_in(now).unwrap_or(0);
        if !power.idle(slack.saturating_sub(LOOP_DELAY_MS), &mut platform.wifi) {
            std::thread::sleep(std::time::Duration::from_millis(LOOP_DELAY_MS));
        }
    }
}
