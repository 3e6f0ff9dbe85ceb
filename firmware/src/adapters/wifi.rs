//! WiFi station adapter.
//!
//! Implements [`ConnectivityPort`]. Credentials are build-time constants;
//! the adapter owns association state and the reconnect backoff
//! (2 s → 4 s → 8 s … capped at 60 s). Association details (scan, auth,
//! DHCP) belong to the platform — the core only ever asks "are we up" and
//! "try again".

use log::{error, info, warn};

use crate::app::ports::ConnectivityPort;
use crate::config::{WIFI_PASSWORD, WIFI_SSID};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WifiState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32 },
}

const MAX_BACKOFF_SECS: u32 = 60;

pub struct WifiAdapter {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    backoff_secs: u32,
    /// Simulation: counts connect attempts for deterministic failures.
    #[cfg(not(target_os = "espidf"))]
    sim_connect_counter: u32,
}

impl WifiAdapter {
    pub fn new() -> Self {
        let mut ssid = heapless::String::new();
        let _ = ssid.push_str(WIFI_SSID);
        let mut password = heapless::String::new();
        let _ = password.push_str(WIFI_PASSWORD);
        Self {
            state: WifiState::Disconnected,
            ssid,
            password,
            backoff_secs: 2,
            #[cfg(not(target_os = "espidf"))]
            sim_connect_counter: 0,
        }
    }

    /// One-time stack bring-up (netif, event loop, STA mode). Must run
    /// before the first `connect()`.
    #[cfg(target_os = "espidf")]
    pub fn stack_init() -> Result<()> {
        use esp_idf_svc::sys::*;
        // SAFETY: stack init runs once from the main task.
        unsafe {
            if esp_netif_init() != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
            let ret = esp_event_loop_create_default();
            if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
                return Err(Error::WifiDisconnected);
            }
            esp_netif_create_default_wifi_sta();

            let init_cfg = wifi_init_config_t {
                ..Default::default()
            };
            if esp_wifi_init(&init_cfg) != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
            if esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA) != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
            if esp_wifi_start() != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
        }
        info!("WiFi: stack initialised (STA mode)");
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn stack_init() -> Result<()> {
        info!("WiFi(sim): stack init skipped");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<()> {
        use esp_idf_svc::sys::*;
        // SAFETY: config struct is zeroed then filled before use; the
        // driver copies it.
        unsafe {
            let mut wifi_cfg: wifi_config_t = core::mem::zeroed();
            let sta = &mut wifi_cfg.__bindgen_anon_1.sta;

            let ssid_bytes = self.ssid.as_bytes();
            let pw_bytes = self.password.as_bytes();
            sta.ssid[..ssid_bytes.len()].copy_from_slice(ssid_bytes);
            sta.password[..pw_bytes.len()].copy_from_slice(pw_bytes);
            sta.threshold.authmode = if self.password.is_empty() {
                wifi_auth_mode_t_WIFI_AUTH_OPEN
            } else {
                wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK
            };

            if esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut wifi_cfg) != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
            if esp_wifi_connect() != ESP_OK {
                return Err(Error::WifiDisconnected);
            }
        }
        info!("WiFi: STA connect initiated for '{}'", self.ssid);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<()> {
        self.sim_connect_counter = self.sim_connect_counter.wrapping_add(1);
        // Every 10th attempt fails, to exercise the backoff path.
        if self.sim_connect_counter % 10 == 3 {
            warn!("WiFi(sim): simulated failure (attempt {})", self.sim_connect_counter);
            return Err(Error::WifiDisconnected);
        }
        info!("WiFi(sim): connected to '{}'", self.ssid);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_is_connected(&self) -> bool {
        use esp_idf_svc::sys::*;
        // SAFETY: ap_info is a plain out-parameter.
        unsafe {
            let mut ap_info: wifi_ap_record_t = core::mem::zeroed();
            esp_wifi_sta_get_ap_info(&mut ap_info) == ESP_OK
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }
}

impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityPort for WifiAdapter {
    fn connect(&mut self) -> Result<()> {
        info!("WiFi: connecting to '{}'", self.ssid);
        match self.platform_connect() {
            Ok(()) => {
                self.state = WifiState::Connected;
                self.backoff_secs = 2;
                Ok(())
            }
            Err(e) => {
                error!("WiFi: connection failed ({e})");
                self.state = WifiState::Reconnecting { attempt: 0 };
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.platform_is_connected()
    }

    fn poll(&mut self) {
        match self.state {
            WifiState::Reconnecting { attempt } => {
                info!("WiFi: reconnect attempt {attempt} (backoff {}s)", self.backoff_secs);
                if self.platform_connect().is_ok() {
                    self.state = WifiState::Connected;
                    self.backoff_secs = 2;
                } else {
                    self.backoff_secs = (self.backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    self.state = WifiState::Reconnecting { attempt: attempt + 1 };
                }
            }
            WifiState::Connected => {
                if !self.platform_is_connected() {
                    warn!("WiFi: connection lost, entering reconnect");
                    self.state = WifiState::Reconnecting { attempt: 0 };
                }
            }
            WifiState::Disconnected => {
                self.state = WifiState::Reconnecting { attempt: 0 };
            }
        }
    }
}
