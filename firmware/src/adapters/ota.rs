//! OTA partition adapter — backed by the `esp-ota` crate on device.
//!
//! Implements [`OtaPort`] over the two-slot partition scheme. The crate
//! wraps `esp_ota_begin` / `esp_ota_write` / `esp_ota_end` and the boot
//! partition switch without any unsafe FFI here.
//!
//! The simulation backend accumulates writes in memory so host runs of
//! the full FOTA path stay observable.

use log::{info, warn};

use crate::app::ports::{OtaError, OtaPort};

pub struct OtaAdapter {
    #[cfg(target_os = "espidf")]
    update: Option<esp_ota::OtaUpdate>,
    #[cfg(not(target_os = "espidf"))]
    image: Vec<u8>,
    active: bool,
}

impl OtaAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            update: None,
            #[cfg(not(target_os = "espidf"))]
            image: Vec::new(),
            active: false,
        }
    }

    /// Bytes written so far (simulation only; used by host diagnostics).
    #[cfg(not(target_os = "espidf"))]
    pub fn written(&self) -> usize {
        self.image.len()
    }
}

impl Default for OtaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OtaPort for OtaAdapter {
    fn begin(&mut self, image_size: u32, resume_offset: u32) -> Result<(), OtaError> {
        if resume_offset > 0 {
            // The partition API writes sequentially; a resumed download
            // re-streams into a freshly opened slot from its offset.
            info!("OTA: opening slot for resume at {resume_offset}");
        }

        #[cfg(target_os = "espidf")]
        {
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("OTA: begin failed: {e:?}");
                OtaError::BeginFailed
            })?;
            self.update = Some(update);
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.image = Vec::with_capacity(image_size as usize);
        }

        self.active = true;
        info!("OTA: slot opened ({image_size} bytes expected)");
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), OtaError> {
        if !self.active {
            return Err(OtaError::WriteFailed);
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.update.as_mut() else {
                return Err(OtaError::WriteFailed);
            };
            update.write(chunk).map_err(|e| {
                warn!("OTA: write failed: {e:?}");
                OtaError::WriteFailed
            })
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.image.extend_from_slice(chunk);
            Ok(())
        }
    }

    fn commit(&mut self) -> Result<(), OtaError> {
        if !self.active {
            return Err(OtaError::EndFailed);
        }
        self.active = false;

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.update.take() else {
                return Err(OtaError::EndFailed);
            };
            let mut completed = update.finalize().map_err(|e| {
                warn!("OTA: finalize failed: {e:?}");
                OtaError::EndFailed
            })?;
            completed.set_as_boot_partition().map_err(|e| {
                warn!("OTA: set boot partition failed: {e:?}");
                OtaError::SetBootFailed
            })?;
        }

        info!("OTA: image committed as next boot target");
        Ok(())
    }

    fn abort(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // esp-ota aborts automatically when the handle drops.
            self.update.take();
        }
        #[cfg(not(target_os = "espidf"))]
        self.image.clear();
        self.active = false;
        warn!("OTA: aborted");
    }
}

/// Cancel the bootloader's rollback watchdog for the running image.
/// Without this, three failed boots revert to the previous firmware.
#[cfg(target_os = "espidf")]
pub fn mark_running_firmware_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {e:?}"),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn mark_running_firmware_valid() {
    info!("OTA(sim): rollback check skipped");
}

/// Restart into the (possibly new) boot partition.
#[cfg(target_os = "espidf")]
pub fn restart() -> ! {
    info!("OTA: rebooting");
    esp_ota::restart();
}

#[cfg(not(target_os = "espidf"))]
pub fn restart() -> ! {
    panic!("OTA reboot (simulation — no hardware reset)");
}
