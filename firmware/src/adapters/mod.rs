//! Driven adapters: platform implementations of the port traits.
//!
//! Each adapter compiles two backends behind `cfg(target_os = "espidf")`:
//! the real ESP-IDF binding on device, and a simulation backend that keeps
//! the entire gateway logic runnable and testable on the host.

pub mod http;
pub mod nvs;
pub mod ota;
pub mod time;
pub mod watchdog;
pub mod wifi;
