//! EcoWatt gateway firmware library.
//!
//! On-device core of the solar-inverter edge gateway: polls the inverter
//! over its Modbus-over-HTTP API, buffers and compresses register samples,
//! encrypts and authenticates the telemetry upload, applies cloud-issued
//! commands and configuration, and installs signed firmware updates.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod buffer;
pub mod cloud;
pub mod codec;
pub mod compress;
pub mod config;
pub mod config_manager;
pub mod crypto;
pub mod error;
pub mod fota;
pub mod modbus;
pub mod nonce;
pub mod power;
pub mod retry;
pub mod scheduler;
pub mod telemetry;

pub mod adapters;
