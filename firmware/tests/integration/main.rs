//! Integration tests for the gateway core.
//!
//! Everything runs on the host against mock port implementations: the
//! full poll → compress → encrypt → upload → demux cycle, command
//! execution, config staging, and the FOTA engine.

mod mock_ports;

mod config_tests;
mod fota_tests;
mod upload_cycle_tests;
