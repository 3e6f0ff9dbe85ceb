//! Fuzz target: upload-ACK demultiplexer.
//!
//! The cloud response is attacker-reachable (it rides back on every
//! upload), so the parser and command extraction must survive arbitrary
//! bytes without panicking.
//!
//! cargo fuzz run fuzz_cloud_ack

#![no_main]

use libfuzzer_sys::fuzz_target;

use ecowatt::cloud::{extract_command, is_success, parse_upload_ack};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };

    if let Ok(ack) = parse_upload_ack(text) {
        let _ = is_success(&ack);
        if let Some(command) = &ack.command {
            // Extraction may reject, but must never panic.
            let _ = extract_command(command);
        }
        if let Some(manifest) = &ack.fota {
            let _ = manifest.signed_json();
        }
    }
});
