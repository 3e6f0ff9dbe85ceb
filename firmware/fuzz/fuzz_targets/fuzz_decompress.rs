//! Fuzz target: Delta+RLE decompressor.
//!
//! The decompressor only ever sees frames the device produced itself, but
//! it is also the round-trip verifier, so it must reject malformed input
//! cleanly and re-compress anything it accepts to the same reading set.
//!
//! cargo fuzz run fuzz_decompress

#![no_main]

use libfuzzer_sys::fuzz_target;

use ecowatt::compress::{compress, decompress};

fuzz_target!(|data: &[u8]| {
    if let Ok(readings) = decompress(data) {
        // Accepted frames round-trip through our own compressor, unless
        // the canonical re-encoding exceeds the on-device size cap.
        if let Ok((frame, _)) = compress(&readings) {
            let again = decompress(&frame).expect("round trip");
            assert_eq!(again, readings);
        }
    }
});
