//! Fuzz target: Modbus response validation and register decoding.
//!
//! Drives arbitrary byte sequences through the response path and asserts
//! that validation never panics and that anything it accepts really does
//! carry a matching CRC trailer.
//!
//! cargo fuzz run fuzz_modbus_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;

use ecowatt::modbus::{crc16, decode_registers, exception_code, is_exception, validate_response};

fuzz_target!(|data: &[u8]| {
    if validate_response(data).is_ok() {
        let body = &data[..data.len() - 2];
        let trailer = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        assert_eq!(crc16(body), trailer, "validated frame must carry a real CRC");
    }

    // Exception classification must never index out of bounds.
    if is_exception(data) {
        let _ = exception_code(data);
    }

    if let Ok(values) = decode_registers(data, 10) {
        assert!(values.len() <= 10, "decoder must honour max_count");
    }
});
