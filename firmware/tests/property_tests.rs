//! Property-based tests for the codec and compression laws.

use proptest::prelude::*;

use ecowatt::buffer::RegisterReading;
use ecowatt::codec::{decode_base64, decode_hex, encode_base64, encode_hex};
use ecowatt::compress::{aggregate_avg, compress, decompress};
use ecowatt::config::READ_REGISTER_COUNT;
use ecowatt::modbus::{append_crc, crc16, validate_response};
use ecowatt::telemetry::build_envelope;

fn readings_strategy() -> impl Strategy<Value = Vec<RegisterReading>> {
    prop::collection::vec(
        prop::array::uniform10(any::<u16>()).prop_map(|values| RegisterReading { values }),
        1..100,
    )
}

proptest! {
    #[test]
    fn hex_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let hex = encode_hex(&bytes);
        prop_assert_eq!(decode_hex(&hex).unwrap(), bytes);
    }

    #[test]
    fn base64_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(decode_base64(&encode_base64(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn compression_round_trip(readings in readings_strategy()) {
        let (frame, metrics) = compress(&readings).unwrap();
        prop_assert_eq!(frame.len(), metrics.compressed_size);
        prop_assert_eq!(decompress(&frame).unwrap(), readings);
    }

    #[test]
    fn compressed_header_describes_the_frame(readings in readings_strategy()) {
        let (frame, _) = compress(&readings).unwrap();
        let count = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        let payload_len = u16::from_be_bytes([frame[3], frame[4]]) as usize;
        prop_assert_eq!(count, readings.len());
        prop_assert_eq!(frame[2] as usize, READ_REGISTER_COUNT);
        prop_assert_eq!(frame.len(), 5 + payload_len);
    }

    #[test]
    fn aggregation_never_overshoots_the_range(
        readings in readings_strategy(),
        window in 1usize..20,
    ) {
        let aggregated = aggregate_avg(&readings, window);
        prop_assert_eq!(aggregated.len(), readings.len().div_ceil(window));
        for (w, out) in aggregated.iter().enumerate() {
            let chunk = &readings[w * window..((w + 1) * window).min(readings.len())];
            for reg in 0..READ_REGISTER_COUNT {
                let lo = chunk.iter().map(|r| r.values[reg]).min().unwrap();
                let hi = chunk.iter().map(|r| r.values[reg]).max().unwrap();
                prop_assert!(out.values[reg] >= lo && out.values[reg] <= hi);
            }
        }
    }

    #[test]
    fn crc_trailer_law(bytes in prop::collection::vec(any::<u8>(), 3..64)) {
        let mut frame = bytes.clone();
        append_crc(&mut frame);
        let trailer = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
        prop_assert_eq!(crc16(&frame[..frame.len() - 2]), trailer);
        prop_assert!(validate_response(&frame).is_ok());
    }

    #[test]
    fn every_envelope_validates_its_own_crc(
        payload in prop::collection::vec(any::<u8>(), 5..128),
        aggregated in any::<bool>(),
    ) {
        let envelope = build_envelope(&payload, aggregated);
        prop_assert_eq!(envelope[0], u8::from(aggregated));
        let body = &envelope[..envelope.len() - 2];
        let trailer = u16::from_le_bytes([
            envelope[envelope.len() - 2],
            envelope[envelope.len() - 1],
        ]);
        prop_assert_eq!(crc16(body), trailer);
    }
}
