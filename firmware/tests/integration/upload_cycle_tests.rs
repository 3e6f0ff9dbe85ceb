//! End-to-end upload cycle tests: poll → buffer → compress → encrypt →
//! POST → demux → clear.

use ecowatt::app::service::GatewayService;
use ecowatt::buffer::{FullPolicy, RegisterReading};
use ecowatt::codec::encode_base64;
use ecowatt::compress::decompress;
use ecowatt::config::{READ_REGISTER_COUNT, UPLOAD_PSK};
use ecowatt::crypto::{decrypt_aes256_cbc, derive_upload_key, hmac_sha256_hex};
use ecowatt::error::Error;
use ecowatt::modbus::crc16;

use crate::mock_ports::{test_platform, MockHttp, TestPlatform};

/// Decrypt a recorded upload body back into the plain envelope.
fn recover_envelope(body: &[u8]) -> Vec<u8> {
    assert!(body.len() > 16, "body must carry IV + ciphertext");
    let (iv, ciphertext) = body.split_at(16);
    assert_eq!(ciphertext.len() % 16, 0, "ciphertext must be block-aligned");
    let key = derive_upload_key(UPLOAD_PSK);
    decrypt_aes256_cbc(&key, iv.try_into().unwrap(), ciphertext).expect("decrypt")
}

/// Split a recovered envelope into (method_flag, compressed_frame),
/// verifying the CRC trailer on the way.
fn split_envelope(envelope: &[u8]) -> (u8, Vec<u8>) {
    let body = &envelope[..envelope.len() - 2];
    let crc = crc16(body);
    assert_eq!(envelope[envelope.len() - 2], (crc & 0xFF) as u8);
    assert_eq!(envelope[envelope.len() - 1], (crc >> 8) as u8);
    (envelope[0], body[1..].to_vec())
}

fn service_with_reads(platform: &mut TestPlatform) -> GatewayService {
    platform.http.read_values =
        Some(Box::new(|i| (1..=READ_REGISTER_COUNT as u16).map(|r| (i as u16 + 1) * r).collect()));
    let mut service = GatewayService::new(FullPolicy::Stop);
    service.init(&mut platform.storage, 0);
    service
}

/// Drive the service through `t` in steps of the sampling interval.
fn run_until(service: &mut GatewayService, platform: &mut TestPlatform, until_ms: u64, step_ms: u64) {
    while platform.clock.now_ms < until_ms {
        platform.clock.now_ms += step_ms;
        service.tick(platform);
    }
}

#[test]
fn happy_path_upload_cycle() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);
    platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));

    run_until(&mut service, &mut platform, 15_000, 3_000);

    // Five reads buffered, then the upload cleared them.
    assert_eq!(platform.http.requests_to("/api/inverter/read").len(), 5);
    assert_eq!(service.buffer().count(), 0);
    assert!(!service.buffer().is_locked());

    // Nonce 0 was sent; 1 is persisted.
    assert_eq!(platform.storage.get("auth", "nonce").unwrap(), b"1");

    let uploads = platform.http.requests_to("/api/cloud/write");
    assert_eq!(uploads.len(), 1);
    let upload = uploads[0];
    assert_eq!(upload.api_key, "ColdPlay2025");
    assert!(!upload.json, "telemetry body is raw octets");
    assert_eq!(upload.header("X-Nonce"), Some("0"));

    // The MAC covers the Base64 of the raw body.
    let expected_mac = hmac_sha256_hex(UPLOAD_PSK.as_bytes(), encode_base64(&upload.body).as_bytes());
    assert_eq!(upload.header("X-MAC"), Some(expected_mac.as_str()));

    // Decrypt and verify the envelope end to end.
    let envelope = recover_envelope(&upload.body);
    let (flag, frame) = split_envelope(&envelope);
    assert_eq!(flag, 0x00, "raw compression marker");
    assert_eq!(&frame[..3], &[0x00, 0x05, 0x0A], "5 samples, 10 registers");

    let readings = decompress(&frame).unwrap();
    let expected: Vec<RegisterReading> = (0..5)
        .map(|i| {
            let mut values = [0u16; READ_REGISTER_COUNT];
            for (r, v) in values.iter_mut().enumerate() {
                *v = (i as u16 + 1) * (r as u16 + 1);
            }
            RegisterReading { values }
        })
        .collect();
    assert_eq!(readings, expected);
}

#[test]
fn nonces_increase_across_cycles() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);
    for _ in 0..3 {
        platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));
    }

    run_until(&mut service, &mut platform, 45_000, 3_000);

    let uploads = platform.http.requests_to("/api/cloud/write");
    assert_eq!(uploads.len(), 3);
    let nonces: Vec<&str> = uploads.iter().map(|u| u.header("X-Nonce").unwrap()).collect();
    assert_eq!(nonces, vec!["0", "1", "2"]);
    assert_eq!(platform.storage.get("auth", "nonce").unwrap(), b"3");

    // Fresh IVs mean the bodies differ even for similar frames.
    assert_ne!(uploads[0].body, uploads[1].body);
}

#[test]
fn embedded_write_command_executes_in_cycle_and_reports_next() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","command":{"action":"write_register","target_register":"8","value":50}}"#.into()),
    );
    platform
        .http
        .enqueue("/api/inverter/write", Ok(MockHttp::write_response_json(0x11, 8, 50)));

    run_until(&mut service, &mut platform, 15_000, 3_000);

    // The write went out within the same upload cycle.
    let writes = platform.http.requests_to("/api/inverter/write");
    assert_eq!(writes.len(), 1);
    let body = writes[0].body_text();
    assert!(writes[0].json);
    assert!(
        body.starts_with(r#"{"frame":"110600080032"#),
        "unexpected write frame: {body}"
    );
    assert!(service.has_pending_report());

    // The result goes out on the next CommandResult tick.
    platform.clock.now_ms += 100;
    service.tick(&mut platform);

    let results = platform.http.requests_to("/api/cloud/command_result");
    assert_eq!(results.len(), 1);
    let result = results[0].body_text();
    assert!(result.contains(r#""status":"success""#));
    assert!(result.contains(r#""executed_at":"2026-08-02T10:00:00+05:30""#));
    assert!(!service.has_pending_report());
}

#[test]
fn rejected_write_value_reports_failure() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    // Export power register only takes 0..=100.
    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","command":{"action":"write_register","target_register":"8","value":250}}"#.into()),
    );

    run_until(&mut service, &mut platform, 15_000, 3_000);

    // No Modbus frame was sent for an invalid value.
    assert!(platform.http.requests_to("/api/inverter/write").is_empty());

    platform.clock.now_ms += 100;
    service.tick(&mut platform);
    let results = platform.http.requests_to("/api/cloud/command_result");
    assert_eq!(results.len(), 1);
    let body = results[0].body_text();
    assert!(body.contains(r#""status":"failed""#));
    assert!(body.contains(r#""error_code":"INVALID_VALUE""#));
}

#[test]
fn failed_upload_keeps_samples_and_backs_off() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    // Exhaust the transport retries on the first cycle.
    for _ in 0..4 {
        platform.http.enqueue("/api/cloud/write", Err(Error::HttpTimeout));
    }

    run_until(&mut service, &mut platform, 15_000, 3_000);

    // Samples survive the failed upload and the lock is released.
    assert_eq!(service.buffer().count(), 5);
    assert!(!service.buffer().is_locked());
    let attempts_after_failure = platform.http.requests_to("/api/cloud/write").len();
    assert_eq!(attempts_after_failure, 4);

    // Inside the backoff window the next upload tick does not POST.
    platform.clock.now_ms += 500;
    service.tick(&mut platform);
    assert_eq!(platform.http.requests_to("/api/cloud/write").len(), attempts_after_failure);

    // Past the window, the retry succeeds and clears the buffer.
    platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));
    run_until(&mut service, &mut platform, 30_500, 3_000);
    assert_eq!(service.buffer().count(), 0);
}

#[test]
fn non_success_ack_does_not_clear_buffer() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);
    platform
        .http
        .enqueue("/api/cloud/write", Ok(r#"{"error":"MAC mismatch"}"#.into()));

    run_until(&mut service, &mut platform, 15_000, 3_000);

    assert_eq!(service.buffer().count(), 5);
    assert!(!service.buffer().is_locked());
}

#[test]
fn aggregation_kicks_in_when_frame_exceeds_payload_limit() {
    let mut platform = test_platform();

    // 1 s sampling with 60 s upload: the raw delta stream for 60 varying
    // samples far exceeds the payload limit, forcing aggregation.
    platform.http.read_values =
        Some(Box::new(|i| (1..=READ_REGISTER_COUNT as u16).map(|r| (i as u16 + 1) * r).collect()));
    let mut service = GatewayService::new(FullPolicy::Stop);
    service.init(&mut platform.storage, 0);

    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","config_update":{"sampling_interval":1,"upload_interval":60}}"#.into()),
    );
    platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));

    // First cycle on default timing delivers and promotes the new config.
    run_until(&mut service, &mut platform, 15_000, 3_000);
    let active = service.config().snapshot().unwrap();
    assert_eq!(active.sampling_interval_ms, 1_000);
    assert_eq!(active.upload_interval_ms, 60_000);

    // Second cycle: 60 samples at 1 Hz, uploaded aggregated.
    run_until(&mut service, &mut platform, 75_000, 1_000);

    let uploads = platform.http.requests_to("/api/cloud/write");
    assert_eq!(uploads.len(), 2);
    let envelope = recover_envelope(&uploads[1].body);
    let (flag, frame) = split_envelope(&envelope);
    assert_eq!(flag, 0x01, "aggregated marker byte");

    let readings = decompress(&frame).unwrap();
    assert_eq!(readings.len(), 6, "60 samples in windows of 10");
    // Each aggregated register is the truncating mean of its window. The
    // second cycle's polls continue at index 5, so window 0 covers poll
    // indices 5..15 with register r reading (i+1)*r.
    let first_window_mean = |r: u32| -> u16 {
        let sum: u32 = (5..15).map(|i| (i + 1) * r).sum();
        (sum / 10) as u16
    };
    for r in 1..=READ_REGISTER_COUNT as u32 {
        assert_eq!(readings[0].values[(r - 1) as usize], first_window_mean(r));
    }
}
