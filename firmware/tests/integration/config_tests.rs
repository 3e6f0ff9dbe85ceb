//! Cloud configuration update flow: classification, ACK, staged
//! promotion after a successful upload.

use ecowatt::app::service::GatewayService;
use ecowatt::buffer::FullPolicy;
use ecowatt::config::READ_REGISTER_COUNT;
use ecowatt::config_manager::RuntimeConfig;

use crate::mock_ports::{test_platform, TestPlatform};

fn service_with_reads(platform: &mut TestPlatform) -> GatewayService {
    platform.http.read_values =
        Some(Box::new(|_| (1..=READ_REGISTER_COUNT as u16).map(|r| r * 100).collect()));
    let mut service = GatewayService::new(FullPolicy::Stop);
    service.init(&mut platform.storage, 0);
    service
}

fn run_one_cycle(service: &mut GatewayService, platform: &mut TestPlatform) {
    while platform.clock.now_ms < 15_000 {
        platform.clock.now_ms += 3_000;
        service.tick(platform);
    }
}

#[test]
fn partial_acceptance_acks_every_field_exactly_once() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    // sampling_interval 0 s is below the floor; upload_interval 15 s
    // matches the active value; "bogus" is not in the register table.
    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","config_update":{"sampling_interval":0,"upload_interval":15,"registers":["bogus"]}}"#.into()),
    );

    run_one_cycle(&mut service, &mut platform);

    let acks = platform.http.requests_to("/api/config_ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0].body_text(),
        r#"{"config_ack":{"accepted":[],"rejected":["sampling_interval","registers"],"unchanged":["upload_interval"]}}"#
    );

    // Nothing was accepted, so the active config is untouched.
    assert_eq!(service.config().snapshot().unwrap(), RuntimeConfig::default());
    assert!(!service.config().has_pending());
}

#[test]
fn accepted_update_promotes_after_ack_and_persists() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","config_update":{"sampling_interval":10,"slave_address":17}}"#.into()),
    );

    run_one_cycle(&mut service, &mut platform);

    let acks = platform.http.requests_to("/api/config_ack");
    assert_eq!(acks.len(), 1);
    // slave_address 17 == 0x11 is the active default.
    assert_eq!(
        acks[0].body_text(),
        r#"{"config_ack":{"accepted":["sampling_interval"],"rejected":[],"unchanged":["slave_address"]}}"#
    );

    let active = service.config().snapshot().unwrap();
    assert_eq!(active.sampling_interval_ms, 10_000);
    assert!(!service.config().has_pending());

    // Promotion persisted field-by-field.
    assert_eq!(
        platform.storage.get("device_config", "sampling_ms").unwrap(),
        &10_000u32.to_le_bytes()
    );
}

#[test]
fn config_without_update_section_sends_no_ack() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);
    platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));

    run_one_cycle(&mut service, &mut platform);

    assert!(platform.http.requests_to("/api/config_ack").is_empty());
}

#[test]
fn new_sampling_interval_drives_the_scheduler() {
    let mut platform = test_platform();
    let mut service = service_with_reads(&mut platform);

    platform.http.enqueue(
        "/api/cloud/write",
        Ok(r#"{"status":"success","config_update":{"sampling_interval":6}}"#.into()),
    );
    platform.http.enqueue("/api/cloud/write", Ok(r#"{"status":"success"}"#.into()));

    run_one_cycle(&mut service, &mut platform);
    let reads_before = platform.http.requests_to("/api/inverter/read").len();
    assert_eq!(reads_before, 5);

    // Second cycle at 6 s sampling: 15 s of ticks yields 2 reads, not 5.
    while platform.clock.now_ms < 30_000 {
        platform.clock.now_ms += 1_000;
        service.tick(&mut platform);
    }
    let reads_after = platform.http.requests_to("/api/inverter/read").len();
    assert_eq!(reads_after - reads_before, 2);
}
