//! Build-time configuration for the EcoWatt gateway.
//!
//! Everything here is fixed at compile time: endpoints, credentials,
//! protocol constants, and the inverter register table. Runtime-tunable
//! values (intervals, slave address, active registers) live in
//! [`crate::config_manager`] and are merely *defaulted* from here.

// ── WiFi ──────────────────────────────────────────────────────

pub const WIFI_SSID: &str = "Wokwi-GUEST";
pub const WIFI_PASSWORD: &str = "";

// ── Inverter Modbus-over-HTTP API (downstream) ────────────────

pub const API_BASE_URL: &str = "http://20.15.114.131:8080";
pub const API_KEY: &str = "NjhhZWIwNDU1ZDdmMzg3MzNiMTQ5YWQzOjY4YWViMDQ1NWQ3ZjM4NzMzYjE0OWFjOQ==";

// ── Cloud upload API (upstream) ───────────────────────────────

pub const UPLOAD_API_BASE_URL: &str = "https://eco-watt-cloud.vercel.app";
pub const UPLOAD_API_KEY: &str = "ColdPlay2025";
pub const UPLOAD_PSK: &str = "ColdPlay@EcoWatt2025";
pub const NTP_SERVER: &str = "pool.ntp.org";

// ── HTTP / retry ──────────────────────────────────────────────

pub const HTTP_TIMEOUT_MS: u32 = 10_000;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 8_000;

// ── Timing ────────────────────────────────────────────────────

pub const POLL_INTERVAL_MS: u32 = 3_000;
pub const UPLOAD_INTERVAL_MS: u32 = 15_000;
pub const WRITE_INTERVAL_MS: u32 = UPLOAD_INTERVAL_MS / 2;
pub const COMMAND_INTERVAL_MS: u32 = UPLOAD_INTERVAL_MS;
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
pub const WATCHDOG_TIMEOUT_S: u32 = 30;

/// Consecutive-error counter resets once the last error is this old.
pub const ERROR_DECAY_MS: u64 = 300_000;

// ── Power management ──────────────────────────────────────────

/// Spend idle slack between tasks asleep instead of spinning.
pub const POWER_MANAGEMENT: bool = true;
/// Use timed light sleep (radio down, WiFi re-associated on wake) rather
/// than a plain idle delay.
pub const LIGHT_SLEEP: bool = false;

// ── Modbus ────────────────────────────────────────────────────

pub const SLAVE_ADDRESS: u8 = 0x11;
pub const FUNCTION_CODE_READ: u8 = 0x03;
pub const FUNCTION_CODE_WRITE: u8 = 0x06;
pub const MAX_REGISTERS: usize = 10;
pub const READ_REGISTER_COUNT: usize = 10;
pub const EXPORT_POWER_REGISTER: u16 = 8;
pub const MIN_EXPORT_POWER: u16 = 0;
pub const MAX_EXPORT_POWER: u16 = 100;

// ── Sample buffer ─────────────────────────────────────────────

pub const BUFFER_MIN_CAPACITY: usize = 5;
pub const BUFFER_MAX_CAPACITY: usize = 100;
/// Extra headroom on top of `upload_interval / sampling_interval`.
pub const BUFFER_CAPACITY_MARGIN: usize = 2;

// ── Compression ───────────────────────────────────────────────

pub const MAX_COMPRESSION_SIZE: usize = BUFFER_MAX_CAPACITY * 3 * READ_REGISTER_COUNT + 5;
pub const MAX_COMPRESSION_RETRIES: u32 = 3;
/// Compressed payloads above this switch to the aggregation fallback.
pub const MAX_PAYLOAD_SIZE: usize = 200;
/// Samples averaged into one reading when aggregating.
pub const AGG_WINDOW: usize = 10;

// ── FOTA ──────────────────────────────────────────────────────

pub const FIRMWARE_VERSION: &str = "1.1.0";
/// Firmware is streamed in chunks of this size.
pub const FOTA_CHUNK_SIZE: usize = 4096;
/// Download offset is persisted every this many bytes.
pub const FOTA_PERSIST_EVERY: u32 = 100 * 1024;

// ── Register table ────────────────────────────────────────────

/// Inverter register map: cloud-facing name, Modbus address, display gain
/// and unit. Only names in this table are accepted in a `config_update`.
pub struct RegisterInfo {
    pub name: &'static str,
    pub address: u16,
    pub gain: f32,
    pub unit: &'static str,
}

#[rustfmt::skip]
pub const REGISTER_TABLE: [RegisterInfo; MAX_REGISTERS] = [
    RegisterInfo { name: "phase_voltage",           address: 0x0000, gain: 10.0,  unit: "V" },
    RegisterInfo { name: "phase_current",           address: 0x0001, gain: 10.0,  unit: "A" },
    RegisterInfo { name: "phase_frequency",         address: 0x0002, gain: 100.0, unit: "Hz" },
    RegisterInfo { name: "pv1_voltage",             address: 0x0003, gain: 10.0,  unit: "V" },
    RegisterInfo { name: "pv2_voltage",             address: 0x0004, gain: 10.0,  unit: "V" },
    RegisterInfo { name: "pv1_current",             address: 0x0005, gain: 10.0,  unit: "A" },
    RegisterInfo { name: "pv2_current",             address: 0x0006, gain: 10.0,  unit: "A" },
    RegisterInfo { name: "inverter_temperature",    address: 0x0007, gain: 10.0,  unit: "°C" },
    RegisterInfo { name: "export_power_percentage", address: 0x0008, gain: 1.0,   unit: "%" },
    RegisterInfo { name: "output_power",            address: 0x0009, gain: 1.0,   unit: "W" },
];

/// Resolve a cloud-facing register name to its Modbus address.
pub fn register_address(name: &str) -> Option<u16> {
    REGISTER_TABLE
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.address)
}

/// Display metadata for a register address, if it is in the table.
pub fn register_info(address: u16) -> Option<&'static RegisterInfo> {
    REGISTER_TABLE.iter().find(|r| r.address == address)
}

// ── Embedded key material ─────────────────────────────────────

/// ECDSA P-256 public key used to verify FOTA manifest signatures.
pub const FIRMWARE_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEIn8Ze+wsLb6boVAkc90OoCB8/V6o
ri0gie2m8fqXcReMD2T2K0XmbV26lPGiIlathUmiDGxnEsDRBzEOnyL4fw==
-----END PUBLIC KEY-----";

/// Pinned root CA for the firmware download TLS connection.
pub const ROOT_CA_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIFBTCCAu2gAwIBAgIQWgDyEtjUtIDzkkFX6imDBTANBgkqhkiG9w0BAQsFADBP
MQswCQYDVQQGEwJVUzEpMCcGA1UEChMgSW50ZXJuZXQgU2VjdXJpdHkgUmVzZWFy
Y2ggR3JvdXAxFTATBgNVBAMTDElTUkcgUm9vdCBYMTAeFw0yNDAzMTMwMDAwMDBa
Fw0yNzAzMTIyMzU5NTlaMDMxCzAJBgNVBAYTAlVTMRYwFAYDVQQKEw1MZXQncyBF
bmNyeXB0MQwwCgYDVQQDEwNSMTMwggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEK
AoIBAQClZ3CN0FaBZBUXYc25BtStGZCMJlA3mBZjklTb2cyEBZPs0+wIG6BgUUNI
fSvHSJaetC3ancgnO1ehn6vw1g7UDjDKb5ux0daknTI+WE41b0VYaHEX/D7YXYKg
L7JRbLAaXbhZzjVlyIuhrxA3/+OcXcJJFzT/jCuLjfC8cSyTDB0FxLrHzarJXnzR
yQH3nAP2/Apd9Np75tt2QnDr9E0i2gB3b9bJXxf92nUupVcM9upctuBzpWjPoXTi
dYJ+EJ/B9aLrAek4sQpEzNPCifVJNYIKNLMc6YjCR06CDgo28EdPivEpBHXazeGa
XP9enZiVuppD0EqiFwUBBDDTMrOPAgMBAAGjgfgwgfUwDgYDVR0PAQH/BAQDAgGG
MB0GA1UdJQQWMBQGCCsGAQUFBwMCBggrBgEFBQcDATASBgNVHRMBAf8ECDAGAQH/
AgEAMB0GA1UdDgQWBBTnq58PLDOgU9NeT3jIsoQOO9aSMzAfBgNVHSMEGDAWgBR5
tFnme7bl5AFzgAiIyBpY9umbbjAyBggrBgEFBQcBAQQmMCQwIgYIKwYBBQUHMAKG
Fmh0dHA6Ly94MS5pLmxlbmNyLm9yZy8wEwYDVR0gBAwwCjAIBgZngQwBAgEwJwYD
VR0fBCAwHjAcoBqgGIYWaHR0cDovL3gxLmMubGVuY3Iub3JnLzANBgkqhkiG9w0B
AQsFAAOCAgEAUTdYUqEimzW7TbrOypLqCfL7VOwYf/Q79OH5cHLCZeggfQhDconl
k7Kgh8b0vi+/XuWu7CN8n/UPeg1vo3G+taXirrytthQinAHGwc/UdbOygJa9zuBc
VyqoH3CXTXDInT+8a+c3aEVMJ2St+pSn4ed+WkDp8ijsijvEyFwE47hulW0Ltzjg
9fOV5Pmrg/zxWbRuL+k0DBDHEJennCsAen7c35Pmx7jpmJ/HtgRhcnz0yjSBvyIw
6L1QIupkCv2SBODT/xDD3gfQQyKv6roV4G2EhfEyAsWpmojxjCUCGiyg97FvDtm/
NK2LSc9lybKxB73I2+P2G3CaWpvvpAiHCVu30jW8GCxKdfhsXtnIy2imskQqVZ2m
0Pmxobb28Tucr7xBK7CtwvPrb79os7u2XP3O5f9b/H66GNyRrglRXlrYjI1oGYL/
f4I1n/Sgusda6WvA6C190kxjU15Y12mHU4+BxyR9cx2hhGS9fAjMZKJss28qxvz6
Axu4CaDmRNZpK/pQrXF17yXCXkmEWgvSOEZy6Z9pcbLIVEGckV/iVeq0AOo2pkg9
p4QRIy0tK2diRENLSF2KysFwbY6B26BFeFs3v1sYVRhFW9nLkOrQVporCS0KyZmf
wVD89qSTlnctLcZnIavjKsKUu1nA1iU0yYMdYepKR7lWbnwhdx3ewok=
-----END CERTIFICATE-----";
