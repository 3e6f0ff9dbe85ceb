//! Mock port implementations for integration tests.
//!
//! `MockHttp` records every outbound request and replays scripted
//! responses per URL path, so tests can assert on the full wire history
//! without a network.

use std::collections::{HashMap, VecDeque};

use ecowatt::app::ports::{
    ConnectivityPort, FetchError, FirmwareFetch, HttpBody, HttpPort, HttpRequest, OtaError,
    OtaPort, StorageError, StoragePort, TimePort,
};
use ecowatt::codec::encode_hex;
use ecowatt::error::{Error, Result};
use ecowatt::modbus::append_crc;

// ── Storage ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    pub map: HashMap<String, Vec<u8>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(ns: &str, key: &str) -> String {
        format!("{ns}::{key}")
    }

    pub fn get(&self, ns: &str, key: &str) -> Option<&Vec<u8>> {
        self.map.get(&Self::key(ns, key))
    }
}

impl StoragePort for MockStorage {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> std::result::Result<usize, StorageError> {
        match self.map.get(&Self::key(ns, key)) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> std::result::Result<(), StorageError> {
        self.map.insert(Self::key(ns, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> std::result::Result<(), StorageError> {
        self.map.remove(&Self::key(ns, key));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.map.contains_key(&Self::key(ns, key))
    }
}

// ── Clock ─────────────────────────────────────────────────────

pub struct MockClock {
    pub now_ms: u64,
}

impl MockClock {
    pub fn new() -> Self {
        Self { now_ms: 0 }
    }
}

impl TimePort for MockClock {
    fn monotonic_ms(&self) -> u64 {
        self.now_ms
    }

    fn timestamp_iso8601(&self) -> String {
        "2026-08-02T10:00:00+05:30".into()
    }
}

// ── WiFi ──────────────────────────────────────────────────────

pub struct MockWifi {
    pub connected: bool,
}

impl ConnectivityPort for MockWifi {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) {
        self.connected = true;
    }
}

// ── HTTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub api_key: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub json: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct MockHttp {
    pub requests: Vec<RecordedRequest>,
    queues: HashMap<String, VecDeque<Result<String>>>,
    /// When set, `/api/inverter/read` synthesizes a valid read response
    /// from these register values; the closure sees the poll index.
    pub read_values: Option<Box<dyn FnMut(usize) -> Vec<u16>>>,
    reads_served: usize,
}

impl MockHttp {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            queues: HashMap::new(),
            read_values: None,
            reads_served: 0,
        }
    }

    /// Queue a response for the next request whose URL contains `path`.
    pub fn enqueue(&mut self, path: &str, response: Result<String>) {
        self.queues.entry(path.to_string()).or_default().push_back(response);
    }

    pub fn requests_to(&self, path: &str) -> Vec<&RecordedRequest> {
        self.requests.iter().filter(|r| r.url.contains(path)).collect()
    }

    /// A syntactically valid inverter read response for `values`.
    pub fn read_response_json(slave: u8, values: &[u16]) -> String {
        let mut frame = vec![slave, 0x03, (values.len() * 2) as u8];
        for v in values {
            frame.extend_from_slice(&v.to_be_bytes());
        }
        append_crc(&mut frame);
        format!(r#"{{"frame":"{}"}}"#, encode_hex(&frame))
    }

    /// A valid write-echo response for the given request frame fields.
    pub fn write_response_json(slave: u8, register: u16, value: u16) -> String {
        let mut frame = vec![slave, 0x06];
        frame.extend_from_slice(&register.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes());
        append_crc(&mut frame);
        format!(r#"{{"frame":"{}"}}"#, encode_hex(&frame))
    }
}

impl HttpPort for MockHttp {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<String> {
        let (body, json) = match request.body {
            HttpBody::Json(text) => (text.as_bytes().to_vec(), true),
            HttpBody::OctetStream(bytes) => (bytes.to_vec(), false),
        };
        self.requests.push(RecordedRequest {
            url: request.url.to_string(),
            api_key: request.api_key.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body,
            json,
        });

        for (path, queue) in self.queues.iter_mut() {
            if request.url.contains(path.as_str()) {
                if let Some(response) = queue.pop_front() {
                    return response;
                }
            }
        }

        if request.url.contains("/api/inverter/read") {
            if let Some(generate) = self.read_values.as_mut() {
                let values = generate(self.reads_served);
                self.reads_served += 1;
                return Ok(Self::read_response_json(0x11, &values));
            }
        }

        // Ancillary endpoints (config ack, command result, FOTA log)
        // acknowledge by default.
        if request.url.contains("/api/config_ack")
            || request.url.contains("/api/cloud/command_result")
            || request.url.contains("/api/fota/log")
        {
            return Ok(r#"{"status":"success"}"#.to_string());
        }

        Err(Error::HttpFailed)
    }
}

// ── Firmware fetch ────────────────────────────────────────────

pub struct MockFetch {
    pub image: Vec<u8>,
    /// Serve bytes up to this offset, then end the stream once — the
    /// engine must reconnect with a Range request to get the rest.
    pub drop_at: Option<usize>,
    dropped: bool,
    pos: usize,
    pub opens: Vec<u32>,
}

impl MockFetch {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            drop_at: None,
            dropped: false,
            pos: 0,
            opens: Vec::new(),
        }
    }
}

impl FirmwareFetch for MockFetch {
    fn open(&mut self, _url: &str, offset: u32) -> std::result::Result<(), FetchError> {
        self.opens.push(offset);
        self.pos = offset as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, FetchError> {
        let limit = if self.dropped {
            self.image.len()
        } else {
            self.drop_at.unwrap_or(self.image.len()).min(self.image.len())
        };
        let n = buf.len().min(limit.saturating_sub(self.pos));
        if n == 0 {
            if !self.dropped && self.pos < self.image.len() {
                self.dropped = true;
            }
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.image[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn close(&mut self) {}
}

// ── OTA ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockOta {
    pub written: Vec<u8>,
    pub begins: Vec<(u32, u32)>,
    pub committed: bool,
    pub aborted: bool,
    pub fail_write: bool,
}

impl MockOta {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtaPort for MockOta {
    fn begin(&mut self, image_size: u32, resume_offset: u32) -> std::result::Result<(), OtaError> {
        self.begins.push((image_size, resume_offset));
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> std::result::Result<(), OtaError> {
        if self.fail_write {
            return Err(OtaError::WriteFailed);
        }
        self.written.extend_from_slice(chunk);
        Ok(())
    }

    fn commit(&mut self) -> std::result::Result<(), OtaError> {
        self.committed = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

// ── Platform assembly ─────────────────────────────────────────

pub type TestPlatform =
    ecowatt::app::service::Platform<MockStorage, MockHttp, MockFetch, MockOta, MockClock, MockWifi>;

pub fn test_platform() -> TestPlatform {
    ecowatt::app::service::Platform {
        storage: MockStorage::new(),
        http: MockHttp::new(),
        fetch: MockFetch::new(Vec::new()),
        ota: MockOta::new(),
        clock: MockClock::new(),
        wifi: MockWifi { connected: true },
    }
}
