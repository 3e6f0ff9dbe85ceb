//! HTTP client adapters.
//!
//! [`HttpClientAdapter`] implements [`HttpPort`] for the two JSON/octet
//! APIs; [`FirmwareDownloader`] implements [`FirmwareFetch`] for the
//! ranged, TLS-pinned firmware GET.
//!
//! On ESP-IDF both wrap the `esp_http_client` C API directly; clients are
//! created per request and torn down on every exit path. On the host they
//! are inert stubs — integration tests inject their own mock ports.

use log::warn;

use crate::app::ports::{FetchError, FirmwareFetch, HttpPort, HttpRequest};
use crate::error::{Error, Result};

#[cfg(target_os = "espidf")]
use {
    crate::app::ports::HttpBody,
    crate::app::ports::HttpMethod,
    crate::config::{HTTP_TIMEOUT_MS, ROOT_CA_PEM},
    esp_idf_svc::sys::*,
    std::ffi::CString,
};

// ───────────────────────────────────────────────────────────────
// Request/response client
// ───────────────────────────────────────────────────────────────

pub struct HttpClientAdapter;

impl HttpClientAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl HttpPort for HttpClientAdapter {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<String> {
        let url = CString::new(request.url).map_err(|_| Error::HttpFailed)?;
        let config = esp_http_client_config_t {
            url: url.as_ptr(),
            timeout_ms: HTTP_TIMEOUT_MS as i32,
            ..Default::default()
        };

        // SAFETY: the handle is created and destroyed within this call;
        // every CString outlives its use by the client.
        unsafe {
            let handle = esp_http_client_init(&config);
            if handle.is_null() {
                return Err(Error::HttpFailed);
            }
            let guard = ClientGuard(handle);

            let method = match request.method {
                HttpMethod::Post => esp_http_client_method_t_HTTP_METHOD_POST,
                HttpMethod::Get => esp_http_client_method_t_HTTP_METHOD_GET,
            };
            esp_http_client_set_method(handle, method);

            let content_type = match request.body {
                HttpBody::Json(_) => "application/json",
                HttpBody::OctetStream(_) => "application/octet-stream",
            };
            set_header(handle, "Content-Type", content_type)?;
            set_header(handle, "Authorization", request.api_key)?;
            for (name, value) in request.headers {
                set_header(handle, name, value)?;
            }

            let body: &[u8] = match request.body {
                HttpBody::Json(text) => text.as_bytes(),
                HttpBody::OctetStream(bytes) => bytes,
            };

            if esp_http_client_open(handle, body.len() as i32) != ESP_OK {
                return Err(Error::HttpTimeout);
            }
            let written =
                esp_http_client_write(handle, body.as_ptr() as *const _, body.len() as i32);
            if written < body.len() as i32 {
                return Err(Error::HttpFailed);
            }

            if esp_http_client_fetch_headers(handle) < 0 {
                return Err(Error::HttpTimeout);
            }
            let status = esp_http_client_get_status_code(handle);

            let mut response = Vec::new();
            let mut chunk = [0u8; 512];
            loop {
                let n = esp_http_client_read(handle, chunk.as_mut_ptr() as *mut _, chunk.len() as i32);
                if n < 0 {
                    return Err(Error::HttpTimeout);
                }
                if n == 0 {
                    break;
                }
                response.extend_from_slice(&chunk[..n as usize]);
            }
            drop(guard);

            if !(200..300).contains(&status) {
                warn!("HTTP: status {status} from {}", request.url);
                return Err(Error::HttpFailed);
            }
            if response.is_empty() {
                // Empty 2xx bodies are mapped to an error immediately; the
                // caller's contract has no empty-success case.
                return Err(Error::InvalidResponse);
            }
            String::from_utf8(response).map_err(|_| Error::InvalidResponse)
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl HttpPort for HttpClientAdapter {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<String> {
        warn!("HTTP(sim): no transport for {}", request.url);
        Err(Error::HttpFailed)
    }
}

#[cfg(target_os = "espidf")]
fn set_header(handle: esp_http_client_handle_t, name: &str, value: &str) -> Result<()> {
    let name = CString::new(name).map_err(|_| Error::HttpFailed)?;
    let value = CString::new(value).map_err(|_| Error::HttpFailed)?;
    // SAFETY: the client copies header strings internally.
    let ret = unsafe { esp_http_client_set_header(handle, name.as_ptr(), value.as_ptr()) };
    if ret != ESP_OK {
        return Err(Error::HttpFailed);
    }
    Ok(())
}

/// Releases the client on every exit path, including the error ones.
#[cfg(target_os = "espidf")]
struct ClientGuard(esp_http_client_handle_t);

#[cfg(target_os = "espidf")]
impl Drop for ClientGuard {
    fn drop(&mut self) {
        // SAFETY: the handle is valid until cleanup and used from one task.
        unsafe {
            esp_http_client_close(self.0);
            esp_http_client_cleanup(self.0);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Firmware downloader (TLS + pinned CA + Range)
// ───────────────────────────────────────────────────────────────

pub struct FirmwareDownloader {
    #[cfg(target_os = "espidf")]
    handle: Option<esp_http_client_handle_t>,
    #[cfg(target_os = "espidf")]
    url: Option<CString>,
}

impl FirmwareDownloader {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            handle: None,
            #[cfg(target_os = "espidf")]
            url: None,
        }
    }
}

impl Default for FirmwareDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareFetch for FirmwareDownloader {
    fn open(&mut self, url: &str, offset: u32) -> core::result::Result<(), FetchError> {
        self.close();

        let url_c = CString::new(url).map_err(|_| FetchError::ConnectFailed)?;
        let config = esp_http_client_config_t {
            url: url_c.as_ptr(),
            cert_pem: ROOT_CA_PEM.as_ptr() as *const _,
            cert_len: ROOT_CA_PEM.len() + 1,
            timeout_ms: HTTP_TIMEOUT_MS as i32,
            ..Default::default()
        };

        // SAFETY: url_c is stored in self and outlives the handle.
        unsafe {
            let handle = esp_http_client_init(&config);
            if handle.is_null() {
                return Err(FetchError::ConnectFailed);
            }

            let range = CString::new(format!("bytes={offset}-")).unwrap();
            let range_name = CString::new("Range").unwrap();
            esp_http_client_set_header(handle, range_name.as_ptr(), range.as_ptr());

            if esp_http_client_open(handle, 0) != ESP_OK {
                esp_http_client_cleanup(handle);
                return Err(FetchError::ConnectFailed);
            }
            if esp_http_client_fetch_headers(handle) < 0 {
                esp_http_client_close(handle);
                esp_http_client_cleanup(handle);
                return Err(FetchError::Interrupted);
            }
            let status = esp_http_client_get_status_code(handle);
            if status != 200 && status != 206 {
                esp_http_client_close(handle);
                esp_http_client_cleanup(handle);
                return Err(FetchError::HttpStatus(status as u16));
            }

            self.handle = Some(handle);
            self.url = Some(url_c);
            Ok(())
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, FetchError> {
        let Some(handle) = self.handle else {
            return Err(FetchError::Interrupted);
        };
        // SAFETY: handle is open; buf is exclusively owned.
        let n = unsafe {
            esp_http_client_read(handle, buf.as_mut_ptr() as *mut _, buf.len() as i32)
        };
        if n < 0 {
            return Err(FetchError::Interrupted);
        }
        Ok(n as usize)
    }

    fn close(&mut self) {
        #[cfg(target_os = "espidf")]
        if let Some(handle) = self.handle.take() {
            // SAFETY: the handle came from esp_http_client_init.
            unsafe {
                esp_http_client_close(handle);
                esp_http_client_cleanup(handle);
            }
        }
        self.url = None;
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwareFetch for FirmwareDownloader {
    fn open(&mut self, url: &str, _offset: u32) -> core::result::Result<(), FetchError> {
        warn!("FOTA(sim): no transport for {url}");
        Err(FetchError::ConnectFailed)
    }

    fn read(&mut self, _buf: &mut [u8]) -> core::result::Result<usize, FetchError> {
        Err(FetchError::Interrupted)
    }

    fn close(&mut self) {}
}
