use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

pub const HEADER_ROLE: &str = "X-Role";
pub const HEADER_API_KEY: &str = "X-API-Key";

pub const HEALTH_ROUTE: &str = "/api/v1/health";
pub const VERSION_ROUTE: &str = "/api/v1/version";

const UNKNOWN_ERROR: &str = "Unknown error";

/// Outbound calls to the demand backend.
///
/// Implementations hold no session state beyond the connection snapshot they
/// were built from.
pub trait Transport: Send + Sync {
    fn get(&self, path: &str) -> Result<Value>;
    fn post(&self, path: &str, body: &Value) -> Result<Value>;
    fn upload(&self, path: &str, field_name: &str, file: &UploadFile) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.csv")
            .to_string();
        Ok(Self { file_name, bytes })
    }

    fn mime(&self) -> &'static str {
        if self.file_name.to_ascii_lowercase().ends_with(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }
}

pub struct HttpTransport {
    config: Arc<ConnectionConfig>,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: Arc<ConnectionConfig>) -> Result<Self> {
        // No client-side deadline; the backend and the OS bound the wait.
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn with_headers(&self, req: RequestBuilder, json_body: bool) -> RequestBuilder {
        let mut req = req.header(HEADER_ROLE, self.config.role.as_str());
        if let Some(key) = self.config.api_key() {
            req = req.header(HEADER_API_KEY, key);
        }
        if json_body {
            req = req.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        req
    }

    fn send(&self, method: &str, path: &str, req: RequestBuilder) -> Result<Value> {
        tracing::debug!(method, path, role = %self.config.role, "sending request");
        let res = req.send()?;
        let status = res.status().as_u16();
        let text = res.text()?;
        tracing::debug!(method, path, status, bytes = text.len(), "response received");
        interpret_response(status, &text)
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str) -> Result<Value> {
        let req = self.with_headers(self.client.get(self.config.url(path)), true);
        self.send("GET", path, req)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::msg(format!("failed to encode request body: {e}")))?;
        let req = self
            .with_headers(self.client.post(self.config.url(path)), true)
            .body(body);
        self.send("POST", path, req)
    }

    fn upload(&self, path: &str, field_name: &str, file: &UploadFile) -> Result<Value> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(file.mime())?;
        let form = Form::new().part(field_name.to_string(), part);
        // multipart: the transport sets Content-Type with its boundary
        let req = self
            .with_headers(self.client.post(self.config.url(path)), false)
            .multipart(form);
        self.send("POST", path, req)
    }
}

/// Maps a raw HTTP status and body text to the uniform result shape.
pub fn interpret_response(status: u16, text: &str) -> Result<Value> {
    let parsed = if text.trim().is_empty() {
        Ok(json!({}))
    } else {
        serde_json::from_str::<Value>(text)
    };

    if !(200..300).contains(&status) {
        let detail = parsed
            .as_ref()
            .ok()
            .and_then(detail_of)
            .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        return Err(Error::remote(status, detail));
    }

    parsed.map_err(|e| Error::Decode(e.to_string()))
}

fn detail_of(payload: &Value) -> Option<String> {
    match payload.get("detail")? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Appends URL-encoded query parameters to `path`.
pub fn with_query(path: &str, params: &[(&str, &str)]) -> Result<String> {
    let mut url = scratch_url()?;
    url.query_pairs_mut().extend_pairs(params);
    match url.query() {
        Some(q) if !q.is_empty() => Ok(format!("{path}?{q}")),
        _ => Ok(path.to_string()),
    }
}

/// Percent-encodes a single path segment.
pub fn encode_segment(segment: &str) -> Result<String> {
    let mut url = scratch_url()?;
    url.path_segments_mut()
        .map_err(|_| Error::msg("failed to encode path segment"))?
        .clear()
        .push(segment);
    Ok(url.path().trim_start_matches('/').to_string())
}

fn scratch_url() -> Result<Url> {
    Url::parse("http://localhost/").map_err(|e| Error::msg(format!("url error: {e}")))
}

pub fn health(transport: &dyn Transport) -> Result<Value> {
    transport.get(HEALTH_ROUTE)
}

pub fn version(transport: &dyn Transport) -> Result<Value> {
    transport.get(VERSION_ROUTE)
}
