use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::transport::Transport;

pub const NO_REQUEST: &str = "No request yet.";
pub const NO_RESPONSE: &str = "No response yet.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// A request as shown to the operator: route plus JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub payload: Option<Value>,
}

impl RequestDescriptor {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            payload: None,
        }
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            payload: Some(payload),
        }
    }

    pub fn send(&self, transport: &dyn Transport) -> Result<Value> {
        match self.method {
            HttpMethod::Get => transport.get(&self.path),
            HttpMethod::Post => {
                let empty = json!({});
                transport.post(&self.path, self.payload.as_ref().unwrap_or(&empty))
            }
        }
    }

    pub fn render(&self) -> String {
        let v = match &self.payload {
            Some(p) => json!({ "path": self.path, "payload": p }),
            None => json!({ "path": self.path }),
        };
        pretty(&v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(Value),
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub request: Option<RequestDescriptor>,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Local>,
}

/// Single-slot record of the last request and its response or error.
#[derive(Debug, Default)]
pub struct ActivityLog {
    last: Option<ActivityEntry>,
}

impl ActivityLog {
    pub fn record(&mut self, request: Option<RequestDescriptor>, outcome: &Result<Value>) {
        let path = request.as_ref().map(|r| r.path.clone()).unwrap_or_default();
        let outcome = match outcome {
            Ok(v) => {
                tracing::info!(path = %path, "request succeeded");
                Outcome::Response(v.clone())
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "request failed");
                Outcome::Failure(e.to_string())
            }
        };
        self.last = Some(ActivityEntry {
            request,
            outcome,
            recorded_at: Local::now(),
        });
    }

    /// Records a local message (e.g. a guard rejection) with no request.
    pub fn record_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(message = %text, "action rejected");
        self.last = Some(ActivityEntry {
            request: None,
            outcome: Outcome::Failure(text),
            recorded_at: Local::now(),
        });
    }

    pub fn last(&self) -> Option<&ActivityEntry> {
        self.last.as_ref()
    }

    pub fn request_text(&self) -> String {
        self.last
            .as_ref()
            .and_then(|e| e.request.as_ref())
            .map(RequestDescriptor::render)
            .unwrap_or_else(|| NO_REQUEST.to_string())
    }

    pub fn response_text(&self) -> String {
        match self.last.as_ref().map(|e| &e.outcome) {
            Some(Outcome::Response(v)) => pretty(v),
            Some(Outcome::Failure(msg)) => msg.clone(),
            None => NO_RESPONSE.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.last.as_ref().map(|e| &e.outcome),
            Some(Outcome::Failure(_))
        )
    }
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
