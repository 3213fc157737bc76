use serde_json::{Map, Value, json};

use crate::activity::RequestDescriptor;
use crate::config::DatasetPaths;
use crate::datasets::base_payload;
use crate::error::Result;
use crate::methods::{
    MethodSelection, QueueMethods, ensure_single_queue, resolve_default_method,
    resolve_queue_methods,
};
use crate::transport::{Transport, UploadFile};

pub const VALIDATE_ROUTE: &str = "/api/v1/workflows/validate";
pub const PRIORITIZE_ROUTE: &str = "/api/v1/workflows/prioritize";
pub const PRIORITIZE_RS_ROUTE: &str = "/api/v1/workflows/prioritize-rs";
pub const PRIORITIZE_GLOBAL_ROUTE: &str = "/api/v1/workflows/prioritize-global";
pub const COMPARE_ROUTE: &str = "/api/v1/workflows/compare";
pub const UPLOAD_IDEAS_ROUTE: &str = "/api/v1/reference-data/upload-ideas";

/// `{ideas_path, ra_weights_path, rs_weights_path, config_path?}`
pub fn validate_payload(ideas_path: &str, paths: &DatasetPaths, config_path: Option<&str>) -> Value {
    base_payload(
        [
            ("ideas_path", Value::from(ideas_path)),
            ("ra_weights_path", Value::from(paths.ra.as_str())),
            ("rs_weights_path", Value::from(paths.rs.as_str())),
        ],
        config_path,
    )
}

pub fn prioritize_payload(base: Value, output_dir: &str, methods: &QueueMethods) -> Value {
    let mut out = into_map(base);
    out.insert("output_dir".into(), Value::from(output_dir));
    if let Ok(Value::Object(m)) = serde_json::to_value(methods) {
        out.extend(m);
    }
    Value::Object(out)
}

pub fn compare_payload(base: Value, output_path: &str, top_n: Option<u64>) -> Value {
    let mut out = into_map(base);
    out.insert("output_path".into(), Value::from(output_path));
    out.insert("top_n".into(), top_n.map(Value::from).unwrap_or(Value::Null));
    Value::Object(out)
}

fn into_map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

/// Top-N as typed by the operator; zero, blank or unparseable means "no cutoff".
pub fn parse_top_n(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 1.0)
        .map(|n| n.trunc() as u64)
}

/// Form state behind the workflow actions.
#[derive(Debug, Clone)]
pub struct WorkflowForm {
    pub ideas_path_override: String,
    pub methods: MethodSelection,
    pub top_n: String,
    pub output_dir: String,
    pub output_rs: String,
    pub output_global: String,
    pub output_compare: String,
}

impl Default for WorkflowForm {
    fn default() -> Self {
        Self {
            ideas_path_override: String::new(),
            methods: MethodSelection::default(),
            top_n: "20".into(),
            output_dir: "data/output".into(),
            output_rs: "data/output/prioritization_rs.csv".into(),
            output_global: "data/output/demand.csv".into(),
            output_compare: "data/output/comparison.csv".into(),
        }
    }
}

impl WorkflowForm {
    pub fn effective_ideas_path(&self, paths: &DatasetPaths) -> String {
        let o = self.ideas_path_override.trim();
        if o.is_empty() {
            paths.ideas.clone()
        } else {
            o.to_string()
        }
    }

    fn base(&self, paths: &DatasetPaths, config_path: Option<&str>) -> Value {
        validate_payload(&self.effective_ideas_path(paths), paths, config_path)
    }

    pub fn validate_request(&self, paths: &DatasetPaths, config_path: Option<&str>) -> RequestDescriptor {
        RequestDescriptor::post(VALIDATE_ROUTE, self.base(paths, config_path))
    }

    pub fn prioritize_request(&self, paths: &DatasetPaths, config_path: Option<&str>) -> RequestDescriptor {
        RequestDescriptor::post(
            PRIORITIZE_ROUTE,
            prioritize_payload(
                self.base(paths, config_path),
                &self.output_dir,
                &resolve_queue_methods(&self.methods),
            ),
        )
    }

    pub fn prioritize_rs_request(
        &self,
        paths: &DatasetPaths,
        config_path: Option<&str>,
    ) -> Result<RequestDescriptor> {
        ensure_single_queue(&self.methods)?;
        Ok(RequestDescriptor::post(
            PRIORITIZE_RS_ROUTE,
            base_payload(
                [
                    ("ideas_path", Value::from(self.effective_ideas_path(paths))),
                    ("ra_weights_path", Value::from(paths.ra.as_str())),
                    ("output_path", Value::from(self.output_rs.as_str())),
                    ("method", Value::from(resolve_default_method(&self.methods))),
                ],
                config_path,
            ),
        ))
    }

    pub fn prioritize_global_request(
        &self,
        paths: &DatasetPaths,
        config_path: Option<&str>,
    ) -> Result<RequestDescriptor> {
        ensure_single_queue(&self.methods)?;
        Ok(RequestDescriptor::post(
            PRIORITIZE_GLOBAL_ROUTE,
            base_payload(
                [
                    ("rs_prioritized_path", Value::from(self.output_rs.as_str())),
                    ("rs_weights_path", Value::from(paths.rs.as_str())),
                    ("output_path", Value::from(self.output_global.as_str())),
                    ("method", Value::from(resolve_default_method(&self.methods))),
                ],
                config_path,
            ),
        ))
    }

    pub fn compare_request(&self, paths: &DatasetPaths, config_path: Option<&str>) -> RequestDescriptor {
        RequestDescriptor::post(
            COMPARE_ROUTE,
            compare_payload(
                self.base(paths, config_path),
                &self.output_compare,
                parse_top_n(&self.top_n),
            ),
        )
    }

    /// The stored server path of an uploaded ideas CSV becomes the override.
    pub fn apply_upload(&mut self, response: &Value) {
        if let Some(p) = response.get("path").and_then(Value::as_str) {
            self.ideas_path_override = p.to_string();
        }
    }
}

pub fn upload_descriptor(file: &UploadFile) -> RequestDescriptor {
    RequestDescriptor::post(
        UPLOAD_IDEAS_ROUTE,
        json!({ "filename": file.file_name, "size": file.bytes.len() }),
    )
}

pub fn upload_ideas(transport: &dyn Transport, file: &UploadFile) -> Result<Value> {
    tracing::info!(file = %file.file_name, size = file.bytes.len(), "uploading ideas file");
    transport.upload(UPLOAD_IDEAS_ROUTE, "file", file)
}
