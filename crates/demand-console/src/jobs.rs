use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::activity::RequestDescriptor;
use crate::config::DatasetPaths;
use crate::error::{Error, Result};
use crate::methods::{MethodSelection, resolve_queue_methods};
use crate::transport::{Transport, encode_segment, with_query};
use crate::workflows::{compare_payload, prioritize_payload, validate_payload};

pub const JOBS_ROUTE: &str = "/api/v1/jobs";
pub const DEFAULT_LIST_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobKind {
    Validate,
    Prioritize,
    Compare,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Validate => "validate",
            JobKind::Prioritize => "prioritize",
            JobKind::Compare => "compare",
        }
    }

    pub fn route(self) -> String {
        format!("{JOBS_ROUTE}/workflows/{}", self.as_str())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed lifecycle of the active job. Transitions are driven only by
/// operator actions; terminality belongs to the remote job store.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum JobState {
    #[default]
    Idle,
    Submitted {
        job_id: String,
    },
    Polled {
        job_id: String,
        status: Value,
    },
}

impl JobState {
    pub fn on_submitted(self, job_id: impl Into<String>) -> JobState {
        JobState::Submitted {
            job_id: job_id.into(),
        }
    }

    pub fn on_polled(self, job_id: impl Into<String>, status: Value) -> JobState {
        JobState::Polled {
            job_id: job_id.into(),
            status,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobState::Idle => None,
            JobState::Submitted { job_id } | JobState::Polled { job_id, .. } => Some(job_id),
        }
    }

    pub fn status(&self) -> Option<&Value> {
        match self {
            JobState::Polled { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Submitted { .. } => "submitted",
            JobState::Polled { .. } => "polled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub kind: JobKind,
    pub last_known_status: Option<Value>,
    pub submitted_seq: u64,
}

/// Tolerant view of a job payload for display; the raw JSON stays authoritative.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobSummary {
    pub job_id: String,
    pub job_type: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobSummary {
    pub fn from_value(v: &Value) -> JobSummary {
        let mut v = v.clone();
        if let Some(obj) = v.as_object_mut() {
            obj.retain(|_, val| !val.is_null());
        }
        serde_json::from_value(v).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobList {
    pub count: u64,
    pub jobs: Vec<JobSummary>,
}

impl JobList {
    pub fn from_value(v: &Value) -> JobList {
        let jobs: Vec<JobSummary> = v
            .get("jobs")
            .and_then(Value::as_array)
            .map(|a| a.iter().map(JobSummary::from_value).collect())
            .unwrap_or_default();
        let count = v
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(jobs.len() as u64);
        JobList { count, jobs }
    }
}

pub fn job_id_from(payload: &Value) -> Option<String> {
    payload
        .get("job_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Payload defaults used when submitting background jobs.
#[derive(Debug, Clone)]
pub struct JobForm {
    pub output_dir: String,
    pub compare_output: String,
    pub top_n: Option<u64>,
    pub methods: MethodSelection,
}

impl Default for JobForm {
    fn default() -> Self {
        Self {
            output_dir: "/tmp/tom_demand_jobs_output".into(),
            compare_output: "/tmp/tom_demand_jobs_output/compare.csv".into(),
            top_n: Some(25),
            methods: MethodSelection::default(),
        }
    }
}

impl JobForm {
    pub fn payload(&self, kind: JobKind, paths: &DatasetPaths, config_path: Option<&str>) -> Value {
        let base = validate_payload(&paths.ideas, paths, config_path);
        match kind {
            JobKind::Validate => base,
            JobKind::Prioritize => {
                prioritize_payload(base, &self.output_dir, &resolve_queue_methods(&self.methods))
            }
            JobKind::Compare => compare_payload(base, &self.compare_output, self.top_n),
        }
    }

    pub fn submit_request(
        &self,
        kind: JobKind,
        paths: &DatasetPaths,
        config_path: Option<&str>,
    ) -> RequestDescriptor {
        submit_request(kind, self.payload(kind, paths, config_path))
    }
}

pub fn submit_request(kind: JobKind, payload: Value) -> RequestDescriptor {
    RequestDescriptor::post(kind.route(), payload)
}

pub fn poll_request(job_id: &str) -> Result<RequestDescriptor> {
    let id = job_id.trim();
    if id.is_empty() {
        return Err(Error::malformed("job id is empty"));
    }
    Ok(RequestDescriptor::get(format!(
        "{JOBS_ROUTE}/{}",
        encode_segment(id)?
    )))
}

pub fn list_request(limit: u32) -> Result<RequestDescriptor> {
    Ok(RequestDescriptor::get(with_query(
        JOBS_ROUTE,
        &[("limit", &limit.to_string())],
    )?))
}

#[derive(Debug, Default)]
pub struct JobManager {
    state: JobState,
    active: Option<JobHandle>,
    seq: u64,
    /// Operator-editable job id used for polling; follows new submissions.
    pub job_id_input: String,
}

impl JobManager {
    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn active(&self) -> Option<&JobHandle> {
        self.active.as_ref()
    }

    /// Applies a submit response. Only a response carrying a job id creates a
    /// new active handle.
    pub fn record_submission(&mut self, kind: JobKind, response: &Value) -> Option<&JobHandle> {
        let job_id = job_id_from(response)?;
        self.seq = self.seq.wrapping_add(1);
        tracing::info!(job_id = %job_id, kind = %kind, "job submitted");
        self.state = std::mem::take(&mut self.state).on_submitted(job_id.clone());
        self.job_id_input = job_id.clone();
        self.active = Some(JobHandle {
            job_id,
            kind,
            last_known_status: None,
            submitted_seq: self.seq,
        });
        self.active.as_ref()
    }

    pub fn record_status(&mut self, job_id: &str, status: Value) {
        let job_id = job_id.trim();
        if let Some(h) = self.active.as_mut()
            && h.job_id == job_id
        {
            h.last_known_status = Some(status.clone());
        }
        tracing::debug!(job_id, status = ?status.get("status"), "job status recorded");
        self.state = std::mem::take(&mut self.state).on_polled(job_id, status);
    }

    pub fn submit(&mut self, transport: &dyn Transport, kind: JobKind, payload: Value) -> Result<Value> {
        let res = submit_request(kind, payload).send(transport)?;
        self.record_submission(kind, &res);
        Ok(res)
    }

    pub fn poll(&mut self, transport: &dyn Transport, job_id: &str) -> Result<Value> {
        let res = poll_request(job_id)?.send(transport)?;
        self.record_status(job_id, res.clone());
        Ok(res)
    }

    pub fn list(&self, transport: &dyn Transport, limit: u32) -> Result<Value> {
        list_request(limit)?.send(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submission_with_job_id_replaces_active_handle() {
        let mut m = JobManager::default();
        assert_eq!(m.state(), &JobState::Idle);

        m.record_submission(JobKind::Validate, &json!({"job_id": "first"}));
        m.record_submission(JobKind::Compare, &json!({"job_id": "abc123", "status": "queued"}));
        let h = m.active().expect("handle");
        assert_eq!(h.job_id, "abc123");
        assert_eq!(h.kind, JobKind::Compare);
        assert_eq!(h.submitted_seq, 2);
        assert_eq!(m.job_id_input, "abc123");
        assert_eq!(m.state().job_id(), Some("abc123"));
        assert_eq!(m.state().label(), "submitted");
    }

    #[test]
    fn submission_without_job_id_leaves_state_alone() {
        let mut m = JobManager::default();
        assert!(m.record_submission(JobKind::Validate, &json!({"status": "queued"})).is_none());
        assert!(m.active().is_none());
        assert_eq!(m.state(), &JobState::Idle);
    }

    #[test]
    fn polled_status_is_recorded_verbatim() {
        let mut m = JobManager::default();
        m.record_submission(JobKind::Prioritize, &json!({"job_id": "abc123"}));
        let running = json!({"job_id": "abc123", "status": "running"});
        m.record_status("abc123", running.clone());
        assert_eq!(m.state().status(), Some(&running));

        let weird = json!({"job_id": "abc123", "status": "something-new"});
        m.record_status("abc123", weird.clone());
        assert_eq!(m.active().unwrap().last_known_status.as_ref(), Some(&weird));
        assert_eq!(m.state().label(), "polled");
    }

    #[test]
    fn polling_another_id_keeps_the_active_handle() {
        let mut m = JobManager::default();
        m.record_submission(JobKind::Validate, &json!({"job_id": "a"}));
        m.record_status("b", json!({"status": "completed"}));
        assert_eq!(m.active().unwrap().job_id, "a");
        assert!(m.active().unwrap().last_known_status.is_none());
        assert_eq!(m.state().job_id(), Some("b"));
    }

    #[test]
    fn blank_job_id_is_rejected_locally() {
        assert!(matches!(poll_request("  "), Err(Error::MalformedInput(_))));
        assert_eq!(poll_request("x y").unwrap().path, "/api/v1/jobs/x%20y");
        assert_eq!(list_request(20).unwrap().path, "/api/v1/jobs?limit=20");
    }

    #[test]
    fn job_payload_shapes() {
        let form = JobForm::default();
        let paths = DatasetPaths::default();
        let v = form.payload(JobKind::Validate, &paths, None);
        assert_eq!(
            v,
            json!({
                "ideas_path": "data/input/ideas.csv",
                "ra_weights_path": "data/input/weights_ra.csv",
                "rs_weights_path": "data/input/weights_rs.csv"
            })
        );
        let p = form.payload(JobKind::Prioritize, &paths, Some("c.yaml"));
        assert_eq!(p["output_dir"], "/tmp/tom_demand_jobs_output");
        assert_eq!(p["method"], "sainte-lague");
        assert_eq!(p["config_path"], "c.yaml");
        assert!(p.get("now_method").is_none());
        let c = form.payload(JobKind::Compare, &paths, None);
        assert_eq!(c["top_n"], 25);
        assert_eq!(c["output_path"], "/tmp/tom_demand_jobs_output/compare.csv");
        assert_eq!(JobKind::Compare.route(), "/api/v1/jobs/workflows/compare");
    }

    #[test]
    fn job_list_parsing_is_tolerant() {
        let list = JobList::from_value(&json!({
            "count": 2,
            "jobs": [
                {"job_id": "a", "job_type": "validate", "status": "completed", "result": {"ok": 1}},
                {"job_id": "b", "status": "failed", "error": "boom", "updated_at": null}
            ]
        }));
        assert_eq!(list.count, 2);
        assert_eq!(list.jobs[0].status, "completed");
        assert_eq!(list.jobs[1].error.as_deref(), Some("boom"));
        assert_eq!(list.jobs[1].job_type, "");
        assert_eq!(JobList::from_value(&json!({})).jobs.len(), 0);
    }
}
