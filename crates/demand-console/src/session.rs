use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::activity::{ActivityLog, RequestDescriptor};
use crate::config::Settings;
use crate::datasets::{DatasetCoordinator, RowsPage};
use crate::entities::{self, Entity, EntityForm};
use crate::error::{Error, Result};
use crate::jobs::{self, DEFAULT_LIST_LIMIT, JobForm, JobKind, JobManager};
use crate::transport::{HEALTH_ROUTE, HttpTransport, Transport, UploadFile, VERSION_ROUTE};
use crate::workflows::{self, WorkflowForm};

/// Single in-flight flag shared by every action of a session.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn try_acquire(&self) -> Result<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when dropped, whatever the outcome of the call.
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOp {
    Validate,
    Prioritize,
    PrioritizeRs,
    PrioritizeGlobal,
    Compare,
}

impl WorkflowOp {
    pub fn label(self) -> &'static str {
        match self {
            WorkflowOp::Validate => "Validate",
            WorkflowOp::Prioritize => "Prioritize",
            WorkflowOp::PrioritizeRs => "Prioritize RS",
            WorkflowOp::PrioritizeGlobal => "Prioritize Global",
            WorkflowOp::Compare => "Compare",
        }
    }
}

/// Operator actions that talk to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Health,
    Version,
    LoadRows,
    Upsert,
    Delete,
    Overwrite,
    UploadIdeas(PathBuf),
    ListEntities(Entity),
    RenameEntity(Entity),
    Workflow(WorkflowOp),
    SubmitJob(JobKind),
    PollJob,
    ListJobs,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Health => f.write_str("health"),
            Action::Version => f.write_str("version"),
            Action::LoadRows => f.write_str("load rows"),
            Action::Upsert => f.write_str("upsert row"),
            Action::Delete => f.write_str("delete row"),
            Action::Overwrite => f.write_str("overwrite dataset"),
            Action::UploadIdeas(p) => write!(f, "upload {}", p.display()),
            Action::ListEntities(e) => write!(f, "list {}s", e.label()),
            Action::RenameEntity(e) => write!(f, "rename {}", e.label()),
            Action::Workflow(op) => f.write_str(op.label()),
            Action::SubmitJob(kind) => write!(f, "submit {kind} job"),
            Action::PollJob => f.write_str("poll job"),
            Action::ListJobs => f.write_str("list jobs"),
        }
    }
}

#[derive(Debug, Clone)]
enum Effect {
    None,
    Rows { generation: u64 },
    Submitted(JobKind),
    Polled(String),
    Uploaded,
}

/// A fully shaped request, ready to run on any thread.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: RequestDescriptor,
    upload: Option<UploadFile>,
    effect: Effect,
}

impl Call {
    fn plain(request: RequestDescriptor) -> Self {
        Self {
            request,
            upload: None,
            effect: Effect::None,
        }
    }

    fn with_effect(request: RequestDescriptor, effect: Effect) -> Self {
        Self {
            request,
            upload: None,
            effect,
        }
    }

    pub fn execute(&self, transport: &dyn Transport) -> Result<Value> {
        match &self.upload {
            Some(file) => workflows::upload_ideas(transport, file),
            None => self.request.send(transport),
        }
    }
}

/// A call that holds the busy flag and the transport snapshot it runs on.
pub struct Pending {
    pub call: Call,
    transport: Arc<dyn Transport>,
    guard: BusyGuard,
}

impl Pending {
    pub fn execute(self) -> Completion {
        let result = self.call.execute(self.transport.as_ref());
        Completion {
            call: self.call,
            result,
            guard: self.guard,
        }
    }
}

/// Result of a call; the busy flag is released once it has been applied.
pub struct Completion {
    call: Call,
    result: Result<Value>,
    guard: BusyGuard,
}

/// Operator session: settings, transport and all form state.
pub struct Session {
    settings: Settings,
    transport: Arc<dyn Transport>,
    busy: BusyFlag,
    activity: ActivityLog,
    pub coordinator: DatasetCoordinator,
    pub workflows: WorkflowForm,
    pub entities: EntityForm,
    pub jobs: JobManager,
    pub job_form: JobForm,
    pub job_list_limit: u32,
}

impl Session {
    pub fn new(settings: Settings) -> Result<Self> {
        let transport = HttpTransport::new(Arc::clone(&settings.connection))?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            busy: BusyFlag::default(),
            activity: ActivityLog::default(),
            coordinator: DatasetCoordinator::default(),
            workflows: WorkflowForm::default(),
            entities: EntityForm::default(),
            jobs: JobManager::default(),
            job_form: JobForm::default(),
            job_list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn busy(&self) -> &BusyFlag {
        &self.busy
    }

    /// Replaces the settings snapshot; calls already issued keep the old transport.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<()> {
        let transport = HttpTransport::new(Arc::clone(&settings.connection))?;
        self.apply_settings_with(settings, Arc::new(transport));
        Ok(())
    }

    pub fn apply_settings_with(&mut self, settings: Settings, transport: Arc<dyn Transport>) {
        tracing::info!(
            base_url = %settings.connection.base_url,
            role = %settings.connection.role,
            "settings applied"
        );
        self.settings = settings;
        self.transport = transport;
    }

    /// Runs an action to completion on the current thread. Errors end up in
    /// the activity log; the return value only reports success.
    pub fn run(&mut self, action: Action) -> bool {
        match self.begin(action) {
            Some(pending) => self.finish(pending.execute()),
            None => false,
        }
    }

    /// Acquires the busy flag and shapes the request. Local failures are
    /// recorded immediately and no call is returned. A busy rejection leaves
    /// the activity log alone so the in-flight request stays visible.
    pub fn begin(&mut self, action: Action) -> Option<Pending> {
        let guard = match self.busy.try_acquire() {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(action = %action, error = %e, "action rejected");
                return None;
            }
        };
        tracing::debug!(action = %action, "action started");
        match self.prepare(&action) {
            Ok(call) => Some(Pending {
                call,
                transport: Arc::clone(&self.transport),
                guard,
            }),
            Err(Error::Guard(msg)) => {
                self.activity.record_message(msg);
                None
            }
            Err(e) => {
                self.activity.record(None, &Err(e));
                None
            }
        }
    }

    pub fn finish(&mut self, done: Completion) -> bool {
        let Completion {
            call,
            result,
            guard,
        } = done;
        let result = result.and_then(|v| self.apply(&call.effect, v));
        let ok = result.is_ok();
        self.activity.record(Some(call.request), &result);
        drop(guard);
        ok
    }

    fn prepare(&self, action: &Action) -> Result<Call> {
        let cfg = self.settings.connection.config_path().map(ToOwned::to_owned);
        let cfg = cfg.as_deref();
        let paths = &self.settings.paths;
        let call = match action {
            Action::Health => Call::plain(RequestDescriptor::get(HEALTH_ROUTE)),
            Action::Version => Call::plain(RequestDescriptor::get(VERSION_ROUTE)),
            Action::LoadRows => Call::with_effect(
                self.coordinator.rows_request(cfg)?,
                Effect::Rows {
                    generation: self.coordinator.generation(),
                },
            ),
            Action::Upsert => Call::plain(self.coordinator.upsert_request(cfg)?),
            Action::Delete => Call::plain(self.coordinator.delete_request(cfg)),
            Action::Overwrite => Call::plain(self.coordinator.overwrite_request(cfg)?),
            Action::UploadIdeas(path) => {
                let file = UploadFile::from_path(path)?;
                Call {
                    request: workflows::upload_descriptor(&file),
                    upload: Some(file),
                    effect: Effect::Uploaded,
                }
            }
            Action::ListEntities(e) => Call::plain(entities::list_request(*e, paths, cfg)),
            Action::RenameEntity(e) => Call::plain(self.entities.rename_request(*e, paths, cfg)?),
            Action::Workflow(op) => Call::plain(match op {
                WorkflowOp::Validate => self.workflows.validate_request(paths, cfg),
                WorkflowOp::Prioritize => self.workflows.prioritize_request(paths, cfg),
                WorkflowOp::PrioritizeRs => self.workflows.prioritize_rs_request(paths, cfg)?,
                WorkflowOp::PrioritizeGlobal => {
                    self.workflows.prioritize_global_request(paths, cfg)?
                }
                WorkflowOp::Compare => self.workflows.compare_request(paths, cfg),
            }),
            Action::SubmitJob(kind) => Call::with_effect(
                self.job_form.submit_request(*kind, paths, cfg),
                Effect::Submitted(*kind),
            ),
            Action::PollJob => {
                let id = self.jobs.job_id_input.trim().to_string();
                Call::with_effect(jobs::poll_request(&id)?, Effect::Polled(id))
            }
            Action::ListJobs => Call::plain(jobs::list_request(self.job_list_limit)?),
        };
        Ok(call)
    }

    fn apply(&mut self, effect: &Effect, value: Value) -> Result<Value> {
        match effect {
            Effect::None => {}
            Effect::Rows { generation } => {
                let page = RowsPage::from_value(&value)?;
                self.coordinator.apply_page(*generation, page);
            }
            Effect::Submitted(kind) => {
                self.jobs.record_submission(*kind, &value);
            }
            Effect::Polled(id) => self.jobs.record_status(id, value.clone()),
            Effect::Uploaded => self.workflows.apply_upload(&value),
        }
        Ok(value)
    }
}
