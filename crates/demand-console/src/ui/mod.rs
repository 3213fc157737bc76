use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table,
    TableState, Tabs, Widget, Wrap,
};

use crate::datasets::columns;
use crate::entities::Entity;
use crate::error::{Error, Result};
use crate::jobs::{JobKind, JobSummary};
use crate::methods::{MethodSelection, cycle_optional, cycle_required};
use crate::sanitize::{sanitize_block, sanitize_cell};
use crate::session::{Action, Completion, Session, WorkflowOp};
use crate::workflows::parse_top_n;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Crud,
    Entities,
    Workflows,
    Jobs,
    Settings,
}

impl Tab {
    const ALL: [Tab; 5] = [
        Tab::Crud,
        Tab::Entities,
        Tab::Workflows,
        Tab::Jobs,
        Tab::Settings,
    ];

    fn title(self) -> &'static str {
        match self {
            Tab::Crud => "CSV CRUD",
            Tab::Entities => "Entities",
            Tab::Workflows => "Workflows",
            Tab::Jobs => "Jobs",
            Tab::Settings => "Settings",
        }
    }

    fn index(self) -> usize {
        Tab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }

    fn items(self) -> &'static [Item] {
        match self {
            Tab::Crud => CRUD_ITEMS,
            Tab::Entities => ENTITY_ITEMS,
            Tab::Workflows => WORKFLOW_ITEMS,
            Tab::Jobs => JOB_ITEMS,
            Tab::Settings => SETTINGS_ITEMS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Workflow,
    Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    Default,
    Now,
    Next,
    Later,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Dataset,
    Path,
    KeyColumn,
    Limit,
    Offset,
    KeyValue,
    RowDraft,
    OverwriteDraft,
    RaOld,
    RaNew,
    RsOld,
    RsNew,
    IdeasOverride,
    UploadPath,
    Method(Form, Queue),
    TopN,
    OutputDir,
    OutputRs,
    OutputGlobal,
    OutputCompare,
    JobOutputDir,
    JobCompareOutput,
    JobTopN,
    JobId,
    JobListLimit,
    BaseUrl,
    ApiKey,
    Role,
    ConfigPath,
    DefaultIdeas,
    DefaultRa,
    DefaultRs,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Dataset => "Dataset",
            Field::Path => "CSV Path",
            Field::KeyColumn => "Key Column",
            Field::Limit => "Limit",
            Field::Offset => "Offset",
            Field::KeyValue => "Delete Key Value",
            Field::RowDraft => "Row JSON (Upsert)",
            Field::OverwriteDraft => "Rows JSON (Overwrite)",
            Field::RaOld | Field::RsOld => "Old Value",
            Field::RaNew | Field::RsNew => "New Value",
            Field::IdeasOverride => "Ideas Path Override",
            Field::UploadPath => "Ideas CSV to Upload",
            Field::Method(_, Queue::Default) => "Default Method",
            Field::Method(_, Queue::Now) => "NOW Method",
            Field::Method(_, Queue::Next) => "NEXT Method",
            Field::Method(_, Queue::Later) => "LATER Method",
            Field::TopN | Field::JobTopN => "Compare Top N",
            Field::OutputDir | Field::JobOutputDir => "Output Dir",
            Field::OutputRs => "RS Output Path",
            Field::OutputGlobal => "Global Output Path",
            Field::OutputCompare | Field::JobCompareOutput => "Compare Output Path",
            Field::JobId => "Job ID",
            Field::JobListLimit => "List Limit",
            Field::BaseUrl => "API Base URL",
            Field::ApiKey => "API Key",
            Field::Role => "Role",
            Field::ConfigPath => "Config Path Override",
            Field::DefaultIdeas => "Default Ideas Path",
            Field::DefaultRa => "Default RA Weights Path",
            Field::DefaultRs => "Default RS Weights Path",
        }
    }

    fn multiline(self) -> bool {
        matches!(self, Field::RowDraft | Field::OverwriteDraft)
    }

    /// Fields that cycle through a fixed set instead of opening an editor.
    fn cycles_only(self) -> bool {
        matches!(self, Field::Dataset | Field::Role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Act {
    Health,
    Version,
    LoadRows,
    EditRow,
    Upsert,
    Delete,
    Overwrite,
    ListEntities(Entity),
    RenameEntity(Entity),
    Upload,
    Workflow(WorkflowOp),
    SubmitJob(JobKind),
    PollJob,
    ListJobs,
}

impl Act {
    fn label(self) -> String {
        match self {
            Act::Health => "Check Health".into(),
            Act::Version => "Show Version".into(),
            Act::LoadRows => "Load Rows".into(),
            Act::EditRow => "Edit Selected Row".into(),
            Act::Upsert => "Upsert Row".into(),
            Act::Delete => "Delete Row".into(),
            Act::Overwrite => "Overwrite Dataset".into(),
            Act::ListEntities(e) => format!("List {}s", e.label()),
            Act::RenameEntity(e) => format!("Rename {}", e.label()),
            Act::Upload => "Upload Ideas CSV".into(),
            Act::Workflow(op) => op.label().into(),
            Act::SubmitJob(kind) => format!("Submit {} Job", capitalize(kind.as_str())),
            Act::PollJob => "Poll Job Status".into(),
            Act::ListJobs => "List Jobs".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Item {
    Field(Field),
    Act(Act),
}

const CRUD_ITEMS: &[Item] = &[
    Item::Field(Field::Dataset),
    Item::Field(Field::Path),
    Item::Field(Field::KeyColumn),
    Item::Field(Field::Limit),
    Item::Field(Field::Offset),
    Item::Act(Act::LoadRows),
    Item::Act(Act::EditRow),
    Item::Field(Field::RowDraft),
    Item::Act(Act::Upsert),
    Item::Field(Field::KeyValue),
    Item::Act(Act::Delete),
    Item::Field(Field::OverwriteDraft),
    Item::Act(Act::Overwrite),
];

const ENTITY_ITEMS: &[Item] = &[
    Item::Act(Act::ListEntities(Entity::RequestingArea)),
    Item::Field(Field::RaOld),
    Item::Field(Field::RaNew),
    Item::Act(Act::RenameEntity(Entity::RequestingArea)),
    Item::Act(Act::ListEntities(Entity::RevenueStream)),
    Item::Field(Field::RsOld),
    Item::Field(Field::RsNew),
    Item::Act(Act::RenameEntity(Entity::RevenueStream)),
];

const WORKFLOW_ITEMS: &[Item] = &[
    Item::Field(Field::IdeasOverride),
    Item::Field(Field::UploadPath),
    Item::Act(Act::Upload),
    Item::Field(Field::Method(Form::Workflow, Queue::Default)),
    Item::Field(Field::Method(Form::Workflow, Queue::Now)),
    Item::Field(Field::Method(Form::Workflow, Queue::Next)),
    Item::Field(Field::Method(Form::Workflow, Queue::Later)),
    Item::Field(Field::TopN),
    Item::Field(Field::OutputDir),
    Item::Field(Field::OutputRs),
    Item::Field(Field::OutputGlobal),
    Item::Field(Field::OutputCompare),
    Item::Act(Act::Workflow(WorkflowOp::Validate)),
    Item::Act(Act::Workflow(WorkflowOp::Prioritize)),
    Item::Act(Act::Workflow(WorkflowOp::PrioritizeRs)),
    Item::Act(Act::Workflow(WorkflowOp::PrioritizeGlobal)),
    Item::Act(Act::Workflow(WorkflowOp::Compare)),
];

const JOB_ITEMS: &[Item] = &[
    Item::Field(Field::Method(Form::Job, Queue::Default)),
    Item::Field(Field::Method(Form::Job, Queue::Now)),
    Item::Field(Field::Method(Form::Job, Queue::Next)),
    Item::Field(Field::Method(Form::Job, Queue::Later)),
    Item::Field(Field::JobOutputDir),
    Item::Field(Field::JobCompareOutput),
    Item::Field(Field::JobTopN),
    Item::Act(Act::SubmitJob(JobKind::Validate)),
    Item::Act(Act::SubmitJob(JobKind::Prioritize)),
    Item::Act(Act::SubmitJob(JobKind::Compare)),
    Item::Field(Field::JobId),
    Item::Act(Act::PollJob),
    Item::Field(Field::JobListLimit),
    Item::Act(Act::ListJobs),
];

const SETTINGS_ITEMS: &[Item] = &[
    Item::Field(Field::BaseUrl),
    Item::Field(Field::ApiKey),
    Item::Field(Field::Role),
    Item::Field(Field::ConfigPath),
    Item::Field(Field::DefaultIdeas),
    Item::Field(Field::DefaultRa),
    Item::Field(Field::DefaultRs),
    Item::Act(Act::Health),
    Item::Act(Act::Version),
];

#[derive(Debug, Clone)]
enum InputMode {
    Normal,
    EditField {
        field: Field,
        buffer: String,
        error: Option<String>,
    },
}

pub struct App {
    session: Session,
    tab: Tab,
    selected: [usize; 5],
    input: InputMode,
    upload_path: String,
    row_table: TableState,
    response_scroll: u16,
    status: Option<String>,
    running: Option<(String, Instant)>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
}

impl App {
    pub fn new(session: Session) -> Self {
        let (done_tx, done_rx) = mpsc::channel();
        Self {
            session,
            tab: Tab::Crud,
            selected: [0; 5],
            input: InputMode::Normal,
            upload_path: String::new(),
            row_table: TableState::default(),
            response_scroll: 0,
            status: None,
            running: None,
            done_tx,
            done_rx,
        }
    }

    fn items(&self) -> &'static [Item] {
        self.tab.items()
    }

    fn selected_item(&self) -> Option<Item> {
        self.items().get(self.selected[self.tab.index()]).copied()
    }

    fn select_next_item(&mut self) {
        let i = self.tab.index();
        let len = self.items().len();
        if len > 0 {
            self.selected[i] = (self.selected[i] + 1).min(len - 1);
        }
    }

    fn select_prev_item(&mut self) {
        let i = self.tab.index();
        self.selected[i] = self.selected[i].saturating_sub(1);
    }

    fn select_next_tab(&mut self) {
        let i = (self.tab.index() + 1) % Tab::ALL.len();
        self.tab = Tab::ALL[i];
    }

    fn select_prev_tab(&mut self) {
        let i = (self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len();
        self.tab = Tab::ALL[i];
    }

    fn methods(&self, form: Form) -> &MethodSelection {
        match form {
            Form::Workflow => &self.session.workflows.methods,
            Form::Job => &self.session.job_form.methods,
        }
    }

    fn methods_mut(&mut self, form: Form) -> &mut MethodSelection {
        match form {
            Form::Workflow => &mut self.session.workflows.methods,
            Form::Job => &mut self.session.job_form.methods,
        }
    }

    fn field_value(&self, field: Field) -> String {
        let s = &self.session;
        let conn = &s.settings().connection;
        let paths = &s.settings().paths;
        match field {
            Field::Dataset => s.coordinator.current().to_string(),
            Field::Path => s.coordinator.path.clone(),
            Field::KeyColumn => s.coordinator.key_column.clone(),
            Field::Limit => s.coordinator.limit.clone(),
            Field::Offset => s.coordinator.offset.clone(),
            Field::KeyValue => s.coordinator.key_value.clone(),
            Field::RowDraft => s.coordinator.row_draft.clone(),
            Field::OverwriteDraft => s.coordinator.overwrite_draft.clone(),
            Field::RaOld => s.entities.ra_old.clone(),
            Field::RaNew => s.entities.ra_new.clone(),
            Field::RsOld => s.entities.rs_old.clone(),
            Field::RsNew => s.entities.rs_new.clone(),
            Field::IdeasOverride => s.workflows.ideas_path_override.clone(),
            Field::UploadPath => self.upload_path.clone(),
            Field::Method(form, queue) => {
                let m = self.methods(form);
                match queue {
                    Queue::Default => m.default_method.clone(),
                    Queue::Now => m.now_method.clone().unwrap_or_default(),
                    Queue::Next => m.next_method.clone().unwrap_or_default(),
                    Queue::Later => m.later_method.clone().unwrap_or_default(),
                }
            }
            Field::TopN => s.workflows.top_n.clone(),
            Field::OutputDir => s.workflows.output_dir.clone(),
            Field::OutputRs => s.workflows.output_rs.clone(),
            Field::OutputGlobal => s.workflows.output_global.clone(),
            Field::OutputCompare => s.workflows.output_compare.clone(),
            Field::JobOutputDir => s.job_form.output_dir.clone(),
            Field::JobCompareOutput => s.job_form.compare_output.clone(),
            Field::JobTopN => s.job_form.top_n.map(|n| n.to_string()).unwrap_or_default(),
            Field::JobId => s.jobs.job_id_input.clone(),
            Field::JobListLimit => s.job_list_limit.to_string(),
            Field::BaseUrl => conn.base_url.clone(),
            Field::ApiKey => conn.api_key.clone().unwrap_or_default(),
            Field::Role => conn.role.to_string(),
            Field::ConfigPath => conn.config_path.clone().unwrap_or_default(),
            Field::DefaultIdeas => paths.ideas.clone(),
            Field::DefaultRa => paths.ra.clone(),
            Field::DefaultRs => paths.rs.clone(),
        }
    }

    fn display_value(&self, field: Field) -> String {
        if field == Field::ApiKey {
            return match self.session.settings().connection.api_key() {
                Some(_) => "********".into(),
                None => String::new(),
            };
        }
        let v = self.field_value(field);
        if field.multiline() {
            v.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            v
        }
    }

    fn set_field(&mut self, field: Field, value: String) -> Result<()> {
        let optional = |v: &str| Some(v.to_string()).filter(|s| !s.trim().is_empty());
        match field {
            Field::Dataset | Field::Role => self.cycle_field(field)?,
            Field::Path => self.session.coordinator.path = value,
            Field::KeyColumn => self.session.coordinator.key_column = value,
            Field::Limit => self.session.coordinator.limit = value,
            Field::Offset => self.session.coordinator.offset = value,
            Field::KeyValue => self.session.coordinator.key_value = value,
            Field::RowDraft => self.session.coordinator.row_draft = value,
            Field::OverwriteDraft => self.session.coordinator.overwrite_draft = value,
            Field::RaOld => self.session.entities.ra_old = value,
            Field::RaNew => self.session.entities.ra_new = value,
            Field::RsOld => self.session.entities.rs_old = value,
            Field::RsNew => self.session.entities.rs_new = value,
            Field::IdeasOverride => self.session.workflows.ideas_path_override = value,
            Field::UploadPath => self.upload_path = value,
            Field::Method(form, queue) => {
                let m = self.methods_mut(form);
                match queue {
                    Queue::Default => m.default_method = value,
                    Queue::Now => m.now_method = optional(&value),
                    Queue::Next => m.next_method = optional(&value),
                    Queue::Later => m.later_method = optional(&value),
                }
            }
            Field::TopN => self.session.workflows.top_n = value,
            Field::OutputDir => self.session.workflows.output_dir = value,
            Field::OutputRs => self.session.workflows.output_rs = value,
            Field::OutputGlobal => self.session.workflows.output_global = value,
            Field::OutputCompare => self.session.workflows.output_compare = value,
            Field::JobOutputDir => self.session.job_form.output_dir = value,
            Field::JobCompareOutput => self.session.job_form.compare_output = value,
            Field::JobTopN => self.session.job_form.top_n = parse_top_n(&value),
            Field::JobId => self.session.jobs.job_id_input = value.trim().to_string(),
            Field::JobListLimit => {
                self.session.job_list_limit = value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| Error::malformed("limit must be a positive integer"))?;
            }
            Field::BaseUrl | Field::ApiKey | Field::ConfigPath => {
                let mut c = (*self.session.settings().connection).clone();
                match field {
                    Field::BaseUrl => {
                        let url = value.trim();
                        if url.is_empty() {
                            return Err(Error::malformed("base url is empty"));
                        }
                        c.base_url = url.to_string();
                    }
                    Field::ApiKey => c.api_key = optional(value.trim()),
                    _ => c.config_path = optional(value.trim()),
                }
                let next = self.session.settings().with_connection(c);
                self.session.apply_settings(next)?;
            }
            Field::DefaultIdeas | Field::DefaultRa | Field::DefaultRs => {
                let mut paths = self.session.settings().paths.clone();
                match field {
                    Field::DefaultIdeas => paths.ideas = value,
                    Field::DefaultRa => paths.ra = value,
                    _ => paths.rs = value,
                }
                let next = self.session.settings().with_paths(paths);
                self.session.apply_settings(next)?;
            }
        }
        Ok(())
    }

    fn cycle_field(&mut self, field: Field) -> Result<()> {
        match field {
            Field::Dataset => {
                let next = self.session.coordinator.current().next();
                self.session.coordinator.select_dataset(next);
                self.row_table.select(None);
            }
            Field::Role => {
                let mut c = (*self.session.settings().connection).clone();
                c.role = c.role.next();
                let next = self.session.settings().with_connection(c);
                self.session.apply_settings(next)?;
            }
            Field::Method(_, queue) => {
                let current = self.field_value(field);
                let next = match queue {
                    Queue::Default => cycle_required(&current),
                    _ => cycle_optional(&current),
                };
                self.set_field(field, next)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn begin_edit_field(&mut self, field: Field) {
        self.input = InputMode::EditField {
            field,
            buffer: self.field_value(field),
            error: None,
        };
    }

    fn apply_edit_field(&mut self) {
        let InputMode::EditField { field, buffer, .. } = &self.input else {
            return;
        };
        let (field, buffer) = (*field, buffer.clone());
        match self.set_field(field, buffer) {
            Ok(()) => self.input = InputMode::Normal,
            Err(e) => {
                if let InputMode::EditField { error, .. } = &mut self.input {
                    *error = Some(e.to_string());
                }
            }
        }
    }

    fn activate_selected(&mut self) -> Result<()> {
        match self.selected_item() {
            Some(Item::Field(f)) if f.cycles_only() => self.cycle_field(f)?,
            Some(Item::Field(f)) => self.begin_edit_field(f),
            Some(Item::Act(a)) => self.trigger(a),
            None => {}
        }
        Ok(())
    }

    fn action_for(&self, act: Act) -> Option<Action> {
        Some(match act {
            Act::Health => Action::Health,
            Act::Version => Action::Version,
            Act::LoadRows => Action::LoadRows,
            Act::EditRow => return None,
            Act::Upsert => Action::Upsert,
            Act::Delete => Action::Delete,
            Act::Overwrite => Action::Overwrite,
            Act::ListEntities(e) => Action::ListEntities(e),
            Act::RenameEntity(e) => Action::RenameEntity(e),
            Act::Upload => Action::UploadIdeas(PathBuf::from(self.upload_path.trim())),
            Act::Workflow(op) => Action::Workflow(op),
            Act::SubmitJob(kind) => Action::SubmitJob(kind),
            Act::PollJob => Action::PollJob,
            Act::ListJobs => Action::ListJobs,
        })
    }

    fn trigger(&mut self, act: Act) {
        if act == Act::EditRow {
            self.edit_selected_row();
            return;
        }
        if self.session.busy().is_busy() {
            self.status = Some("busy: wait for the current request to finish".into());
            return;
        }
        if act == Act::Upload && self.upload_path.trim().is_empty() {
            self.status = Some("choose a file to upload first".into());
            return;
        }
        let Some(action) = self.action_for(act) else {
            return;
        };
        self.start_action(action);
    }

    /// Shapes the request on this thread and runs it on a worker; the result
    /// comes back through the completion channel.
    fn start_action(&mut self, action: Action) {
        let label = action.to_string();
        self.response_scroll = 0;
        let Some(pending) = self.session.begin(action) else {
            self.status = Some(if self.session.busy().is_busy() {
                format!("{label}: busy, wait for the current request to finish")
            } else {
                format!("{label}: rejected")
            });
            return;
        };
        let tx = self.done_tx.clone();
        self.running = Some((label, Instant::now()));
        self.status = None;
        std::thread::spawn(move || {
            let _ = tx.send(pending.execute());
        });
    }

    fn drain_completions(&mut self) {
        while let Ok(done) = self.done_rx.try_recv() {
            let ok = self.session.finish(done);
            if let Some((label, started)) = self.running.take() {
                let ms = started.elapsed().as_millis();
                self.status = Some(if ok {
                    format!("{label}: ok ({ms}ms)")
                } else {
                    format!("{label}: failed ({ms}ms)")
                });
            }
            let rows = self.session.coordinator.rows().len();
            match self.row_table.selected() {
                Some(i) if i >= rows => self.row_table.select(rows.checked_sub(1)),
                None if rows > 0 => self.row_table.select(Some(0)),
                _ => {}
            }
        }
    }

    fn edit_selected_row(&mut self) {
        let Some(i) = self.row_table.selected() else {
            self.status = Some("no row selected".into());
            return;
        };
        if self.session.coordinator.begin_edit_at(i).is_some() {
            self.status = Some(format!("editing row {}", i + 1));
        }
    }

    fn select_row(&mut self, delta: isize) {
        let len = self.session.coordinator.rows().len();
        if len == 0 {
            self.row_table.select(None);
            return;
        }
        let cur = self.row_table.selected().unwrap_or(0) as isize;
        let next = (cur + delta).clamp(0, len as isize - 1) as usize;
        self.row_table.select(Some(next));
    }

    fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers) -> Result<bool> {
        if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
            return Ok(true);
        }

        if let InputMode::EditField { field, buffer, .. } = &mut self.input {
            let multiline = field.multiline();
            match code {
                KeyCode::Esc => self.input = InputMode::Normal,
                KeyCode::Char('s') if mods.contains(KeyModifiers::CONTROL) => {
                    self.apply_edit_field()
                }
                KeyCode::Enter if multiline => buffer.push('\n'),
                KeyCode::Enter => self.apply_edit_field(),
                KeyCode::Tab if multiline => buffer.push_str("  "),
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Tab | KeyCode::Right => self.select_next_tab(),
            KeyCode::BackTab | KeyCode::Left => self.select_prev_tab(),
            KeyCode::Char(c @ '1'..='5') => {
                let i = c as usize - '1' as usize;
                self.tab = Tab::ALL[i];
            }
            KeyCode::Down | KeyCode::Char('j') => self.select_next_item(),
            KeyCode::Up | KeyCode::Char('k') => self.select_prev_item(),
            KeyCode::Enter => self.activate_selected()?,
            KeyCode::Char(' ') => match self.selected_item() {
                Some(Item::Field(f)) => self.cycle_field(f)?,
                Some(Item::Act(a)) => self.trigger(a),
                None => {}
            },
            KeyCode::Char('n') if self.tab == Tab::Crud => self.select_row(1),
            KeyCode::Char('p') if self.tab == Tab::Crud => self.select_row(-1),
            KeyCode::Char('e') if self.tab == Tab::Crud => self.edit_selected_row(),
            KeyCode::PageDown => self.response_scroll = self.response_scroll.saturating_add(10),
            KeyCode::PageUp => self.response_scroll = self.response_scroll.saturating_sub(10),
            KeyCode::Home => self.response_scroll = 0,
            _ => {}
        }
        Ok(false)
    }

    fn draw(&mut self, f: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(f.area());

        self.draw_header(f, chunks[0]);
        self.draw_tabs(f, chunks[1]);
        self.draw_main(f, chunks[2]);
        self.draw_footer(f, chunks[3]);
        self.draw_modal(f);
    }

    fn draw_header(&self, f: &mut ratatui::Frame, area: Rect) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let conn = &self.session.settings().connection;
        let busy = match &self.running {
            Some((label, started)) => Span::styled(
                format!("busy: {label} {}s", started.elapsed().as_secs()),
                Style::default().fg(Color::Yellow),
            ),
            None => Span::styled("idle", Style::default().fg(Color::Green)),
        };
        let line = Line::from(vec![
            Span::styled("Demand Console", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled(sanitize_cell(&conn.base_url), Style::default().fg(Color::Gray)),
            Span::raw("  "),
            Span::styled(
                format!("role={}", conn.role),
                Style::default().fg(Color::LightBlue),
            ),
            Span::raw("  "),
            busy,
            Span::raw("  "),
            Span::styled(now, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(Text::from(line)).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_tabs(&self, f: &mut ratatui::Frame, area: Rect) {
        let titles = Tab::ALL
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} {}", i + 1, t.title()))
            .collect::<Vec<_>>();
        let tabs = Tabs::new(titles)
            .select(self.tab.index())
            .style(Style::default().fg(Color::Gray))
            .highlight_style(
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_widget(tabs, area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame, area: Rect) {
        let hint = match (&self.input, self.tab) {
            (InputMode::EditField { field, .. }, _) if field.multiline() => {
                "[Ctrl+S] Save  [Enter] Newline  [Esc] Cancel"
            }
            (InputMode::EditField { .. }, _) => "[Enter] Save  [Esc] Cancel",
            (_, Tab::Crud) => {
                "[Tab/1-5] Tabs  [j/k] Move  [Enter] Edit/Run  [Space] Cycle  [n/p] Row  [e] Edit Row  [PgUp/PgDn] Scroll  [q] Quit"
            }
            _ => {
                "[Tab/1-5] Tabs  [j/k] Move  [Enter] Edit/Run  [Space] Cycle  [PgUp/PgDn] Scroll  [q] Quit"
            }
        };
        let mut lines = vec![Line::from(Span::styled(hint, Style::default().fg(Color::Gray)))];
        if let Some(s) = &self.status {
            lines.insert(
                0,
                Line::from(Span::styled(sanitize_cell(s), Style::default().fg(Color::Yellow))),
            );
        }
        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_main(&mut self, f: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(area);

        match self.tab {
            Tab::Crud => {
                let left = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(15), Constraint::Min(5)])
                    .split(cols[0]);
                self.draw_form(f, left[0]);
                self.draw_rows(f, left[1]);
            }
            Tab::Jobs => {
                let left = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Min(10), Constraint::Length(8)])
                    .split(cols[0]);
                self.draw_form(f, left[0]);
                self.draw_job_status(f, left[1]);
            }
            _ => self.draw_form(f, cols[0]),
        }
        self.draw_activity(f, cols[1]);
    }

    fn draw_form(&self, f: &mut ratatui::Frame, area: Rect) {
        let width = self
            .items()
            .iter()
            .filter_map(|it| match it {
                Item::Field(fl) => Some(fl.label().len()),
                Item::Act(_) => None,
            })
            .max()
            .unwrap_or(0);
        let items = self
            .items()
            .iter()
            .map(|it| match it {
                Item::Field(fl) => ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{:<width$}  ", fl.label()),
                        Style::default().fg(Color::Gray),
                    ),
                    Span::raw(sanitize_cell(&self.display_value(*fl))),
                ])),
                Item::Act(a) => ListItem::new(Line::from(Span::styled(
                    format!("[ {} ]", a.label()),
                    Style::default().fg(Color::LightBlue),
                ))),
            })
            .collect::<Vec<_>>();
        let mut state = ListState::default();
        state.select(Some(self.selected[self.tab.index()]));
        let list = List::new(items)
            .block(
                Block::default()
                    .title(self.tab.title())
                    .borders(Borders::ALL),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_rows(&mut self, f: &mut ratatui::Frame, area: Rect) {
        let rows = self.session.coordinator.rows();
        let cols = columns(rows);
        let title = format!(
            "Rows ({} of {})",
            rows.len(),
            self.session.coordinator.total()
        );
        let block = Block::default().title(title).borders(Borders::ALL);
        if cols.is_empty() {
            f.render_widget(Paragraph::new("No rows loaded.").block(block), area);
            return;
        }
        let header = Row::new(cols.iter().map(|c| Cell::from(sanitize_cell(c))))
            .style(Style::default().fg(Color::Yellow));
        let body = rows.iter().map(|r| {
            Row::new(cols.iter().map(|c| {
                Cell::from(
                    r.get(c)
                        .map(|v| sanitize_cell(&v.to_string()))
                        .unwrap_or_default(),
                )
            }))
        });
        let widths = vec![Constraint::Min(8); cols.len()];
        let table = Table::new(body, widths)
            .header(header)
            .block(block)
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        f.render_stateful_widget(table, area, &mut self.row_table);
    }

    fn draw_job_status(&self, f: &mut ratatui::Frame, area: Rect) {
        let jobs = &self.session.jobs;
        let mut lines = vec![Line::from(vec![
            Span::styled("state: ", Style::default().fg(Color::Gray)),
            Span::raw(jobs.state().label()),
        ])];
        if let Some(h) = jobs.active() {
            lines.push(Line::from(format!(
                "active: {} ({}, #{})",
                sanitize_cell(&h.job_id),
                h.kind,
                h.submitted_seq
            )));
        }
        if let Some(status) = jobs.state().status() {
            let s = JobSummary::from_value(status);
            lines.push(Line::from(format!(
                "status: {}  type: {}",
                sanitize_cell(&s.status),
                sanitize_cell(&s.job_type)
            )));
            if !s.updated_at.is_empty() {
                lines.push(Line::from(format!("updated: {}", sanitize_cell(&s.updated_at))));
            }
            if let Some(e) = s.error.as_deref() {
                lines.push(Line::from(Span::styled(
                    format!("error: {}", sanitize_cell(e)),
                    Style::default().fg(Color::Red),
                )));
            }
        }
        let p = Paragraph::new(Text::from(lines))
            .wrap(Wrap { trim: false })
            .block(Block::default().title("Active Job").borders(Borders::ALL));
        f.render_widget(p, area);
    }

    fn draw_activity(&self, f: &mut ratatui::Frame, area: Rect) {
        let parts = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(area);
        let log = self.session.activity();

        let request = Paragraph::new(to_text(&log.request_text()))
            .wrap(Wrap { trim: false })
            .block(Block::default().title("Last Request").borders(Borders::ALL));
        f.render_widget(request, parts[0]);

        let when = log
            .last()
            .map(|e| e.recorded_at.format(" %H:%M:%S ").to_string())
            .unwrap_or_default();
        let border = if log.is_failure() {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        let response = Paragraph::new(to_text(&log.response_text()))
            .wrap(Wrap { trim: false })
            .scroll((self.response_scroll, 0))
            .block(
                Block::default()
                    .title(format!("API Response{when}"))
                    .borders(Borders::ALL)
                    .border_style(border),
            );
        f.render_widget(response, parts[1]);
    }

    fn draw_modal(&self, f: &mut ratatui::Frame) {
        let InputMode::EditField {
            field,
            buffer,
            error,
        } = &self.input
        else {
            return;
        };
        let (w, h) = if field.multiline() { (80, 60) } else { (70, 25) };
        let area = centered_rect(w, h, f.area());
        let shadow = shadow_rect(area, f.area());
        f.render_widget(
            Fill {
                style: Style::default()
                    .bg(Color::Black)
                    .add_modifier(Modifier::DIM),
            },
            shadow,
        );
        f.render_widget(Clear, area);

        let mut text = vec![Line::from(vec![
            Span::styled("Edit: ", Style::default().fg(Color::Yellow)),
            Span::raw(field.label()),
        ])];
        if let Field::Method(..) = field {
            text.push(Line::from("sainte-lague | dhondt | wsjf (blank clears an override)"));
        }
        if let Some(e) = error {
            text.push(Line::from(Span::styled(
                format!("error: {e}"),
                Style::default().fg(Color::Red),
            )));
        }
        text.push(Line::from(""));
        text.extend(buffer.split('\n').map(|l| Line::from(l.to_string())));

        let p = Paragraph::new(Text::from(text))
            .style(Style::default().fg(Color::White).bg(Color::DarkGray))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title("Edit Value")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Double),
            );
        f.render_widget(p, area);
    }
}

fn to_text(raw: &str) -> Text<'static> {
    Text::from(
        sanitize_block(raw)
            .into_iter()
            .map(Line::from)
            .collect::<Vec<_>>(),
    )
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(first) => first.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

pub fn run_tui(session: Session) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let result = run_loop(&mut terminal, App::new(session));

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();

    let last = result?;
    if !last.is_empty() {
        println!("{last}");
    }
    Ok(())
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<String> {
    let tick = Duration::from_millis(100);
    loop {
        app.drain_completions();
        let mut draw_panicked = false;
        let draw_result = terminal.draw(|f| {
            if catch_unwind(AssertUnwindSafe(|| app.draw(f))).is_err() {
                draw_panicked = true;
            }
        });
        if draw_panicked || draw_result.is_err() {
            tracing::warn!(panicked = draw_panicked, "frame draw failed; redrawing");
            app.response_scroll = 0;
            let _ = terminal.clear();
            continue;
        }

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            match event::read().map_err(|e| Error::msg(e.to_string()))? {
                Event::Key(k) => {
                    if k.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.handle_key(k.code, k.modifiers)? {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }
    Ok(app.status.take().unwrap_or_default())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let vertical = popup_layout[1];
    let popup_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical);
    popup_layout[1]
}

fn shadow_rect(inner: Rect, bounds: Rect) -> Rect {
    let max_x = bounds.x.saturating_add(bounds.width);
    let max_y = bounds.y.saturating_add(bounds.height);
    let x = inner.x.saturating_add(1).min(max_x.saturating_sub(1));
    let y = inner.y.saturating_add(1).min(max_y.saturating_sub(1));
    Rect {
        x,
        y,
        width: inner.width.min(max_x.saturating_sub(x)),
        height: inner.height.min(max_y.saturating_sub(y)),
    }
}

struct Fill {
    style: Style,
}

impl Widget for Fill {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for y in area.y..area.y.saturating_add(area.height) {
            for x in area.x..area.x.saturating_add(area.width) {
                buf[(x, y)].set_char(' ').set_style(self.style);
            }
        }
    }
}
