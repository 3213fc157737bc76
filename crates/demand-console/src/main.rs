use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use demand_console::{Error, Result};
use demand_console::config::{self, Overrides, Role};
use demand_console::datasets::DatasetId;
use demand_console::entities::Entity;
use demand_console::jobs::{DEFAULT_LIST_LIMIT, JobKind};
use demand_console::logging::{self, DEFAULT_LOG_FILE, LogFormat, LogTarget};
use demand_console::methods::{Method, MethodSelection};
use demand_console::session::{Action, Session, WorkflowOp};

#[derive(Debug, Parser)]
#[command(name = "demand", author, version, about = "Demand prioritization console")]
struct Cli {
    /// Settings TOML (defaults to ./demand.toml when present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// API key sent as X-API-Key (empty string clears it)
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Role sent as X-Role
    #[arg(long, global = true, value_enum)]
    role: Option<Role>,
    /// Backend config path override (empty string clears it)
    #[arg(long, global = true)]
    config_path: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Log file used while the terminal console is open
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive terminal console
    Tui,
    /// Print the resolved settings (api key masked)
    Settings,
    /// GET /api/v1/health
    Health,
    /// GET /api/v1/version
    Version,
    /// Load a page of rows from a dataset
    Rows {
        #[arg(value_enum)]
        dataset: DatasetId,
        #[command(flatten)]
        target: DatasetTarget,
        #[arg(long, default_value_t = demand_console::datasets::DEFAULT_LIMIT)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Insert or replace one row by key
    Upsert {
        #[arg(value_enum)]
        dataset: DatasetId,
        #[command(flatten)]
        target: DatasetTarget,
        /// Row as a JSON object, or @file
        #[arg(long)]
        row: String,
    },
    /// Delete one row by key
    Delete {
        #[arg(value_enum)]
        dataset: DatasetId,
        #[command(flatten)]
        target: DatasetTarget,
        #[arg(long)]
        key: String,
    },
    /// Replace every row of a dataset
    Overwrite {
        #[arg(value_enum)]
        dataset: DatasetId,
        #[command(flatten)]
        target: DatasetTarget,
        /// Rows as a JSON array of objects, or @file
        #[arg(long)]
        rows: String,
    },
    /// Upload an ideas CSV; prints the stored server path
    UploadIdeas { file: PathBuf },
    /// List or rename requesting areas and revenue streams
    Entities {
        #[command(subcommand)]
        cmd: EntityCmd,
    },
    /// Run a workflow synchronously
    Workflow {
        #[command(subcommand)]
        cmd: WorkflowCmd,
    },
    /// Background jobs
    Jobs {
        #[command(subcommand)]
        cmd: JobsCmd,
    },
}

#[derive(Debug, Args)]
struct DatasetTarget {
    /// CSV path (defaults to the dataset's registered path)
    #[arg(long)]
    path: Option<String>,
    /// Key column (defaults to the dataset's registered key column)
    #[arg(long)]
    key_column: Option<String>,
}

#[derive(Debug, Subcommand)]
enum EntityCmd {
    RaList,
    RaRename {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    RsList,
    RsRename {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
}

#[derive(Debug, Args, Default)]
struct MethodArgs {
    #[arg(long, value_enum)]
    method: Option<Method>,
    #[arg(long, value_enum)]
    now_method: Option<Method>,
    #[arg(long, value_enum)]
    next_method: Option<Method>,
    #[arg(long, value_enum)]
    later_method: Option<Method>,
}

impl MethodArgs {
    fn selection(&self) -> MethodSelection {
        let s = |m: Option<Method>| m.map(|m| m.as_str().to_string());
        MethodSelection {
            now_method: s(self.now_method),
            next_method: s(self.next_method),
            later_method: s(self.later_method),
            ..match self.method {
                Some(m) => MethodSelection::with_default(m.as_str()),
                None => MethodSelection::default(),
            }
        }
    }
}

#[derive(Debug, Args)]
struct WorkflowArgs {
    /// Ideas path override (e.g. a path returned by upload-ideas)
    #[arg(long)]
    ideas_path: Option<String>,
    #[command(flatten)]
    methods: MethodArgs,
    #[arg(long)]
    output_dir: Option<String>,
    /// Output path for prioritize-rs / prioritize-global / compare
    #[arg(long)]
    output_path: Option<String>,
    /// Compare cutoff; 0 means no cutoff
    #[arg(long)]
    top_n: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum WorkflowCmd {
    Validate(WorkflowArgs),
    Prioritize(WorkflowArgs),
    PrioritizeRs(WorkflowArgs),
    PrioritizeGlobal(WorkflowArgs),
    Compare(WorkflowArgs),
}

#[derive(Debug, Subcommand)]
enum JobsCmd {
    /// Submit a background job
    Submit {
        #[arg(value_enum)]
        kind: JobKind,
        #[command(flatten)]
        methods: MethodArgs,
        #[arg(long)]
        output_dir: Option<String>,
        #[arg(long)]
        output_path: Option<String>,
        #[arg(long)]
        top_n: Option<u64>,
    },
    /// List recent jobs
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: u32,
    },
    /// Fetch the status of one job
    Status { job_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_target = match cli.cmd {
        Command::Tui => LogTarget::File(cli.log_file.as_deref().unwrap_or(Path::new(DEFAULT_LOG_FILE))),
        _ => LogTarget::Stderr,
    };
    logging::init(cli.log_format, log_target)?;

    let overrides = Overrides {
        base_url: cli.base_url.clone(),
        api_key: cli.api_key.clone(),
        role: cli.role,
        config_path: cli.config_path.clone(),
    };
    let settings = config::load_settings(cli.settings.as_deref(), &overrides)?;

    match cli.cmd {
        Command::Tui => demand_console::ui::run_tui(Session::new(settings)?),
        Command::Settings => {
            print!("{}", settings.to_toml_masked()?);
            Ok(())
        }
        cmd => {
            let mut session = Session::new(settings)?;
            let action = prepare(&mut session, cmd)?;
            let ok = session.run(action);
            println!("{}", session.activity().response_text());
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Copies command arguments into session state and picks the action to run.
fn prepare(session: &mut Session, cmd: Command) -> Result<Action> {
    let action = match cmd {
        Command::Tui | Command::Settings => {
            return Err(Error::msg("command does not issue a request"));
        }
        Command::Health => Action::Health,
        Command::Version => Action::Version,
        Command::Rows {
            dataset,
            target,
            limit,
            offset,
        } => {
            select(session, dataset, &target);
            session.coordinator.limit = limit.to_string();
            session.coordinator.offset = offset.to_string();
            Action::LoadRows
        }
        Command::Upsert {
            dataset,
            target,
            row,
        } => {
            select(session, dataset, &target);
            session.coordinator.row_draft = read_arg(&row)?;
            Action::Upsert
        }
        Command::Delete {
            dataset,
            target,
            key,
        } => {
            select(session, dataset, &target);
            session.coordinator.key_value = key;
            Action::Delete
        }
        Command::Overwrite {
            dataset,
            target,
            rows,
        } => {
            select(session, dataset, &target);
            session.coordinator.overwrite_draft = read_arg(&rows)?;
            Action::Overwrite
        }
        Command::UploadIdeas { file } => Action::UploadIdeas(file),
        Command::Entities { cmd } => match cmd {
            EntityCmd::RaList => Action::ListEntities(Entity::RequestingArea),
            EntityCmd::RsList => Action::ListEntities(Entity::RevenueStream),
            EntityCmd::RaRename { old, new } => {
                session.entities.ra_old = old;
                session.entities.ra_new = new;
                Action::RenameEntity(Entity::RequestingArea)
            }
            EntityCmd::RsRename { old, new } => {
                session.entities.rs_old = old;
                session.entities.rs_new = new;
                Action::RenameEntity(Entity::RevenueStream)
            }
        },
        Command::Workflow { cmd } => {
            let (op, args) = match cmd {
                WorkflowCmd::Validate(a) => (WorkflowOp::Validate, a),
                WorkflowCmd::Prioritize(a) => (WorkflowOp::Prioritize, a),
                WorkflowCmd::PrioritizeRs(a) => (WorkflowOp::PrioritizeRs, a),
                WorkflowCmd::PrioritizeGlobal(a) => (WorkflowOp::PrioritizeGlobal, a),
                WorkflowCmd::Compare(a) => (WorkflowOp::Compare, a),
            };
            let form = &mut session.workflows;
            form.methods = args.methods.selection();
            if let Some(p) = args.ideas_path {
                form.ideas_path_override = p;
            }
            if let Some(d) = args.output_dir {
                form.output_dir = d;
            }
            if let Some(p) = args.output_path {
                match op {
                    WorkflowOp::PrioritizeRs => form.output_rs = p,
                    WorkflowOp::PrioritizeGlobal => form.output_global = p,
                    _ => form.output_compare = p,
                }
            }
            if let Some(n) = args.top_n {
                form.top_n = n.to_string();
            }
            Action::Workflow(op)
        }
        Command::Jobs { cmd } => match cmd {
            JobsCmd::Submit {
                kind,
                methods,
                output_dir,
                output_path,
                top_n,
            } => {
                let form = &mut session.job_form;
                form.methods = methods.selection();
                if let Some(d) = output_dir {
                    form.output_dir = d;
                }
                if let Some(p) = output_path {
                    form.compare_output = p;
                }
                if let Some(n) = top_n {
                    form.top_n = Some(n).filter(|n| *n > 0);
                }
                Action::SubmitJob(kind)
            }
            JobsCmd::List { limit } => {
                session.job_list_limit = limit;
                Action::ListJobs
            }
            JobsCmd::Status { job_id } => {
                session.jobs.job_id_input = job_id;
                Action::PollJob
            }
        },
    };
    Ok(action)
}

fn select(session: &mut Session, dataset: DatasetId, target: &DatasetTarget) {
    session.coordinator.select_dataset(dataset);
    if let Some(p) = target.path.as_ref() {
        session.coordinator.path = p.clone();
    } else {
        session.coordinator.path = session.settings().paths.get(dataset).to_string();
    }
    if let Some(k) = target.key_column.as_ref() {
        session.coordinator.key_column = k.clone();
    }
}

/// JSON arguments may be given inline or as `@path`.
fn read_arg(raw: &str) -> Result<String> {
    match raw.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(raw.to_string()),
    }
}
