//! Category runs (`simtest smoke|fingerprint|speed|sanitizer|regression|all`)
//! and `simtest baseline accept`.

use serde::Serialize;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    AcceptOptions, AcceptOutcome, BackendKind, BackendOptions, Backends, BaselineStore, BuildMode,
    CancellationToken, Category, CategoryRunner, Config, DebugTrigger, DispatchOrder, Report,
    Reporter, RunSummary, ScheduleOptions, SimtestError, SimtestResult, TaskFilter, TaskTimeout,
};

/// Selection and execution flags shared by every category command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// Project root (defaults to the project environment variable, then the cwd).
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Regex matched against the task parameter string.
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// Regex of tasks to skip.
    #[arg(long)]
    pub exclude: Option<String>,

    /// Anchor filters to the whole parameter string.
    #[arg(long)]
    pub full_match: bool,

    /// Only these run numbers (repeatable).
    #[arg(long = "run", value_name = "N")]
    pub runs: Vec<u32>,

    /// Worker pool size (default: CPU count).
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Capture simulator output instead of passing it through.
    #[arg(long, conflicts_with = "no_capture")]
    pub capture: bool,

    #[arg(long)]
    pub no_capture: bool,

    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Overrides the category's build mode.
    #[arg(long)]
    pub mode: Option<BuildMode>,

    /// Per-task wall-clock limit (e.g. "90s"); subprocess-based backends only.
    #[arg(long)]
    pub timeout: Option<TaskTimeout>,

    /// Dispatch tasks in a reproducible random order.
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub reporter: Option<Reporter>,

    /// Debugger backend: stop when the engine reaches this step.
    #[arg(long, conflicts_with = "break_when")]
    pub break_at_step: Option<u64>,

    /// Debugger backend: stop whenever this expression holds.
    #[arg(long)]
    pub break_when: Option<String>,

    /// Suppress per-task progress lines.
    #[arg(long)]
    pub quiet: bool,
}

impl RunArgs {
    pub fn capture_output(&self) -> Option<bool> {
        if self.no_capture {
            Some(false)
        } else if self.capture {
            Some(true)
        } else {
            None
        }
    }

    pub fn debug_trigger(&self) -> Option<DebugTrigger> {
        match (&self.break_at_step, &self.break_when) {
            (Some(step), _) => Some(DebugTrigger::AtStep(*step)),
            (None, Some(expr)) => Some(DebugTrigger::When(expr.clone())),
            (None, None) => None,
        }
    }

    pub fn filter(&self) -> SimtestResult<TaskFilter> {
        Ok(TaskFilter::new(self.filter.as_deref(), self.exclude.as_deref(), self.full_match)?
            .with_runs(self.runs.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub categories: Vec<Category>,
    pub args: RunArgs,
    pub cancel: CancellationToken,
    /// Print `[i/N]` progress lines to stdout.
    pub progress: bool,
    /// Fold observations into the baseline store after the run.
    pub accept: Option<AcceptOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRun {
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<AcceptOutcome>,
}

/// Generates, schedules and classifies the tasks of every requested category,
/// then persists the run report.
pub fn run_categories(config: &Config, request: &RunRequest) -> SimtestResult<CategoryRun> {
    if request.categories.is_empty() {
        return Err(SimtestError::InvalidArgument("no category selected".to_string()));
    }
    let args = &request.args;
    let root = config.resolve_project_root(args.project.as_deref())?;
    let baseline_path = config.baseline_file();
    let baseline = Arc::new(BaselineStore::load(&baseline_path)?);
    tracing::debug!(
        "project root {}, {} baseline entries from {}",
        root.display(),
        baseline.len(),
        baseline_path.display()
    );

    let backends = Backends::from_config(
        config,
        &BackendOptions {
            capture_output: args.capture_output(),
            timeout: args.timeout.map(|t| t.0),
            debug_trigger: args.debug_trigger(),
        },
    );
    let runner = CategoryRunner::new(config, Arc::clone(&baseline), backends).recording(request.accept.is_some());
    let backend = args.backend.unwrap_or(config.backend);
    let schedule = ScheduleOptions {
        jobs: worker_count(config, args, backend),
        filter: args.filter()?,
        order: args.seed.map(DispatchOrder::Random).unwrap_or_default(),
        cancel: request.cancel.clone(),
        progress: request.progress,
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = crate::wall_time_iso_utc();
    let started = Instant::now();
    let mut report = Report::default();
    for category in &request.categories {
        let mut tasks = crate::generate_tasks(&root, config, *category, backend)?;
        if let Some(mode) = args.mode {
            for task in &mut tasks {
                task.mode = mode;
            }
        }
        tracing::info!("{category}: {} tasks generated", tasks.len());
        report.extend(crate::run_all(tasks, &schedule, &runner));
    }

    let mut summary = RunSummary::new(
        run_id,
        request.categories.clone(),
        &report,
        started_at,
        crate::duration_ms(started.elapsed()),
    );
    crate::persist_run(config, &mut summary, args.reporter.unwrap_or(config.reporter))?;

    let accepted = match &request.accept {
        Some(opts) => Some(crate::accept(&baseline_path, &report.results, opts)?),
        None => None,
    };
    Ok(CategoryRun { summary, accepted })
}

/// Interactive debugger sessions share one terminal, so they run one at a time.
fn worker_count(config: &Config, args: &RunArgs, backend: BackendKind) -> usize {
    let requested = args.jobs.filter(|j| *j > 0).unwrap_or_else(|| config.jobs_or_default());
    if backend == BackendKind::Debugger && !config.debugger.batch {
        if requested > 1 {
            tracing::warn!("interactive debugger sessions run serially; ignoring {requested} jobs");
        }
        return 1;
    }
    requested
}

/// Categories run by `all`, in execution order.
pub fn all_categories() -> Vec<Category> {
    Category::ALL.to_vec()
}
