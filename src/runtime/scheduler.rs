//! Parallel task scheduler: filtering, dispatch order, worker pool and
//! result aggregation.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore as _, SeedableRng as _};
use regex::Regex;

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, mpsc};
use std::time::Instant;

use crate::{
    BackendKind, CancellationToken, Outcome, Report, SimtestError, SimtestResult, Task, TaskResult,
    progress_prefix,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchOrder {
    #[default]
    Fifo,
    /// Reproducible shuffle derived from the seed.
    Random(u64),
}

/// Queue popping either front-first or at a seeded random position.
#[derive(Debug)]
pub struct DispatchQueue<T> {
    order: DispatchOrder,
    queue: VecDeque<T>,
    rng: ChaCha20Rng,
}

impl<T> DispatchQueue<T> {
    pub fn new(order: DispatchOrder) -> Self {
        let seed = match order {
            DispatchOrder::Fifo => 0,
            DispatchOrder::Random(seed) => seed,
        };
        let seed_bytes = blake3::hash(&seed.to_le_bytes()).as_bytes().to_owned();
        let mut seed32 = [0u8; 32];
        seed32.copy_from_slice(&seed_bytes[..32]);
        Self {
            order,
            queue: VecDeque::new(),
            rng: ChaCha20Rng::from_seed(seed32),
        }
    }

    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pop_next(&mut self) -> Option<T> {
        if self.queue.is_empty() {
            return None;
        }
        let idx = match self.order {
            DispatchOrder::Fifo => 0usize,
            DispatchOrder::Random(_) => (self.rng.next_u64() as usize) % self.queue.len(),
        };
        self.queue.remove(idx)
    }
}

/// Name-based task selection over the parameter string.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    runs: Option<Vec<u32>>,
}

impl TaskFilter {
    /// `full_match` anchors the patterns to the whole parameter string.
    pub fn new(include: Option<&str>, exclude: Option<&str>, full_match: bool) -> SimtestResult<Self> {
        let compile = |pattern: &str| {
            let source = if full_match {
                format!("^(?:{pattern})$")
            } else {
                pattern.to_string()
            };
            Regex::new(&source)
                .map_err(|e| SimtestError::InvalidArgument(format!("invalid filter {pattern:?}: {e}")))
        };
        Ok(Self {
            include: include.map(compile).transpose()?,
            exclude: exclude.map(compile).transpose()?,
            runs: None,
        })
    }

    pub fn with_runs(mut self, runs: Vec<u32>) -> Self {
        self.runs = if runs.is_empty() { None } else { Some(runs) };
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        let params = task.parameters();
        self.include.as_ref().is_none_or(|re| re.is_match(&params))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(&params))
            && self.runs.as_ref().is_none_or(|runs| runs.contains(&task.key.run))
    }

    pub fn apply(&self, tasks: Vec<Task>) -> Vec<Task> {
        tasks.into_iter().filter(|t| self.matches(t)).collect()
    }
}

/// Turns one task into its classified result. Must not block on anything but
/// the execution itself.
pub trait TaskRunner: Sync {
    fn run_task(&self, task: &Task) -> TaskResult;
}

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub jobs: usize,
    pub filter: TaskFilter,
    pub order: DispatchOrder,
    pub cancel: CancellationToken,
    /// Print `[i/N]` progress lines to stdout.
    pub progress: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            jobs: crate::default_jobs(),
            filter: TaskFilter::default(),
            order: DispatchOrder::Fifo,
            cancel: CancellationToken::new(),
            progress: false,
        }
    }
}

struct Dispatch {
    index: usize,
    task: Task,
}

/// Runs every task that passes the filter and returns one result per task in
/// completion order. Never fails: backend problems become ERROR results and
/// tasks not started before cancellation become CANCEL results.
pub fn run_all(tasks: Vec<Task>, opts: &ScheduleOptions, runner: &dyn TaskRunner) -> Report {
    let selected = opts.filter.apply(tasks);
    let total = selected.len();
    if total == 0 {
        tracing::info!("no tasks selected");
        return Report::default();
    }

    let mut pooled = DispatchQueue::new(opts.order);
    let mut lane = DispatchQueue::new(opts.order);
    for (i, mut task) in selected.into_iter().enumerate() {
        task.link_cancellation(&opts.cancel);
        let item = Dispatch { index: i + 1, task };
        if item.task.backend == BackendKind::Inprocess {
            lane.push(item);
        } else {
            pooled.push(item);
        }
    }
    let workers = opts.jobs.max(1).min(pooled.len());
    let has_lane = !lane.is_empty();
    tracing::info!(
        "running {total} tasks on {workers} workers{}",
        if has_lane { " plus the in-process lane" } else { "" }
    );

    let started = Instant::now();
    let pooled = Mutex::new(pooled);
    let lane = Mutex::new(lane);
    let (tx, rx) = mpsc::channel::<TaskResult>();
    let mut report = Report::default();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &pooled;
            scope.spawn(move || drain(queue, total, opts, runner, &tx));
        }
        if has_lane {
            let tx = tx.clone();
            let queue = &lane;
            scope.spawn(move || drain(queue, total, opts, runner, &tx));
        }
        drop(tx);
        for result in rx {
            report.push(result);
        }
    });

    let counts = report.counts();
    tracing::info!(
        "finished {} tasks in {}: {} pass, {} fail, {} error, {} cancel",
        counts.total,
        crate::format_elapsed(started.elapsed()),
        counts.pass,
        counts.fail,
        counts.error,
        counts.cancel
    );
    report
}

fn drain(
    queue: &Mutex<DispatchQueue<Dispatch>>,
    total: usize,
    opts: &ScheduleOptions,
    runner: &dyn TaskRunner,
    tx: &mpsc::Sender<TaskResult>,
) {
    loop {
        let next = match queue.lock() {
            Ok(mut q) => q.pop_next(),
            Err(poisoned) => poisoned.into_inner().pop_next(),
        };
        let Some(Dispatch { index, task }) = next else {
            return;
        };
        let prefix = progress_prefix(index, total);
        let result = if task.is_cancelled() {
            TaskResult::cancelled(&task)
        } else {
            if opts.progress {
                println!("{prefix} Running {}", task.parameters());
            }
            tracing::debug!("dispatching {} via {}", task.parameters(), task.backend.as_str());
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| runner.run_task(&task)))
                .unwrap_or_else(|_| TaskResult::error(&task, "task runner panicked"));
            if result.elapsed_ms == 0 {
                result.with_elapsed_ms(crate::duration_ms(started.elapsed()))
            } else {
                result
            }
        };
        if opts.progress {
            let marker = if result.outcome == Outcome::Pass { "" } else { " <<<" };
            println!("{prefix} {}: {}{marker}", result.parameters, result.line());
        }
        if tx.send(result).is_err() {
            return;
        }
    }
}
