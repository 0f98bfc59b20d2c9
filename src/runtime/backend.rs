//! The execution capability shared by every backend.

use serde::{Deserialize, Serialize};

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Config, DebugTrigger, DebuggerBackend, InProcessBackend, LineTrajectory, SimtestResult,
    SubprocessBackend, Task,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Subprocess,
    Inprocess,
    Debugger,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subprocess => "subprocess",
            Self::Inprocess => "inprocess",
            Self::Debugger => "debugger",
        }
    }
}

impl clap::ValueEnum for BackendKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Subprocess, Self::Inprocess, Self::Debugger]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// What one execution left behind.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    /// `None` when terminated by a signal or never started.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Absent when output was not captured (in-process, interactive).
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Console lines with the step each was printed in.
    pub lines: Option<LineTrajectory>,
    pub elapsed: Duration,
    pub trajectory_path: Option<PathBuf>,
    /// Cancelled before start, or stopped because of cancellation.
    pub cancelled: bool,
    pub timed_out: bool,
}

impl ExecutionRecord {
    pub fn cancelled_before_start() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    /// Stopped by the user rather than finishing on its own.
    pub fn interrupted(&self) -> bool {
        self.cancelled || self.signal.is_some_and(is_sigint) || self.exit_code == Some(130)
    }

    pub fn stdout_text(&self) -> &str {
        self.stdout.as_deref().unwrap_or("")
    }

    pub fn stderr_text(&self) -> &str {
        self.stderr.as_deref().unwrap_or("")
    }
}

#[cfg(unix)]
fn is_sigint(sig: i32) -> bool {
    sig == libc::SIGINT
}

#[cfg(not(unix))]
fn is_sigint(_sig: i32) -> bool {
    false
}

/// Runs one task with an argument vector whose first element is the program.
///
/// Implementations observe the task's cancellation token: a task cancelled
/// before start never launches anything.
pub trait ExecutionBackend: Send + Sync {
    fn run(&self, task: &Task, args: &[String]) -> SimtestResult<ExecutionRecord>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub capture_output: Option<bool>,
    pub timeout: Option<Duration>,
    pub debug_trigger: Option<DebugTrigger>,
}

/// One instance of each backend, configured for a run.
pub struct Backends {
    pub subprocess: SubprocessBackend,
    pub inprocess: InProcessBackend,
    pub debugger: DebuggerBackend,
}

impl Backends {
    pub fn from_config(config: &Config, opts: &BackendOptions) -> Self {
        let mut subprocess = SubprocessBackend::new();
        subprocess.capture_output = opts.capture_output.unwrap_or(config.capture_output);
        subprocess.terminate_on_cancel = config.terminate_on_cancel;
        subprocess.timeout = opts.timeout;
        Self {
            debugger: DebuggerBackend::new(config.debugger.clone(), opts.debug_trigger.clone(), subprocess.clone()),
            inprocess: InProcessBackend,
            subprocess,
        }
    }

    pub fn get(&self, kind: BackendKind) -> &dyn ExecutionBackend {
        match kind {
            BackendKind::Subprocess => &self.subprocess,
            BackendKind::Inprocess => &self.inprocess,
            BackendKind::Debugger => &self.debugger,
        }
    }
}
