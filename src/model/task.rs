//! Tasks: one simulation run of one config in one working directory.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{BackendKind, CancellationToken, Config, Outcome};

pub const DEFAULT_INI_FILE: &str = "omnetpp.ini";
pub const DEFAULT_CONFIG: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Smoke,
    Fingerprint,
    Speed,
    Sanitizer,
    Regression,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Smoke,
        Category::Fingerprint,
        Category::Regression,
        Category::Speed,
        Category::Sanitizer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smoke => "smoke",
            Self::Fingerprint => "fingerprint",
            Self::Speed => "speed",
            Self::Sanitizer => "sanitizer",
            Self::Regression => "regression",
        }
    }

    /// Build mode used unless overridden on the command line.
    pub fn default_mode(self) -> BuildMode {
        match self {
            Self::Sanitizer => BuildMode::Sanitize,
            _ => BuildMode::Release,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl clap::ValueEnum for Category {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Release,
    Debug,
    Sanitize,
}

impl clap::ValueEnum for BuildMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Release, Self::Debug, Self::Sanitize]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Release => clap::builder::PossibleValue::new("release"),
            Self::Debug => clap::builder::PossibleValue::new("debug"),
            Self::Sanitize => clap::builder::PossibleValue::new("sanitize"),
        })
    }
}

/// Identity of a task across runs; also the baseline store key.
///
/// `working_dir` is relative to the project root so stores stay portable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    #[serde(rename = "iniFile")]
    pub ini_file: String,
    pub config: String,
    pub run: u32,
}

impl TaskKey {
    pub fn new(
        working_dir: impl Into<String>,
        ini_file: impl Into<String>,
        config: impl Into<String>,
        run: u32,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            ini_file: ini_file.into(),
            config: config.into(),
            run,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.working_dir)?;
        if self.ini_file != DEFAULT_INI_FILE {
            write!(f, " -f {}", self.ini_file)?;
        }
        if self.config != DEFAULT_CONFIG {
            write!(f, " -c {}", self.config)?;
        }
        if self.run != 0 {
            write!(f, " -r {}", self.run)?;
        }
        Ok(())
    }
}

/// Immutable apart from its cancellation token.
#[derive(Debug, Clone)]
pub struct Task {
    pub key: TaskKey,
    /// Absolute working directory.
    pub working_dir: PathBuf,
    pub category: Category,
    pub backend: BackendKind,
    pub mode: BuildMode,
    pub sim_time_limit: Option<String>,
    /// Known-bad outcome declared next to the config.
    pub expected: Option<Outcome>,
    pub description: Option<String>,
    /// Where the engine writes the eventlog, when the category records one.
    pub eventlog_path: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Task {
    pub fn new(root: &Path, key: TaskKey, category: Category, backend: BackendKind) -> Self {
        let working_dir = if key.working_dir.is_empty() || key.working_dir == "." {
            root.to_path_buf()
        } else {
            root.join(&key.working_dir)
        };
        Self {
            key,
            working_dir,
            category,
            backend,
            mode: category.default_mode(),
            sim_time_limit: None,
            expected: None,
            description: None,
            eventlog_path: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Human-readable parameter string, omitting default values.
    pub fn parameters(&self) -> String {
        match &self.sim_time_limit {
            Some(limit) => format!("{} for {limit}", self.key),
            None => self.key.to_string(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Makes this task observe `run` in addition to its own flag.
    pub fn link_cancellation(&mut self, run: &CancellationToken) {
        self.cancel = self.cancel.with_parent(run);
    }

    pub fn resolve_eventlog(&mut self, config: &Config) {
        let rel = config
            .eventlog_pattern
            .replace("{config}", &self.key.config)
            .replace("{run}", &self.key.run.to_string());
        self.eventlog_path = Some(self.working_dir.join(rel));
    }

    /// Engine command line: program first, then the arguments.
    pub fn simulation_args(&self, config: &Config, extra: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(16 + config.default_args.len() + extra.len());
        args.push(format!("{}{}", config.executable, config.suffix_for(self.mode)));
        args.extend(config.default_args.iter().cloned());
        args.extend(
            ["-s", "-u", "Cmdenv", "-f", self.key.ini_file.as_str(), "-c", self.key.config.as_str(), "-r"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.key.run.to_string());
        if let Some(limit) = &self.sim_time_limit {
            args.push(format!("--sim-time-limit={limit}"));
        }
        if self.eventlog_path.is_some() {
            args.push("--record-eventlog=true".to_string());
        }
        args.extend(extra.iter().cloned());
        args
    }
}

/// `[07/12]`-style prefix; the index is zero-padded to the width of the total.
pub fn progress_prefix(index: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("[{index:0width$}/{total}]")
}
