//! `simtest.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{SimtestError, SimtestResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for run artifacts and the baseline store.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Environment variable consulted for the project root when `--project` is absent.
    #[serde(default = "default_project_env")]
    pub project_env: String,

    /// Simulation executable, without the build-mode suffix.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Arguments placed right after the executable on every invocation.
    #[serde(default)]
    pub default_args: Vec<String>,

    /// Globs (relative to the project root) selecting ini files to enumerate.
    #[serde(default = "default_ini_globs")]
    pub ini_globs: Vec<String>,

    /// Baseline store file; relative paths resolve against `base_dir`.
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,

    /// Eventlog location relative to the task working directory.
    /// `{config}` and `{run}` are substituted.
    #[serde(default = "default_eventlog_pattern")]
    pub eventlog_pattern: String,

    /// Fingerprint ingredients passed alongside the expected fingerprint.
    #[serde(default = "default_ingredients")]
    pub ingredients: String,

    /// Extra arguments for fingerprint runs.
    #[serde(default = "default_fingerprint_args")]
    pub fingerprint_args: Vec<String>,

    #[serde(default)]
    pub backend: crate::BackendKind,

    #[serde(default = "default_reporter")]
    pub reporter: crate::Reporter,

    /// Worker pool size; unset means one worker per CPU.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Capture child stdout/stderr (otherwise inherited).
    #[serde(default = "default_true")]
    pub capture_output: bool,

    /// Send SIGTERM to in-flight subprocesses on interrupt.
    #[serde(default = "default_true")]
    pub terminate_on_cancel: bool,

    /// Allowed relative slowdown against the recorded baseline time.
    #[serde(default = "default_speed_tolerance")]
    pub speed_tolerance: f64,

    #[serde(default)]
    pub mode_suffixes: ModeSuffixes,

    #[serde(default)]
    pub debugger: DebuggerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSuffixes {
    #[serde(default = "default_release_suffix")]
    pub release: String,
    #[serde(default = "default_debug_suffix")]
    pub debug: String,
    #[serde(default = "default_sanitize_suffix")]
    pub sanitize: String,
}

impl Default for ModeSuffixes {
    fn default() -> Self {
        Self {
            release: default_release_suffix(),
            debug: default_debug_suffix(),
            sanitize: default_sanitize_suffix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerConfig {
    #[serde(default = "default_debugger_program")]
    pub program: String,
    /// Function the engine calls once per step; breakpoints are set on it.
    #[serde(default = "default_break_symbol")]
    pub break_symbol: String,
    /// Expression evaluating to the current step index at `break_symbol`.
    #[serde(default = "default_step_expression")]
    pub step_expression: String,
    /// Run non-interactively and exit with the debuggee's status.
    #[serde(default = "default_true")]
    pub batch: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            program: default_debugger_program(),
            break_symbol: default_break_symbol(),
            step_expression: default_step_expression(),
            batch: true,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".simtest")
}

fn default_project_env() -> String {
    "SIMTEST_PROJECT_ROOT".to_string()
}

fn default_executable() -> String {
    "opp_run".to_string()
}

fn default_ini_globs() -> Vec<String> {
    vec!["**/*.ini".to_string()]
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from("baseline.json")
}

fn default_eventlog_pattern() -> String {
    "results/{config}-#{run}.elog".to_string()
}

fn default_ingredients() -> String {
    "tplx".to_string()
}

fn default_fingerprint_args() -> Vec<String> {
    ["--vector-recording", "false", "--scalar-recording", "false"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_reporter() -> crate::Reporter {
    crate::Reporter::Pretty
}

fn default_true() -> bool {
    true
}

fn default_speed_tolerance() -> f64 {
    0.5
}

fn default_release_suffix() -> String {
    "_release".to_string()
}

fn default_debug_suffix() -> String {
    "_dbg".to_string()
}

fn default_sanitize_suffix() -> String {
    "_sanitize".to_string()
}

fn default_debugger_program() -> String {
    "gdb".to_string()
}

fn default_break_symbol() -> String {
    "cSimulation::executeEvent".to_string()
}

fn default_step_expression() -> String {
    "getSimulation()->getEventNumber()".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            project_env: default_project_env(),
            executable: default_executable(),
            default_args: Vec::new(),
            ini_globs: default_ini_globs(),
            baseline_path: default_baseline_path(),
            eventlog_pattern: default_eventlog_pattern(),
            ingredients: default_ingredients(),
            fingerprint_args: default_fingerprint_args(),
            backend: crate::BackendKind::default(),
            reporter: default_reporter(),
            jobs: None,
            capture_output: true,
            terminate_on_cancel: true,
            speed_tolerance: default_speed_tolerance(),
            mode_suffixes: ModeSuffixes::default(),
            debugger: DebuggerConfig::default(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    pub fn baseline_file(&self) -> PathBuf {
        if self.baseline_path.is_absolute() {
            self.baseline_path.clone()
        } else {
            self.base_dir.join(&self.baseline_path)
        }
    }

    pub fn jobs_or_default(&self) -> usize {
        self.jobs.filter(|j| *j > 0).unwrap_or_else(default_jobs)
    }

    pub fn suffix_for(&self, mode: crate::BuildMode) -> &str {
        match mode {
            crate::BuildMode::Release => &self.mode_suffixes.release,
            crate::BuildMode::Debug => &self.mode_suffixes.debug,
            crate::BuildMode::Sanitize => &self.mode_suffixes.sanitize,
        }
    }

    /// Absolute project root: explicit selector, then `project_env`, then the current directory.
    pub fn resolve_project_root(&self, explicit: Option<&Path>) -> SimtestResult<PathBuf> {
        let candidate = match explicit {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(&self.project_env) {
                Some(v) if !v.is_empty() => PathBuf::from(v),
                _ => std::env::current_dir()?,
            },
        };
        candidate.canonicalize().map_err(|e| {
            SimtestError::Config(format!(
                "project root {} is not accessible: {e}",
                candidate.display()
            ))
        })
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
executable = "aloha"
jobs = 3
speed_tolerance = 0.25

[debugger]
program = "lldb"
"#,
        )
        .unwrap();
        assert_eq!(cfg.executable, "aloha");
        assert_eq!(cfg.jobs_or_default(), 3);
        assert_eq!(cfg.speed_tolerance, 0.25);
        assert_eq!(cfg.debugger.program, "lldb");
        assert!(cfg.debugger.batch);
        assert_eq!(cfg.mode_suffixes.release, "_release");
        assert_eq!(cfg.baseline_file(), PathBuf::from(".simtest/baseline.json"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let p = std::env::temp_dir().join(format!("simtest-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = Config::load_optional(&p);
        assert_eq!(cfg.base_dir, PathBuf::from(".simtest"));
        assert_eq!(cfg.ini_globs, vec!["**/*.ini".to_string()]);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let p = std::env::temp_dir().join(format!("simtest-bad-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&p, "jobs = [not toml").unwrap();
        let cfg = Config::load_optional(&p);
        assert!(cfg.jobs.is_none());
        let _ = std::fs::remove_file(&p);
    }

    #[test]
    fn explicit_project_root_is_made_absolute() {
        let cfg = Config::default();
        let root = cfg.resolve_project_root(Some(Path::new("."))).unwrap();
        assert!(root.is_absolute());
        assert!(cfg.resolve_project_root(Some(Path::new("/definitely/not/here"))).is_err());
    }
}
