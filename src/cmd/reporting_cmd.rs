//! CLI report commands (`simtest report ...`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{render_junit_xml, Config, Reporter, RunManifest, RunSummary, SimtestError, SimtestResult};

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Re-render a stored run report.
    Show {
        /// Run id, run directory, or `latest`.
        run: String,
        #[arg(long, default_value = "pretty")]
        format: Reporter,
    },
    /// List stored runs, newest first.
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub format: Reporter,
    pub content: String,
}

pub fn report_command(config: &Config, command: &ReportCommand) -> SimtestResult<serde_json::Value> {
    match command {
        ReportCommand::Show { run, format } => {
            let summary = load_summary(config, run)?;
            match format {
                Reporter::Json => Ok(serde_json::to_value(summary)?),
                Reporter::Pretty => Ok(serde_json::to_value(ReportEnvelope {
                    format: *format,
                    content: summary.pretty(),
                })?),
                Reporter::Junit => Ok(serde_json::to_value(ReportEnvelope {
                    format: *format,
                    content: render_junit_xml(&summary),
                })?),
            }
        }
        ReportCommand::List => Ok(serde_json::to_value(list_runs(config)?)?),
    }
}

/// Stored run manifests, newest first.
pub fn list_runs(config: &Config) -> SimtestResult<Vec<RunManifest>> {
    let runs_dir = config.runs_dir();
    let entries = match std::fs::read_dir(&runs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut manifests = Vec::new();
    for entry in entries {
        let path = entry?.path().join("manifest.json");
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match serde_json::from_slice::<RunManifest>(&bytes) {
            Ok(m) => manifests.push(m),
            Err(err) => tracing::warn!("skipping unreadable manifest {}: {err}", path.display()),
        }
    }
    manifests.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
    Ok(manifests)
}

/// `run` may be a run id, a run directory, a file inside one, or `latest`.
pub fn resolve_run_dir(config: &Config, run: &str) -> SimtestResult<PathBuf> {
    if run == "latest" {
        return list_runs(config)?
            .first()
            .map(|m| config.runs_dir().join(&m.run_id))
            .ok_or_else(|| SimtestError::Report(format!("no runs under {}", config.runs_dir().display())));
    }
    let path = Path::new(run);
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }
    if path.is_file()
        && let Some(parent) = path.parent()
    {
        return Ok(parent.to_path_buf());
    }
    Ok(config.runs_dir().join(run))
}

fn load_summary(config: &Config, run: &str) -> SimtestResult<RunSummary> {
    let dir = resolve_run_dir(config, run)?;
    let report_json = dir.join("report.json");
    if !report_json.exists() {
        return Err(SimtestError::Report(format!(
            "no report found for {run:?} (looked for {})",
            report_json.display()
        )));
    }
    let bytes = std::fs::read(&report_json)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendKind, Category, Report, Task, TaskKey, TaskResult};

    fn config() -> Config {
        Config {
            base_dir: std::env::temp_dir().join(format!("simtest-report-{}", uuid::Uuid::new_v4())),
            ..Config::default()
        }
    }

    fn persist(config: &Config, run_id: &str, started_at: &str, fail: bool) {
        let task = Task::new(
            Path::new("/p"),
            TaskKey::new("examples/aloha", "omnetpp.ini", "General", 0),
            Category::Smoke,
            BackendKind::Subprocess,
        );
        let mut report = Report::default();
        report.push(if fail {
            TaskResult::fail(&task, "Non-zero exit code: 1")
        } else {
            TaskResult::pass(&task)
        });
        let mut summary = RunSummary::new(
            run_id.to_string(),
            vec![Category::Smoke],
            &report,
            started_at.to_string(),
            12,
        );
        crate::persist_run(config, &mut summary, Reporter::Pretty).unwrap();
    }

    #[test]
    fn show_renders_each_format() {
        let cfg = config();
        persist(&cfg, "run-a", "2026-01-01T00:00:00Z", true);

        let json = report_command(&cfg, &ReportCommand::Show { run: "run-a".to_string(), format: Reporter::Json }).unwrap();
        assert_eq!(json["runId"], "run-a");
        assert_eq!(json["status"], "FAIL");

        let pretty = report_command(&cfg, &ReportCommand::Show { run: "run-a".to_string(), format: Reporter::Pretty }).unwrap();
        let text = pretty["content"].as_str().unwrap();
        assert!(text.contains("FAIL   examples/aloha: Non-zero exit code: 1"));
        assert!(text.contains("1 TOTAL, 0 PASS, 1 FAIL, 0 ERROR, 0 CANCEL"));

        let junit = report_command(&cfg, &ReportCommand::Show { run: "run-a".to_string(), format: Reporter::Junit }).unwrap();
        assert!(junit["content"].as_str().unwrap().contains("<failure message=\"Non-zero exit code: 1\"/>"));
        let _ = std::fs::remove_dir_all(&cfg.base_dir);
    }

    #[test]
    fn latest_picks_newest_run() {
        let cfg = config();
        persist(&cfg, "old", "2026-01-01T00:00:00Z", false);
        persist(&cfg, "new", "2026-02-01T00:00:00Z", true);
        let runs = list_runs(&cfg).unwrap();
        assert_eq!(runs.iter().map(|m| m.run_id.as_str()).collect::<Vec<_>>(), vec!["new", "old"]);
        assert!(resolve_run_dir(&cfg, "latest").unwrap().ends_with("new"));
        let _ = std::fs::remove_dir_all(&cfg.base_dir);
    }

    #[test]
    fn missing_run_is_a_report_error() {
        let cfg = config();
        let err = report_command(&cfg, &ReportCommand::Show { run: "nope".to_string(), format: Reporter::Json });
        assert!(matches!(err, Err(SimtestError::Report(_))));
        assert!(matches!(resolve_run_dir(&cfg, "latest"), Err(SimtestError::Report(_))));
    }
}
