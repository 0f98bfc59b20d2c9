//! Result taxonomy, reports and their renderers.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Category, Observation, SimtestError, SimtestResult, Task, TaskKey};

pub const CANCELLED_BY_USER: &str = "cancelled by user";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
    Junit,
}

impl clap::ValueEnum for Reporter {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Pretty, Self::Json, Self::Junit]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Pretty => clap::builder::PossibleValue::new("pretty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
            Self::Junit => clap::builder::PossibleValue::new("junit"),
        })
    }
}

/// PASS: ran and matched. FAIL: ran and produced a wrong outcome.
/// ERROR: could not be run or checked. CANCEL: interrupted or never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Cancel,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Cancel => "CANCEL",
        }
    }

    fn severity(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Cancel => 1,
            Self::Fail => 2,
            Self::Error => 3,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = SimtestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "ERROR" => Ok(Self::Error),
            "CANCEL" => Ok(Self::Cancel),
            other => Err(SimtestError::InvalidArgument(format!(
                "unknown outcome {other:?} (expected PASS|FAIL|ERROR|CANCEL)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub key: TaskKey,
    pub parameters: String,
    pub category: Category,
    #[serde(rename = "simTimeLimit", default, skip_serializing_if = "Option::is_none")]
    pub sim_time_limit: Option<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Outcome anticipated by a known-bad expectation.
    #[serde(default)]
    pub expected: bool,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub observation: Option<Observation>,
}

impl TaskResult {
    pub fn new(task: &Task, outcome: Outcome, reason: Option<String>) -> Self {
        Self {
            key: task.key.clone(),
            parameters: task.parameters(),
            category: task.category,
            sim_time_limit: task.sim_time_limit.clone(),
            outcome,
            reason,
            expected: false,
            elapsed_ms: 0,
            observation: None,
        }
    }

    pub fn pass(task: &Task) -> Self {
        Self::new(task, Outcome::Pass, None)
    }

    pub fn fail(task: &Task, reason: impl Into<String>) -> Self {
        Self::new(task, Outcome::Fail, Some(reason.into()))
    }

    pub fn error(task: &Task, reason: impl Into<String>) -> Self {
        Self::new(task, Outcome::Error, Some(reason.into()))
    }

    pub fn cancelled(task: &Task) -> Self {
        Self::new(task, Outcome::Cancel, Some(CANCELLED_BY_USER.to_string()))
    }

    pub fn with_elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = ms;
        self
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }

    /// Turns a matching known-bad outcome into PASS with `expected` set.
    pub fn apply_expectation(mut self, expected: Option<Outcome>) -> Self {
        match expected {
            Some(want) if want == self.outcome && want != Outcome::Pass && want != Outcome::Cancel => {
                let reason = self.reason.take().unwrap_or_default();
                self.reason = Some(format!("expected {want}: {reason}").trim_end_matches([':', ' ']).to_string());
                self.outcome = Outcome::Pass;
                self.expected = true;
                self
            }
            Some(want) if want != Outcome::Pass && self.outcome == Outcome::Pass => {
                self.outcome = Outcome::Fail;
                self.reason = Some(format!("expected {want} but the task passed"));
                self
            }
            _ => self,
        }
    }

    pub fn line(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} ({reason})", self.outcome),
            None => self.outcome.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub cancel: usize,
}

/// Results in completion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub results: Vec<TaskResult>,
}

impl Report {
    pub fn push(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, other: Report) {
        self.results.extend(other.results);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut c = OutcomeCounts {
            total: self.results.len(),
            ..OutcomeCounts::default()
        };
        for r in &self.results {
            match r.outcome {
                Outcome::Pass => c.pass += 1,
                Outcome::Fail => c.fail += 1,
                Outcome::Error => c.error += 1,
                Outcome::Cancel => c.cancel += 1,
            }
        }
        c
    }

    /// Worst outcome (ERROR > FAIL > CANCEL > PASS); PASS for an empty report.
    pub fn status(&self) -> Outcome {
        self.results
            .iter()
            .map(|r| r.outcome)
            .max_by_key(|o| o.severity())
            .unwrap_or(Outcome::Pass)
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome == Outcome::Pass)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    pub categories: Vec<Category>,
    pub status: Outcome,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub counts: OutcomeCounts,
    #[serde(rename = "reportPath", skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(rename = "artifactsDir", skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<String>,
    pub results: Vec<TaskResult>,
}

impl RunSummary {
    pub fn new(
        run_id: String,
        categories: Vec<Category>,
        report: &Report,
        started_at: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            schema_version: "simtest.report.v1".to_string(),
            run_id,
            categories,
            status: report.status(),
            started_at,
            finished_at: crate::wall_time_iso_utc(),
            duration_ms,
            counts: report.counts(),
            report_path: None,
            artifacts_dir: None,
            results: report.results.clone(),
        }
    }

    pub fn pretty(&self) -> String {
        let mut out = String::new();
        for r in self.results.iter().filter(|r| r.outcome != Outcome::Pass || r.expected) {
            out.push_str(&format!("{:<6} {}: {}\n", r.outcome.as_str(), r.parameters, r.reason.as_deref().unwrap_or("")));
        }
        let c = &self.counts;
        out.push_str(&format!(
            "{} TOTAL, {} PASS, {} FAIL, {} ERROR, {} CANCEL in {}\n",
            c.total,
            c.pass,
            c.fail,
            c.error,
            c.cancel,
            crate::format_elapsed(std::time::Duration::from_millis(self.duration_ms))
        ));
        out.push_str(&format!("status={} runId={}\n", self.status, self.run_id));
        if let Some(path) = &self.report_path {
            out.push_str(&format!("report={path}\n"));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    pub categories: Vec<Category>,
    pub status: Outcome,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub counts: OutcomeCounts,
    #[serde(rename = "reportPath", skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(rename = "junitPath", skip_serializing_if = "Option::is_none")]
    pub junit_path: Option<String>,
}

/// Writes `report.json`, `manifest.json` and, for the JUnit reporter,
/// `junit.xml` into `<base_dir>/runs/<runId>/`.
pub fn persist_run(
    config: &crate::Config,
    summary: &mut RunSummary,
    reporter: Reporter,
) -> SimtestResult<PathBuf> {
    let artifacts_dir = config.runs_dir().join(&summary.run_id);
    std::fs::create_dir_all(&artifacts_dir)?;
    let report_path = artifacts_dir.join("report.json");
    summary.report_path = Some(report_path.to_string_lossy().to_string());
    summary.artifacts_dir = Some(artifacts_dir.to_string_lossy().to_string());
    crate::write_json_atomic(&report_path, summary)?;

    let junit_path = if matches!(reporter, Reporter::Junit) {
        let p = artifacts_dir.join("junit.xml");
        std::fs::write(&p, render_junit_xml(summary))?;
        Some(p)
    } else {
        None
    };
    write_run_manifest(summary, &artifacts_dir, junit_path.as_deref())?;
    Ok(artifacts_dir)
}

pub fn write_run_manifest(
    summary: &RunSummary,
    artifacts_dir: &Path,
    junit_path: Option<&Path>,
) -> SimtestResult<PathBuf> {
    let manifest = RunManifest {
        schema_version: "simtest.run_manifest.v1".to_string(),
        run_id: summary.run_id.clone(),
        categories: summary.categories.clone(),
        status: summary.status,
        started_at: summary.started_at.clone(),
        finished_at: summary.finished_at.clone(),
        duration_ms: summary.duration_ms,
        counts: summary.counts,
        report_path: summary.report_path.clone(),
        junit_path: junit_path.map(|p| p.to_string_lossy().to_string()),
    };
    let out = artifacts_dir.join("manifest.json");
    std::fs::write(&out, serde_json::to_vec_pretty(&manifest)?)?;
    Ok(out)
}

pub fn render_junit_xml(summary: &RunSummary) -> String {
    let c = &summary.counts;
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(&format!(
        r#"<testsuite name="simtest" tests="{}" failures="{}" errors="{}" skipped="{}" time="{}">"#,
        c.total,
        c.fail,
        c.error,
        c.cancel,
        (summary.duration_ms as f64) / 1000.0
    ));
    out.push('\n');
    for r in &summary.results {
        let open = format!(
            r#"<testcase classname="simtest.{}" name="{}" time="{}""#,
            r.category,
            xml_escape(&r.parameters),
            (r.elapsed_ms as f64) / 1000.0
        );
        let reason = xml_escape(r.reason.as_deref().unwrap_or(""));
        match r.outcome {
            Outcome::Pass => out.push_str(&format!("{open}/>\n")),
            Outcome::Fail => out.push_str(&format!(
                "{open}>\n<failure message=\"{reason}\"/>\n</testcase>\n"
            )),
            Outcome::Error => out.push_str(&format!(
                "{open}>\n<error message=\"{reason}\"/>\n</testcase>\n"
            )),
            Outcome::Cancel => out.push_str(&format!(
                "{open}>\n<skipped message=\"{reason}\"/>\n</testcase>\n"
            )),
        }
    }
    out.push_str(r#"</testsuite>"#);
    out.push('\n');
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('\"', "&quot;").replace('\'', "&apos;")
}
