//! CLI baseline commands (`simtest baseline ...`).

use clap::Subcommand;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    AcceptOptions, BaselineStore, CancellationToken, Category, Config, Outcome, RunArgs, RunRequest,
    SimtestError, SimtestResult,
};

#[derive(Debug, Subcommand)]
pub enum BaselineCommand {
    /// Run tasks and record their fingerprints, trajectories and timings.
    Accept {
        #[arg(required = true)]
        categories: Vec<Category>,

        #[command(flatten)]
        args: RunArgs,

        /// Free-form note stored with every touched entry.
        #[arg(long)]
        notes: Option<String>,

        /// Store FAIL/ERROR outcomes as the expected result.
        #[arg(long)]
        record_failures: bool,
    },

    /// List stored entries.
    Show {
        #[arg(long, short = 'f')]
        filter: Option<String>,
    },

    /// Drop entries whose key matches the filter.
    Remove {
        #[arg(long, short = 'f')]
        filter: String,

        #[arg(long)]
        full_match: bool,
    },
}

impl BaselineCommand {
    /// The run backing `accept`; `None` for the read/remove commands.
    pub fn accept_request(&self, cancel: &CancellationToken, progress: bool) -> Option<RunRequest> {
        match self {
            Self::Accept {
                categories,
                args,
                notes,
                record_failures,
            } => Some(RunRequest {
                categories: categories.clone(),
                args: args.clone(),
                cancel: cancel.clone(),
                progress,
                accept: Some(AcceptOptions {
                    notes: notes.clone(),
                    record_failures: *record_failures,
                }),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineListing {
    pub path: String,
    pub entries: Vec<BaselineEntrySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEntrySummary {
    pub key: String,
    #[serde(rename = "simTimeLimit", skip_serializing_if = "Option::is_none")]
    pub sim_time_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(rename = "trajectorySteps", skip_serializing_if = "Option::is_none")]
    pub trajectory_steps: Option<u64>,
    #[serde(rename = "trajectoryRuns", skip_serializing_if = "Option::is_none")]
    pub trajectory_runs: Option<usize>,
    #[serde(rename = "elapsedMs", skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

pub fn baseline_command(config: &Config, command: &BaselineCommand) -> SimtestResult<serde_json::Value> {
    let path = config.baseline_file();
    match command {
        BaselineCommand::Accept { .. } => Err(SimtestError::InvalidArgument(
            "baseline accept must be run through the category runner".to_string(),
        )),

        BaselineCommand::Show { filter } => {
            let re = compile(filter.as_deref(), false)?;
            let store = BaselineStore::load(&path)?;
            let entries = store
                .entries()
                .filter(|e| re.as_ref().is_none_or(|re| re.is_match(&e.key.to_string())))
                .map(|e| BaselineEntrySummary {
                    key: e.key.to_string(),
                    sim_time_limit: e.sim_time_limit.clone(),
                    fingerprint: e
                        .fingerprint
                        .map(|fp| match &e.ingredients {
                            Some(ingr) => format!("{fp}/{ingr}"),
                            None => fp.to_string(),
                        }),
                    trajectory_steps: e.trajectory.as_ref().map(|t| t.total_steps()),
                    trajectory_runs: e.trajectory.as_ref().map(|t| t.len()),
                    elapsed_ms: e.elapsed_ms,
                    expected: e.expected,
                    notes: e.notes.clone(),
                    updated_at: e.updated_at.clone(),
                })
                .collect();
            Ok(serde_json::to_value(BaselineListing {
                path: path.to_string_lossy().to_string(),
                entries,
            })?)
        }

        BaselineCommand::Remove { filter, full_match } => {
            let Some(re) = compile(Some(filter), *full_match)? else {
                return Err(SimtestError::InvalidArgument("empty filter".to_string()));
            };
            let removed = crate::remove_entries(&path, |e| re.is_match(&e.key.to_string()))?;
            tracing::info!("removed {} baseline entries", removed.len());
            Ok(serde_json::json!({
                "path": path.to_string_lossy(),
                "removed": removed.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            }))
        }
    }
}

fn compile(pattern: Option<&str>, full_match: bool) -> SimtestResult<Option<Regex>> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| {
            let source = if full_match { format!("^(?:{p})$") } else { p.to_string() };
            Regex::new(&source).map_err(|e| SimtestError::InvalidArgument(format!("invalid filter {p:?}: {e}")))
        })
        .transpose()
}
