//! Persisted known-good fingerprints, trajectories and timings per task.
//!
//! The store is read once before a run and shared read-only by all workers.
//! Updates only happen through [`accept`] / [`remove_entries`], which hold an
//! exclusive lock file and replace the whole file atomically.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{
    FileLock, Fingerprint, Outcome, RunLengthTrajectory, SimTime, SimtestError, SimtestResult, TaskKey,
    TaskResult,
};

const SCHEMA_VERSION: &str = "simtest.baseline.v1";

/// What a finished task observed, kept for a later accept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub fingerprint: Option<Fingerprint>,
    pub ingredients: Option<String>,
    pub trajectory: Option<RunLengthTrajectory>,
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    #[serde(flatten)]
    pub key: TaskKey,
    #[serde(rename = "simTimeLimit", default, skip_serializing_if = "Option::is_none")]
    pub sim_time_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<RunLengthTrajectory>,
    #[serde(rename = "trajectoryDigest", default, skip_serializing_if = "Option::is_none")]
    pub trajectory_digest: Option<String>,
    #[serde(rename = "elapsedMs", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Known-bad outcome; a matching observed outcome counts as PASS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

impl BaselineEntry {
    fn empty(key: TaskKey) -> Self {
        Self {
            key,
            sim_time_limit: None,
            fingerprint: None,
            ingredients: None,
            trajectory: None,
            trajectory_digest: None,
            elapsed_ms: None,
            expected: None,
            notes: None,
            updated_at: crate::wall_time_iso_utc(),
        }
    }

    fn same_content(&self, other: &Self) -> bool {
        self.sim_time_limit == other.sim_time_limit
            && self.fingerprint == other.fingerprint
            && self.ingredients == other.ingredients
            && self.trajectory_digest == other.trajectory_digest
            && self.elapsed_ms == other.elapsed_ms
            && self.expected == other.expected
            && self.notes == other.notes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BaselineFile {
    #[serde(rename = "schemaVersion")]
    schema_version: String,
    entries: Vec<BaselineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    entries: BTreeMap<TaskKey, BaselineEntry>,
}

impl BaselineStore {
    /// A missing file is an empty store.
    pub fn load(path: &Path) -> SimtestResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let file: BaselineFile = serde_json::from_slice(&bytes).map_err(|e| {
            SimtestError::Baseline(format!("invalid baseline store {}: {e}", path.display()))
        })?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(SimtestError::Baseline(format!(
                "unsupported baseline schema {:?} in {}",
                file.schema_version,
                path.display()
            )));
        }
        verify_checksum(&file, path)?;
        let entries = file
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Ok(Self { entries })
    }

    pub fn get(&self, key: &TaskKey) -> Option<&BaselineEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &BaselineEntry> {
        self.entries.values()
    }

    fn save(&self, path: &Path) -> SimtestResult<()> {
        let mut file = BaselineFile {
            schema_version: SCHEMA_VERSION.to_string(),
            entries: self.entries.values().cloned().collect(),
            checksum: None,
        };
        let canonical = serde_json::to_vec(&file)?;
        file.checksum = Some(blake3::hash(&canonical).to_hex().to_string());
        crate::write_json_atomic(path, &file)
    }
}

fn verify_checksum(file: &BaselineFile, path: &Path) -> SimtestResult<()> {
    let Some(expected) = file.checksum.as_ref() else {
        return Ok(());
    };
    let mut canonical = file.clone();
    canonical.checksum = None;
    let got = blake3::hash(&serde_json::to_vec(&canonical)?).to_hex().to_string();
    if &got != expected {
        return Err(SimtestError::Baseline(format!(
            "baseline checksum mismatch for {} (expected {expected}, got {got})",
            path.display()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateAction {
    Keep,
    Insert,
    Update,
    Error,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Keep => "KEEP",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptChange {
    pub key: TaskKey,
    pub parameters: String,
    pub action: UpdateAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    pub notes: Option<String>,
    /// Store FAIL/ERROR outcomes as known-bad expectations.
    pub record_failures: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptOutcome {
    pub path: PathBuf,
    pub changes: Vec<AcceptChange>,
}

/// Folds the observations of `results` into the store at `path`.
pub fn accept(path: &Path, results: &[TaskResult], opts: &AcceptOptions) -> SimtestResult<AcceptOutcome> {
    let _lock = FileLock::acquire(path)?;
    let mut store = BaselineStore::load(path)?;
    let mut changes = Vec::with_capacity(results.len());

    for result in results {
        let change = |action, reason: Option<String>| AcceptChange {
            key: result.key.clone(),
            parameters: result.parameters.clone(),
            action,
            reason,
        };
        if result.outcome == Outcome::Cancel {
            changes.push(change(UpdateAction::Error, Some("task was cancelled".to_string())));
            continue;
        }
        let Some(observation) = &result.observation else {
            changes.push(change(
                UpdateAction::Error,
                Some(result.reason.clone().unwrap_or_else(|| "nothing observed".to_string())),
            ));
            continue;
        };

        let existing = store.entries.get(&result.key).cloned();
        let mut next = existing
            .clone()
            .unwrap_or_else(|| BaselineEntry::empty(result.key.clone()));
        if let Some(fp) = observation.fingerprint {
            next.fingerprint = Some(fp);
            next.ingredients = observation.ingredients.clone();
        }
        if let Some(traj) = &observation.trajectory {
            next.trajectory_digest = Some(traj.digest());
            next.trajectory = Some(traj.clone());
        }
        if let Some(ms) = observation.elapsed_ms {
            next.elapsed_ms = Some(ms);
        }
        if result.sim_time_limit.is_some()
            && !SimTime::same_limit(next.sim_time_limit.as_deref(), result.sim_time_limit.as_deref())
        {
            next.sim_time_limit = result.sim_time_limit.clone();
        }
        next.expected = match result.outcome {
            Outcome::Fail | Outcome::Error if opts.record_failures => Some(result.outcome),
            _ if result.expected => next.expected,
            _ => None,
        };
        if opts.notes.is_some() {
            next.notes = opts.notes.clone();
        }

        let action = match &existing {
            None => UpdateAction::Insert,
            Some(prev) if prev.same_content(&next) => UpdateAction::Keep,
            Some(_) => UpdateAction::Update,
        };
        if action != UpdateAction::Keep {
            next.updated_at = crate::wall_time_iso_utc();
            store.entries.insert(result.key.clone(), next);
        }
        changes.push(change(action, None));
    }

    if changes.iter().any(|c| matches!(c.action, UpdateAction::Insert | UpdateAction::Update)) {
        store.save(path)?;
        tracing::info!("baseline store updated: {}", path.display());
    }
    Ok(AcceptOutcome {
        path: path.to_path_buf(),
        changes,
    })
}

/// Drops every entry for which `select` holds; returns the removed keys.
pub fn remove_entries(path: &Path, select: impl Fn(&BaselineEntry) -> bool) -> SimtestResult<Vec<TaskKey>> {
    let _lock = FileLock::acquire(path)?;
    let mut store = BaselineStore::load(path)?;
    let removed: Vec<TaskKey> = store
        .entries
        .values()
        .filter(|e| select(e))
        .map(|e| e.key.clone())
        .collect();
    if !removed.is_empty() {
        for key in &removed {
            store.entries.remove(key);
        }
        store.save(path)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendKind, Category, Run, Task, DEFAULT_CONFIG, DEFAULT_INI_FILE};

    fn temp_store() -> PathBuf {
        std::env::temp_dir()
            .join(format!("simtest-baseline-{}", uuid::Uuid::new_v4()))
            .join("baseline.json")
    }

    fn task(wd: &str) -> Task {
        let mut t = Task::new(
            Path::new("/p"),
            TaskKey::new(wd, DEFAULT_INI_FILE, DEFAULT_CONFIG, 0),
            Category::Fingerprint,
            BackendKind::Subprocess,
        );
        t.sim_time_limit = Some("10s".to_string());
        t
    }

    fn observed(wd: &str, fp: &str) -> TaskResult {
        TaskResult::pass(&task(wd)).with_observation(Observation {
            fingerprint: Some(fp.parse().unwrap()),
            ingredients: Some("tplx".to_string()),
            ..Observation::default()
        })
    }

    #[test]
    fn accept_classifies_insert_keep_update_error() {
        let path = temp_store();
        let out = accept(&path, &[observed("a", "aaaa-0000"), observed("b", "bbbb-0000")], &AcceptOptions::default()).unwrap();
        let actions: Vec<UpdateAction> = out.changes.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![UpdateAction::Insert, UpdateAction::Insert]);

        let results = vec![
            observed("a", "aaaa-0000"),
            observed("b", "bbbb-1111"),
            TaskResult::error(&task("c"), "Non-zero exit code: 3"),
            TaskResult::cancelled(&task("d")),
        ];
        let out = accept(&path, &results, &AcceptOptions::default()).unwrap();
        let actions: Vec<UpdateAction> = out.changes.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![UpdateAction::Keep, UpdateAction::Update, UpdateAction::Error, UpdateAction::Error]
        );

        let store = BaselineStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        let b = store.get(&task("b").key).unwrap();
        assert_eq!(b.fingerprint.unwrap().as_str(), "bbbb-1111");
        assert_eq!(b.sim_time_limit.as_deref(), Some("10s"));
        assert!(!path.with_extension("json.lock").exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn equivalent_sim_time_limit_keeps_the_entry() {
        let path = temp_store();
        accept(&path, &[observed("a", "aaaa-0000")], &AcceptOptions::default()).unwrap();
        let mut same = observed("a", "aaaa-0000");
        same.sim_time_limit = Some("10000ms".to_string());
        let mut longer = observed("a", "aaaa-0000");
        longer.sim_time_limit = Some("20s".to_string());

        let out = accept(&path, &[same], &AcceptOptions::default()).unwrap();
        assert_eq!(out.changes[0].action, UpdateAction::Keep);
        let store = BaselineStore::load(&path).unwrap();
        assert_eq!(store.get(&task("a").key).unwrap().sim_time_limit.as_deref(), Some("10s"));

        let out = accept(&path, &[longer], &AcceptOptions::default()).unwrap();
        assert_eq!(out.changes[0].action, UpdateAction::Update);
        let store = BaselineStore::load(&path).unwrap();
        assert_eq!(store.get(&task("a").key).unwrap().sim_time_limit.as_deref(), Some("20s"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn trajectory_accept_stores_digest() {
        let path = temp_store();
        let traj = RunLengthTrajectory::from_runs(
            0,
            vec![Run { end: 4, fingerprint: "aaaa-0000".parse().unwrap() }],
        )
        .unwrap();
        let result = TaskResult::pass(&task("r")).with_observation(Observation {
            trajectory: Some(traj.clone()),
            elapsed_ms: Some(120),
            ..Observation::default()
        });
        accept(&path, &[result], &AcceptOptions { notes: Some("initial".to_string()), record_failures: false }).unwrap();
        let store = BaselineStore::load(&path).unwrap();
        let entry = store.get(&task("r").key).unwrap();
        assert_eq!(entry.trajectory.as_ref(), Some(&traj));
        assert_eq!(entry.trajectory_digest.as_deref(), Some(traj.digest().as_str()));
        assert_eq!(entry.elapsed_ms, Some(120));
        assert_eq!(entry.notes.as_deref(), Some("initial"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn tampered_store_is_rejected() {
        let path = temp_store();
        accept(&path, &[observed("a", "aaaa-0000")], &AcceptOptions::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("aaaa-0000", "aaaa-0001")).unwrap();
        let err = BaselineStore::load(&path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn remove_drops_selected_entries() {
        let path = temp_store();
        accept(&path, &[observed("a", "aaaa-0000"), observed("b", "bbbb-0000")], &AcceptOptions::default()).unwrap();
        let removed = remove_entries(&path, |e| e.key.working_dir == "a").unwrap();
        assert_eq!(removed.len(), 1);
        let store = BaselineStore::load(&path).unwrap();
        assert!(store.get(&task("a").key).is_none());
        assert!(store.get(&task("b").key).is_some());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_store_is_empty() {
        let store = BaselineStore::load(&temp_store()).unwrap();
        assert!(store.is_empty());
    }
}
