//! Per-step fingerprints, trajectories and their run-length compressed form.
//!
//! An eventlog step record is a single line of the shape
//!
//! ```text
//! E # 42 t 0.0012 m 3 ce 40 msg 17 f 3f2a-90bc
//! ```
//!
//! where the number after `E #` is the step index and the last token is the
//! fingerprint of the simulation state after that step. Lines that are not
//! step records are ignored; step records whose fingerprint token is malformed
//! are skipped.
//!
//! Steps are numbered by position: the first valid record keeps its index and
//! every following valid record is the next step, so a trajectory never has
//! gaps and compression is lossless.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::{SimtestError, SimtestResult};

pub const FINGERPRINT_LEN: usize = 9;

const STEP_RECORD_PREFIX: &str = "E # ";
const FINGERPRINT_MARKER: &str = " f ";

/// A `XXXX-XXXX` token of lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII.
        std::str::from_utf8(&self.0).unwrap_or("????-????")
    }

    pub fn zero() -> Self {
        Self(*b"0000-0000")
    }
}

impl FromStr for Fingerprint {
    type Err = SimtestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != FINGERPRINT_LEN {
            return Err(SimtestError::Trajectory(format!(
                "fingerprint {s:?} has length {} (expected {FINGERPRINT_LEN})",
                bytes.len()
            )));
        }
        for (i, b) in bytes.iter().enumerate() {
            let ok = if i == 4 {
                *b == b'-'
            } else {
                b.is_ascii_digit() || (b'a'..=b'f').contains(b)
            };
            if !ok {
                return Err(SimtestError::Trajectory(format!(
                    "fingerprint {s:?} has invalid character at offset {i}"
                )));
            }
        }
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = SimtestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: u64,
    pub fingerprint: Fingerprint,
}

/// How step records are pulled out of eventlog text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseStrategy {
    /// Regex over the `E # <n> ... f <token>` record (canonical).
    #[default]
    Pattern,
    /// Fixed offsets: the index right after `E # `, the token in the last
    /// nine bytes of the line preceded by ` f `.
    Positional,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    steps: Vec<Step>,
}

impl Trajectory {
    /// Builds a trajectory; indices must be consecutive.
    pub fn from_steps(steps: Vec<Step>) -> SimtestResult<Self> {
        for pair in steps.windows(2) {
            if pair[0].index.checked_add(1) != Some(pair[1].index) {
                return Err(SimtestError::Trajectory(format!(
                    "step indices must be consecutive ({} followed by {})",
                    pair[0].index, pair[1].index
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn parse(text: &str) -> SimtestResult<Self> {
        Self::parse_with(text, ParseStrategy::Pattern)
    }

    pub fn parse_with(text: &str, strategy: ParseStrategy) -> SimtestResult<Self> {
        let mut steps: Vec<Step> = Vec::new();
        let mut last_source_index: Option<u64> = None;
        let mut skipped = 0usize;
        for line in text.lines() {
            let parsed = match strategy {
                ParseStrategy::Pattern => extract_by_pattern(line),
                ParseStrategy::Positional => extract_by_position(line),
            };
            match parsed {
                StepRecord::NotARecord => {}
                StepRecord::Malformed => skipped += 1,
                StepRecord::Valid(step) => {
                    if last_source_index.is_some_and(|last| last >= step.index) {
                        skipped += 1;
                        continue;
                    }
                    last_source_index = Some(step.index);
                    let index = steps.last().map_or(step.index, |last| last.index + 1);
                    steps.push(Step {
                        index,
                        fingerprint: step.fingerprint,
                    });
                }
            }
        }
        if skipped > 0 {
            tracing::debug!("skipped {skipped} malformed step records ({strategy:?}); later steps renumbered");
        }
        if steps.is_empty() {
            return Err(SimtestError::Trajectory(format!(
                "no valid step records found ({skipped} malformed)"
            )));
        }
        Ok(Self { steps })
    }

    /// Parses with both strategies and fails if they disagree.
    pub fn parse_cross_checked(text: &str) -> SimtestResult<Self> {
        let canonical = Self::parse_with(text, ParseStrategy::Pattern)?;
        let positional = Self::parse_with(text, ParseStrategy::Positional)?;
        if canonical != positional {
            let at = canonical
                .steps
                .iter()
                .zip(positional.steps.iter())
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| canonical.len().min(positional.len()));
            return Err(SimtestError::Trajectory(format!(
                "pattern and positional extraction disagree at record {at} ({} vs {} records)",
                canonical.len(),
                positional.len()
            )));
        }
        Ok(canonical)
    }

    pub fn read_file(path: &Path, strategy: ParseStrategy) -> SimtestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SimtestError::Trajectory(format!("failed to read trajectory {}: {e}", path.display()))
        })?;
        Self::parse_with(&text, strategy)
            .map_err(|e| SimtestError::Trajectory(format!("{}: {e}", path.display())))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.steps.last().map(|s| s.fingerprint)
    }

    pub fn compress(&self) -> RunLengthTrajectory {
        compress(self)
    }
}

enum StepRecord {
    NotARecord,
    Malformed,
    Valid(Step),
}

fn step_record_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^E # (\d+) .*\bf (\S+)\s*$").expect("step record regex compiles"))
}

fn extract_by_pattern(line: &str) -> StepRecord {
    if !line.starts_with(STEP_RECORD_PREFIX) {
        return StepRecord::NotARecord;
    }
    let Some(caps) = step_record_regex().captures(line) else {
        return StepRecord::Malformed;
    };
    let index = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
    let fingerprint = caps.get(2).and_then(|m| m.as_str().parse::<Fingerprint>().ok());
    match (index, fingerprint) {
        (Some(index), Some(fingerprint)) => StepRecord::Valid(Step { index, fingerprint }),
        _ => StepRecord::Malformed,
    }
}

fn extract_by_position(line: &str) -> StepRecord {
    if !line.starts_with(STEP_RECORD_PREFIX) {
        return StepRecord::NotARecord;
    }
    let line = line.trim_end();
    let bytes = line.as_bytes();
    let marker_len = FINGERPRINT_MARKER.len();
    if bytes.len() < STEP_RECORD_PREFIX.len() + FINGERPRINT_LEN + marker_len {
        return StepRecord::Malformed;
    }
    let token_start = bytes.len() - FINGERPRINT_LEN;
    if !line.is_char_boundary(token_start) || !line.is_char_boundary(token_start - marker_len) {
        return StepRecord::Malformed;
    }
    if &line[token_start - marker_len..token_start] != FINGERPRINT_MARKER {
        return StepRecord::Malformed;
    }
    let rest = &line[STEP_RECORD_PREFIX.len()..];
    let index_end = rest.find(' ').unwrap_or(rest.len());
    let index = rest[..index_end].parse::<u64>().ok();
    let fingerprint = line[token_start..].parse::<Fingerprint>().ok();
    match (index, fingerprint) {
        (Some(index), Some(fingerprint)) => StepRecord::Valid(Step { index, fingerprint }),
        _ => StepRecord::Malformed,
    }
}

/// One maximal run of identical fingerprints, identified by its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub end: u64,
    pub fingerprint: Fingerprint,
}

/// Runs cover the contiguous step range `first_step..=last run end`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunLengthTrajectory {
    #[serde(rename = "firstStep")]
    first_step: u64,
    runs: Vec<Run>,
}

impl RunLengthTrajectory {
    /// Rebuilds from stored runs; adjacent runs must differ and ends must increase.
    pub fn from_runs(first_step: u64, runs: Vec<Run>) -> SimtestResult<Self> {
        if let Some(first) = runs.first()
            && first.end < first_step
        {
            return Err(SimtestError::Trajectory(format!(
                "first run ends at {} before first step {first_step}",
                first.end
            )));
        }
        for pair in runs.windows(2) {
            if pair[1].end <= pair[0].end {
                return Err(SimtestError::Trajectory(format!(
                    "run ends must strictly increase ({} followed by {})",
                    pair[0].end, pair[1].end
                )));
            }
            if pair[1].fingerprint == pair[0].fingerprint {
                return Err(SimtestError::Trajectory(format!(
                    "adjacent runs ending at {} and {} share fingerprint {}",
                    pair[0].end, pair[1].end, pair[0].fingerprint
                )));
            }
        }
        Ok(Self { first_step, runs })
    }

    pub fn first_step(&self) -> u64 {
        self.first_step
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of steps in run `i`; `None` past the last run.
    pub fn run_length(&self, i: usize) -> Option<u64> {
        let end = self.runs.get(i)?.end;
        let start = match i.checked_sub(1) {
            None => self.first_step,
            Some(prev) => self.runs[prev].end + 1,
        };
        Some(end + 1 - start)
    }

    pub fn total_steps(&self) -> u64 {
        self.runs
            .last()
            .map(|last| last.end + 1 - self.first_step)
            .unwrap_or(0)
    }

    /// Lazily re-expands into one step per index.
    pub fn expand(&self) -> impl Iterator<Item = Step> + '_ {
        let mut start = self.first_step;
        self.runs.iter().flat_map(move |run| {
            let range = start..=run.end;
            start = run.end + 1;
            let fingerprint = run.fingerprint;
            range.map(move |index| Step { index, fingerprint })
        })
    }

    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.first_step.to_string().as_bytes());
        hasher.update(b"\n");
        for run in &self.runs {
            hasher.update(run.end.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(run.fingerprint.as_str().as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

pub fn compress(trajectory: &Trajectory) -> RunLengthTrajectory {
    let Some(first) = trajectory.steps.first() else {
        return RunLengthTrajectory::default();
    };
    let mut runs: Vec<Run> = Vec::new();
    for step in &trajectory.steps {
        match runs.last_mut() {
            Some(run) if run.fingerprint == step.fingerprint => run.end = step.index,
            _ => runs.push(Run {
                end: step.index,
                fingerprint: step.fingerprint,
            }),
        }
    }
    RunLengthTrajectory {
        first_step: first.index,
        runs,
    }
}
