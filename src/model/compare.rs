//! First-divergence search over compressed trajectories and recorded console lines.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::sync::OnceLock;

use crate::{Fingerprint, RunLengthTrajectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePosition {
    /// Last step of the differing run on this side.
    pub step: u64,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergencePosition {
    pub left: SidePosition,
    pub right: SidePosition,
}

impl fmt::Display for DivergencePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) vs step {} ({})",
            self.left.step, self.left.fingerprint, self.right.step, self.right.fingerprint
        )
    }
}

/// Compares runs position by position, excluding the final run of the
/// shorter side, and reports the first position whose fingerprints differ.
pub fn find_divergence(
    left: &RunLengthTrajectory,
    right: &RunLengthTrajectory,
) -> Option<DivergencePosition> {
    let bound = left.len().min(right.len()).saturating_sub(1);
    left.runs()
        .iter()
        .zip(right.runs().iter())
        .take(bound)
        .find(|(l, r)| l.fingerprint != r.fingerprint)
        .map(|(l, r)| DivergencePosition {
            left: SidePosition {
                step: l.end,
                fingerprint: l.fingerprint,
            },
            right: SidePosition {
                step: r.end,
                fingerprint: r.fingerprint,
            },
        })
}

/// Console output of one run with the step each line was printed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTrajectory {
    lines: Vec<String>,
    steps: Vec<Option<u64>>,
}

impl LineTrajectory {
    pub fn from_text(text: &str) -> Self {
        let mut recorder = LineRecorder::new();
        for line in text.lines() {
            recorder.record(line);
        }
        recorder.finish()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, i: usize) -> Option<(&str, Option<u64>)> {
        self.lines.get(i).map(|l| (l.as_str(), self.steps[i]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSide {
    /// Zero-based line number.
    pub line: usize,
    /// Step in progress when the line was printed; absent before the first step banner.
    pub step: Option<u64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDivergence {
    pub left: LineSide,
    pub right: LineSide,
}

impl fmt::Display for LineDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = |s: Option<u64>| s.map_or_else(|| "-".to_string(), |n| n.to_string());
        write!(
            f,
            "line {} (step {}) {:?} vs line {} (step {}) {:?}",
            self.left.line,
            step(self.left.step),
            self.left.text,
            self.right.line,
            step(self.right.step),
            self.right.text
        )
    }
}

/// Line-oriented counterpart of [`find_divergence`] with the same boundary.
pub fn find_line_divergence(left: &LineTrajectory, right: &LineTrajectory) -> Option<LineDivergence> {
    let bound = left.len().min(right.len()).saturating_sub(1);
    (0..bound)
        .find(|&i| left.lines[i] != right.lines[i])
        .map(|i| LineDivergence {
            left: LineSide {
                line: i,
                step: left.steps[i],
                text: left.lines[i].clone(),
            },
            right: LineSide {
                line: i,
                step: right.steps[i],
                text: right.lines[i].clone(),
            },
        })
}

fn step_banner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*\* Event #(\d+)\b").expect("step banner regex compiles"))
}

/// Builds a [`LineTrajectory`] incrementally while output streams in.
///
/// A line of the form `** Event #N ...` switches the current step to `N`
/// (the banner line itself belongs to step `N`).
#[derive(Debug, Default)]
pub struct LineRecorder {
    current: Option<u64>,
    out: LineTrajectory,
}

impl LineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(caps) = step_banner_regex().captures(line)
            && let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok())
        {
            self.current = Some(n);
        }
        self.out.lines.push(line.to_string());
        self.out.steps.push(self.current);
    }

    pub fn current_step(&self) -> Option<u64> {
        self.current
    }

    pub fn finish(self) -> LineTrajectory {
        self.out
    }
}
