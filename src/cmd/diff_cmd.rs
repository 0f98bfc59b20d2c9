//! `simtest diff`: first divergence between two recorded trajectories.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    LineTrajectory, ParseStrategy, SimtestError, SimtestResult, Trajectory, find_divergence,
    find_line_divergence,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Eventlog step records compared by fingerprint.
    Fingerprint,
    /// Console output compared line by line.
    Lines,
}

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub left: PathBuf,
    pub right: PathBuf,
    pub mode: DiffMode,
    /// Parse eventlogs with both strategies and require agreement.
    pub cross_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSide {
    pub path: String,
    /// Steps (fingerprint mode) or lines (line mode).
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub mode: DiffMode,
    pub identical: bool,
    pub left: DiffSide,
    pub right: DiffSide,
}

impl DiffReport {
    pub fn pretty(&self) -> String {
        if self.identical {
            return format!(
                "no differences ({} vs {} {})",
                self.left.length,
                self.right.length,
                self.unit()
            );
        }
        let side = |s: &DiffSide| match self.mode {
            DiffMode::Fingerprint => format!(
                "{}: step {} ({})",
                s.path,
                s.step.unwrap_or_default(),
                s.fingerprint.as_deref().unwrap_or("")
            ),
            DiffMode::Lines => {
                let step = s.step.map(|n| format!(" in step {n}")).unwrap_or_default();
                format!(
                    "{}: line {}{step}: {}",
                    s.path,
                    s.line.map(|l| l + 1).unwrap_or_default(),
                    s.text.as_deref().unwrap_or("")
                )
            }
        };
        format!("first difference\n  {}\n  {}", side(&self.left), side(&self.right))
    }

    fn unit(&self) -> &'static str {
        match self.mode {
            DiffMode::Fingerprint => "steps",
            DiffMode::Lines => "lines",
        }
    }
}

pub fn diff_command(opts: &DiffOptions) -> SimtestResult<DiffReport> {
    match opts.mode {
        DiffMode::Fingerprint => diff_trajectories(opts),
        DiffMode::Lines => diff_lines(opts),
    }
}

fn read_trajectory(path: &Path, cross_check: bool) -> SimtestResult<Trajectory> {
    if cross_check {
        let text = std::fs::read_to_string(path)?;
        Trajectory::parse_cross_checked(&text)
            .map_err(|e| SimtestError::Trajectory(format!("{}: {e}", path.display())))
    } else {
        Trajectory::read_file(path, ParseStrategy::Pattern)
    }
}

fn diff_trajectories(opts: &DiffOptions) -> SimtestResult<DiffReport> {
    let left = read_trajectory(&opts.left, opts.cross_check)?.compress();
    let right = read_trajectory(&opts.right, opts.cross_check)?.compress();
    let divergence = find_divergence(&left, &right);
    tracing::debug!(
        "compared {} runs against {} runs",
        left.len(),
        right.len()
    );
    let side = |path: &Path, steps: u64, pos: Option<&crate::SidePosition>| DiffSide {
        path: path.to_string_lossy().to_string(),
        length: steps as usize,
        step: pos.map(|p| p.step),
        line: None,
        fingerprint: pos.map(|p| p.fingerprint.to_string()),
        text: None,
    };
    Ok(DiffReport {
        mode: DiffMode::Fingerprint,
        identical: divergence.is_none(),
        left: side(&opts.left, left.total_steps(), divergence.as_ref().map(|d| &d.left)),
        right: side(&opts.right, right.total_steps(), divergence.as_ref().map(|d| &d.right)),
    })
}

fn diff_lines(opts: &DiffOptions) -> SimtestResult<DiffReport> {
    let left = LineTrajectory::from_text(&std::fs::read_to_string(&opts.left)?);
    let right = LineTrajectory::from_text(&std::fs::read_to_string(&opts.right)?);
    let divergence = find_line_divergence(&left, &right);
    let side = |path: &Path, len: usize, pos: Option<&crate::LineSide>| DiffSide {
        path: path.to_string_lossy().to_string(),
        length: len,
        step: pos.and_then(|p| p.step),
        line: pos.map(|p| p.line),
        fingerprint: None,
        text: pos.map(|p| p.text.clone()),
    };
    Ok(DiffReport {
        mode: DiffMode::Lines,
        identical: divergence.is_none(),
        left: side(&opts.left, left.len(), divergence.as_ref().map(|d| &d.left)),
        right: side(&opts.right, right.len(), divergence.as_ref().map(|d| &d.right)),
    })
}
