//! Spawned-process backend.

use std::collections::BTreeMap;
use std::io::{BufRead as _, BufReader, Read as _};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::{ExecutionBackend, ExecutionRecord, LineRecorder, LineTrajectory, SimtestError, SimtestResult, Task};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    pub capture_output: bool,
    pub terminate_on_cancel: bool,
    pub timeout: Option<Duration>,
    /// Hand our stdin to the child instead of `/dev/null`.
    pub inherit_stdin: bool,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessBackend {
    pub fn new() -> Self {
        Self {
            capture_output: true,
            terminate_on_cancel: true,
            timeout: None,
            inherit_stdin: false,
            env: BTreeMap::new(),
        }
    }

    fn command(&self, task: &Task, args: &[String]) -> SimtestResult<Command> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| SimtestError::Backend("empty argument vector".to_string()))?;
        if !task.working_dir.is_dir() {
            return Err(SimtestError::Backend(format!(
                "working directory {} does not exist",
                task.working_dir.display()
            )));
        }
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&task.working_dir)
            .envs(&self.env)
            .stdin(if self.inherit_stdin { Stdio::inherit() } else { Stdio::null() });
        if self.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        Ok(cmd)
    }
}

impl ExecutionBackend for SubprocessBackend {
    fn run(&self, task: &Task, args: &[String]) -> SimtestResult<ExecutionRecord> {
        if task.is_cancelled() {
            return Ok(ExecutionRecord::cancelled_before_start());
        }
        let mut cmd = self.command(task, args)?;
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            SimtestError::Backend(format!(
                "failed to spawn {:?} in {}: {e}",
                args[0],
                task.working_dir.display()
            ))
        })?;
        tracing::debug!("spawned pid {} for {}", child.id(), task.parameters());

        let stdout_reader = child.stdout.take().map(|out| {
            thread::spawn(move || {
                let mut reader = BufReader::new(out);
                let mut recorder = LineRecorder::new();
                let mut text = String::new();
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            recorder.record(&line);
                            text.push_str(&line);
                        }
                    }
                }
                (text, recorder.finish())
            })
        });
        let stderr_reader = child.stderr.take().map(|err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = BufReader::new(err).read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut cancelled = false;
        let mut timed_out = false;
        let mut terminated_at: Option<Instant> = None;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let err = abandon(&mut child, e);
                    if let Some(h) = stdout_reader {
                        let _ = h.join();
                    }
                    if let Some(h) = stderr_reader {
                        let _ = h.join();
                    }
                    return Err(err);
                }
            }
            if !cancelled && task.is_cancelled() {
                cancelled = true;
                if self.terminate_on_cancel {
                    tracing::debug!("terminating pid {} ({})", child.id(), task.parameters());
                    terminate(&mut child);
                    terminated_at = Some(Instant::now());
                }
            }
            if let Some(limit) = self.timeout
                && !timed_out
                && started.elapsed() >= limit
            {
                timed_out = true;
                let _ = child.kill();
            }
            if terminated_at.is_some_and(|t| t.elapsed() >= TERMINATE_GRACE) {
                let _ = child.kill();
                terminated_at = None;
            }
            thread::sleep(POLL_INTERVAL);
        };
        let elapsed = started.elapsed();

        let (stdout, lines) = match stdout_reader.map(|h| h.join()) {
            Some(Ok((text, lines))) => (Some(text), Some(lines)),
            Some(Err(_)) => (Some(String::new()), Some(LineTrajectory::default())),
            None => (None, None),
        };
        let stderr = stderr_reader.map(|h| h.join().unwrap_or_default());

        Ok(ExecutionRecord {
            exit_code: status.code(),
            signal: exit_signal(&status),
            stdout,
            stderr,
            lines,
            elapsed,
            trajectory_path: task.eventlog_path.clone().filter(|p| p.is_file()),
            cancelled,
            timed_out,
        })
    }
}

/// Kills and reaps a child we can no longer poll.
fn abandon(child: &mut Child, cause: std::io::Error) -> SimtestError {
    tracing::warn!("lost track of pid {}: {cause}; killing it", child.id());
    let _ = child.kill();
    let _ = child.wait();
    SimtestError::Io(cause)
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    // Only `Child` reaps this pid, so once it reports the process as still
    // running the pid cannot have been recycled before the signal lands.
    if !matches!(child.try_wait(), Ok(None)) {
        return;
    }
    let Ok(pid) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) reads no memory from us. `pid` is our unreaped child
    // (checked just above on this thread), at worst a zombie, never a reused pid.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt as _;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
