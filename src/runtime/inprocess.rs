//! In-process backend: calls a native engine linked into this process.
//!
//! The engine keeps process-wide state and is not reentrant, so there is a
//! single registered instance, every call holds its mutex, and the process
//! working directory is switched for the duration of a call.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::{ExecutionBackend, ExecutionRecord, SimtestError, SimtestResult, Task};

/// A simulation engine callable as a library.
pub trait NativeEngine: Send {
    /// Runs one simulation with `args` (program name first) in the current
    /// directory and returns its exit code.
    fn run(&mut self, args: &[String]) -> SimtestResult<i32>;

    fn shutdown(&mut self) {}
}

struct EngineSlot {
    engine: Box<dyn NativeEngine>,
    shut_down: bool,
}

static ENGINE: OnceLock<Mutex<EngineSlot>> = OnceLock::new();

/// Registers the process-wide engine. Succeeds exactly once per process.
pub fn initialize(engine: Box<dyn NativeEngine>) -> SimtestResult<()> {
    let mut engine = Some(engine);
    ENGINE.get_or_init(|| {
        Mutex::new(EngineSlot {
            engine: engine.take().unwrap_or_else(|| Box::new(NoEngine) as Box<dyn NativeEngine>),
            shut_down: false,
        })
    });
    if engine.is_some() {
        return Err(SimtestError::Backend(
            "in-process engine is already initialized".to_string(),
        ));
    }
    tracing::info!("in-process engine initialized");
    Ok(())
}

/// Stops the engine; later in-process runs report ERROR.
pub fn shutdown() -> SimtestResult<()> {
    let Some(slot) = ENGINE.get() else {
        return Ok(());
    };
    let mut slot = slot
        .lock()
        .map_err(|_| SimtestError::Backend("in-process engine lock poisoned".to_string()))?;
    if !slot.shut_down {
        slot.engine.shutdown();
        slot.shut_down = true;
        tracing::info!("in-process engine shut down");
    }
    Ok(())
}

pub fn engine_registered() -> bool {
    ENGINE
        .get()
        .and_then(|slot| slot.lock().ok().map(|s| !s.shut_down))
        .unwrap_or(false)
}

struct NoEngine;

impl NativeEngine for NoEngine {
    fn run(&mut self, _args: &[String]) -> SimtestResult<i32> {
        Err(SimtestError::Backend("no in-process engine".to_string()))
    }
}

/// Switches the process working directory and restores it on drop.
pub struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(dir: &Path) -> SimtestResult<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(dir).map_err(|e| {
            SimtestError::Backend(format!("failed to enter {}: {e}", dir.display()))
        })?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(err) = std::env::set_current_dir(&self.previous) {
            tracing::warn!("failed to restore working directory {}: {err}", self.previous.display());
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessBackend;

impl ExecutionBackend for InProcessBackend {
    fn run(&self, task: &Task, args: &[String]) -> SimtestResult<ExecutionRecord> {
        if task.is_cancelled() {
            return Ok(ExecutionRecord::cancelled_before_start());
        }
        let slot = ENGINE.get().ok_or_else(|| {
            SimtestError::Backend("no in-process engine registered".to_string())
        })?;
        let mut slot = slot
            .lock()
            .map_err(|_| SimtestError::Backend("in-process engine lock poisoned".to_string()))?;
        if slot.shut_down {
            return Err(SimtestError::Backend("in-process engine was shut down".to_string()));
        }

        let started = Instant::now();
        let outcome = {
            let _cwd = WorkingDirGuard::enter(&task.working_dir)?;
            catch_unwind(AssertUnwindSafe(|| slot.engine.run(args)))
        };
        let elapsed = started.elapsed();

        let exit_code = match outcome {
            Ok(result) => result?,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Err(SimtestError::Backend(format!("engine panicked: {msg}")));
            }
        };

        Ok(ExecutionRecord {
            exit_code: Some(exit_code),
            elapsed,
            trajectory_path: task.eventlog_path.clone().filter(|p| p.is_file()),
            ..ExecutionRecord::default()
        })
    }
}
