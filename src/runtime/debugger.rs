//! Debugger-attached backend.

use crate::{
    DebuggerConfig, ExecutionBackend, ExecutionRecord, SimtestError, SimtestResult,
    SubprocessBackend, Task,
};

/// Where the debugger should stop the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugTrigger {
    /// Stop when the engine is about to execute step `N`.
    AtStep(u64),
    /// Stop at the step hook whenever the expression holds.
    When(String),
}

#[derive(Debug, Clone)]
pub struct DebuggerBackend {
    config: DebuggerConfig,
    trigger: Option<DebugTrigger>,
    runner: SubprocessBackend,
}

impl DebuggerBackend {
    pub fn new(config: DebuggerConfig, trigger: Option<DebugTrigger>, mut runner: SubprocessBackend) -> Self {
        if !config.batch {
            // Interactive sessions own the terminal and run as long as the user wants.
            runner.capture_output = false;
            runner.inherit_stdin = true;
            runner.timeout = None;
        }
        Self {
            config,
            trigger,
            runner,
        }
    }

    /// Whether sessions read commands from the user's terminal.
    pub fn interactive(&self) -> bool {
        !self.config.batch
    }

    fn breakpoint_command(&self) -> Option<String> {
        let symbol = &self.config.break_symbol;
        match &self.trigger {
            None => None,
            Some(DebugTrigger::AtStep(n)) => Some(format!(
                "break {symbol} if {} == {n}",
                self.config.step_expression
            )),
            Some(DebugTrigger::When(expr)) => Some(format!("break {symbol} if ({expr})")),
        }
    }

    /// Full debugger command line wrapping `args`.
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut out = vec![self.config.program.clone(), "-q".to_string()];
        if self.config.batch {
            out.push("-batch".to_string());
            out.push("-return-child-result".to_string());
        }
        let mut ex = |cmd: &str| {
            out.push("-ex".to_string());
            out.push(cmd.to_string());
        };
        ex("set breakpoint pending on");
        if let Some(bp) = self.breakpoint_command() {
            ex(&bp);
        }
        ex("run");
        if self.config.batch && self.trigger.is_some() {
            ex("bt");
        }
        out.push("--args".to_string());
        out.extend(args.iter().cloned());
        out
    }
}

impl ExecutionBackend for DebuggerBackend {
    fn run(&self, task: &Task, args: &[String]) -> SimtestResult<ExecutionRecord> {
        if args.is_empty() {
            return Err(SimtestError::Backend("empty argument vector".to_string()));
        }
        let command_line = self.command_line(args);
        tracing::debug!("debugger command line: {}", command_line.join(" "));
        self.runner.run(task, &command_line).map_err(|e| match e {
            SimtestError::Backend(msg) => {
                SimtestError::Backend(format!("failed to attach {}: {msg}", self.config.program))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Vec<String> {
        vec!["opp_run_dbg".to_string(), "-c".to_string(), "Ping".to_string()]
    }

    #[test]
    fn step_trigger_synthesizes_conditional_breakpoint() {
        let cfg = DebuggerConfig::default();
        let backend = DebuggerBackend::new(cfg, Some(DebugTrigger::AtStep(1001)), SubprocessBackend::new());
        let cl = backend.command_line(&args());
        assert_eq!(cl[0], "gdb");
        assert!(cl.contains(&"-batch".to_string()));
        assert!(cl.contains(&"-return-child-result".to_string()));
        assert!(cl.contains(
            &"break cSimulation::executeEvent if getSimulation()->getEventNumber() == 1001".to_string()
        ));
        let tail: Vec<&String> = cl.iter().skip_while(|a| *a != "--args").skip(1).collect();
        assert_eq!(tail, args().iter().collect::<Vec<_>>());
    }

    #[test]
    fn predicate_trigger_and_interactive_mode() {
        let cfg = DebuggerConfig {
            batch: false,
            ..DebuggerConfig::default()
        };
        let backend = DebuggerBackend::new(cfg, Some(DebugTrigger::When("x > 3".to_string())), SubprocessBackend::new());
        let cl = backend.command_line(&args());
        assert!(!cl.contains(&"-batch".to_string()));
        assert!(cl.contains(&"break cSimulation::executeEvent if (x > 3)".to_string()));
        assert!(!cl.contains(&"bt".to_string()));
        assert!(!backend.runner.capture_output);
        assert!(backend.runner.inherit_stdin);
        assert!(backend.interactive());
    }

    #[test]
    fn batch_sessions_keep_stdin_detached() {
        let backend = DebuggerBackend::new(DebuggerConfig::default(), None, SubprocessBackend::new());
        assert!(!backend.interactive());
        assert!(!backend.runner.inherit_stdin);
        assert!(backend.runner.capture_output);
    }

    #[test]
    fn no_trigger_just_runs() {
        let backend = DebuggerBackend::new(DebuggerConfig::default(), None, SubprocessBackend::new());
        let cl = backend.command_line(&args());
        assert!(!cl.iter().any(|a| a.starts_with("break ")));
        assert!(cl.contains(&"run".to_string()));
    }
}
