//! simtest core library: task model, execution backends, scheduler and
//! baseline store shared by the CLI and embedding harnesses.

#[path = "runtime/backend.rs"]
mod backend;
#[path = "model/baseline.rs"]
mod baseline;
#[path = "cmd/baseline_cmd.rs"]
mod baseline_cmd;
#[path = "platform/cancel.rs"]
mod cancel;
#[path = "runtime/checks.rs"]
mod checks;
#[path = "runtime/clock.rs"]
mod clock;
#[path = "model/compare.rs"]
mod compare;
#[path = "platform/config.rs"]
mod config;
#[path = "runtime/debugger.rs"]
mod debugger;
#[path = "cmd/diff_cmd.rs"]
mod diff_cmd;
#[path = "platform/duration.rs"]
mod duration;
#[path = "platform/envinfo.rs"]
mod envinfo;
#[path = "platform/error.rs"]
mod error;
#[path = "model/fingerprint.rs"]
mod fingerprint;
#[path = "platform/fsutil.rs"]
mod fsutil;
#[path = "runtime/inprocess.rs"]
mod inprocess;
#[path = "model/inifile.rs"]
mod inifile;
#[path = "model/reporting.rs"]
mod reporting;
#[path = "cmd/reporting_cmd.rs"]
mod reporting_cmd;
#[path = "cmd/run_cmd.rs"]
mod run_cmd;
#[path = "runtime/scheduler.rs"]
mod scheduler;
#[path = "runtime/subprocess.rs"]
mod subprocess;
#[path = "model/task.rs"]
mod task;

pub use backend::*;
pub use baseline::*;
pub use baseline_cmd::*;
pub use cancel::*;
pub use checks::*;
pub use clock::*;
pub use compare::*;
pub use config::*;
pub use debugger::*;
pub use diff_cmd::*;
pub use duration::*;
pub use envinfo::*;
pub use error::*;
pub use fingerprint::*;
pub use fsutil::*;
pub use inprocess::*;
pub use inifile::*;
pub use reporting::*;
pub use reporting_cmd::*;
pub use run_cmd::*;
pub use scheduler::*;
pub use subprocess::*;
pub use task::*;

