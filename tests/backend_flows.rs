#![cfg(unix)]

use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use simtest::{
    AcceptOptions, BackendKind, BackendOptions, Backends, BaselineStore, Category, CategoryRunner, Config,
    DebugTrigger, DebuggerConfig, ExecutionBackend as _, Observation, Outcome, SubprocessBackend, Task, TaskKey,
    TaskResult, TaskRunner as _,
};

const FAKE_SIM: &str = r#"#!/bin/sh
config=General
fingerprint=
while [ $# -gt 0 ]; do
  case "$1" in
    -c) config="$2"; shift ;;
    --fingerprint) fingerprint="$2"; shift ;;
  esac
  shift
done
echo "$config" >> "$PWD/invocations.log"
case "$config" in
  Fail*) echo "<!> Error: boom -- in module (Net) Net.node" >&2; exit 1 ;;
  Slow*) exec sleep 5 ;;
  Asan*) echo "==4242==ERROR: AddressSanitizer: heap-use-after-free on address 0x1" >&2 ;;
  Finger*)
    if [ "$fingerprint" = "53de-64a7/tplx" ]; then
      echo "Fingerprint successfully verified: 53de-64a7/tplx"
    else
      echo "Fingerprint mismatch! calculated: 53de-64a7/tplx, expected: $fingerprint"
      exit 1
    fi ;;
esac
echo "done"
exit 0
"#;

const FAKE_DEBUGGER: &str = r#"#!/bin/sh
echo "$@" > "$PWD/debugger.args"
while [ $# -gt 0 ] && [ "$1" != "--args" ]; do shift; done
shift
exec "$@"
"#;

fn temp_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("simtest-backend-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp workspace");
    root
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).expect("write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
}

/// Workspace with a fake simulator for every build mode and a project dir `sims`.
fn setup(name: &str) -> (PathBuf, Config) {
    let ws = temp_workspace(name);
    let bin = ws.join("bin");
    std::fs::create_dir_all(&bin).expect("mkdir bin");
    for suffix in ["_release", "_dbg", "_sanitize"] {
        write_script(&bin.join(format!("fakesim{suffix}")), FAKE_SIM);
    }
    write_script(&bin.join("fakegdb"), FAKE_DEBUGGER);
    std::fs::create_dir_all(ws.join("project/sims")).expect("mkdir project");
    let config = Config {
        base_dir: ws.join(".simtest"),
        executable: bin.join("fakesim").to_string_lossy().to_string(),
        debugger: DebuggerConfig {
            program: bin.join("fakegdb").to_string_lossy().to_string(),
            ..DebuggerConfig::default()
        },
        ..Config::default()
    };
    (ws, config)
}

fn task(ws: &Path, config: &str, category: Category, backend: BackendKind) -> Task {
    Task::new(
        &ws.join("project"),
        TaskKey::new("sims", "omnetpp.ini", config, 0),
        category,
        backend,
    )
}

fn runner(config: &Config, baseline: BaselineStore, opts: &BackendOptions) -> CategoryRunner {
    CategoryRunner::new(config, Arc::new(baseline), Backends::from_config(config, opts))
}

fn invocations(ws: &Path) -> Vec<String> {
    std::fs::read_to_string(ws.join("project/sims/invocations.log"))
        .map(|s| s.lines().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

#[test]
fn smoke_classifies_exit_status_and_engine_errors() {
    let (ws, config) = setup("smoke");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());

    let pass = runner.run_task(&task(&ws, "Pass", Category::Smoke, BackendKind::Subprocess));
    assert_eq!(pass.outcome, Outcome::Pass, "{:?}", pass.reason);

    let fail = runner.run_task(&task(&ws, "Fail", Category::Smoke, BackendKind::Subprocess));
    assert_eq!(fail.outcome, Outcome::Fail);
    let reason = fail.reason.expect("reason");
    assert!(reason.starts_with("Non-zero exit code: 1"), "{reason}");
    assert!(reason.contains("boom"), "{reason}");

    assert_eq!(invocations(&ws), vec!["Pass", "Fail"]);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn expected_failure_from_ini_counts_as_pass() {
    let (ws, config) = setup("expected");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let mut t = task(&ws, "Fail", Category::Smoke, BackendKind::Subprocess);
    t.expected = Some(Outcome::Fail);
    let result = runner.run_task(&t);
    assert_eq!(result.outcome, Outcome::Pass);
    assert!(result.expected);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn missing_working_directory_is_an_error() {
    let (ws, config) = setup("nowd");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let t = Task::new(
        &ws.join("project"),
        TaskKey::new("does/not/exist", "omnetpp.ini", "Pass", 0),
        Category::Smoke,
        BackendKind::Subprocess,
    );
    let result = runner.run_task(&t);
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.reason.expect("reason").contains("does not exist"));
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn pre_cancelled_task_never_spawns() {
    let (ws, config) = setup("precancel");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let t = task(&ws, "Pass", Category::Smoke, BackendKind::Subprocess);
    t.cancel();
    let result = runner.run_task(&t);
    assert_eq!(result.outcome, Outcome::Cancel);
    assert!(invocations(&ws).is_empty());
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn cancelling_a_running_task_terminates_the_process() {
    let (ws, config) = setup("cancel");
    let backend = SubprocessBackend::new();
    let t = task(&ws, "Slow", Category::Smoke, BackendKind::Subprocess);
    let args = t.simulation_args(&config, &[]);
    let token = t.cancellation().clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        token.cancel();
    });
    let started = Instant::now();
    let record = backend.run(&t, &args).expect("run");
    canceller.join().expect("join canceller");
    assert!(record.cancelled);
    assert!(record.interrupted());
    assert!(started.elapsed() < Duration::from_secs(4));
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn timeout_kills_the_process_and_reports_error() {
    let (ws, config) = setup("timeout");
    let runner = runner(
        &config,
        BaselineStore::default(),
        &BackendOptions {
            timeout: Some(Duration::from_millis(200)),
            ..BackendOptions::default()
        },
    );
    let started = Instant::now();
    let result = runner.run_task(&task(&ws, "Slow", Category::Smoke, BackendKind::Subprocess));
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.reason.expect("reason").starts_with("timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn sanitizer_report_on_stderr_fails_the_task() {
    let (ws, config) = setup("asan");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let clean = runner.run_task(&task(&ws, "Pass", Category::Sanitizer, BackendKind::Subprocess));
    assert_eq!(clean.outcome, Outcome::Pass);
    let dirty = runner.run_task(&task(&ws, "Asan", Category::Sanitizer, BackendKind::Subprocess));
    assert_eq!(dirty.outcome, Outcome::Fail);
    assert!(dirty.reason.expect("reason").contains("heap-use-after-free"));
    let _ = std::fs::remove_dir_all(&ws);
}

fn baseline_with_fingerprint(config: &Config, ws: &Path, fp: &str) -> BaselineStore {
    let t = task(ws, "Finger", Category::Fingerprint, BackendKind::Subprocess);
    let observed = TaskResult::pass(&t).with_observation(Observation {
        fingerprint: Some(fp.parse().expect("fingerprint")),
        ingredients: Some("tplx".to_string()),
        ..Observation::default()
    });
    simtest::accept(&config.baseline_file(), &[observed], &AcceptOptions::default()).expect("accept");
    BaselineStore::load(&config.baseline_file()).expect("load baseline")
}

#[test]
fn fingerprint_check_against_baseline() {
    let (ws, config) = setup("fingerprint");
    let t = task(&ws, "Finger", Category::Fingerprint, BackendKind::Subprocess);

    let missing = runner(&config, BaselineStore::default(), &BackendOptions::default()).run_task(&t);
    assert_eq!(missing.outcome, Outcome::Error);
    assert!(invocations(&ws).is_empty(), "no baseline must not spawn");

    let good = baseline_with_fingerprint(&config, &ws, "53de-64a7");
    let pass = runner(&config, good, &BackendOptions::default()).run_task(&t);
    assert_eq!(pass.outcome, Outcome::Pass, "{:?}", pass.reason);

    let stale = baseline_with_fingerprint(&config, &ws, "1111-2222");
    let fail = runner(&config, stale, &BackendOptions::default()).run_task(&t);
    assert_eq!(fail.outcome, Outcome::Fail);
    let reason = fail.reason.expect("reason");
    assert!(reason.contains("calculated: 53de-64a7/tplx"), "{reason}");
    assert!(reason.contains("expected: 1111-2222/tplx"), "{reason}");
    assert_eq!(
        fail.observation.and_then(|o| o.fingerprint).map(|f| f.to_string()),
        Some("53de-64a7".to_string())
    );
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn recording_mode_captures_fingerprint_without_baseline() {
    let (ws, config) = setup("record");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default()).recording(true);
    let result = runner.run_task(&task(&ws, "Finger", Category::Fingerprint, BackendKind::Subprocess));
    assert_eq!(result.outcome, Outcome::Pass);
    assert_eq!(
        result.reason.as_deref(),
        Some("recorded fingerprint 53de-64a7/tplx (was none)")
    );
    let observation = result.observation.expect("observation");
    assert_eq!(observation.fingerprint.expect("fingerprint").as_str(), "53de-64a7");
    assert_eq!(observation.ingredients.as_deref(), Some("tplx"));
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn accept_with_record_failures_does_not_mark_recorded_fingerprints_as_failing() {
    let (ws, config) = setup("record-failures");
    let t = task(&ws, "Finger", Category::Fingerprint, BackendKind::Subprocess);
    let stale = baseline_with_fingerprint(&config, &ws, "1111-2222");
    let recorded = runner(&config, stale, &BackendOptions::default()).recording(true).run_task(&t);
    assert_eq!(recorded.outcome, Outcome::Pass);

    let opts = AcceptOptions {
        notes: None,
        record_failures: true,
    };
    simtest::accept(&config.baseline_file(), &[recorded], &opts).expect("accept");
    let store = BaselineStore::load(&config.baseline_file()).expect("load baseline");
    let entry = store.get(&t.key).expect("entry");
    assert_eq!(entry.fingerprint.map(|f| f.to_string()).as_deref(), Some("53de-64a7"));
    assert_eq!(entry.expected, None);

    let check = runner(&config, store, &BackendOptions::default()).run_task(&t);
    assert_eq!(check.outcome, Outcome::Pass, "{:?}", check.reason);
    assert!(!check.expected);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn speed_without_timing_baseline_is_an_error() {
    let (ws, config) = setup("speed");
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let result = runner.run_task(&task(&ws, "Pass", Category::Speed, BackendKind::Subprocess));
    assert_eq!(result.outcome, Outcome::Error);
    assert!(invocations(&ws).is_empty());
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn debugger_backend_wraps_the_command_with_a_step_breakpoint() {
    let (ws, config) = setup("debugger");
    let runner = runner(
        &config,
        BaselineStore::default(),
        &BackendOptions {
            debug_trigger: Some(DebugTrigger::AtStep(42)),
            ..BackendOptions::default()
        },
    );
    let mut t = task(&ws, "Pass", Category::Smoke, BackendKind::Debugger);
    t.mode = simtest::BuildMode::Debug;
    let result = runner.run_task(&t);
    assert_eq!(result.outcome, Outcome::Pass, "{:?}", result.reason);

    let args = std::fs::read_to_string(ws.join("project/sims/debugger.args")).expect("debugger args");
    assert!(args.contains("-batch"));
    assert!(args.contains("break cSimulation::executeEvent if getSimulation()->getEventNumber() == 42"));
    assert!(args.contains("fakesim_dbg"));
    assert_eq!(invocations(&ws), vec!["Pass"]);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn missing_debugger_is_an_attach_error() {
    let (ws, mut config) = setup("nodebugger");
    config.debugger.program = ws.join("bin/no-such-gdb").to_string_lossy().to_string();
    let runner = runner(&config, BaselineStore::default(), &BackendOptions::default());
    let result = runner.run_task(&task(&ws, "Pass", Category::Smoke, BackendKind::Debugger));
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.reason.expect("reason").contains("failed to attach"));
    let _ = std::fs::remove_dir_all(&ws);
}
