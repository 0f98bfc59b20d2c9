#![cfg(unix)]

use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::process::Command;

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
case "$config" in
  Fail*) echo "<!> Error: boom -- in module (Net) Net.node" >&2; exit 1 ;;
  Finger*)
    if [ "$fingerprint" = "53de-64a7/tplx" ]; then
      echo "Fingerprint successfully verified: 53de-64a7/tplx"
    else
      echo "Fingerprint mismatch! calculated: 53de-64a7/tplx, expected: $fingerprint"
      exit 1
    fi ;;
esac
exit 0
"#;

fn temp_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("simtest-cli-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp workspace");
    root
}

/// Workspace with `simtest.toml`, a fake simulator and a project with the given configs.
fn setup(name: &str, configs: &[&str]) -> PathBuf {
    let ws = temp_workspace(name);
    std::fs::create_dir_all(ws.join("bin")).expect("mkdir bin");
    let sim = ws.join("bin/fakesim_release");
    std::fs::write(&sim, FAKE_SIM).expect("write sim");
    std::fs::set_permissions(&sim, std::fs::Permissions::from_mode(0o755)).expect("chmod sim");

    let mut ini = String::from("[General]\n# abstract-config = true\nnetwork = Net\nsim-time-limit = 1s\n");
    for c in configs {
        ini.push_str(&format!("\n[Config {c}]\n"));
    }
    std::fs::create_dir_all(ws.join("project/sims")).expect("mkdir project");
    std::fs::write(ws.join("project/sims/omnetpp.ini"), ini).expect("write ini");

    std::fs::write(
        ws.join("simtest.toml"),
        format!(
            "executable = {:?}\nbase_dir = \".simtest\"\njobs = 2\n",
            ws.join("bin/fakesim").to_string_lossy()
        ),
    )
    .expect("write config");
    ws
}

fn run_cli(ws: &Path, args: &[&str]) -> std::process::Output {
    let project = ws.join("project");
    let mut all = vec![
        "--cwd".to_string(),
        ws.to_string_lossy().to_string(),
        "--log".to_string(),
        "warn".to_string(),
    ];
    all.extend(args.iter().map(|s| s.to_string()));
    let subcommand = args.iter().find(|a| !a.starts_with("--"));
    if matches!(subcommand, Some(&("smoke" | "fingerprint" | "all" | "regression" | "speed" | "sanitizer"))) {
        all.push("--project".to_string());
        all.push(project.to_string_lossy().to_string());
    }
    Command::new(env!("CARGO_BIN_EXE_simtest"))
        .args(&all)
        .env_remove("RUST_LOG")
        .output()
        .expect("run cli")
}

fn stdout(out: &std::process::Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

#[test]
fn version_and_env_emit_json() {
    let ws = setup("version", &["Pass"]);
    let out = run_cli(&ws, &["--json", "version"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("version json");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));

    let out = run_cli(&ws, &["env", "--json"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("env json");
    assert!(v["backends"]["subprocess"]["program"].as_str().unwrap_or("").ends_with("fakesim_release"));
    assert_eq!(v["backends"]["subprocess"]["available"], true);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn smoke_exit_codes_follow_the_worst_outcome() {
    let ws = setup("smoke", &["Pass", "Fail"]);

    let passing = run_cli(&ws, &["smoke", "--filter", "Pass"]);
    assert_eq!(passing.status.code(), Some(0), "{}", stdout(&passing));
    let text = stdout(&passing);
    assert!(text.contains("Running sims -c Pass for 1s"), "{text}");
    assert!(text.contains("1 TOTAL, 1 PASS, 0 FAIL, 0 ERROR, 0 CANCEL"), "{text}");

    let failing = run_cli(&ws, &["smoke"]);
    assert_eq!(failing.status.code(), Some(1));
    let text = stdout(&failing);
    assert!(text.contains("FAIL   sims -c Fail for 1s: Non-zero exit code: 1"), "{text}");
    assert!(text.contains(" <<<"), "{text}");
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn json_mode_prints_only_the_summary() {
    let ws = setup("json", &["Pass", "Fail"]);
    let out = run_cli(&ws, &["--json", "smoke"]);
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("summary json");
    assert_eq!(v["summary"]["schemaVersion"], "simtest.report.v1");
    assert_eq!(v["summary"]["status"], "FAIL");
    assert_eq!(v["summary"]["counts"]["total"], 2);
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn filter_matching_nothing_exits_zero_with_empty_report() {
    let ws = setup("empty", &["Pass"]);
    let out = run_cli(&ws, &["smoke", "--filter", "nothing-matches", "--full-match"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("0 TOTAL"));
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn baseline_accept_then_fingerprint_check_passes() {
    let ws = setup("baseline", &["Finger"]);

    let missing = run_cli(&ws, &["fingerprint"]);
    assert_eq!(missing.status.code(), Some(2));

    let accept = run_cli(&ws, &["baseline", "accept", "fingerprint", "--project", &ws.join("project").to_string_lossy()]);
    assert_eq!(accept.status.code(), Some(0), "{}", stdout(&accept));
    assert!(stdout(&accept).contains("INSERT sims -c Finger for 1s"));

    let check = run_cli(&ws, &["fingerprint"]);
    assert_eq!(check.status.code(), Some(0), "{}", stdout(&check));

    let show = run_cli(&ws, &["--json", "baseline", "show"]);
    let v: serde_json::Value = serde_json::from_slice(&show.stdout).expect("baseline json");
    assert_eq!(v["entries"][0]["fingerprint"], "53de-64a7/tplx");
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn report_show_latest_rerenders_the_last_run() {
    let ws = setup("report", &["Fail"]);
    let _ = run_cli(&ws, &["smoke", "--reporter", "junit"]);

    let pretty = run_cli(&ws, &["report", "show", "latest"]);
    assert!(pretty.status.success());
    assert!(stdout(&pretty).contains("1 TOTAL, 0 PASS, 1 FAIL"));

    let junit = run_cli(&ws, &["report", "show", "latest", "--format", "junit"]);
    assert!(stdout(&junit).contains("<testsuite name=\"simtest\" tests=\"1\" failures=\"1\""));

    let listed = run_cli(&ws, &["--json", "report", "list"]);
    let v: serde_json::Value = serde_json::from_slice(&listed.stdout).expect("list json");
    assert_eq!(v.as_array().map(|a| a.len()), Some(1));
    assert!(ws.join(".simtest/runs").join(v[0]["runId"].as_str().unwrap_or("")).join("junit.xml").is_file());
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn diff_exit_code_reflects_divergence() {
    let ws = setup("diff", &["Pass"]);
    let elog = |hi: u32| {
        (1..=5)
            .map(|i| format!("E # {i} t {i} m 1 ce 0 msg 1 f {:04x}-{i:04x}\n", if i == 3 { hi } else { 0 }))
            .collect::<String>()
    };
    std::fs::write(ws.join("a.elog"), elog(0)).expect("write a");
    std::fs::write(ws.join("b.elog"), elog(0xab)).expect("write b");

    let same = run_cli(&ws, &["diff", "a.elog", "a.elog"]);
    assert_eq!(same.status.code(), Some(0));

    let differs = run_cli(&ws, &["diff", "a.elog", "b.elog"]);
    assert_eq!(differs.status.code(), Some(1));
    let text = stdout(&differs);
    assert!(text.contains("a.elog: step 3 (0000-0003)"), "{text}");
    assert!(text.contains("b.elog: step 3 (00ab-0003)"), "{text}");
    let _ = std::fs::remove_dir_all(&ws);
}

#[test]
fn errors_render_as_json_envelope_with_exit_code_2() {
    let ws = setup("error", &["Pass"]);
    let out = run_cli(&ws, &["--json", "smoke", "--filter", "("]);
    assert_eq!(out.status.code(), Some(2));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("error json");
    assert_eq!(v["status"], "error");
    assert!(v["message"].as_str().unwrap_or("").contains("invalid filter"));
    let _ = std::fs::remove_dir_all(&ws);
}
