//! simtest CLI entrypoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use simtest::{
    BaselineCommand, CancellationToken, CategoryRun, Category, Config, DiffMode, DiffOptions, Outcome,
    ReportCommand, Reporter, RunArgs, RunRequest,
};

#[derive(Debug, Parser)]
#[command(name = "simtest")]
#[command(about = "regression test runner for discrete-event simulation projects")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "simtest.toml")]
    config: PathBuf,

    /// Working directory for execution.
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every config once and check that it exits cleanly
    Smoke(RunArgs),

    /// Verify final fingerprints against the baseline
    Fingerprint(RunArgs),

    /// Compare wall-clock time against the baseline
    Speed(RunArgs),

    /// Run sanitizer builds and fail on sanitizer reports
    Sanitizer(RunArgs),

    /// Compare per-step fingerprint trajectories against the baseline
    Regression(RunArgs),

    /// Run all categories in sequence
    All(RunArgs),

    /// Record or inspect baseline entries
    Baseline {
        #[command(subcommand)]
        command: BaselineCommand,
    },

    /// Render stored run reports
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },

    /// Show where two recorded runs first diverge
    Diff {
        left: PathBuf,
        right: PathBuf,

        /// Compare console output line by line instead of eventlog fingerprints.
        #[arg(long)]
        lines: bool,

        /// Require the pattern and positional eventlog parsers to agree.
        #[arg(long)]
        cross_check: bool,
    },

    /// Print environment + backend info
    Env,

    /// Print version and build info
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_global_args(std::env::args()));

    if let Err(err) = init_tracing(&cli.log) {
        // Tracing is best-effort; if it fails, we still continue.
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let cwd = cli.cwd.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    if let Err(err) = std::env::set_current_dir(&cwd) {
        return print_error_and_exit(&cli, anyhow::anyhow!(err).context(format!("failed to set cwd to {}", cwd.display())));
    }

    let config = Config::load_optional(&cli.config);

    match run_command(&cli, &config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn normalize_global_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let all: Vec<String> = args.into_iter().collect();
    if all.is_empty() {
        return all;
    }

    let mut globals = Vec::new();
    let mut rest = Vec::new();

    let mut i = 1usize;
    while i < all.len() {
        let arg = &all[i];
        match arg.as_str() {
            "--json" => {
                globals.push(arg.clone());
                i += 1;
            }
            "--config" | "--cwd" | "--log" => {
                globals.push(arg.clone());
                if i + 1 < all.len() {
                    globals.push(all[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ if arg.starts_with("--config=") || arg.starts_with("--cwd=") || arg.starts_with("--log=") => {
                globals.push(arg.clone());
                i += 1;
            }
            _ => {
                rest.push(arg.clone());
                i += 1;
            }
        }
    }

    let mut normalized = Vec::with_capacity(all.len());
    normalized.push(all[0].clone());
    normalized.extend(globals);
    normalized.extend(rest);
    normalized
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run_command(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Smoke(args) => run_categories(cli, config, vec![Category::Smoke], args),
        Command::Fingerprint(args) => run_categories(cli, config, vec![Category::Fingerprint], args),
        Command::Speed(args) => run_categories(cli, config, vec![Category::Speed], args),
        Command::Sanitizer(args) => run_categories(cli, config, vec![Category::Sanitizer], args),
        Command::Regression(args) => run_categories(cli, config, vec![Category::Regression], args),
        Command::All(args) => run_categories(cli, config, simtest::all_categories(), args),

        Command::Baseline { command } => {
            let cancel = interrupt_token()?;
            if let Some(request) = command.accept_request(&cancel, !cli.json) {
                let run = simtest::run_categories(config, &request)?;
                print_category_run(cli, &run, request.args.reporter.unwrap_or(config.reporter))?;
                let failed = run
                    .accepted
                    .as_ref()
                    .is_some_and(|a| a.changes.iter().any(|c| c.action == simtest::UpdateAction::Error));
                return Ok(if failed { ExitCode::from(2) } else { ExitCode::SUCCESS });
            }
            let out = simtest::baseline_command(config, command)?;
            print_json_or_text(cli, &out)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Report { command } => {
            let out = simtest::report_command(config, command)?;
            match out.get("content").and_then(|c| c.as_str()) {
                Some(content) if !cli.json => println!("{content}"),
                _ => print_json_or_text(cli, &out)?,
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Diff {
            left,
            right,
            lines,
            cross_check,
        } => {
            let report = simtest::diff_command(&DiffOptions {
                left: left.clone(),
                right: right.clone(),
                mode: if *lines { DiffMode::Lines } else { DiffMode::Fingerprint },
                cross_check: *cross_check,
            })?;
            if cli.json {
                print_json_or_text(cli, &report)?;
            } else {
                println!("{}", report.pretty());
            }
            Ok(if report.identical { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }

        Command::Env => {
            let info = simtest::env_info(config);
            print_json_or_text(cli, &info)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Version => {
            let info = simtest::version_info();
            print_json_or_text(cli, &info)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn interrupt_token() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    simtest::install_interrupt_handler(&token)?;
    Ok(token)
}

fn run_categories(cli: &Cli, config: &Config, categories: Vec<Category>, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let request = RunRequest {
        categories,
        args: args.clone(),
        cancel: interrupt_token()?,
        progress: !cli.json && !args.quiet,
        accept: None,
    };
    let run = simtest::run_categories(config, &request)?;
    print_category_run(cli, &run, args.reporter.unwrap_or(config.reporter))?;
    Ok(exit_code_for_status(run.summary.status))
}

fn print_category_run(cli: &Cli, run: &CategoryRun, reporter: Reporter) -> anyhow::Result<()> {
    if cli.json || matches!(reporter, Reporter::Json) {
        return print_json_or_text(cli, run);
    }
    match reporter {
        Reporter::Junit => print!("{}", simtest::render_junit_xml(&run.summary)),
        _ => println!("{}", run.summary.pretty()),
    }
    if let Some(accepted) = &run.accepted {
        for change in &accepted.changes {
            let action = change.action.to_string();
            match &change.reason {
                Some(reason) => println!("{action:<6} {}: {reason}", change.parameters),
                None => println!("{action:<6} {}", change.parameters),
            }
        }
        println!("baseline={}", accepted.path.display());
    }
    Ok(())
}

fn print_json_or_text<T: serde::Serialize>(cli: &Cli, value: &T) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "code": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}

fn exit_code_for_status(status: Outcome) -> ExitCode {
    match status {
        Outcome::Pass => ExitCode::SUCCESS,
        Outcome::Fail => ExitCode::from(1),
        Outcome::Error => ExitCode::from(2),
        Outcome::Cancel => ExitCode::from(130),
    }
}
