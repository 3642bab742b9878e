use anyhow::{anyhow, Context, Result};
use bench_analysis::{parse_roots, ResultTable};
use bench_runner::{
    display_command, run_all, unfinished_runs, BenchPlan, FailurePolicy, HarnessReport,
    ResetPolicy, RunnerError, DEFAULT_PLAN_FILE, PLAN_TEMPLATE,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "bench", version, about = "Benchmark matrix runner for model-checker subjects")]
struct Cli {
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DelimiterArg {
    Csv,
    Tsv,
}

impl DelimiterArg {
    fn as_byte(self) -> u8 {
        match self {
            DelimiterArg::Csv => b',',
            DelimiterArg::Tsv => b'\t',
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Describe {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long)]
        list: bool,
        #[arg(long)]
        json: bool,
    },
    Run {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long, conflicts_with = "preserve")]
        wipe: bool,
        #[arg(long)]
        preserve: bool,
        #[arg(long)]
        continue_on_failure: bool,
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    Report {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long = "results-dir")]
        results_dirs: Vec<PathBuf>,
        #[arg(long)]
        export: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = DelimiterArg::Csv)]
        delimiter: DelimiterArg,
        #[arg(long)]
        latex: Option<PathBuf>,
        #[arg(long)]
        series: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Init {
        #[arg(long, default_value = DEFAULT_PLAN_FILE)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
    Clean {
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&error_payload(&err));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default = if quiet {
        "warn"
    } else if verbose {
        "bench=debug,bench_runner=debug,bench_analysis=debug,bench_core=debug"
    } else {
        "bench=info,bench_runner=info,bench_analysis=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Describe { plan, list, json } => {
            let plan = load_plan(plan.as_deref())?;
            let matrix = plan.matrix()?;
            let executor = plan.executor()?;
            let configurations: Vec<Value> = matrix
                .configurations()
                .map(|config| {
                    json!({
                        "identity": config.identity(),
                        "command": executor.command_line(&config),
                    })
                })
                .collect();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "plan": serde_json::to_value(&plan)?,
                    "configuration_count": configurations.len(),
                    "configurations": configurations,
                })));
            }
            print_plan(&plan, matrix.len());
            if list {
                for config in matrix.configurations() {
                    println!(
                        "{}  {}",
                        config.identity(),
                        display_command(&executor.command_line(&config))
                    );
                }
            }
        }
        Commands::Run {
            plan,
            results_dir,
            timeout_secs,
            wipe,
            preserve,
            continue_on_failure,
            jobs,
            json,
        } => {
            let mut plan = load_plan(plan.as_deref())?;
            apply_run_overrides(
                &mut plan,
                RunOverrides {
                    results_dir,
                    timeout_secs,
                    wipe,
                    preserve,
                    continue_on_failure,
                    jobs,
                },
            )?;
            let matrix = plan.matrix()?;
            let executor = plan.executor()?;
            info!(
                results_dir = %plan.results_dir.display(),
                configurations = matrix.len(),
                jobs = plan.jobs,
                "starting harness pass"
            );
            let report = run_all(&executor, matrix.configurations(), &plan.driver_options())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "results_dir": plan.results_dir.display().to_string(),
                    "total": report.total(),
                    "report": serde_json::to_value(&report)?,
                })));
            }
            print_report(&report);
        }
        Commands::Report {
            plan,
            results_dirs,
            export,
            delimiter,
            latex,
            series,
            json,
        } => {
            let plan = load_plan(plan.as_deref())?;
            let roots = if results_dirs.is_empty() {
                vec![plan.results_dir.clone()]
            } else {
                results_dirs
            };
            let table = ResultTable::build(parse_roots(&roots, &plan.parse_options())?);
            info!(rows = table.len(), "result table\n{}", table.render());

            if let Some(path) = &export {
                let file = fs::File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                table.write_delimited(file, delimiter.as_byte())?;
                info!(path = %path.display(), "wrote delimited export");
            }
            if let Some(path) = &latex {
                fs::write(path, table.to_latex_rows() + "\n")
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "wrote latex rows");
            }
            if let Some(path) = &series {
                let payload = serde_json::to_vec_pretty(&table.chart_series())?;
                fs::write(path, payload)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "wrote chart series");
            }

            let identities = plan.headline_identities();
            let headline = table.select_headline(&identities);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "report",
                    "results_dirs": roots.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                    "rows": table.rows(),
                    "headline": headline,
                    "headline_missing": identities.len() - headline.len(),
                })));
            }
            println!("rows: {}", table.len());
            println!("headline: {}/{}", headline.len(), identities.len());
            let headline_table = ResultTable::build(
                headline
                    .iter()
                    .map(|row| (row.identity.clone(), row.record)),
            );
            print!("{}", headline_table.render());
        }
        Commands::Status {
            plan,
            results_dir,
            json,
        } => {
            let root = match results_dir {
                Some(dir) => dir,
                None => load_plan(plan.as_deref())?.results_dir,
            };
            let unfinished = unfinished_runs(&root)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "results_dir": root.display().to_string(),
                    "unfinished": unfinished,
                })));
            }
            if unfinished.is_empty() {
                println!("no timed out or failed runs in {}", root.display());
            }
            for entry in &unfinished {
                let code = entry
                    .exit_code
                    .map_or_else(|| "-".to_string(), |code| code.to_string());
                println!("{}  {}  exit={}", entry.outcome, entry.identity, code);
            }
        }
        Commands::Init { path, force } => {
            if !force && path.exists() {
                return Err(anyhow!(
                    "plan file already exists (use --force): {}",
                    path.display()
                ));
            }
            fs::write(&path, PLAN_TEMPLATE)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote: {}", path.display());
            println!("next: bench describe --plan {} --list", path.display());
        }
        Commands::Clean {
            plan,
            results_dir,
            json,
        } => {
            let target = match results_dir {
                Some(dir) => dir,
                None => load_plan(plan.as_deref())?.results_dir,
            };
            let removed = target.exists();
            if removed {
                fs::remove_dir_all(&target)
                    .with_context(|| format!("failed to remove {}", target.display()))?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "clean",
                    "results_dir": target.display().to_string(),
                    "removed": removed,
                })));
            }
            if removed {
                println!("removed: {}", target.display());
            } else {
                println!("nothing to remove: {}", target.display());
            }
        }
    }
    Ok(None)
}

fn load_plan(path: Option<&Path>) -> Result<BenchPlan> {
    match path {
        Some(path) => Ok(BenchPlan::load(path)?),
        None => {
            let default = Path::new(DEFAULT_PLAN_FILE);
            if default.exists() {
                Ok(BenchPlan::load(default)?)
            } else {
                Ok(BenchPlan::default())
            }
        }
    }
}

#[derive(Debug, Default)]
struct RunOverrides {
    results_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    wipe: bool,
    preserve: bool,
    continue_on_failure: bool,
    jobs: Option<usize>,
}

fn apply_run_overrides(plan: &mut BenchPlan, overrides: RunOverrides) -> Result<()> {
    if let Some(dir) = overrides.results_dir {
        plan.results_dir = dir;
    }
    if let Some(secs) = overrides.timeout_secs {
        plan.timeout_secs = secs;
    }
    if overrides.wipe {
        plan.reset = ResetPolicy::Wipe;
    }
    if overrides.preserve {
        plan.reset = ResetPolicy::Preserve;
    }
    if overrides.continue_on_failure {
        plan.on_failure = FailurePolicy::Continue;
    }
    if let Some(jobs) = overrides.jobs {
        plan.jobs = jobs;
    }
    plan.validate()?;
    Ok(())
}

fn print_plan(plan: &BenchPlan, configurations: usize) {
    println!("results_dir: {}", plan.results_dir.display());
    println!("timeout_secs: {}", plan.timeout_secs);
    println!("reset: {:?}", plan.reset);
    println!("on_failure: {:?}", plan.on_failure);
    println!("jobs: {}", plan.jobs);
    println!("command: {}", display_command(&plan.command));
    println!("configurations: {}", configurations);
}

fn print_report(report: &HarnessReport) {
    println!("configurations: {}", report.total());
    println!("succeeded: {}", report.succeeded);
    println!("skipped: {}", report.skipped);
    println!("timed_out: {}", report.timed_out.len());
    for identity in &report.timed_out {
        println!("  {}", identity);
    }
    println!("failed: {}", report.failed.len());
    for identity in &report.failed {
        println!("  {}", identity);
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn error_payload(err: &anyhow::Error) -> Value {
    let (code, message, details) = match err.downcast_ref::<RunnerError>() {
        Some(RunnerError::SubprocessFailure { identity, code }) => (
            "subprocess_failure",
            err.to_string(),
            json!({ "identity": identity, "exit_code": code }),
        ),
        Some(runner) => (runner.code(), err.to_string(), json!({})),
        None => ("command_failed", format!("{:#}", err), json!({})),
    };
    json!({
        "ok": false,
        "error": { "code": code, "message": message, "details": details },
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Describe { json, .. }
        | Commands::Run { json, .. }
        | Commands::Report { json, .. }
        | Commands::Status { json, .. }
        | Commands::Clean { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn error_payload_has_stable_shape() {
        let err = anyhow::Error::new(RunnerError::InvalidPlan("jobs must be at least 1".to_string()));
        let payload = error_payload(&err);
        assert_eq!(payload["ok"], false);
        assert_eq!(payload["error"]["code"], "invalid_plan");
        assert!(payload["error"]["message"]
            .as_str()
            .expect("message")
            .contains("jobs"));
        assert_eq!(payload["error"]["details"], json!({}));
    }

    #[test]
    fn subprocess_failure_payload_carries_identity_and_exit_code() {
        let err = anyhow::Error::new(RunnerError::SubprocessFailure {
            identity: "amc-counter_changes_2_norestarts".to_string(),
            code: Some(101),
        });
        let payload = error_payload(&err);
        assert_eq!(payload["error"]["code"], "subprocess_failure");
        assert_eq!(
            payload["error"]["details"]["identity"],
            "amc-counter_changes_2_norestarts"
        );
        assert_eq!(payload["error"]["details"]["exit_code"], 101);

        let other = anyhow!("plain failure");
        assert_eq!(error_payload(&other)["error"]["code"], "command_failed");
    }

    #[test]
    fn run_overrides_replace_plan_values() {
        let mut plan = BenchPlan::default();
        apply_run_overrides(
            &mut plan,
            RunOverrides {
                results_dir: Some(PathBuf::from("elsewhere")),
                timeout_secs: Some(30),
                wipe: true,
                continue_on_failure: true,
                jobs: Some(2),
                ..RunOverrides::default()
            },
        )
        .expect("overrides");
        assert_eq!(plan.results_dir, PathBuf::from("elsewhere"));
        assert_eq!(plan.timeout_secs, 30);
        assert_eq!(plan.reset, ResetPolicy::Wipe);
        assert_eq!(plan.on_failure, FailurePolicy::Continue);
        assert_eq!(plan.jobs, 2);
    }

    #[test]
    fn run_overrides_are_validated() {
        let mut plan = BenchPlan::default();
        let err = apply_run_overrides(
            &mut plan,
            RunOverrides {
                jobs: Some(0),
                ..RunOverrides::default()
            },
        )
        .expect_err("zero jobs");
        assert!(err.to_string().contains("jobs"));
    }

    #[test]
    fn explicit_plan_path_is_loaded() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("plan.yaml");
        fs::write(&path, "results_dir: custom\njobs: 3\n").expect("write");
        let plan = load_plan(Some(path.as_path())).expect("plan");
        assert_eq!(plan.results_dir, PathBuf::from("custom"));
        assert_eq!(plan.jobs, 3);
        assert!(load_plan(Some(tmp.path().join("missing.yaml").as_path())).is_err());
    }

    #[test]
    fn cli_parses_report_with_several_roots() {
        let cli = Cli::try_parse_from([
            "bench",
            "-q",
            "report",
            "--results-dir",
            "a",
            "--results-dir",
            "b",
            "--delimiter",
            "tsv",
            "--json",
        ])
        .expect("parse");
        assert!(cli.quiet);
        match cli.command {
            Commands::Report {
                results_dirs,
                delimiter,
                json,
                ..
            } => {
                assert_eq!(results_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert_eq!(delimiter.as_byte(), b'\t');
                assert!(json);
            }
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn status_lists_runs_that_preserve_would_skip() {
        use bench_runner::{LedgerEntry, RunLedger, RunOutcome};

        let tmp = TempDir::new().expect("tempdir");
        let ledger = RunLedger::open(tmp.path()).expect("ledger");
        for (identity, outcome) in [
            ("amc-todo_changes_2_norestarts", RunOutcome::TimedOut),
            ("amc-counter_changes_2_norestarts", RunOutcome::Succeeded),
        ] {
            ledger
                .append(&LedgerEntry::new(identity.to_string(), identity.to_string(), outcome, 5))
                .expect("append");
        }

        let cli = Cli::try_parse_from([
            "bench",
            "status",
            "--results-dir",
            tmp.path().to_str().expect("utf8 path"),
            "--json",
        ])
        .expect("parse");
        assert!(command_json_mode(&cli.command));
        let payload = run_command(cli.command).expect("status").expect("payload");
        assert_eq!(payload["command"], "status");
        let unfinished = payload["unfinished"].as_array().expect("array");
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0]["identity"], "amc-todo_changes_2_norestarts");
        assert_eq!(unfinished[0]["outcome"], "timed_out");
    }

    #[test]
    fn cli_rejects_wipe_with_preserve() {
        assert!(Cli::try_parse_from(["bench", "run", "--wipe", "--preserve"]).is_err());
    }
}
