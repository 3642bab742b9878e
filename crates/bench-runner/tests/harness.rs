#![cfg(unix)]

use bench_analysis::{parse_all, ParseOptions, ResultRecord, OUTPUT_FILE};
use bench_core::{Axes, Configuration, Matrix, SubjectMatrix, SyncMethod, Variant};
use bench_runner::{
    read_ledger, run_all, DriverOptions, FailurePolicy, Launcher, ResetPolicy, RunExecutor,
    RunOutcome, RunnerError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A fake subject: a shell script that logs each invocation to `calls` and
/// then runs `body` with the subject name and arguments as `$@`.
struct FakeSubject {
    script: PathBuf,
    calls: PathBuf,
}

impl FakeSubject {
    fn new(dir: &Path, body: &str) -> Self {
        let script = dir.join("subject.sh");
        let calls = dir.join("calls");
        fs::write(
            &script,
            format!("echo \"$1\" >> '{}'\n{}\n", calls.display(), body),
        )
        .expect("write script");
        Self { script, calls }
    }

    fn executor(&self, results_root: &Path) -> RunExecutor {
        let launcher = Launcher::new(vec![
            "/bin/sh".to_string(),
            self.script.display().to_string(),
            "{subject}".to_string(),
        ])
        .expect("launcher");
        RunExecutor::new(results_root)
            .with_launcher(launcher)
            .with_poll_interval(Duration::from_millis(10))
    }

    fn call_count(&self) -> usize {
        fs::read_to_string(&self.calls)
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }
}

fn config(subject: &str, servers: u32) -> Configuration {
    Configuration::builder(subject, SyncMethod::Changes, servers)
        .build()
        .expect("config")
}

fn sequential(reset: ResetPolicy, on_failure: FailurePolicy) -> DriverOptions {
    DriverOptions {
        reset,
        on_failure,
        jobs: 1,
    }
}

#[test]
fn second_execution_of_same_identity_is_skipped() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "exit 0");
    let root = tmp.path().join("results");
    fs::create_dir_all(&root).expect("root");
    let executor = subject.executor(&root);
    let config = config("amc-counter", 2);

    assert_eq!(executor.execute(&config).expect("first"), RunOutcome::Succeeded);
    assert_eq!(executor.execute(&config).expect("second"), RunOutcome::Skipped);
    assert_eq!(subject.call_count(), 1);
    assert!(root.join(config.identity()).join(OUTPUT_FILE).is_file());
}

#[test]
fn subject_receives_subcommand_and_arguments() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "printf '%s\\n' \"$@\"\necho oops >&2");
    let root = tmp.path().join("results");
    fs::create_dir_all(&root).expect("root");
    let config = Configuration::builder("amc-moves", SyncMethod::SaveLoad, 3)
        .restarts(true)
        .arg("initial-size", "4")
        .build()
        .expect("config");

    subject.executor(&root).execute(&config).expect("execute");
    let out = fs::read_to_string(root.join(config.identity()).join(OUTPUT_FILE)).expect("out");
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(
        lines,
        vec![
            "amc-moves",
            "check-iterative",
            "--sync-method=save-load",
            "--servers=3",
            "--initial-size=4",
            "oops",
        ]
    );
}

#[test]
fn timeout_kills_subject_and_keeps_partial_output() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "echo started\nexec sleep 30");
    let root = tmp.path().join("results");
    fs::create_dir_all(&root).expect("root");
    let executor = subject
        .executor(&root)
        .with_timeout(Duration::from_millis(500));
    let config = config("amc-todo", 2);

    let outcome = executor.execute(&config).expect("execute");
    assert_eq!(outcome, RunOutcome::TimedOut);
    let out = fs::read_to_string(root.join(config.identity()).join(OUTPUT_FILE)).expect("out");
    assert!(out.contains("started"), "partial output lost: {:?}", out);
}

#[test]
fn timeouts_do_not_stop_the_pass() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "exec sleep 30");
    let root = tmp.path().join("results");
    let executor = subject
        .executor(&root)
        .with_timeout(Duration::from_millis(200));

    let report = run_all(
        &executor,
        vec![config("a", 2), config("b", 2)],
        &sequential(ResetPolicy::Preserve, FailurePolicy::Halt),
    )
    .expect("run");
    assert_eq!(report.timed_out.len(), 2);
    assert_eq!(subject.call_count(), 2);
}

#[test]
fn failure_halts_the_pass_by_default() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "echo broken\nexit 3");
    let root = tmp.path().join("results");
    let executor = subject.executor(&root);
    let configs = vec![config("a", 2), config("b", 2), config("c", 2)];

    let err = run_all(
        &executor,
        configs.clone(),
        &sequential(ResetPolicy::Preserve, FailurePolicy::Halt),
    )
    .expect_err("should halt");
    match err {
        RunnerError::SubprocessFailure { identity, code } => {
            assert_eq!(identity, configs[0].identity());
            assert_eq!(code, Some(3));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(subject.call_count(), 1);
    let out = fs::read_to_string(root.join(configs[0].identity()).join(OUTPUT_FILE)).expect("out");
    assert_eq!(out.trim(), "broken");

    let ledger = read_ledger(&root).expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].outcome, "failed");
    assert_eq!(ledger[0].exit_code, Some(3));
}

#[test]
fn continue_policy_runs_every_configuration() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "exit 1");
    let root = tmp.path().join("results");
    let executor = subject.executor(&root);

    let report = run_all(
        &executor,
        vec![config("a", 2), config("b", 2), config("c", 2)],
        &sequential(ResetPolicy::Preserve, FailurePolicy::Continue),
    )
    .expect("run");
    assert_eq!(report.failed.len(), 3);
    assert_eq!(subject.call_count(), 3);
}

#[test]
fn wipe_and_preserve_policies_on_existing_results() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "exit 0");
    let root = tmp.path().join("results");
    let executor = subject.executor(&root);
    let configs = vec![config("a", 2), config("b", 2), config("c", 2)];

    // An earlier pass left two of the three artifacts plus an unrelated one.
    for identity in [configs[0].identity(), configs[1].identity(), "stale".to_string()] {
        fs::create_dir_all(root.join(identity)).expect("prior run");
    }

    let report = run_all(
        &executor,
        configs.clone(),
        &sequential(ResetPolicy::Preserve, FailurePolicy::Halt),
    )
    .expect("preserve");
    assert_eq!(report.skipped, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(subject.call_count(), 1);
    assert!(root.join("stale").is_dir());

    let report = run_all(
        &executor,
        configs,
        &sequential(ResetPolicy::Wipe, FailurePolicy::Halt),
    )
    .expect("wipe");
    assert_eq!(report.skipped, 0);
    assert_eq!(report.succeeded, 3);
    assert_eq!(subject.call_count(), 4);
    assert!(!root.join("stale").exists());
}

#[test]
fn spawn_failure_leaves_no_run_directory() {
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("results");
    let executor = RunExecutor::new(&root).with_launcher(
        Launcher::new(vec!["/nonexistent/bench/{subject}".to_string()]).expect("launcher"),
    );
    let config = config("amc-counter", 2);

    let err = run_all(&executor, vec![config.clone()], &DriverOptions::default())
        .expect_err("spawn should fail");
    assert!(matches!(err, RunnerError::Spawn { .. }), "{:?}", err);
    assert!(!root.join(config.identity()).exists());
}

#[test]
fn parallel_workers_run_each_configuration_once() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(tmp.path(), "exit 0");
    let root = tmp.path().join("results");
    let executor = subject.executor(&root);
    let matrix = Matrix::sweep(
        Axes {
            servers: vec![2, 3],
            sync_methods: vec![SyncMethod::Changes, SyncMethod::Messages],
            restarts: vec![true, false],
            ..Axes::default()
        },
        vec![SubjectMatrix::new("amc-plain", vec![Variant::default()]).expect("subject")],
    )
    .expect("matrix");

    let options = DriverOptions {
        jobs: 3,
        ..DriverOptions::default()
    };
    let report = run_all(&executor, matrix.configurations(), &options).expect("run");
    assert_eq!(report.succeeded, 8);
    assert_eq!(report.total(), 8);
    assert_eq!(subject.call_count(), 8);
    for config in matrix.configurations() {
        assert!(root.join(config.identity()).is_dir());
    }
    assert_eq!(read_ledger(&root).expect("ledger").len(), 8);

    let again = run_all(&executor, matrix.configurations(), &options).expect("rerun");
    assert_eq!(again.skipped, 8);
    assert_eq!(again.total(), 8);
    assert_eq!(subject.call_count(), 8);
}

#[test]
fn executed_results_feed_the_parser() {
    let tmp = TempDir::new().expect("tempdir");
    let subject = FakeSubject::new(
        tmp.path(),
        "echo 'Progress states=10, unique=5, max_depth=1'\n\
         echo 'Done states=1,234 (+617 rate/s), unique=456, max_depth=9, duration=1500ms'",
    );
    let root = tmp.path().join("results");
    let executor = subject.executor(&root);

    run_all(
        &executor,
        vec![config("amc-counter", 2), config("amc-todo", 3)],
        &DriverOptions::default(),
    )
    .expect("run");

    let records = parse_all(&root, &ParseOptions::default()).expect("parse");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, "amc-counter_changes_2_norestarts");
    assert_eq!(
        records[1].1,
        ResultRecord {
            states: 1234,
            unique: 456,
            depth: 9,
            duration: 1.5,
        }
    );
}
