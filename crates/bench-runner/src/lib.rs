pub mod driver;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod plan;

pub use driver::{prepare_results_root, run_all, DriverOptions, FailurePolicy, HarnessReport, ResetPolicy};
pub use error::RunnerError;
pub use executor::{display_command, Launcher, RunExecutor, RunOutcome, DEFAULT_TIMEOUT};
pub use ledger::{read_ledger, unfinished_runs, LedgerEntry, RunLedger, LEDGER_FILE};
pub use plan::{
    BenchPlan, CuratedPlan, CustomSubject, MatrixPlan, PresetSubject, SubjectPlan, SweepPlan,
    DEFAULT_PLAN_FILE, PLAN_TEMPLATE,
};
