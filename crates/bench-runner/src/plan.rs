use crate::driver::{DriverOptions, FailurePolicy, ResetPolicy};
use crate::error::RunnerError;
use crate::executor::{Launcher, RunExecutor};
use bench_analysis::{DurationUnit, ParseOptions};
use bench_core::{
    builtin_headline, Axes, Configuration, Matrix, SearchStrategy, SubjectMatrix, SubjectPreset,
    SyncMethod, Variant,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PLAN_FILE: &str = "bench.yaml";

pub const PLAN_TEMPLATE: &str = r#"# Benchmark plan. Every field is optional.

# Run directories are created here, one per configuration identity.
results_dir: results

# Wall-clock bound per configuration.
timeout_secs: 86400

# wipe: delete results_dir first. preserve: skip configurations already run.
reset: preserve

# halt: stop at the first subject failure. continue: log it and move on.
on_failure: halt

# Concurrent subjects. 1 runs strictly in sequence.
jobs: 1

# How a subject is started; {subject} is replaced by its name and the
# configuration's arguments are appended.
command: ["{subject}"]

# Unit of a duration printed without a suffix: s, ms, us or ns.
bare_duration_unit: s

matrix:
  mode: sweep
  servers: [2, 3]
  sync_methods: [changes, messages, save-load]
  restarts: [true, false]
  strategy: iterative
  subjects:
    - preset: counter
    - preset: moves
    - preset: todo
    - preset: automerge
    # - name: amc-moves
    #   variants:
    #     - { flags: [], args: ["initial-size=3"] }

# Identities reported as headline results. Omit for the built-in list.
# headline:
#   - amc-counter_changes_2_norestarts
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchPlan {
    pub results_dir: PathBuf,
    pub timeout_secs: u64,
    pub reset: ResetPolicy,
    pub on_failure: FailurePolicy,
    pub jobs: usize,
    pub command: Vec<String>,
    pub bare_duration_unit: DurationUnit,
    pub matrix: MatrixPlan,
    pub headline: Option<Vec<String>>,
}

impl Default for BenchPlan {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            timeout_secs: 24 * 60 * 60,
            reset: ResetPolicy::default(),
            on_failure: FailurePolicy::default(),
            jobs: 1,
            command: vec![Launcher::SUBJECT_PLACEHOLDER.to_string()],
            bare_duration_unit: DurationUnit::default(),
            matrix: MatrixPlan::default(),
            headline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum MatrixPlan {
    Sweep(SweepPlan),
    Curated(CuratedPlan),
}

impl Default for MatrixPlan {
    fn default() -> Self {
        MatrixPlan::Sweep(SweepPlan::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepPlan {
    pub servers: Vec<u32>,
    pub sync_methods: Vec<SyncMethod>,
    pub restarts: Vec<bool>,
    pub strategy: SearchStrategy,
    pub subjects: Vec<SubjectPlan>,
}

impl Default for SweepPlan {
    fn default() -> Self {
        let axes = Axes::default();
        Self {
            servers: axes.servers,
            sync_methods: axes.sync_methods,
            restarts: axes.restarts,
            strategy: axes.strategy,
            subjects: SubjectPreset::ALL
                .iter()
                .map(|preset| SubjectPlan::Preset(PresetSubject { preset: *preset }))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CuratedPlan {
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectPlan {
    Preset(PresetSubject),
    Custom(CustomSubject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresetSubject {
    pub preset: SubjectPreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomSubject {
    pub name: String,
    #[serde(default = "single_plain_variant")]
    pub variants: Vec<Variant>,
}

fn single_plain_variant() -> Vec<Variant> {
    vec![Variant::default()]
}

impl SubjectPlan {
    fn resolve(&self) -> Result<SubjectMatrix, RunnerError> {
        Ok(match self {
            SubjectPlan::Preset(subject) => SubjectMatrix::preset(subject.preset),
            SubjectPlan::Custom(subject) => {
                SubjectMatrix::new(subject.name.clone(), subject.variants.clone())?
            }
        })
    }
}

impl BenchPlan {
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let text = fs::read_to_string(path).map_err(|e| RunnerError::io("read", path, e))?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            RunnerError::PlanSyntax { source, .. } => RunnerError::PlanSyntax {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, RunnerError> {
        let syntax = |source| RunnerError::PlanSyntax {
            path: PathBuf::from("<inline>"),
            source,
        };
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(syntax)?;
        let plan: BenchPlan = if value.is_null() {
            BenchPlan::default()
        } else {
            serde_yaml::from_value(value).map_err(syntax)?
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.jobs == 0 {
            return Err(RunnerError::InvalidPlan("jobs must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(RunnerError::InvalidPlan(
                "timeout_secs must be positive".to_string(),
            ));
        }
        Launcher::new(self.command.clone())?;
        self.matrix()?;
        Ok(())
    }

    pub fn matrix(&self) -> Result<Matrix, RunnerError> {
        match &self.matrix {
            MatrixPlan::Curated(curated) => Ok(Matrix::curated(curated.configurations.clone())),
            MatrixPlan::Sweep(sweep) => {
                let subjects = sweep
                    .subjects
                    .iter()
                    .map(SubjectPlan::resolve)
                    .collect::<Result<Vec<_>, _>>()?;
                let axes = Axes {
                    servers: sweep.servers.clone(),
                    sync_methods: sweep.sync_methods.clone(),
                    restarts: sweep.restarts.clone(),
                    strategy: sweep.strategy,
                };
                Ok(Matrix::sweep(axes, subjects)?)
            }
        }
    }

    pub fn headline_identities(&self) -> Vec<String> {
        match &self.headline {
            Some(identities) => identities.clone(),
            None => builtin_headline().iter().map(Configuration::identity).collect(),
        }
    }

    pub fn executor(&self) -> Result<RunExecutor, RunnerError> {
        Ok(RunExecutor::new(&self.results_dir)
            .with_launcher(Launcher::new(self.command.clone())?)
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            reset: self.reset,
            on_failure: self.on_failure,
            jobs: self.jobs,
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            bare_duration_unit: self.bare_duration_unit,
        }
    }
}
