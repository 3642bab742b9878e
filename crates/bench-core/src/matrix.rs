use crate::config::{
    insert_arg, insert_flag, is_option_token, is_token, parse_arg, ConfigError, Configuration,
    SearchStrategy, SyncMethod,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VariantSpec", into = "VariantSpec")]
pub struct Variant {
    flags: Vec<String>,
    args: Vec<(String, String)>,
}

impl Variant {
    pub fn new<I, S>(flags: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut variant = Variant::default();
        for flag in flags {
            let flag = flag.into();
            if !is_option_token(&flag) {
                return Err(ConfigError::InvalidFlag(flag));
            }
            insert_flag(&mut variant.flags, flag);
        }
        Ok(variant)
    }

    pub fn with_arg(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        if !is_option_token(&key) {
            return Err(ConfigError::InvalidArgKey(key));
        }
        insert_arg(&mut self.args, key, value.into());
        Ok(self)
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    // Preset tables are static and known-valid.
    fn preset(flags: &[&str]) -> Self {
        Self {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantSpec {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
}

impl TryFrom<VariantSpec> for Variant {
    type Error = ConfigError;

    fn try_from(spec: VariantSpec) -> Result<Self, Self::Error> {
        let mut variant = Variant::new(spec.flags)?;
        for raw in &spec.args {
            let (key, value) = parse_arg(raw)?;
            variant = variant.with_arg(key, value)?;
        }
        Ok(variant)
    }
}

impl From<Variant> for VariantSpec {
    fn from(variant: Variant) -> Self {
        Self {
            flags: variant.flags,
            args: variant
                .args
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        }
    }
}

const COUNTER_VARIANTS: &[&[&str]] = &[
    &[],
    &["counter-type"],
    &["initial-change"],
    &["counter-type", "initial-change"],
];
const MOVES_VARIANTS: &[&[&str]] = &[&[]];
const TODO_VARIANTS: &[&[&str]] = &[
    &[],
    &["random-ids"],
    &["initial-change"],
    &["initial-change", "random-ids"],
];
const AUTOMERGE_VARIANTS: &[&[&str]] = &[
    &["bytes"],
    &["string"],
    &["int"],
    &["uint"],
    &["timestamp"],
    &["boolean"],
    &["null"],
];

const HEADLINE_PICKS: &[(SubjectPreset, &[&str])] = &[
    (SubjectPreset::Counter, &[]),
    (SubjectPreset::Counter, &["counter-type"]),
    (SubjectPreset::Counter, &["initial-change"]),
    (SubjectPreset::Moves, &[]),
    (SubjectPreset::Todo, &[]),
    (SubjectPreset::Todo, &["random-ids"]),
    (SubjectPreset::Automerge, &["string"]),
    (SubjectPreset::Automerge, &["int"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectPreset {
    Counter,
    Moves,
    Todo,
    Automerge,
}

impl SubjectPreset {
    pub const ALL: [SubjectPreset; 4] = [
        SubjectPreset::Counter,
        SubjectPreset::Moves,
        SubjectPreset::Todo,
        SubjectPreset::Automerge,
    ];

    pub fn subject(&self) -> &'static str {
        match self {
            SubjectPreset::Counter => "amc-counter",
            SubjectPreset::Moves => "amc-moves",
            SubjectPreset::Todo => "amc-todo",
            SubjectPreset::Automerge => "amc-automerge",
        }
    }

    pub fn variants(&self) -> Vec<Variant> {
        let table = match self {
            SubjectPreset::Counter => COUNTER_VARIANTS,
            SubjectPreset::Moves => MOVES_VARIANTS,
            SubjectPreset::Todo => TODO_VARIANTS,
            SubjectPreset::Automerge => AUTOMERGE_VARIANTS,
        };
        table.iter().map(|flags| Variant::preset(flags)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMatrix {
    subject: String,
    variants: Vec<Variant>,
}

impl SubjectMatrix {
    pub fn new(subject: impl Into<String>, variants: Vec<Variant>) -> Result<Self, ConfigError> {
        let subject = subject.into();
        if !is_token(&subject) {
            return Err(ConfigError::InvalidSubject(subject));
        }
        Ok(Self { subject, variants })
    }

    pub fn preset(preset: SubjectPreset) -> Self {
        Self {
            subject: preset.subject().to_string(),
            variants: preset.variants(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    fn configuration(
        &self,
        sync_method: SyncMethod,
        servers: u32,
        restarts: bool,
        strategy: SearchStrategy,
        variant: &Variant,
    ) -> Configuration {
        Configuration::from_validated(
            self.subject.clone(),
            sync_method,
            servers,
            restarts,
            strategy,
            variant.flags.clone(),
            variant.args.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axes {
    pub servers: Vec<u32>,
    pub sync_methods: Vec<SyncMethod>,
    pub restarts: Vec<bool>,
    pub strategy: SearchStrategy,
}

impl Default for Axes {
    fn default() -> Self {
        Self {
            servers: vec![2, 3],
            sync_methods: SyncMethod::ALL.to_vec(),
            restarts: vec![true, false],
            strategy: SearchStrategy::Iterative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matrix {
    Sweep {
        axes: Axes,
        subjects: Vec<SubjectMatrix>,
    },
    Curated(Vec<Configuration>),
}

impl Matrix {
    pub fn sweep(axes: Axes, subjects: Vec<SubjectMatrix>) -> Result<Self, ConfigError> {
        if axes.servers.contains(&0) {
            return Err(ConfigError::ZeroServers);
        }
        Ok(Matrix::Sweep { axes, subjects })
    }

    pub fn curated(configurations: Vec<Configuration>) -> Self {
        Matrix::Curated(configurations)
    }

    pub fn configurations(&self) -> Box<dyn Iterator<Item = Configuration> + '_> {
        match self {
            Matrix::Curated(list) => Box::new(list.iter().cloned()),
            Matrix::Sweep { axes, subjects } => {
                let strategy = axes.strategy;
                Box::new(axes.servers.iter().flat_map(move |&servers| {
                    axes.sync_methods.iter().flat_map(move |&sync_method| {
                        axes.restarts.iter().flat_map(move |&restarts| {
                            subjects.iter().flat_map(move |subject| {
                                subject.variants.iter().map(move |variant| {
                                    subject.configuration(
                                        sync_method,
                                        servers,
                                        restarts,
                                        strategy,
                                        variant,
                                    )
                                })
                            })
                        })
                    })
                }))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Matrix::Curated(list) => list.len(),
            Matrix::Sweep { axes, subjects } => {
                let per_point: usize = subjects.iter().map(|s| s.variants.len()).sum();
                axes.servers.len() * axes.sync_methods.len() * axes.restarts.len() * per_point
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Curated headline list: each subject's base variant plus the variants
/// called out in summaries, at two servers, without restarts.
pub fn builtin_headline() -> Vec<Configuration> {
    let mut out = Vec::new();
    for sync_method in SyncMethod::ALL {
        for (preset, flags) in HEADLINE_PICKS {
            out.push(SubjectMatrix::preset(*preset).configuration(
                sync_method,
                2,
                false,
                SearchStrategy::Iterative,
                &Variant::preset(flags),
            ));
        }
    }
    out
}
