use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SEGMENT_DELIMITER: &str = "_";
const RESERVED_PREFIX: &str = "check-";
const RESERVED_OPTIONS: [&str; 3] = ["sync-method", "servers", "restarts"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid subject name '{0}': expected ASCII letters, digits and '-'")]
    InvalidSubject(String),
    #[error("invalid flag '{0}': expected ASCII letters, digits and '-', not starting with '-' or 'check-' and not a harness option")]
    InvalidFlag(String),
    #[error("invalid argument key '{0}': expected ASCII letters, digits and '-', not starting with '-' or 'check-' and not a harness option")]
    InvalidArgKey(String),
    #[error("invalid argument '{0}': expected key=value")]
    MalformedArg(String),
    #[error("server count must be positive")]
    ZeroServers,
    #[error("unknown sync method '{0}' (expected changes, messages or save-load)")]
    UnknownSyncMethod(String),
    #[error("unknown search strategy '{0}' (expected iterative or dfs)")]
    UnknownStrategy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMethod {
    Changes,
    Messages,
    SaveLoad,
}

impl SyncMethod {
    pub const ALL: [SyncMethod; 3] = [SyncMethod::Changes, SyncMethod::Messages, SyncMethod::SaveLoad];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMethod::Changes => "changes",
            SyncMethod::Messages => "messages",
            SyncMethod::SaveLoad => "save-load",
        }
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "changes" => Ok(SyncMethod::Changes),
            "messages" => Ok(SyncMethod::Messages),
            "save-load" => Ok(SyncMethod::SaveLoad),
            other => Err(ConfigError::UnknownSyncMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Iterative,
    #[serde(alias = "depth-first")]
    Dfs,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Iterative => "iterative",
            SearchStrategy::Dfs => "dfs",
        }
    }

    pub fn subcommand(&self) -> String {
        format!("{}{}", RESERVED_PREFIX, self.as_str())
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iterative" => Ok(SearchStrategy::Iterative),
            "dfs" | "depth-first" => Ok(SearchStrategy::Dfs),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ConfigurationSpec", into = "ConfigurationSpec")]
pub struct Configuration {
    subject: String,
    sync_method: SyncMethod,
    servers: u32,
    restarts: bool,
    strategy: SearchStrategy,
    flags: Vec<String>,
    args: Vec<(String, String)>,
}

impl Configuration {
    pub fn builder(
        subject: impl Into<String>,
        sync_method: SyncMethod,
        servers: u32,
    ) -> ConfigurationBuilder {
        ConfigurationBuilder {
            subject: subject.into(),
            sync_method,
            servers,
            restarts: false,
            strategy: SearchStrategy::default(),
            flags: Vec::new(),
            args: Vec::new(),
        }
    }

    pub(crate) fn from_validated(
        subject: String,
        sync_method: SyncMethod,
        servers: u32,
        restarts: bool,
        strategy: SearchStrategy,
        flags: Vec<String>,
        args: Vec<(String, String)>,
    ) -> Self {
        Self {
            subject,
            sync_method,
            servers,
            restarts,
            strategy,
            flags,
            args,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn sync_method(&self) -> SyncMethod {
        self.sync_method
    }

    pub fn servers(&self) -> u32 {
        self.servers
    }

    pub fn restarts(&self) -> bool {
        self.restarts
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// Directory name for this configuration under a results root.
    ///
    /// `<subject>_<sync>_<servers>_<restarts|norestarts>[_check-dfs]` followed
    /// by every flag and every `key=value` pair in insertion order. Values are
    /// percent-encoded outside `[A-Za-z0-9.-]`, so no segment ever contains the
    /// delimiter and the mapping stays injective.
    pub fn identity(&self) -> String {
        let mut segments = vec![
            self.subject.clone(),
            self.sync_method.to_string(),
            self.servers.to_string(),
            restart_token(self.restarts).to_string(),
        ];
        if self.strategy != SearchStrategy::Iterative {
            segments.push(self.strategy.subcommand());
        }
        segments.extend(self.flags.iter().cloned());
        segments.extend(
            self.args
                .iter()
                .map(|(key, value)| format!("{}={}", key, encode_value(value))),
        );
        segments.join(SEGMENT_DELIMITER)
    }

    /// Option arguments for the subject, without the subcommand. The restart
    /// toggle names the results directory only; subjects take no option for it.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--sync-method={}", self.sync_method),
            format!("--servers={}", self.servers),
        ];
        args.extend(self.flags.iter().map(|flag| format!("--{}", flag)));
        args.extend(
            self.args
                .iter()
                .map(|(key, value)| format!("--{}={}", key, value)),
        );
        args
    }

    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![self.strategy.subcommand()];
        args.extend(self.to_args());
        args
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    subject: String,
    sync_method: SyncMethod,
    servers: u32,
    restarts: bool,
    strategy: SearchStrategy,
    flags: Vec<String>,
    args: Vec<(String, String)>,
}

impl ConfigurationBuilder {
    pub fn restarts(mut self, restarts: bool) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        insert_flag(&mut self.flags, flag.into());
        self
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for flag in flags {
            insert_flag(&mut self.flags, flag.into());
        }
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        insert_arg(&mut self.args, key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigError> {
        if !is_token(&self.subject) {
            return Err(ConfigError::InvalidSubject(self.subject));
        }
        if self.servers == 0 {
            return Err(ConfigError::ZeroServers);
        }
        if let Some(flag) = self.flags.iter().find(|f| !is_option_token(f)) {
            return Err(ConfigError::InvalidFlag(flag.clone()));
        }
        if let Some((key, _)) = self.args.iter().find(|(k, _)| !is_option_token(k)) {
            return Err(ConfigError::InvalidArgKey(key.clone()));
        }
        Ok(Configuration {
            subject: self.subject,
            sync_method: self.sync_method,
            servers: self.servers,
            restarts: self.restarts,
            strategy: self.strategy,
            flags: self.flags,
            args: self.args,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSpec {
    pub subject: String,
    pub sync_method: SyncMethod,
    pub servers: u32,
    #[serde(default)]
    pub restarts: bool,
    #[serde(default)]
    pub strategy: SearchStrategy,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TryFrom<ConfigurationSpec> for Configuration {
    type Error = ConfigError;

    fn try_from(spec: ConfigurationSpec) -> Result<Self, Self::Error> {
        let mut builder = Configuration::builder(spec.subject, spec.sync_method, spec.servers)
            .restarts(spec.restarts)
            .strategy(spec.strategy)
            .flags(spec.flags);
        for raw in &spec.args {
            let (key, value) = parse_arg(raw)?;
            builder = builder.arg(key, value);
        }
        builder.build()
    }
}

impl From<Configuration> for ConfigurationSpec {
    fn from(config: Configuration) -> Self {
        Self {
            subject: config.subject,
            sync_method: config.sync_method,
            servers: config.servers,
            restarts: config.restarts,
            strategy: config.strategy,
            flags: config.flags,
            args: config
                .args
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        }
    }
}

pub fn parse_arg(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedArg(raw.to_string()))?;
    if key.trim().is_empty() {
        return Err(ConfigError::MalformedArg(raw.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}

pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('-') && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub(crate) fn is_option_token(s: &str) -> bool {
    is_token(s) && !s.starts_with(RESERVED_PREFIX) && !RESERVED_OPTIONS.contains(&s)
}

pub(crate) fn insert_flag(flags: &mut Vec<String>, flag: String) {
    if !flags.contains(&flag) {
        flags.push(flag);
    }
}

pub(crate) fn insert_arg(args: &mut Vec<(String, String)>, key: String, value: String) {
    match args.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => args.push((key, value)),
    }
}

fn restart_token(restarts: bool) -> &'static str {
    if restarts {
        "restarts"
    } else {
        "norestarts"
    }
}

fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
