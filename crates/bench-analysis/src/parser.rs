//! Extraction of the terminal summary line from captured subject output.
//!
//! A summary line starts with the token `Done` and carries exactly four
//! numeric fields: states, unique states, depth and duration. Numbers may be
//! comma-grouped and unit-suffixed; everything else on the line is noise.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const OUTPUT_FILE: &str = "out";

const SUMMARY_TOKEN: &str = "Done";
const SUMMARY_FIELDS: usize = 4;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to scan {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{location}: expected 4 numeric fields in summary line, found {found}: {line:?}")]
    Format {
        location: String,
        found: usize,
        line: String,
    },
    #[error("{location}: {field} must be a whole number, got {value:?}")]
    NotInteger {
        location: String,
        field: &'static str,
        value: String,
    },
    #[error("{location}: unique states {unique} exceed states {states}")]
    UniqueExceedsStates {
        location: String,
        states: u64,
        unique: u64,
    },
}

/// Numbers parsed from one summary line. Duration is always in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub states: u64,
    pub unique: u64,
    pub depth: u64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationUnit {
    #[default]
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "us", alias = "µs")]
    Micros,
    #[serde(rename = "ns")]
    Nanos,
}

impl DurationUnit {
    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            DurationUnit::Seconds => value,
            DurationUnit::Millis => value / 1e3,
            DurationUnit::Micros => value / 1e6,
            DurationUnit::Nanos => value / 1e9,
        }
    }
}

// Longest suffixes first so "ms" is not read as "m" + "s".
const UNIT_SUFFIXES: [(&str, DurationUnit); 5] = [
    ("ms", DurationUnit::Millis),
    ("ns", DurationUnit::Nanos),
    ("us", DurationUnit::Micros),
    ("µs", DurationUnit::Micros),
    ("s", DurationUnit::Seconds),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    pub bare_duration_unit: DurationUnit,
}

struct NumericToken {
    digits: String,
    unit: Option<DurationUnit>,
}

impl NumericToken {
    fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
        let (digits, unit) = UNIT_SUFFIXES
            .iter()
            .find_map(|(suffix, unit)| cleaned.strip_suffix(suffix).map(|d| (d, Some(*unit))))
            .unwrap_or((cleaned.as_str(), None));
        if !is_decimal(digits) {
            return None;
        }
        Some(Self {
            digits: digits.to_string(),
            unit,
        })
    }

    fn count(&self, location: &str, field: &'static str) -> Result<u64, ParseError> {
        self.digits.parse().map_err(|_| ParseError::NotInteger {
            location: location.to_string(),
            field,
            value: self.digits.clone(),
        })
    }

    fn seconds(&self, options: &ParseOptions) -> f64 {
        // is_decimal guarantees the parse succeeds.
        let value: f64 = self.digits.parse().unwrap_or_default();
        self.unit
            .unwrap_or(options.bare_duration_unit)
            .to_seconds(value)
    }
}

fn is_decimal(s: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

fn is_summary_line(line: &str) -> bool {
    match line.trim().strip_prefix(SUMMARY_TOKEN) {
        Some(rest) => !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}

pub fn parse_summary_line(line: &str, options: &ParseOptions) -> Result<ResultRecord, ParseError> {
    parse_summary_at(line, options, "summary line")
}

fn parse_summary_at(
    line: &str,
    options: &ParseOptions,
    location: &str,
) -> Result<ResultRecord, ParseError> {
    let numbers: Vec<NumericToken> = line
        .split(|c: char| c.is_whitespace() || c == '=')
        .filter(|t| !t.is_empty())
        .filter_map(NumericToken::parse)
        .collect();
    if numbers.len() != SUMMARY_FIELDS {
        return Err(ParseError::Format {
            location: location.to_string(),
            found: numbers.len(),
            line: line.trim().to_string(),
        });
    }
    let states = numbers[0].count(location, "states")?;
    let unique = numbers[1].count(location, "unique")?;
    if unique > states {
        return Err(ParseError::UniqueExceedsStates {
            location: location.to_string(),
            states,
            unique,
        });
    }
    Ok(ResultRecord {
        states,
        unique,
        depth: numbers[2].count(location, "depth")?,
        duration: numbers[3].seconds(options),
    })
}

/// Parse captured output. Only the last summary line counts; output without
/// one (crash, timeout, still running) yields `None`.
pub fn parse_output(
    text: &str,
    options: &ParseOptions,
    source: &str,
) -> Result<Option<ResultRecord>, ParseError> {
    let summary = text
        .lines()
        .enumerate()
        .filter(|(_, line)| is_summary_line(line))
        .last();
    match summary {
        Some((idx, line)) => {
            let location = format!("{}:{}", source, idx + 1);
            parse_summary_at(line, options, &location).map(Some)
        }
        None => Ok(None),
    }
}

pub fn parse_output_file(
    path: &Path,
    options: &ParseOptions,
) -> Result<Option<ResultRecord>, ParseError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ParseError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    parse_output(&text, options, &path.display().to_string())
}

pub fn parse_all(
    results_root: &Path,
    options: &ParseOptions,
) -> Result<Vec<(String, ResultRecord)>, ParseError> {
    let mut records = Vec::new();
    let mut without_summary = 0usize;
    let walker = WalkDir::new(results_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|source| ParseError::Walk {
            path: results_root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let identity = entry.file_name().to_string_lossy().to_string();
        if identity.starts_with('.') {
            continue;
        }
        match parse_output_file(&entry.path().join(OUTPUT_FILE), options)? {
            Some(record) => records.push((identity, record)),
            None => {
                debug!(identity = %identity, "no summary line");
                without_summary += 1;
            }
        }
    }
    info!(
        path = %results_root.display(),
        records = records.len(),
        without_summary,
        "parsed results"
    );
    Ok(records)
}

pub fn parse_roots(
    roots: &[PathBuf],
    options: &ParseOptions,
) -> Result<Vec<(String, ResultRecord)>, ParseError> {
    let mut records = Vec::new();
    for root in roots {
        records.extend(parse_all(root, options)?);
    }
    Ok(records)
}
