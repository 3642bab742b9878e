use crate::parser::ResultRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::warn;

const HEADER: [&str; 5] = ["run_cmd", "states", "unique", "depth", "duration"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub identity: String,
    #[serde(flatten)]
    pub record: ResultRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, ResultRecord)>,
    {
        records.into_iter().collect()
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&ResultRow> {
        self.rows.iter().rev().find(|row| row.identity == identity)
    }

    /// Rows for a curated identity list, in list order. When an identity was
    /// scanned more than once the later row wins; identities without a row
    /// are skipped.
    pub fn select_headline<S: AsRef<str>>(&self, identities: &[S]) -> Vec<&ResultRow> {
        identities
            .iter()
            .filter_map(|id| {
                let row = self.get(id.as_ref());
                if row.is_none() {
                    warn!(identity = id.as_ref(), "headline identity has no result");
                }
                row
            })
            .collect()
    }

    pub fn group_by_identity(&self) -> BTreeMap<&str, Vec<&ResultRecord>> {
        let mut groups: BTreeMap<&str, Vec<&ResultRecord>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.identity.as_str()).or_default().push(&row.record);
        }
        groups
    }

    pub fn series(&self, kind: SeriesKind) -> ChartSeries {
        let mut groups: BTreeMap<String, Vec<[f64; 2]>> = BTreeMap::new();
        for (identity, records) in self.group_by_identity() {
            let points = records.iter().map(|r| kind.point(r)).collect();
            groups.insert(identity.to_string(), points);
        }
        ChartSeries {
            kind,
            x_label: kind.x_label(),
            y_label: kind.y_label(),
            x_log: kind.x_log(),
            y_log: kind.y_log(),
            groups,
        }
    }

    pub fn chart_series(&self) -> Vec<ChartSeries> {
        SeriesKind::ALL.iter().map(|kind| self.series(*kind)).collect()
    }

    pub fn write_delimited<W: Write>(&self, out: W, delimiter: u8) -> csv::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(out);
        writer.write_record(HEADER)?;
        for row in &self.rows {
            writer.write_record([
                row.identity.clone(),
                row.record.states.to_string(),
                row.record.unique.to_string(),
                row.record.depth.to_string(),
                row.record.duration.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_latex_rows(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{} & {} & {} & {}",
                    row.record.states, row.record.unique, row.record.depth, row.record.duration
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render(&self) -> String {
        let cells: Vec<[String; 5]> = self
            .rows
            .iter()
            .map(|row| {
                [
                    row.identity.clone(),
                    row.record.states.to_string(),
                    row.record.unique.to_string(),
                    row.record.depth.to_string(),
                    format!("{:.3}", row.record.duration),
                ]
            })
            .collect();
        let mut widths = HEADER.map(str::len);
        for line in &cells {
            for (w, cell) in widths.iter_mut().zip(line.iter()) {
                *w = (*w).max(cell.len());
            }
        }
        let mut out = String::new();
        push_line(&mut out, &HEADER.map(str::to_string), &widths);
        for line in &cells {
            push_line(&mut out, line, &widths);
        }
        out
    }
}

impl FromIterator<(String, ResultRecord)> for ResultTable {
    fn from_iter<I: IntoIterator<Item = (String, ResultRecord)>>(iter: I) -> Self {
        Self {
            rows: iter
                .into_iter()
                .map(|(identity, record)| ResultRow { identity, record })
                .collect(),
        }
    }
}

fn push_line(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let mut line = format!("{:<width$}", cells[0], width = widths[0]);
    for (cell, width) in cells.iter().zip(widths.iter()).skip(1) {
        line.push_str(&format!("  {:>width$}", cell, width = *width));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    StatesVsUnique,
    DepthVsStates,
    DepthVsDuration,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 3] = [
        SeriesKind::StatesVsUnique,
        SeriesKind::DepthVsStates,
        SeriesKind::DepthVsDuration,
    ];

    fn point(&self, record: &ResultRecord) -> [f64; 2] {
        match self {
            SeriesKind::StatesVsUnique => [record.states as f64, record.unique as f64],
            SeriesKind::DepthVsStates => [record.depth as f64, record.states as f64],
            SeriesKind::DepthVsDuration => [record.depth as f64, record.duration],
        }
    }

    fn x_label(&self) -> &'static str {
        match self {
            SeriesKind::StatesVsUnique => "Total states",
            SeriesKind::DepthVsStates | SeriesKind::DepthVsDuration => "Depth",
        }
    }

    fn y_label(&self) -> &'static str {
        match self {
            SeriesKind::StatesVsUnique => "Unique states",
            SeriesKind::DepthVsStates => "Total states",
            SeriesKind::DepthVsDuration => "Duration (s)",
        }
    }

    fn x_log(&self) -> bool {
        matches!(self, SeriesKind::StatesVsUnique)
    }

    fn y_log(&self) -> bool {
        !matches!(self, SeriesKind::DepthVsDuration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub kind: SeriesKind,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub x_log: bool,
    pub y_log: bool,
    pub groups: BTreeMap<String, Vec<[f64; 2]>>,
}
