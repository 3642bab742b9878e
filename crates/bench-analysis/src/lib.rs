pub mod parser;
pub mod table;

pub use parser::{
    parse_all, parse_output, parse_output_file, parse_roots, parse_summary_line, DurationUnit,
    ParseError, ParseOptions, ResultRecord, OUTPUT_FILE,
};
pub use table::{ChartSeries, ResultRow, ResultTable, SeriesKind};
