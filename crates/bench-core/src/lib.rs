pub mod config;
pub mod matrix;

pub use config::{
    parse_arg, ConfigError, Configuration, ConfigurationBuilder, ConfigurationSpec,
    SearchStrategy, SyncMethod,
};
pub use matrix::{builtin_headline, Axes, Matrix, SubjectMatrix, SubjectPreset, Variant};
