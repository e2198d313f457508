pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::{alias::AliasConfig, cli::LocalStorage, CliConfig};
pub use core::engine::{CsvApiPipeline, PipelineEngine};
pub use utils::error::{PipelineError, Result};
