pub mod alias;
pub mod cli;

use std::time::Duration;

use clap::Parser;

use crate::core::gateway::GatewayConfig;
use crate::domain::model::ClassifyMode;
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{PipelineError, Result};
use crate::utils::validation::{
    validate_file_extension, validate_path, validate_positive_number, validate_range, validate_url,
    Validate,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "csv2api")]
#[command(about = "Convert messy CSV exports into validated API call requests")]
pub struct CliConfig {
    #[arg(long, help = "Input CSV file")]
    pub input: String,

    #[arg(long, help = "Natural-language instruction; overrides row heuristics")]
    pub instruction: Option<String>,

    #[arg(long, default_value = "batch", help = "Classification mode: batch or row")]
    pub mode: String,

    #[arg(long, default_value = "4", help = "Maximum concurrent row workers")]
    pub workers: usize,

    #[arg(long, default_value = "./output")]
    pub output_path: String,

    #[arg(long, default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, default_value = "codellama:latest")]
    pub model: String,

    #[arg(long, default_value = "60", help = "Per-call generation timeout")]
    pub timeout_seconds: u64,

    #[arg(long, default_value = "3", help = "Generation attempts before a row fails")]
    pub max_retries: u32,

    #[arg(long, help = "TOML file with column-alias and explorer overrides")]
    pub config: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,
}

impl CliConfig {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

impl ConfigProvider for CliConfig {
    fn input_path(&self) -> &str {
        &self.input
    }

    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    fn classify_mode(&self) -> ClassifyMode {
        // validate() has already rejected anything else.
        if self.mode.eq_ignore_ascii_case("row") {
            ClassifyMode::Row
        } else {
            ClassifyMode::Batch
        }
    }

    fn workers(&self) -> usize {
        self.workers
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("input", &self.input)?;
        validate_file_extension("input", &self.input, &["csv"])?;
        validate_path("output_path", &self.output_path)?;
        validate_url("ollama_url", &self.ollama_url)?;
        validate_positive_number("workers", self.workers, 1)?;
        validate_range("workers", self.workers, 1, 100)?;
        validate_range("timeout_seconds", self.timeout_seconds, 1, 3600)?;
        validate_range("max_retries", self.max_retries, 1, 10)?;

        if !["batch", "row"].contains(&self.mode.to_ascii_lowercase().as_str()) {
            return Err(PipelineError::InvalidConfigValueError {
                field: "mode".to_string(),
                value: self.mode.clone(),
                reason: "Mode must be 'batch' or 'row'".to_string(),
            });
        }

        if let Some(config) = &self.config {
            validate_path("config", config)?;
            validate_file_extension("config", config, &["toml"])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["csv2api", "--input", "rows.csv"]
    }

    #[test]
    fn parses_with_defaults() {
        let config = CliConfig::try_parse_from(base_args()).unwrap();
        assert_eq!(config.input, "rows.csv");
        assert_eq!(config.workers, 4);
        assert_eq!(config.mode, "batch");
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.classify_mode(), ClassifyMode::Batch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn row_mode_round_trips() {
        let mut args = base_args();
        args.extend(["--mode", "row"]);
        let config = CliConfig::try_parse_from(args).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.classify_mode(), ClassifyMode::Row);
    }

    #[test]
    fn rejects_unknown_mode() {
        let mut args = base_args();
        args.extend(["--mode", "yolo"]);
        let config = CliConfig::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_csv_input() {
        let config =
            CliConfig::try_parse_from(vec!["csv2api", "--input", "rows.xlsx"]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut args = base_args();
        args.extend(["--workers", "0"]);
        let config = CliConfig::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_ollama_url() {
        let mut args = base_args();
        args.extend(["--ollama-url", "not a url"]);
        let config = CliConfig::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn gateway_config_reflects_cli_tuning() {
        let mut args = base_args();
        args.extend(["--timeout-seconds", "10", "--max-retries", "5"]);
        let config = CliConfig::try_parse_from(args).unwrap();
        let gateway = config.gateway_config();
        assert_eq!(gateway.call_timeout, Duration::from_secs(10));
        assert_eq!(gateway.max_retries, 5);
    }
}
