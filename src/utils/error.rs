use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Cannot determine function from instruction: {instruction}")]
    ClassificationError { instruction: String },

    #[error("Text generation failed: {message}")]
    GenerationError { message: String },

    #[error("Text generation timed out after {seconds}s")]
    GenerationTimeout { seconds: u64 },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Fatal errors abort the whole run. Everything else is caught at the
    /// row boundary and recorded as a failed row.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigError { .. }
                | PipelineError::MissingConfigError { .. }
                | PipelineError::InvalidConfigValueError { .. }
                | PipelineError::ClassificationError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let err = PipelineError::ClassificationError {
            instruction: "do something undefined".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("do something undefined"));
    }

    #[test]
    fn row_level_errors_are_not_fatal() {
        let err = PipelineError::ProcessingError {
            message: "bad row".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
