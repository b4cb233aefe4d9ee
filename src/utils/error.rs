use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompatError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV report error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Tensor shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Model file not found: {path}")]
    ModelNotFound { path: String },

    #[error("Malformed model: {reason}")]
    MalformedModel { reason: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Graph construction failed at layer {layer}: {message}")]
    GraphError { layer: usize, message: String },

    #[error("Operator {op_name} (version {version}) is not supported by the reference interpreter")]
    UnsupportedOperator { op_name: String, version: u32 },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    #[error("Cannot downgrade '{path}': incompatible operators {}", .operators.join(", "))]
    DowngradeUnsupported { path: String, operators: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Format,
    Configuration,
    Graph,
    Inference,
    Compatibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CompatError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        CompatError::MalformedModel {
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CompatError::IoError(_) | CompatError::ModelNotFound { .. } => ErrorCategory::Io,
            CompatError::SerializationError(_)
            | CompatError::CsvError(_)
            | CompatError::MalformedModel { .. } => ErrorCategory::Format,
            CompatError::ConfigValidationError { .. }
            | CompatError::InvalidConfigValueError { .. }
            | CompatError::MissingConfigError { .. } => ErrorCategory::Configuration,
            CompatError::GraphError { .. } | CompatError::ShapeError(_) => ErrorCategory::Graph,
            CompatError::UnsupportedOperator { .. } | CompatError::InferenceError { .. } => {
                ErrorCategory::Inference
            }
            CompatError::DowngradeUnsupported { .. } => ErrorCategory::Compatibility,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 推論失敗不影響已經寫出的模型
            ErrorCategory::Inference => ErrorSeverity::Low,
            ErrorCategory::Compatibility => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Graph | ErrorCategory::Format => {
                ErrorSeverity::High
            }
            ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            CompatError::IoError(_) => {
                "Check that the path exists and that you have read/write permission".to_string()
            }
            CompatError::ModelNotFound { path } => {
                format!("Place the model at '{}' or pass another path on the command line", path)
            }
            CompatError::MalformedModel { .. } => {
                "The file is not a valid .tflite flatbuffer; re-export it from the training side"
                    .to_string()
            }
            CompatError::SerializationError(_) | CompatError::CsvError(_) => {
                "Try the plain text report format".to_string()
            }
            CompatError::ShapeError(_) | CompatError::GraphError { .. } => {
                "Check the layer list and the input shape in the recipe".to_string()
            }
            CompatError::ConfigValidationError { field, .. }
            | CompatError::InvalidConfigValueError { field, .. }
            | CompatError::MissingConfigError { field } => {
                format!("Fix the '{}' entry in the configuration file", field)
            }
            CompatError::UnsupportedOperator { .. } => {
                "The smoke test only covers builder-emitted operators; load the model on device instead"
                    .to_string()
            }
            CompatError::InferenceError { .. } => {
                "Inspect the model with check_model_versions to find the failing tensor".to_string()
            }
            CompatError::DowngradeUnsupported { .. } => {
                "Rebuild the model from its source with create_compatible_model".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            CompatError::ModelNotFound { path } => format!("Model file '{}' does not exist", path),
            CompatError::MalformedModel { reason } => {
                format!("The model file could not be parsed ({})", reason)
            }
            CompatError::DowngradeUnsupported { operators, .. } => format!(
                "A compiled model cannot be converted to older operator versions ({})",
                operators.join(", ")
            ),
            other => other.to_string(),
        }
    }

    /// 依嚴重程度決定程序退出碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_critical_io() {
        let err = CompatError::ModelNotFound {
            path: "assets/models/best_model.tflite".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.exit_code(), 3);
        assert!(err.recovery_suggestion().contains("best_model.tflite"));
    }

    #[test]
    fn test_downgrade_message_lists_operators() {
        let err = CompatError::DowngradeUnsupported {
            path: "m.tflite".to_string(),
            operators: vec!["FULLY_CONNECTED v12".to_string()],
        };
        assert!(err.to_string().contains("FULLY_CONNECTED v12"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_inference_errors_do_not_fail_the_process() {
        let err = CompatError::InferenceError {
            message: "nan".to_string(),
        };
        assert_eq!(err.exit_code(), 0);
    }
}
