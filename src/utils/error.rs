use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Export kickoff failed (HTTP {status}): {message}")]
    ExportStartError { status: u16, message: String },

    #[error("Unexpected HTTP {status} from {context}")]
    UnexpectedStatus { status: u16, context: String },

    #[error("{operation} did not complete within {waited:?}")]
    TimeoutError { operation: String, waited: Duration },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Storage operation failed for '{key}': {message}")]
    StorageError { key: String, message: String },

    #[error("SQL execution failed: {message}")]
    SqlError {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Network,
    Storage,
    Warehouse,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::AuthError { .. } => ErrorCategory::Authentication,
            EtlError::ExportStartError { .. }
            | EtlError::UnexpectedStatus { .. }
            | EtlError::TimeoutError { .. }
            | EtlError::ApiError(_) => ErrorCategory::Network,
            EtlError::StorageError { .. } => ErrorCategory::Storage,
            EtlError::SqlError { .. } => ErrorCategory::Warehouse,
            EtlError::CsvError(_)
            | EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::ValidationError { .. } => ErrorCategory::Data,
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            EtlError::IoError(_) | EtlError::ZipError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::TimeoutError { .. } | EtlError::ApiError(_) => ErrorSeverity::Medium,
            EtlError::UnexpectedStatus { status, .. } if *status >= 500 => ErrorSeverity::Medium,
            EtlError::IoError(_) | EtlError::ZipError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Transient failures worth re-running the flow for.
    pub fn is_retryable(&self) -> bool {
        self.severity() == ErrorSeverity::Medium
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Authentication => {
                "Check BCDA_CLIENT_ID / BCDA_CLIENT_SECRET and that the credentials are active"
            }
            ErrorCategory::Network => {
                "Check network connectivity and the API base URL, then re-run the flow"
            }
            ErrorCategory::Storage => "Check the bucket name, region and AWS credentials",
            ErrorCategory::Warehouse => {
                "Check the SQL statement, the warehouse token and the database/schema settings"
            }
            ErrorCategory::Data => "Inspect the input data for malformed rows or headers",
            ErrorCategory::Configuration => {
                "Fix the configuration file or the environment variables and try again"
            }
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::AuthError { .. } => "Could not authenticate with the claims API".to_string(),
            EtlError::ExportStartError { status, .. } => {
                format!("The bulk export could not be started (HTTP {})", status)
            }
            EtlError::TimeoutError { operation, waited } => format!(
                "{} was still running after {}s",
                operation,
                waited.as_secs()
            ),
            EtlError::MissingConfigError { field } => {
                format!("Required setting '{}' is not configured", field)
            }
            other => other.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        EtlError::ConfigError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        EtlError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::StorageError {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn sql(message: impl Into<String>) -> Self {
        EtlError::SqlError {
            message: message.into(),
            sql_state: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
