use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
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

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Page parsing error: {message}")]
    PageError { message: String },

    /// STOP 策略：端點不可用，整個 job 必須中止
    #[error("Fetching from url '{url}' returned status code '{status}' and body '{body}'")]
    JobAborted {
        url: String,
        status: String,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Data,
    Configuration,
    Io,
    Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn page(message: impl Into<String>) -> Self {
        Self::PageError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) => ErrorCategory::Network,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::PageError { .. }
            | Self::ProcessingError { .. } => ErrorCategory::Data,
            Self::IoError(_) => ErrorCategory::Io,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::JobAborted { .. } => ErrorCategory::Endpoint,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ApiError(_) => ErrorSeverity::Medium,
            Self::PageError { .. } => ErrorSeverity::Low,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::IoError(_)
            | Self::ProcessingError { .. } => ErrorSeverity::High,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorSeverity::High,
            Self::JobAborted { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check network connectivity and the endpoint address",
            ErrorCategory::Data => "Check that the response format matches the [format] section",
            ErrorCategory::Configuration => "Fix the configuration file and run again",
            ErrorCategory::Io => "Check file paths and permissions",
            ErrorCategory::Endpoint => {
                "The endpoint is unusable; review [[error_handling]] or the upstream service"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::JobAborted { url, status, .. } => {
                format!("Job aborted: '{}' answered with status {}", url, status)
            }
            Self::MissingConfigError { field } => {
                format!("Configuration is missing '{}'", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_abort_is_critical_endpoint_error() {
        let err = EtlError::JobAborted {
            url: "http://host/1".to_string(),
            status: "500".to_string(),
            body: "boom".to_string(),
        };

        assert_eq!(err.category(), ErrorCategory::Endpoint);
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(
            err.to_string(),
            "Fetching from url 'http://host/1' returned status code '500' and body 'boom'"
        );
    }

    #[test]
    fn config_errors_are_high_severity() {
        let err = EtlError::MissingConfigError {
            field: "transform.url".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_friendly_message().contains("transform.url"));
    }
}
