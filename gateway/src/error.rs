//! Error types for the VIRTA gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for gateway build, configuration and lifecycle paths.
///
/// Stage outcomes are *not* represented here - see
/// [`StageError`](virta_core::StageError). This type covers the build-time
/// taxonomy: malformed documents, unknown factories, IO.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// YAML document error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Processor construction failed
    #[error("processor '{name}' build failed: {message}")]
    ProcessorBuild {
        /// Instance name from the configuration document
        name: String,
        /// Constructor failure detail
        message: String,
    },

    /// Metrics registration error
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl GatewayError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    /// Shorthand for a processor build failure.
    pub fn build(name: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::ProcessorBuild {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = GatewayError::config("missing pipeline section");
        assert_eq!(
            err.to_string(),
            "configuration error: missing pipeline section"
        );

        let err = GatewayError::build("rate_limiter/token_bucket", "bad qps");
        assert_eq!(
            err.to_string(),
            "processor 'rate_limiter/token_bucket' build failed: bad qps"
        );
    }
}
