//! Error types for the detection engine

use thiserror::Error;

/// Detection engine error type
#[derive(Error, Debug)]
pub enum DefenderError {
    /// Malformed or empty traffic window
    #[error("invalid traffic input: {0}")]
    Input(String),

    /// Replay buffer holds fewer transitions than requested
    #[error("insufficient data: {available} transitions available, {requested} requested")]
    InsufficientData { available: usize, requested: usize },

    /// Persisted weights are missing or corrupt
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// Persisted configuration is incompatible with the running agent
    #[error("config mismatch on {field}: expected {expected}, found {found}")]
    ConfigMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    /// NaN or infinite value where a finite one is required
    #[error("numeric error: {0}")]
    Numeric(String),

    /// Configuration value out of range
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DefenderError {
    /// Whether the detector may absorb this error and keep running
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConfigMismatch { .. } | Self::Config(_))
    }
}

/// Result type for the detection engine
pub type DefenderResult<T> = Result<T, DefenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classes() {
        assert!(DefenderError::Input("empty".into()).is_recoverable());
        assert!(DefenderError::InsufficientData { available: 1, requested: 32 }.is_recoverable());
        assert!(DefenderError::ModelLoad("corrupt".into()).is_recoverable());
        assert!(DefenderError::Numeric("nan".into()).is_recoverable());

        let mismatch = DefenderError::ConfigMismatch {
            field: "state_size",
            expected: "8".into(),
            found: "10".into(),
        };
        assert!(!mismatch.is_recoverable());
        assert_eq!(
            mismatch.to_string(),
            "config mismatch on state_size: expected 8, found 10"
        );
    }
}
