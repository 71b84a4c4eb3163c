use thiserror::Error;

/// Main error type for the memory guardian
#[derive(Debug, Error)]
pub enum GuardianError {
    // Process-related errors
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(u32, String),

    #[error("Process is in invalid state for this operation: {0}")]
    InvalidProcessState(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // State persistence errors
    #[error("State error: {0}")]
    StateError(String),

    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    // Health errors
    #[error("Health check '{0}' failed: {1}")]
    HealthCheckError(String, String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for guardian operations
pub type Result<T> = std::result::Result<T, GuardianError>;
