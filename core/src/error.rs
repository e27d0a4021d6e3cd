use thiserror::Error;

/// Strata error types
#[derive(Error, Debug)]
pub enum StrataError {
    /// Malformed input detected before any mutation (bad directive argument,
    /// zero-match copy source, invalid digest)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Base + new layer count exceeds the depth limit
    #[error("Layer depth exceeded: {depth} layers (maximum {max})")]
    DepthExceeded { depth: usize, max: usize },

    /// A named resource (image, layer, cache record) is absent
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A directive failed to apply against the mounted root
    #[error("Step {index} ({kind} {value}) failed: {message}")]
    ExecutionError {
        index: usize,
        kind: String,
        value: String,
        message: String,
    },

    /// A differ rejected the finished root filesystem
    #[error("Diff validation failed in {differ}: {message}")]
    DiffValidationError { differ: String, message: String },

    /// Mount or unmount failure
    #[error("Mount error: {0}")]
    MountError(String),

    /// Layer or image store failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Build file parse error
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StrataError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StrataError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StrataError::NotFound { .. })
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StrataError {
    fn from(err: serde_yaml::Error) -> Self {
        StrataError::SerializationError(err.to_string())
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;
