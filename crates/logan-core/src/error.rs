//! Error types for logan

/// Result type alias using logan's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for model construction, loading and classification
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed path-spec, absent or conflicting construction options
    #[error("configuration error: {0}")]
    Config(String),

    /// Referenced plugin file does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A loaded, registered or supplied model does not implement the full contract
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A recognised but unimplemented backend was requested
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The inference backend failed during init or classification
    #[error("backend failure: {0}")]
    Backend(String),

    /// The dynamic library could not be opened
    #[error("plugin load error: {0}")]
    PluginLoad(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new contract violation error
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    /// Create a new unsupported-feature error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFeature(msg.into())
    }

    /// Create a new backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new plugin load error
    pub fn plugin_load(msg: impl Into<String>) -> Self {
        Self::PluginLoad(msg.into())
    }
}
