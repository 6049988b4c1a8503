//! Configuration error types.

/// Config result.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors from loading, saving, or checking configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed fine, but the value cannot be used.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
