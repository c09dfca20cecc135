use thiserror::Error;

/// Shared error type for configuration and IO concerns below the kernel.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("{0}")]
    Other(String),
}
