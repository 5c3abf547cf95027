//! Error types for ferry-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.ferry/`.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,

    /// The document parsed but a required setting is empty or inconsistent.
    #[error("invalid config: {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// A channel named on the command line is not in the config.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
