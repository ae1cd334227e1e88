//! Errors raised while loading, overriding or validating parameters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The TOML text did not match the parameter model.
    #[error("failed to parse TOML from '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its allowed domain.
    #[error("invalid parameter `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    /// A `[min, max]` range has `min > max`.
    #[error("inverted range `{field}`: min {min} > max {max}")]
    InvertedRange { field: String, min: f64, max: f64 },

    /// An override path does not name a numeric parameter.
    #[error("unknown parameter path `{0}`")]
    UnknownPath(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), reason: reason.into() }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
