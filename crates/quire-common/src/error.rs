//! Error types shared across quire crates.

use miette::Diagnostic;

use crate::transport::SessionError;

/// Main error type for quire plumbing (config, IO, transport setup).
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum QuireError {
    /// IO error
    #[error(transparent)]
    #[diagnostic(code(quire::io))]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error(transparent)]
    #[diagnostic_source]
    Serde(#[from] SerDeError),

    /// Config file with an extension we don't know how to read
    #[error("unsupported config format: {0}")]
    #[diagnostic(
        code(quire::config::format),
        help("configuration files must end in .json or .toml")
    )]
    UnsupportedFormat(String),

    /// Endpoint URL did not parse
    #[error("invalid endpoint url: {0}")]
    #[diagnostic(code(quire::config::url))]
    InvalidUrl(#[from] url::ParseError),

    /// Realtime session error
    #[error(transparent)]
    #[diagnostic_source]
    Session(#[from] SessionError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(quire::serde::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(quire::serde::toml))]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(code(quire::serde::toml))]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    #[diagnostic(code(quire::serde::postcard))]
    Postcard(#[from] postcard::Error),
}

impl From<serde_json::Error> for QuireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(SerDeError::Json(err))
    }
}

impl From<toml::de::Error> for QuireError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serde(SerDeError::TomlDe(err))
    }
}

impl From<toml::ser::Error> for QuireError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serde(SerDeError::TomlSer(err))
    }
}
