use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("persistence error: {0}")]
    Persistence(#[from] tokio_rusqlite::Error),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors produced while decoding or encoding a proxy URI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("invalid base64 payload")]
    BadBase64,

    #[error("invalid embedded JSON: {0}")]
    BadInnerJson(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

pub type Result<T> = std::result::Result<T, Error>;
