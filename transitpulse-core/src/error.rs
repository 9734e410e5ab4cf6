use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No path found from '{source_node}' to '{target_node}' in mode '{mode}'")]
    NoPathFound {
        mode: String,
        source_node: String,
        target_node: String,
    },
    #[error("Incident source unavailable: {0}")]
    TransientSource(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Feed archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Coarse classification used by callers that map errors onto their own surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    InvalidArgument,
    NoPathFound,
    TransientSource,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NoPathFound { .. } => ErrorKind::NoPathFound,
            Error::TransientSource(_) => ErrorKind::TransientSource,
            Error::Configuration(_)
            | Error::IoError(_)
            | Error::CsvError(_)
            | Error::ZipError(_)
            | Error::JsonError(_) => ErrorKind::Configuration,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
