//! Error types for the annprep pipeline and evaluator

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PrepError>;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A raw or training line could not be parsed
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// An id referenced by a training or qrel line is missing from its index
    #[error("{kind} id {id} not found in index")]
    IdNotFound { kind: &'static str, id: u64 },

    #[error("Offset {offset} out of range (store holds {total} records)")]
    OffsetOutOfRange { offset: u64, total: usize },

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File not found: {0}")]
    FileNotFound(std::path::PathBuf),
}

impl PrepError {
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        PrepError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for PrepError {
    fn from(err: bincode::Error) -> Self {
        PrepError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PrepError {
    fn from(err: serde_json::Error) -> Self {
        PrepError::Serialization(err.to_string())
    }
}
