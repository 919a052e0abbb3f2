//! Error types for kadwalk

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Empty key")]
    EmptyKey,

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("Query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
