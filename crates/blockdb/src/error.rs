//! BlockDB error types.

use thiserror::Error;

/// BlockDB error type.
#[derive(Debug, Error)]
pub enum BlockDbError {
    /// IO error while reading, writing or deleting the backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte slice too short to decode a record or header.
    #[error("buffer too short: need {needed} bytes, got {actual}")]
    ShortBuffer { needed: usize, actual: usize },

    /// World name cannot be turned into a backing file path.
    #[error("invalid world name: {0:?}")]
    InvalidWorldName(String),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for BlockDB operations.
pub type BlockDbResult<T> = Result<T, BlockDbError>;
