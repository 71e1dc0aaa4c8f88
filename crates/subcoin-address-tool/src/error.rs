/// Address tool error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Index(#[from] subcoin_address_index::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid block at line {line}: {err}")]
    InvalidBlock {
        line: usize,
        err: bitcoin::consensus::encode::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
