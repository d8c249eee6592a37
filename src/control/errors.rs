use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rank {rank} disconnected")]
    Disconnected { rank: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("expected {expected} values from rank {rank}, got {got}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
