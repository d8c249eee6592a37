use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("replay buffer is empty")]
    EmptyBuffer,

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("demonstration file {path}: {reason}")]
    DemoFile { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
