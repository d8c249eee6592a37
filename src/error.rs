use thiserror::Error;

use crate::control::CommError;
use crate::env::EnvError;
use crate::learner::PolicyError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error("config error: {0}")]
    Config(String),

    #[error("launch error: {0}")]
    Launch(String),

    #[error("rank {rank} drew the same random value as the root after broadcast")]
    RandomStateCollision { rank: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
