use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("unknown environment: {0}")]
    UnknownEnv(String),

    #[error("expected {expected} actions, got {got}")]
    ActionCount { expected: usize, got: usize },

    #[error("expected action of dimension {expected}, got {got}")]
    ActionShape { expected: usize, got: usize },
}
