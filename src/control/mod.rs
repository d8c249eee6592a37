mod codec;
mod errors;
mod local;
mod tcp;
mod traits;

pub use codec::Frame;
pub use errors::CommError;
pub use local::LocalComm;
pub use tcp::TcpComm;
pub use traits::Communicator;

/// Rank of the current worker, set by the launcher on every child.
pub const RANK_ENV: &str = "HERTRAIN_RANK";
pub const WORLD_SIZE_ENV: &str = "HERTRAIN_WORLD_SIZE";
/// `host:port` of the rank 0 hub.
pub const MASTER_ADDR_ENV: &str = "HERTRAIN_MASTER_ADDR";

fn parse_env(var: &'static str) -> Result<Option<usize>, CommError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| CommError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

/// Rank assigned by the launcher, `None` outside a multi-process run.
pub fn rank_from_env() -> Result<Option<usize>, CommError> {
    parse_env(RANK_ENV)
}

/// Builds the communicator described by the launcher's environment
/// variables, or a [`LocalComm`] when they are absent.
pub async fn from_env() -> Result<Box<dyn Communicator>, CommError> {
    let rank = rank_from_env()?;
    let size = parse_env(WORLD_SIZE_ENV)?;
    let addr = std::env::var(MASTER_ADDR_ENV).ok();

    match (rank, size, addr) {
        (Some(rank), Some(size), Some(addr)) if size > 1 => {
            if rank == 0 {
                Ok(Box::new(TcpComm::bind_hub(addr, size).await?))
            } else {
                Ok(Box::new(TcpComm::connect(addr, rank, size).await?))
            }
        }
        (_, Some(size), None) if size > 1 => Err(CommError::InvalidEnv {
            var: MASTER_ADDR_ENV,
            value: String::new(),
        }),
        _ => Ok(Box::new(LocalComm)),
    }
}
