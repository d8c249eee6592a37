pub mod errors;
pub mod point_reach;
pub mod traits;
pub mod types;
pub mod vec_env;

pub use errors::EnvError;
pub use point_reach::{PointReach, PointReachConfig};
pub use traits::{GoalEnv, RewardFn};
pub use types::{Dims, EpisodeBatch, GoalObs, StepInfo};
pub use vec_env::VecEnv;

/// Names accepted by [`make_env`].
pub const ENV_NAMES: &[&str] = &["PointReach-v1", "PointReachFar-v1"];

pub fn make_env(name: &str) -> Result<Box<dyn GoalEnv>, EnvError> {
    match name {
        "PointReach-v1" => Ok(Box::new(PointReach::new(PointReachConfig::reach()))),
        "PointReachFar-v1" => Ok(Box::new(PointReach::new(PointReachConfig::reach_far()))),
        other => Err(EnvError::UnknownEnv(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        for name in ENV_NAMES {
            assert!(make_env(name).is_ok(), "{name} should be registered");
        }
        assert!(matches!(
            make_env("FetchPickAndPlace-v1"),
            Err(EnvError::UnknownEnv(_))
        ));
    }
}
