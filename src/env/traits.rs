use std::sync::Arc;

use crate::env::errors::EnvError;
use crate::env::types::{GoalObs, StepInfo};

/// Reward function shared with the replay buffer so relabeled goals can be
/// rescored without an environment instance.
pub type RewardFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// A goal-conditioned environment.
///
/// Observations carry the achieved and desired goal next to the raw
/// observation, which is what hindsight relabeling needs.
pub trait GoalEnv: Send {
    fn reset(&mut self) -> Result<GoalObs, EnvError>;
    fn step(&mut self, action: &[f64]) -> Result<(GoalObs, f64, bool, StepInfo), EnvError>;
    fn compute_reward(&self, achieved_goal: &[f64], desired_goal: &[f64]) -> f64;
    fn reward_fn(&self) -> RewardFn;
    fn seed(&mut self, seed: u64);
    fn max_episode_steps(&self) -> usize;
    fn action_dim(&self) -> usize;
}
