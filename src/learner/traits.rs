use std::path::Path;

use rand::rngs::StdRng;

use super::errors::PolicyError;
use crate::env::{EpisodeBatch, GoalObs};

/// How a rollout worker wants actions to be produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActOptions {
    /// Scale of gaussian action noise, relative to `max_u`.
    pub noise_eps: f64,
    /// Probability of replacing the action with a uniformly random one.
    pub random_eps: f64,
    pub use_target_net: bool,
    pub compute_q: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actions {
    pub u: Vec<Vec<f64>>,
    /// Q estimates of the returned actions, when requested and supported.
    pub q: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainStats {
    pub q_loss: f64,
    pub pi_loss: f64,
}

/// The learning side of the training loop.
///
/// Rollout workers only need `get_actions`, which takes `&self`; everything
/// that mutates the policy is driven by the epoch loop.
pub trait Policy: Send {
    fn get_actions(
        &self,
        obs: &[GoalObs],
        opts: &ActOptions,
        rng: &mut StdRng,
    ) -> Result<Actions, PolicyError>;

    fn store_episode(&mut self, episode: EpisodeBatch) -> Result<(), PolicyError>;

    /// One gradient step on a sampled batch.
    fn train(&mut self) -> Result<TrainStats, PolicyError>;

    fn update_target_net(&mut self);

    /// Scalar statistics, keyed by metric name.
    fn logs(&self) -> Vec<(String, f64)>;

    fn n_transitions_stored(&self) -> usize;

    fn save(&self, path: &Path) -> Result<(), PolicyError>;

    /// Whether the policy learns from demonstrations as well.
    fn bc_loss(&self) -> bool {
        false
    }

    fn init_demo_buffer(&mut self, path: &Path) -> Result<(), PolicyError>;
}
