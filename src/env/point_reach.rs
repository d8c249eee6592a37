use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{EnvError, GoalEnv, GoalObs, RewardFn, StepInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct PointReachConfig {
    pub dim: usize,
    /// Half-width of the arena; positions and goals live in `[-range, range]^dim`.
    pub range: f64,
    /// Displacement produced by a unit action.
    pub step_size: f64,
    pub distance_threshold: f64,
    pub max_episode_steps: usize,
}

impl PointReachConfig {
    pub fn reach() -> Self {
        Self {
            dim: 2,
            range: 1.0,
            step_size: 0.1,
            distance_threshold: 0.05,
            max_episode_steps: 50,
        }
    }

    pub fn reach_far() -> Self {
        Self {
            dim: 3,
            range: 2.0,
            step_size: 0.1,
            distance_threshold: 0.1,
            max_episode_steps: 100,
        }
    }
}

/// A point mass that has to be driven onto a goal position.
///
/// Rewards are sparse: `0` within `distance_threshold` of the goal, `-1`
/// otherwise. Episodes never end early, the rollout horizon cuts them.
pub struct PointReach {
    cfg: PointReachConfig,
    pos: Vec<f64>,
    goal: Vec<f64>,
    rng: StdRng,
}

impl PointReach {
    pub fn new(cfg: PointReachConfig) -> Self {
        let dim = cfg.dim;
        Self {
            cfg,
            pos: vec![0.0; dim],
            goal: vec![0.0; dim],
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn config(&self) -> &PointReachConfig {
        &self.cfg
    }

    fn obs(&self) -> GoalObs {
        GoalObs {
            observation: self.pos.clone(),
            achieved_goal: self.pos.clone(),
            desired_goal: self.goal.clone(),
        }
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn sparse_reward(achieved_goal: &[f64], desired_goal: &[f64], threshold: f64) -> f64 {
    if distance(achieved_goal, desired_goal) > threshold {
        -1.0
    } else {
        0.0
    }
}

impl GoalEnv for PointReach {
    fn reset(&mut self) -> Result<GoalObs, EnvError> {
        let range = self.cfg.range;
        self.pos = vec![0.0; self.cfg.dim];
        self.goal = (0..self.cfg.dim)
            .map(|_| self.rng.random_range(-range..range))
            .collect();
        Ok(self.obs())
    }

    fn step(&mut self, action: &[f64]) -> Result<(GoalObs, f64, bool, StepInfo), EnvError> {
        if action.len() != self.cfg.dim {
            return Err(EnvError::ActionShape {
                expected: self.cfg.dim,
                got: action.len(),
            });
        }

        let range = self.cfg.range;
        for (p, a) in self.pos.iter_mut().zip(action) {
            *p = (*p + a.clamp(-1.0, 1.0) * self.cfg.step_size).clamp(-range, range);
        }

        let reward = self.compute_reward(&self.pos, &self.goal);
        let info = StepInfo {
            is_success: reward == 0.0,
        };
        Ok((self.obs(), reward, false, info))
    }

    fn compute_reward(&self, achieved_goal: &[f64], desired_goal: &[f64]) -> f64 {
        sparse_reward(achieved_goal, desired_goal, self.cfg.distance_threshold)
    }

    fn reward_fn(&self) -> RewardFn {
        let threshold = self.cfg.distance_threshold;
        Arc::new(move |ag, g| sparse_reward(ag, g, threshold))
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn max_episode_steps(&self) -> usize {
        self.cfg.max_episode_steps
    }

    fn action_dim(&self) -> usize {
        self.cfg.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_towards_goal_reaches_it() {
        let mut env = PointReach::new(PointReachConfig::reach());
        env.seed(3);
        let mut obs = env.reset().unwrap();
        let mut success = false;
        for _ in 0..env.max_episode_steps() {
            let action: Vec<f64> = obs
                .desired_goal
                .iter()
                .zip(&obs.achieved_goal)
                .map(|(g, ag)| (g - ag) / 0.1)
                .collect();
            let (next, _, _, info) = env.step(&action).unwrap();
            success = info.is_success;
            obs = next;
        }
        assert!(success);
        assert_eq!(env.compute_reward(&obs.achieved_goal, &obs.desired_goal), 0.0);
    }

    #[test]
    fn test_positions_stay_in_arena() {
        let mut env = PointReach::new(PointReachConfig::reach());
        env.reset().unwrap();
        for _ in 0..100 {
            let (obs, _, done, _) = env.step(&[1.0, -1.0]).unwrap();
            assert!(!done);
            assert!(obs.observation.iter().all(|p| p.abs() <= 1.0));
        }
    }

    #[test]
    fn test_reward_fn_matches_compute_reward() {
        let env = PointReach::new(PointReachConfig::reach());
        let f = env.reward_fn();
        assert_eq!(f(&[0.0, 0.0], &[0.01, 0.0]), 0.0);
        assert_eq!(f(&[0.0, 0.0], &[0.5, 0.0]), -1.0);
        assert_eq!(env.compute_reward(&[0.0, 0.0], &[0.5, 0.0]), -1.0);
    }

    #[test]
    fn test_wrong_action_dim_is_rejected() {
        let mut env = PointReach::new(PointReachConfig::reach());
        env.reset().unwrap();
        assert!(matches!(
            env.step(&[0.0]),
            Err(EnvError::ActionShape { expected: 2, got: 1 })
        ));
    }
}
