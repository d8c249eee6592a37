//! Episode generation for training and evaluation.

use std::collections::VecDeque;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::PreparedParams;
use crate::env::{EpisodeBatch, VecEnv, make_env};
use crate::error::Result;
use crate::learner::{ActOptions, Policy};

/// Number of rollout batches kept for the running statistics.
pub const HISTORY_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct RolloutConfig {
    /// Act greedily: no noise and no random actions.
    pub exploit: bool,
    pub use_target_net: bool,
    pub compute_q: bool,
    pub t: usize,
    pub rollout_batch_size: usize,
    pub gamma: f64,
    pub noise_eps: f64,
    pub random_eps: f64,
    pub history_len: usize,
}

impl RolloutConfig {
    /// Exploring worker that feeds the replay buffer.
    pub fn training(prepared: &PreparedParams) -> Self {
        let p = &prepared.params;
        Self {
            exploit: false,
            use_target_net: false,
            compute_q: false,
            t: prepared.t,
            rollout_batch_size: p.rollout_batch_size,
            gamma: prepared.gamma,
            noise_eps: p.noise_eps,
            random_eps: p.random_eps,
            history_len: HISTORY_LEN,
        }
    }

    /// Greedy worker used for testing.
    pub fn evaluation(prepared: &PreparedParams) -> Self {
        Self {
            exploit: true,
            use_target_net: prepared.params.test_with_polyak,
            compute_q: true,
            ..Self::training(prepared)
        }
    }

    fn act_options(&self) -> ActOptions {
        let (noise_eps, random_eps) = if self.exploit {
            (0.0, 0.0)
        } else {
            (self.noise_eps, self.random_eps)
        };
        ActOptions {
            noise_eps,
            random_eps,
            use_target_net: self.use_target_net,
            compute_q: self.compute_q,
        }
    }
}

pub struct RolloutWorker {
    envs: VecEnv,
    cfg: RolloutConfig,
    rng: StdRng,
    success_history: VecDeque<f64>,
    q_history: VecDeque<f64>,
    n_episodes: usize,
}

fn mean<I: IntoIterator<Item = f64>>(xs: I) -> f64 {
    let (sum, n) = xs.into_iter().fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn push_bounded(history: &mut VecDeque<f64>, value: f64, len: usize) {
    history.push_back(value);
    while history.len() > len {
        history.pop_front();
    }
}

impl RolloutWorker {
    pub fn new(env_name: &str, cfg: RolloutConfig) -> Result<Self> {
        let envs = VecEnv::new(|| make_env(env_name), cfg.rollout_batch_size)?;
        Ok(Self {
            envs,
            cfg,
            rng: StdRng::seed_from_u64(0),
            success_history: VecDeque::new(),
            q_history: VecDeque::new(),
            n_episodes: 0,
        })
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.cfg
    }

    pub fn seed(&mut self, seed: u64) {
        self.envs.seed(seed);
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Runs one episode in every environment for `T` steps.
    pub fn generate_rollouts<P>(&mut self, policy: &P) -> Result<EpisodeBatch>
    where
        P: Policy + ?Sized,
    {
        let mut obs = self.envs.reset()?;
        let n = obs.len();
        let opts = self.cfg.act_options();

        let mut batch = EpisodeBatch {
            o: obs.iter().map(|ob| vec![ob.observation.clone()]).collect(),
            ag: obs.iter().map(|ob| vec![ob.achieved_goal.clone()]).collect(),
            g: vec![Vec::with_capacity(self.cfg.t); n],
            u: vec![Vec::with_capacity(self.cfg.t); n],
        };
        let mut successes = vec![false; n];
        let mut qs = Vec::new();

        for _ in 0..self.cfg.t {
            let actions = policy.get_actions(&obs, &opts, &mut self.rng)?;
            if let Some(q) = actions.q {
                qs.extend(q);
            }
            let results = self.envs.step(&actions.u)?;

            for (i, (ob, u)) in obs.iter().zip(actions.u).enumerate() {
                batch.g[i].push(ob.desired_goal.clone());
                batch.u[i].push(u);
            }
            obs = results
                .into_iter()
                .enumerate()
                .map(|(i, (next, _reward, _done, info))| {
                    successes[i] = info.is_success;
                    batch.o[i].push(next.observation.clone());
                    batch.ag[i].push(next.achieved_goal.clone());
                    next
                })
                .collect();
        }

        let success_rate = mean(successes.iter().map(|&s| if s { 1.0 } else { 0.0 }));
        push_bounded(&mut self.success_history, success_rate, self.cfg.history_len);
        if self.cfg.compute_q {
            push_bounded(&mut self.q_history, mean(qs), self.cfg.history_len);
        }
        self.n_episodes += n;

        Ok(batch)
    }

    pub fn clear_history(&mut self) {
        self.success_history.clear();
        self.q_history.clear();
    }

    /// Mean success over the kept history, 0 when empty.
    pub fn current_success_rate(&self) -> f64 {
        mean(self.success_history.iter().copied())
    }

    pub fn current_mean_q(&self) -> f64 {
        mean(self.q_history.iter().copied())
    }

    pub fn n_episodes(&self) -> usize {
        self.n_episodes
    }

    pub fn logs(&self, prefix: &str) -> Vec<(String, f64)> {
        let mut logs = vec![("success_rate", self.current_success_rate())];
        if self.cfg.compute_q {
            logs.push(("mean_Q", self.current_mean_q()));
        }
        logs.push(("episode", self.n_episodes as f64));

        logs.into_iter()
            .map(|(key, value)| {
                let key = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                };
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_params, configure_dims, configure_policy, prepare_params};
    use crate::learner::{LinearPolicy, ReplayStrategy};

    fn prepared() -> PreparedParams {
        let overrides = crate::config::parse_overrides(&["T=8", "rollout_batch_size=3"]).unwrap();
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &overrides).unwrap();
        prepare_params(params).unwrap()
    }

    fn policy(prepared: &PreparedParams) -> LinearPolicy {
        let dims = configure_dims(prepared).unwrap();
        configure_policy(dims, prepared, true, 0).unwrap()
    }

    #[test]
    fn test_worker_settings_are_disjoint() {
        let p = prepared();
        let train = RolloutConfig::training(&p);
        let eval = RolloutConfig::evaluation(&p);
        assert!(!train.exploit && eval.exploit);
        assert!(!train.compute_q && eval.compute_q);
        assert_eq!(train.act_options().noise_eps, p.params.noise_eps);
        assert_eq!(eval.act_options().noise_eps, 0.0);
        assert_eq!(eval.act_options().random_eps, 0.0);
    }

    #[test]
    fn test_episode_batch_layout() {
        let p = prepared();
        let policy = policy(&p);
        let mut worker = RolloutWorker::new("PointReach-v1", RolloutConfig::training(&p)).unwrap();
        worker.seed(1);
        let batch = worker.generate_rollouts(&policy).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.horizon(), 8);
        assert!(batch.is_consistent());
        assert_eq!(worker.n_episodes(), 3);
    }

    #[test]
    fn test_logs_and_history() {
        let p = prepared();
        let policy = policy(&p);
        let mut worker =
            RolloutWorker::new("PointReach-v1", RolloutConfig::evaluation(&p)).unwrap();
        assert_eq!(worker.current_success_rate(), 0.0);

        for _ in 0..3 {
            worker.generate_rollouts(&policy).unwrap();
        }
        let keys: Vec<String> = worker.logs("test").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["test/success_rate", "test/mean_Q", "test/episode"]);

        worker.clear_history();
        assert_eq!(worker.current_success_rate(), 0.0);
        let logs = worker.logs("");
        assert!(logs.contains(&("episode".to_string(), 9.0)));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = VecDeque::new();
        for i in 0..10 {
            push_bounded(&mut history, i as f64, 4);
        }
        assert_eq!(history, VecDeque::from(vec![6.0, 7.0, 8.0, 9.0]));
    }

    #[test]
    fn test_same_seed_same_rollouts() {
        let p = prepared();
        let policy = policy(&p);
        let mut a = RolloutWorker::new("PointReach-v1", RolloutConfig::training(&p)).unwrap();
        let mut b = RolloutWorker::new("PointReach-v1", RolloutConfig::training(&p)).unwrap();
        a.seed(42);
        b.seed(42);
        assert_eq!(
            a.generate_rollouts(&policy).unwrap(),
            b.generate_rollouts(&policy).unwrap()
        );
    }
}
