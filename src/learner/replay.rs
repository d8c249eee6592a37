use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::errors::PolicyError;
use crate::env::{EpisodeBatch, RewardFn};

/// Goal relabeling strategy used when sampling transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStrategy {
    /// Relabel with goals achieved later in the same episode.
    #[default]
    Future,
    /// Plain experience replay.
    None,
}

impl fmt::Display for ReplayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayStrategy::Future => write!(f, "future"),
            ReplayStrategy::None => write!(f, "none"),
        }
    }
}

/// Sampled transitions, one row per entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transitions {
    pub o: Vec<Vec<f64>>,
    pub o2: Vec<Vec<f64>>,
    pub ag: Vec<Vec<f64>>,
    pub ag2: Vec<Vec<f64>>,
    pub g: Vec<Vec<f64>>,
    pub u: Vec<Vec<f64>>,
    pub r: Vec<f64>,
}

impl Transitions {
    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
}

struct StoredEpisode {
    o: Vec<Vec<f64>>,
    ag: Vec<Vec<f64>>,
    g: Vec<Vec<f64>>,
    u: Vec<Vec<f64>>,
}

pub struct HerSampler {
    future_p: f64,
    reward_fn: RewardFn,
}

impl HerSampler {
    pub fn new(strategy: ReplayStrategy, replay_k: usize, reward_fn: RewardFn) -> Self {
        let future_p = match strategy {
            ReplayStrategy::Future => 1.0 - 1.0 / (1.0 + replay_k as f64),
            ReplayStrategy::None => 0.0,
        };
        Self {
            future_p,
            reward_fn,
        }
    }

    /// Probability that a sampled transition gets a relabeled goal.
    pub fn future_p(&self) -> f64 {
        self.future_p
    }

    fn sample(
        &self,
        episodes: &[StoredEpisode],
        horizon: usize,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Transitions {
        let mut out = Transitions::default();
        for _ in 0..batch_size {
            let ep = &episodes[rng.random_range(0..episodes.len())];
            let t = rng.random_range(0..horizon);

            let g = if rng.random::<f64>() < self.future_p {
                let offset = (rng.random::<f64>() * (horizon - t) as f64) as usize;
                ep.ag[(t + 1 + offset).min(horizon)].clone()
            } else {
                ep.g[t].clone()
            };

            out.r.push((self.reward_fn)(&ep.ag[t + 1], &g));
            out.o.push(ep.o[t].clone());
            out.o2.push(ep.o[t + 1].clone());
            out.ag.push(ep.ag[t].clone());
            out.ag2.push(ep.ag[t + 1].clone());
            out.u.push(ep.u[t].clone());
            out.g.push(g);
        }
        out
    }
}

/// Episode-granular replay buffer.
///
/// Fills sequentially up to `buffer_size / horizon` episodes, then overwrites
/// uniformly random slots.
pub struct ReplayBuffer {
    horizon: usize,
    size: usize,
    episodes: Vec<StoredEpisode>,
    n_transitions_stored: usize,
    sampler: HerSampler,
}

impl ReplayBuffer {
    pub fn new(buffer_size: usize, horizon: usize, sampler: HerSampler) -> Self {
        let size = (buffer_size / horizon.max(1)).max(1);
        Self {
            horizon,
            size,
            episodes: Vec::new(),
            n_transitions_stored: 0,
            sampler,
        }
    }

    /// Capacity in episodes.
    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn current_size(&self) -> usize {
        self.episodes.len()
    }

    pub fn n_transitions_stored(&self) -> usize {
        self.n_transitions_stored
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn store_episode(
        &mut self,
        batch: &EpisodeBatch,
        rng: &mut StdRng,
    ) -> Result<(), PolicyError> {
        if !batch.is_consistent() {
            return Err(PolicyError::Shape("inconsistent episode batch".to_string()));
        }
        if !batch.is_empty() && batch.horizon() != self.horizon {
            return Err(PolicyError::Shape(format!(
                "episode horizon {} does not match buffer horizon {}",
                batch.horizon(),
                self.horizon
            )));
        }

        for i in 0..batch.len() {
            let episode = StoredEpisode {
                o: batch.o[i].clone(),
                ag: batch.ag[i].clone(),
                g: batch.g[i].clone(),
                u: batch.u[i].clone(),
            };
            if self.episodes.len() < self.size {
                self.episodes.push(episode);
            } else {
                let idx = rng.random_range(0..self.size);
                self.episodes[idx] = episode;
            }
        }
        self.n_transitions_stored += batch.n_transitions();
        Ok(())
    }

    pub fn sample(&self, batch_size: usize, rng: &mut StdRng) -> Result<Transitions, PolicyError> {
        if self.episodes.is_empty() || self.horizon == 0 {
            return Err(PolicyError::EmptyBuffer);
        }
        Ok(self
            .sampler
            .sample(&self.episodes, self.horizon, batch_size, rng))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;

    use super::*;

    fn reward_fn() -> RewardFn {
        Arc::new(|ag: &[f64], g: &[f64]| if ag == g { 0.0 } else { -1.0 })
    }

    /// One episode on a line: the achieved goal at step t is t.
    fn line_episode(t: usize) -> EpisodeBatch {
        let positions: Vec<Vec<f64>> = (0..=t).map(|i| vec![i as f64]).collect();
        EpisodeBatch {
            o: vec![positions.clone()],
            ag: vec![positions],
            g: vec![vec![vec![-100.0]; t]],
            u: vec![vec![vec![1.0]; t]],
        }
    }

    #[test]
    fn test_future_p() {
        let her = HerSampler::new(ReplayStrategy::Future, 4, reward_fn());
        assert!((her.future_p() - 0.8).abs() < 1e-12);
        let plain = HerSampler::new(ReplayStrategy::None, 4, reward_fn());
        assert_eq!(plain.future_p(), 0.0);
    }

    #[test]
    fn test_sampling_empty_buffer_fails() {
        let buffer = ReplayBuffer::new(100, 10, HerSampler::new(ReplayStrategy::None, 4, reward_fn()));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(buffer.sample(4, &mut rng), Err(PolicyError::EmptyBuffer)));
    }

    #[test]
    fn test_fills_then_overwrites() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buffer =
            ReplayBuffer::new(30, 10, HerSampler::new(ReplayStrategy::None, 4, reward_fn()));
        assert_eq!(buffer.capacity(), 3);
        for _ in 0..5 {
            buffer.store_episode(&line_episode(10), &mut rng).unwrap();
        }
        assert_eq!(buffer.current_size(), 3);
        assert_eq!(buffer.n_transitions_stored(), 50);
    }

    #[test]
    fn test_horizon_mismatch_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buffer =
            ReplayBuffer::new(100, 10, HerSampler::new(ReplayStrategy::None, 4, reward_fn()));
        assert!(matches!(
            buffer.store_episode(&line_episode(5), &mut rng),
            Err(PolicyError::Shape(_))
        ));
    }

    #[test]
    fn test_plain_replay_keeps_goals() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut buffer =
            ReplayBuffer::new(100, 10, HerSampler::new(ReplayStrategy::None, 4, reward_fn()));
        buffer.store_episode(&line_episode(10), &mut rng).unwrap();
        let batch = buffer.sample(64, &mut rng).unwrap();
        assert_eq!(batch.len(), 64);
        assert!(batch.g.iter().all(|g| g == &vec![-100.0]));
        assert!(batch.r.iter().all(|&r| r == -1.0));
    }

    #[test]
    fn test_future_relabels_with_later_achieved_goals() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut buffer =
            ReplayBuffer::new(100, 10, HerSampler::new(ReplayStrategy::Future, 4, reward_fn()));
        buffer.store_episode(&line_episode(10), &mut rng).unwrap();
        let batch = buffer.sample(512, &mut rng).unwrap();

        let mut relabeled = 0;
        for i in 0..batch.len() {
            if batch.g[i][0] >= 0.0 {
                relabeled += 1;
                assert!(batch.g[i][0] > batch.ag[i][0], "goal must come from the future");
                assert!(batch.g[i][0] <= 10.0);
            }
            let expected = if batch.ag2[i] == batch.g[i] { 0.0 } else { -1.0 };
            assert_eq!(batch.r[i], expected);
        }
        assert!(relabeled > 300 && relabeled < 500, "relabeled {relabeled}");
    }
}
