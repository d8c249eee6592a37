use serde::{Deserialize, Serialize};

/// Observation of a goal-conditioned environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalObs {
    pub observation: Vec<f64>,
    pub achieved_goal: Vec<f64>,
    pub desired_goal: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub is_success: bool,
}

/// Sizes of observation, goal and action vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    pub o: usize,
    pub g: usize,
    pub u: usize,
}

/// A batch of complete episodes, indexed `[episode][timestep][component]`.
///
/// `o` and `ag` hold `T + 1` entries per episode (the final observation is
/// kept so that transitions can read `t + 1`), `g` and `u` hold `T`.
/// This is also the on-disk format of demonstration files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeBatch {
    pub o: Vec<Vec<Vec<f64>>>,
    pub ag: Vec<Vec<Vec<f64>>>,
    pub g: Vec<Vec<Vec<f64>>>,
    pub u: Vec<Vec<Vec<f64>>>,
}

impl EpisodeBatch {
    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    /// Horizon of the stored episodes, 0 when empty.
    pub fn horizon(&self) -> usize {
        self.u.first().map(Vec::len).unwrap_or(0)
    }

    pub fn n_transitions(&self) -> usize {
        self.u.iter().map(Vec::len).sum()
    }

    /// Checks that every episode has the same horizon and the `T + 1` layout.
    pub fn is_consistent(&self) -> bool {
        let t = self.horizon();
        let n = self.len();
        self.o.len() == n
            && self.ag.len() == n
            && self.g.len() == n
            && (0..n).all(|i| {
                self.u[i].len() == t
                    && self.g[i].len() == t
                    && self.o[i].len() == t + 1
                    && self.ag[i].len() == t + 1
            })
    }

    /// Keeps at most the first `n` episodes.
    pub fn truncate(&mut self, n: usize) {
        self.o.truncate(n);
        self.ag.truncate(n);
        self.g.truncate(n);
        self.u.truncate(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(t: usize) -> EpisodeBatch {
        EpisodeBatch {
            o: vec![vec![vec![0.0]; t + 1]],
            ag: vec![vec![vec![0.0]; t + 1]],
            g: vec![vec![vec![1.0]; t]],
            u: vec![vec![vec![0.5]; t]],
        }
    }

    #[test]
    fn test_episode_batch_shape() {
        let batch = episode(5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.horizon(), 5);
        assert_eq!(batch.n_transitions(), 5);
        assert!(batch.is_consistent());
    }

    #[test]
    fn test_inconsistent_batch_detected() {
        let mut batch = episode(5);
        batch.o[0].pop();
        assert!(!batch.is_consistent());
    }
}
