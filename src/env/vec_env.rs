use super::{EnvError, GoalEnv, GoalObs, StepInfo};

/// Offset between the seeds of neighbouring environments.
pub const SEED_STRIDE: u64 = 1000;

pub struct VecEnv {
    envs: Vec<Box<dyn GoalEnv>>,
}

impl VecEnv {
    pub fn new<F>(make_env: F, num_envs: usize) -> Result<Self, EnvError>
    where
        F: Fn() -> Result<Box<dyn GoalEnv>, EnvError>,
    {
        let envs = (0..num_envs)
            .map(|_| make_env())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { envs })
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    pub fn seed(&mut self, seed: u64) {
        for (idx, env) in self.envs.iter_mut().enumerate() {
            env.seed(seed + SEED_STRIDE * idx as u64);
        }
    }

    pub fn reset(&mut self) -> Result<Vec<GoalObs>, EnvError> {
        self.envs.iter_mut().map(|env| env.reset()).collect()
    }

    pub fn step(
        &mut self,
        actions: &[Vec<f64>],
    ) -> Result<Vec<(GoalObs, f64, bool, StepInfo)>, EnvError> {
        if actions.len() != self.envs.len() {
            return Err(EnvError::ActionCount {
                expected: self.envs.len(),
                got: actions.len(),
            });
        }

        self.envs
            .iter_mut()
            .zip(actions)
            .map(|(env, action)| env.step(action))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::make_env;

    #[test]
    fn test_step_rejects_wrong_action_count() {
        let mut envs = VecEnv::new(|| make_env("PointReach-v1"), 2).unwrap();
        envs.reset().unwrap();
        let err = envs.step(&[vec![0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, EnvError::ActionCount { expected: 2, got: 1 }));
    }

    #[test]
    fn test_seeding_gives_each_env_its_own_goal() {
        let mut envs = VecEnv::new(|| make_env("PointReach-v1"), 3).unwrap();
        envs.seed(7);
        let obs = envs.reset().unwrap();
        assert_ne!(obs[0].desired_goal, obs[1].desired_goal);
        assert_ne!(obs[1].desired_goal, obs[2].desired_goal);

        let mut again = VecEnv::new(|| make_env("PointReach-v1"), 3).unwrap();
        again.seed(7);
        assert_eq!(again.reset().unwrap(), obs);
    }
}
