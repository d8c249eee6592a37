use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::errors::PolicyError;
use super::normalizer::Normalizer;
use super::replay::{HerSampler, ReplayBuffer, ReplayStrategy};
use super::traits::{ActOptions, Actions, Policy, TrainStats};
use crate::env::{Dims, EpisodeBatch, GoalObs, RewardFn};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearPolicyConfig {
    pub dims: Dims,
    pub horizon: usize,
    pub max_u: f64,
    pub pi_lr: f64,
    pub q_lr: f64,
    pub polyak: f64,
    pub gamma: f64,
    /// Bellman targets are clipped to `[-clip_return, 0]`.
    pub clip_return: f64,
    pub clip_obs: f64,
    pub relative_goals: bool,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub replay_strategy: ReplayStrategy,
    pub replay_k: usize,
    pub norm_eps: f64,
    pub norm_clip: f64,
    pub bc_loss: bool,
    pub num_demo: usize,
    pub demo_batch_size: usize,
}

/// Serialized form of a [`LinearPolicy`], written at every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub dims: Dims,
    pub max_u: f64,
    pub clip_obs: f64,
    pub relative_goals: bool,
    pub actor: Vec<Vec<f64>>,
    pub critic: Vec<f64>,
    pub target_actor: Vec<Vec<f64>>,
    pub target_critic: Vec<f64>,
    pub o_stats: Normalizer,
    pub g_stats: Normalizer,
}

impl PolicySnapshot {
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Goal-conditioned linear actor-critic.
///
/// The actor regresses onto stored actions under hindsight goals, so it
/// learns which action leads to which achieved goal. The critic is a linear
/// TD(0) estimator used for `Q` reporting. Both keep polyak-averaged targets.
pub struct LinearPolicy {
    cfg: LinearPolicyConfig,
    actor: Vec<Vec<f64>>,
    critic: Vec<f64>,
    target_actor: Vec<Vec<f64>>,
    target_critic: Vec<f64>,
    o_stats: Normalizer,
    g_stats: Normalizer,
    buffer: ReplayBuffer,
    demo_buffer: Option<ReplayBuffer>,
    reward_fn: RewardFn,
    rng: StdRng,
    last_stats: TrainStats,
    last_bc_loss: f64,
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn blend(target: &mut [f64], source: &[f64], polyak: f64) {
    for (t, s) in target.iter_mut().zip(source) {
        *t = polyak * *t + (1.0 - polyak) * s;
    }
}

impl LinearPolicy {
    pub fn new(cfg: LinearPolicyConfig, reward_fn: RewardFn, seed: u64) -> Self {
        let Dims { o, g, u } = cfg.dims;
        let actor = vec![vec![0.0; o + g + 1]; u];
        let critic = vec![0.0; o + g + u + 1];
        let sampler = HerSampler::new(cfg.replay_strategy, cfg.replay_k, reward_fn.clone());
        let buffer = ReplayBuffer::new(cfg.buffer_size, cfg.horizon, sampler);
        Self {
            target_actor: actor.clone(),
            target_critic: critic.clone(),
            actor,
            critic,
            o_stats: Normalizer::new(o, cfg.norm_eps, cfg.norm_clip),
            g_stats: Normalizer::new(g, cfg.norm_eps, cfg.norm_clip),
            buffer,
            demo_buffer: None,
            reward_fn,
            rng: StdRng::seed_from_u64(seed),
            last_stats: TrainStats::default(),
            last_bc_loss: 0.0,
            cfg,
        }
    }

    pub fn config(&self) -> &LinearPolicyConfig {
        &self.cfg
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            dims: self.cfg.dims,
            max_u: self.cfg.max_u,
            clip_obs: self.cfg.clip_obs,
            relative_goals: self.cfg.relative_goals,
            actor: self.actor.clone(),
            critic: self.critic.clone(),
            target_actor: self.target_actor.clone(),
            target_critic: self.target_critic.clone(),
            o_stats: self.o_stats.clone(),
            g_stats: self.g_stats.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: PolicySnapshot) -> Result<(), PolicyError> {
        if snapshot.dims != self.cfg.dims {
            return Err(PolicyError::Shape(format!(
                "snapshot dims {:?} do not match policy dims {:?}",
                snapshot.dims, self.cfg.dims
            )));
        }
        self.actor = snapshot.actor;
        self.critic = snapshot.critic;
        self.target_actor = snapshot.target_actor;
        self.target_critic = snapshot.target_critic;
        self.o_stats = snapshot.o_stats;
        self.g_stats = snapshot.g_stats;
        Ok(())
    }

    /// Normalized `[o, g, 1]` input of the actor.
    fn features(&self, o: &[f64], ag: &[f64], g: &[f64]) -> Vec<f64> {
        let clip = self.cfg.clip_obs;
        let o: Vec<f64> = o.iter().map(|v| v.clamp(-clip, clip)).collect();
        let g: Vec<f64> = if self.cfg.relative_goals {
            g.iter().zip(ag).map(|(g, ag)| (g - ag).clamp(-clip, clip)).collect()
        } else {
            g.iter().map(|v| v.clamp(-clip, clip)).collect()
        };
        let mut x = self.o_stats.normalize(&o);
        x.extend(self.g_stats.normalize(&g));
        x.push(1.0);
        x
    }

    /// Raw actor output in units of `max_u`.
    fn preactivation(actor: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
        actor.iter().map(|row| dot(row, x)).collect()
    }

    fn act(&self, actor: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
        Self::preactivation(actor, x)
            .into_iter()
            .map(|a| a.clamp(-1.0, 1.0) * self.cfg.max_u)
            .collect()
    }

    /// `[x without bias, u / max_u, 1]`
    fn critic_features(&self, x: &[f64], u: &[f64]) -> Vec<f64> {
        let mut phi = x[..x.len() - 1].to_vec();
        phi.extend(u.iter().map(|a| a / self.cfg.max_u));
        phi.push(1.0);
        phi
    }

    fn check_obs(&self, obs: &GoalObs) -> Result<(), PolicyError> {
        let dims = self.cfg.dims;
        if obs.observation.len() != dims.o
            || obs.desired_goal.len() != dims.g
            || obs.achieved_goal.len() != dims.g
        {
            return Err(PolicyError::Shape(format!(
                "observation does not match dims {dims:?}"
            )));
        }
        Ok(())
    }

    fn update_normalizers(&mut self, batch: &EpisodeBatch) {
        self.o_stats.update(batch.o.iter().flatten());
        if self.cfg.relative_goals {
            let rel: Vec<Vec<f64>> = batch
                .g
                .iter()
                .zip(&batch.ag)
                .flat_map(|(gs, ags)| {
                    gs.iter()
                        .zip(ags)
                        .map(|(g, ag)| g.iter().zip(ag).map(|(g, ag)| g - ag).collect())
                })
                .collect();
            self.g_stats.update(rel.iter());
        } else {
            // achieved goals are the relabeling candidates
            self.g_stats
                .update(batch.g.iter().flatten().chain(batch.ag.iter().flatten()));
        }
    }

    /// Accumulates the regression gradient of the actor towards the stored
    /// actions and returns the summed squared error.
    fn accumulate_actor_grad(
        &self,
        xs: &[Vec<f64>],
        us: &[Vec<f64>],
        weight: f64,
        grad: &mut [Vec<f64>],
    ) -> f64 {
        let mut loss = 0.0;
        for (x, u) in xs.iter().zip(us) {
            let pred = Self::preactivation(&self.actor, x);
            for (k, (p, a)) in pred.iter().zip(u).enumerate() {
                let err = p - a / self.cfg.max_u;
                loss += err * err;
                for (gw, xi) in grad[k].iter_mut().zip(x) {
                    *gw += weight * 2.0 * err * xi;
                }
            }
        }
        loss
    }
}

impl Policy for LinearPolicy {
    fn get_actions(
        &self,
        obs: &[GoalObs],
        opts: &ActOptions,
        rng: &mut StdRng,
    ) -> Result<Actions, PolicyError> {
        let (actor, critic) = if opts.use_target_net {
            (&self.target_actor, &self.target_critic)
        } else {
            (&self.actor, &self.critic)
        };
        let max_u = self.cfg.max_u;

        let mut us = Vec::with_capacity(obs.len());
        let mut qs = Vec::with_capacity(obs.len());
        for ob in obs {
            self.check_obs(ob)?;
            let x = self.features(&ob.observation, &ob.achieved_goal, &ob.desired_goal);
            let mut u = self.act(actor, &x);

            if opts.noise_eps > 0.0 {
                for a in u.iter_mut() {
                    *a = (*a + opts.noise_eps * max_u * standard_normal(rng)).clamp(-max_u, max_u);
                }
            }
            if opts.random_eps > 0.0 && rng.random_bool(opts.random_eps.min(1.0)) {
                for a in u.iter_mut() {
                    *a = rng.random_range(-max_u..=max_u);
                }
            }

            if opts.compute_q {
                qs.push(dot(critic, &self.critic_features(&x, &u)));
            }
            us.push(u);
        }

        Ok(Actions {
            u: us,
            q: opts.compute_q.then_some(qs),
        })
    }

    fn store_episode(&mut self, episode: EpisodeBatch) -> Result<(), PolicyError> {
        self.buffer.store_episode(&episode, &mut self.rng)?;
        self.update_normalizers(&episode);
        Ok(())
    }

    fn train(&mut self) -> Result<TrainStats, PolicyError> {
        let batch = self.buffer.sample(self.cfg.batch_size, &mut self.rng)?;
        let n = batch.len() as f64;
        let xs: Vec<Vec<f64>> = (0..batch.len())
            .map(|i| self.features(&batch.o[i], &batch.ag[i], &batch.g[i]))
            .collect();

        // critic: TD(0) against the target networks
        let mut q_grad = vec![0.0; self.critic.len()];
        let mut q_loss = 0.0;
        for i in 0..batch.len() {
            let x2 = self.features(&batch.o2[i], &batch.ag2[i], &batch.g[i]);
            let u2 = self.act(&self.target_actor, &x2);
            let q2 = dot(&self.target_critic, &self.critic_features(&x2, &u2));
            let y = (batch.r[i] + self.cfg.gamma * q2).clamp(-self.cfg.clip_return, 0.0);
            let phi = self.critic_features(&xs[i], &batch.u[i]);
            let err = dot(&self.critic, &phi) - y;
            q_loss += err * err;
            for (gw, p) in q_grad.iter_mut().zip(&phi) {
                *gw += 2.0 * err * p / n;
            }
        }
        for (w, gw) in self.critic.iter_mut().zip(&q_grad) {
            *w -= self.cfg.q_lr * gw;
        }

        // actor: hindsight regression, plus demonstrations when enabled
        let mut pi_grad = vec![vec![0.0; self.actor[0].len()]; self.actor.len()];
        let pi_loss = self.accumulate_actor_grad(&xs, &batch.u, 1.0 / n, &mut pi_grad) / n;

        if self.cfg.bc_loss && self.cfg.demo_batch_size > 0 {
            if let Some(demo) = &self.demo_buffer {
                let demo_batch = demo.sample(self.cfg.demo_batch_size, &mut self.rng)?;
                let dn = demo_batch.len() as f64;
                let demo_xs: Vec<Vec<f64>> = (0..demo_batch.len())
                    .map(|i| self.features(&demo_batch.o[i], &demo_batch.ag[i], &demo_batch.g[i]))
                    .collect();
                self.last_bc_loss =
                    self.accumulate_actor_grad(&demo_xs, &demo_batch.u, 1.0 / dn, &mut pi_grad) / dn;
            }
        }

        for (row, grow) in self.actor.iter_mut().zip(&pi_grad) {
            for (w, gw) in row.iter_mut().zip(grow) {
                *w -= self.cfg.pi_lr * gw;
            }
        }

        self.last_stats = TrainStats {
            q_loss: q_loss / n,
            pi_loss,
        };
        Ok(self.last_stats)
    }

    fn update_target_net(&mut self) {
        let polyak = self.cfg.polyak;
        for (target, main) in self.target_actor.iter_mut().zip(&self.actor) {
            blend(target, main, polyak);
        }
        blend(&mut self.target_critic, &self.critic, polyak);
    }

    fn logs(&self) -> Vec<(String, f64)> {
        let mut logs = vec![
            ("stats/o_mean".to_string(), mean(self.o_stats.mean())),
            ("stats/o_std".to_string(), mean(self.o_stats.std())),
            ("stats/g_mean".to_string(), mean(self.g_stats.mean())),
            ("stats/g_std".to_string(), mean(self.g_stats.std())),
            ("stats/pi_loss".to_string(), self.last_stats.pi_loss),
            ("stats/q_loss".to_string(), self.last_stats.q_loss),
        ];
        if self.cfg.bc_loss {
            logs.push(("stats/bc_loss".to_string(), self.last_bc_loss));
        }
        logs
    }

    fn n_transitions_stored(&self) -> usize {
        self.buffer.n_transitions_stored()
    }

    fn save(&self, path: &Path) -> Result<(), PolicyError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.snapshot())?;
        debug!(path = %path.display(), "policy saved");
        Ok(())
    }

    fn bc_loss(&self) -> bool {
        self.cfg.bc_loss
    }

    fn init_demo_buffer(&mut self, path: &Path) -> Result<(), PolicyError> {
        let demo_err = |reason: String| PolicyError::DemoFile {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| demo_err(e.to_string()))?;
        let mut demos: EpisodeBatch =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| demo_err(e.to_string()))?;
        demos.truncate(self.cfg.num_demo);

        if demos.is_empty() {
            return Err(demo_err("no episodes".to_string()));
        }
        if !demos.is_consistent() || demos.horizon() != self.cfg.horizon {
            return Err(demo_err(format!(
                "expected episodes of horizon {}",
                self.cfg.horizon
            )));
        }

        let sampler = HerSampler::new(ReplayStrategy::None, 0, self.reward_fn.clone());
        let mut demo_buffer = ReplayBuffer::new(self.cfg.buffer_size, self.cfg.horizon, sampler);
        demo_buffer.store_episode(&demos, &mut self.rng)?;
        self.update_normalizers(&demos);
        info!(
            episodes = demo_buffer.current_size(),
            transitions = demo_buffer.n_transitions_stored(),
            "demonstration buffer initialized"
        );
        self.demo_buffer = Some(demo_buffer);
        Ok(())
    }
}
