use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::config::PreparedParams;
use crate::control::Communicator;
use crate::error::{Error, Result};
use crate::learner::Policy;
use crate::logger::{ScalarSummary, TabularLogger};
use crate::metrics;
use crate::rollout::RolloutWorker;

pub const LATEST_POLICY: &str = "policy_latest.pkl";
pub const BEST_POLICY: &str = "policy_best.pkl";

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub n_epochs: usize,
    pub n_test_rollouts: usize,
    pub n_cycles: usize,
    pub n_batches: usize,
    /// Epochs between periodic checkpoints, 0 keeps only best and latest.
    pub policy_save_interval: usize,
    pub save_policies: bool,
    pub demo_file: Option<PathBuf>,
}

impl TrainConfig {
    pub fn from_params(
        prepared: &PreparedParams,
        n_epochs: usize,
        policy_save_interval: usize,
        demo_file: Option<PathBuf>,
    ) -> Self {
        Self {
            n_epochs,
            n_test_rollouts: prepared.params.n_test_rollouts,
            n_cycles: prepared.params.n_cycles,
            n_batches: prepared.params.n_batches,
            policy_save_interval,
            save_policies: true,
            demo_file,
        }
    }
}

#[derive(Debug)]
pub struct TrainingStats {
    pub total_epochs: usize,
    pub best_success_rate: f64,
    pub best_epoch: usize,
    pub n_transitions_stored: usize,
    pub training_time: Duration,
    pub logdir: PathBuf,
}

/// Checkpoint locations inside a log directory.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    dir: PathBuf,
}

impl CheckpointPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn latest(&self) -> PathBuf {
        self.dir.join(LATEST_POLICY)
    }

    pub fn best(&self) -> PathBuf {
        self.dir.join(BEST_POLICY)
    }

    pub fn periodic(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("policy_{epoch}.pkl"))
    }
}

/// Best evaluation success rate seen so far. Never decreases; ties count as
/// an improvement so the latest equally good policy wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestTracker {
    best_success_rate: f64,
    best_epoch: usize,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            best_success_rate: -1.0,
            best_epoch: 0,
        }
    }
}

impl BestTracker {
    /// Returns true when `success_rate` reaches or beats the best so far.
    pub fn observe(&mut self, epoch: usize, success_rate: f64) -> bool {
        if success_rate >= self.best_success_rate {
            self.best_success_rate = success_rate;
            self.best_epoch = epoch;
            true
        } else {
            false
        }
    }

    pub fn best_success_rate(&self) -> f64 {
        self.best_success_rate
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

pub fn periodic_checkpoint_due(epoch: usize, policy_save_interval: usize) -> bool {
    policy_save_interval > 0 && epoch % policy_save_interval == 0
}

/// Rank 0 writes the table and summaries, other ranks only take part in the
/// reductions.
struct EpochLog {
    tabular: Option<TabularLogger>,
    summary: Option<ScalarSummary>,
}

impl EpochLog {
    fn new(rank: usize, logdir: &Path) -> Self {
        if rank != 0 {
            return Self {
                tabular: None,
                summary: None,
            };
        }
        Self {
            tabular: Some(TabularLogger::new(logdir)),
            summary: Some(ScalarSummary::create(logdir)),
        }
    }

    fn record(&mut self, key: &str, value: f64) {
        if let Some(tabular) = &mut self.tabular {
            tabular.record(key, value);
        }
    }

    fn flush(&mut self, scalars: &[(String, f64)], step: usize) -> Result<()> {
        if let Some(tabular) = &mut self.tabular {
            tabular.dump()?;
        }
        if let Some(summary) = &mut self.summary {
            summary.add_scalars(scalars, step);
        }
        Ok(())
    }
}

/// Runs the epoch loop: collect, optimize, evaluate, log and checkpoint.
///
/// Every rank must call this with the same configuration; the metric
/// reductions and the random-state check are collective.
pub async fn train<P>(
    policy: &mut P,
    rollout_worker: &mut RolloutWorker,
    evaluator: &mut RolloutWorker,
    comm: &dyn Communicator,
    rng: &mut StdRng,
    logdir: &Path,
    cfg: &TrainConfig,
) -> Result<TrainingStats>
where
    P: Policy + ?Sized,
{
    let rank = comm.rank();
    let paths = CheckpointPaths::new(logdir);
    let mut log = EpochLog::new(rank, logdir);
    let mut best = BestTracker::default();
    let started = Instant::now();

    info!("Training...");

    if policy.bc_loss() {
        let demo_file = cfg.demo_file.as_deref().ok_or_else(|| {
            Error::Config("bc_loss is enabled but no demonstration file was given".to_string())
        })?;
        info!(path = %demo_file.display(), "initializing demonstration buffer");
        policy.init_demo_buffer(demo_file)?;
    }

    for epoch in 0..cfg.n_epochs {
        debug!(epoch, n_epochs = cfg.n_epochs, "epoch started");

        // train
        rollout_worker.clear_history();
        for _ in 0..cfg.n_cycles {
            let episode = rollout_worker.generate_rollouts(&*policy)?;
            policy.store_episode(episode)?;
            for _ in 0..cfg.n_batches {
                policy.train()?;
            }
            policy.update_target_net();
        }

        // test
        info!("Testing");
        evaluator.clear_history();
        for _ in 0..cfg.n_test_rollouts {
            evaluator.generate_rollouts(&*policy)?;
        }

        // record logs
        log.record("epoch", epoch as f64);
        let local_logs = evaluator
            .logs("test")
            .into_iter()
            .chain(rollout_worker.logs("train"))
            .chain(policy.logs());
        let mut scalars = Vec::new();
        for (key, value) in local_logs {
            let value = metrics::average(comm, &[value]).await?;
            log.record(&key, value);
            scalars.push((key, value));
        }
        log.flush(&scalars, policy.n_transitions_stored())?;

        // save the policy if it's at least as good as the previous ones
        let success_rate = metrics::average(comm, &[evaluator.current_success_rate()]).await?;
        if best.observe(epoch, success_rate) && rank == 0 && cfg.save_policies {
            info!(
                "New best success rate: {}. Saving policy to {} ...",
                success_rate,
                paths.best().display()
            );
            policy.save(&paths.best())?;
            policy.save(&paths.latest())?;
        }
        if rank == 0 && cfg.save_policies && periodic_checkpoint_due(epoch, cfg.policy_save_interval)
        {
            let path = paths.periodic(epoch);
            info!("Saving periodic policy to {} ...", path.display());
            policy.save(&path)?;
        }

        info!(
            "Best success rate so far {} in epoch number {}",
            best.best_success_rate(),
            best.best_epoch()
        );

        // make sure that different ranks have different random states
        let local_uniform: f64 = rng.random();
        let root_uniform = comm.broadcast(&[local_uniform], 0).await?;
        if rank != 0 && root_uniform.first() == Some(&local_uniform) {
            return Err(Error::RandomStateCollision { rank });
        }
    }

    Ok(TrainingStats {
        total_epochs: cfg.n_epochs,
        best_success_rate: best.best_success_rate(),
        best_epoch: best.best_epoch(),
        n_transitions_stored: policy.n_transitions_stored(),
        training_time: started.elapsed(),
        logdir: logdir.to_path_buf(),
    })
}
