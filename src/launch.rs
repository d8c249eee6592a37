use std::ffi::OsString;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::config::{self, DEFAULT_ENV};
use crate::control::{self, Communicator, MASTER_ADDR_ENV, RANK_ENV, WORLD_SIZE_ENV};
use crate::error::{Error, Result};
use crate::learner::ReplayStrategy;
use crate::logger;
use crate::rollout::{RolloutConfig, RolloutWorker};
use crate::train::{self, TrainConfig, TrainingStats};

/// Offset between the seeds of consecutive ranks.
pub const RANK_SEED_STRIDE: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct LaunchArgs {
    pub env: String,
    pub logdir: Option<PathBuf>,
    pub n_epochs: usize,
    pub num_cpu: usize,
    pub seed: u64,
    pub replay_strategy: ReplayStrategy,
    pub policy_save_interval: usize,
    pub clip_return: bool,
    pub demo_file: Option<PathBuf>,
    /// Explicit parameter overrides, applied last.
    pub overrides: Map<String, Value>,
}

impl Default for LaunchArgs {
    fn default() -> Self {
        Self {
            env: DEFAULT_ENV.to_string(),
            logdir: None,
            n_epochs: 200,
            num_cpu: 1,
            seed: 0,
            replay_strategy: ReplayStrategy::Future,
            policy_save_interval: 10,
            clip_return: true,
            demo_file: None,
            overrides: Map::new(),
        }
    }
}

/// Which side of [`fork`] the current process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Parent,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForkMode {
    BindToCore,
    Plain,
}

pub fn rank_seed(seed: u64, rank: usize) -> u64 {
    seed + RANK_SEED_STRIDE * rank as u64
}

/// `logs/ddpg_her` + `PointReach-v1` -> `logs/ddpg_her_PointReach`.
pub fn logdir_for_env(base: &str, env_name: &str) -> PathBuf {
    let prefix = env_name.split('-').next().unwrap_or(env_name);
    PathBuf::from(format!("{base}_{prefix}"))
}

fn free_local_addr() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

/// The worker processes of one multi-process run.
struct WorkerGroup {
    /// Program that pins a command to a cpu list, `taskset` outside tests.
    binder: OsString,
    exe: PathBuf,
    args: Vec<OsString>,
    num_cpu: usize,
    master_addr: String,
}

impl WorkerGroup {
    fn command(&self, mode: ForkMode, rank: usize) -> Command {
        let mut cmd = match mode {
            ForkMode::BindToCore => {
                let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
                let mut cmd = Command::new(&self.binder);
                cmd.arg("--cpu-list")
                    .arg((rank % cores).to_string())
                    .arg(&self.exe);
                cmd
            }
            ForkMode::Plain => Command::new(&self.exe),
        };
        cmd.args(&self.args)
            .env(RANK_ENV, rank.to_string())
            .env(WORLD_SIZE_ENV, self.num_cpu.to_string())
            .env(MASTER_ADDR_ENV, &self.master_addr)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Starts every rank in `mode` and waits for all of them. Returns the
    /// ranks that exited with failure.
    async fn run(&self, mode: ForkMode) -> std::io::Result<Vec<usize>> {
        // children already started are killed on drop if a later spawn fails
        let children = (0..self.num_cpu)
            .map(|rank| self.command(mode, rank).spawn())
            .collect::<std::io::Result<Vec<Child>>>()?;
        info!(
            num_cpu = self.num_cpu,
            ?mode,
            master_addr = %self.master_addr,
            "started worker processes"
        );

        let mut failed = Vec::new();
        for (rank, mut child) in children.into_iter().enumerate() {
            let status = child.wait().await?;
            if !status.success() {
                error!(rank, %status, ?mode, "worker exited with failure");
                failed.push(rank);
            }
        }
        Ok(failed)
    }

    /// Core-bound run first; any failure to start or finish it re-runs the
    /// whole group unbound.
    async fn run_with_fallback(&self) -> Result<()> {
        match self.run(ForkMode::BindToCore).await {
            Ok(failed) if failed.is_empty() => return Ok(()),
            Ok(failed) => warn!(?failed, "core-bound workers failed, retrying without binding"),
            Err(e) => warn!(error = %e, "could not bind workers to cores, retrying without binding"),
        }

        let failed = self.run(ForkMode::Plain).await?;
        if !failed.is_empty() {
            return Err(Error::Launch(format!("workers {failed:?} failed")));
        }
        Ok(())
    }
}

/// Re-executes the current binary `num_cpu` times with the rank variables
/// set and waits for every child. Processes that already carry a rank, or
/// single-process runs, continue as the worker.
pub async fn fork(num_cpu: usize) -> Result<Role> {
    if num_cpu <= 1 || control::rank_from_env()?.is_some() {
        return Ok(Role::Worker);
    }

    let group = WorkerGroup {
        binder: OsString::from("taskset"),
        exe: std::env::current_exe()?,
        args: std::env::args_os().skip(1).collect(),
        num_cpu,
        master_addr: free_local_addr()?,
    };
    group.run_with_fallback().await?;
    Ok(Role::Parent)
}

/// Configures and trains one rank against an existing communicator.
pub async fn run_worker(args: &LaunchArgs, comm: &dyn Communicator) -> Result<TrainingStats> {
    let rank = comm.rank();
    let logdir = logger::configure_logdir(rank, args.logdir.as_deref());
    std::fs::create_dir_all(&logdir)?;
    info!("Logging to {}", logdir.display());

    let seed = rank_seed(args.seed, rank);
    let mut rng = StdRng::seed_from_u64(seed);

    let params = config::build_params(&args.env, args.replay_strategy, &args.overrides)?;
    config::save_params(&params, &logdir)?;
    let prepared = config::prepare_params(params)?;
    config::log_params(&prepared)?;

    if !args.clip_return {
        warn!("return clipping is disabled");
    }

    let dims = config::configure_dims(&prepared)?;
    let mut policy = config::configure_policy(dims, &prepared, args.clip_return, seed)?;

    let mut rollout_worker = RolloutWorker::new(
        &prepared.params.env_name,
        RolloutConfig::training(&prepared),
    )?;
    rollout_worker.seed(seed);

    let mut evaluator = RolloutWorker::new(
        &prepared.params.env_name,
        RolloutConfig::evaluation(&prepared),
    )?;
    evaluator.seed(seed);

    let cfg = TrainConfig::from_params(
        &prepared,
        args.n_epochs,
        args.policy_save_interval,
        args.demo_file.clone(),
    );
    train::train(
        &mut policy,
        &mut rollout_worker,
        &mut evaluator,
        comm,
        &mut rng,
        &logdir,
        &cfg,
    )
    .await
}

/// Entry point for the binary. Returns `None` in the parent of a
/// multi-process run once every worker has finished.
pub async fn launch(args: LaunchArgs) -> Result<Option<TrainingStats>> {
    if fork(args.num_cpu).await? == Role::Parent {
        return Ok(None);
    }
    let comm = control::from_env().await?;
    let stats = run_worker(&args, comm.as_ref()).await?;
    Ok(Some(stats))
}
