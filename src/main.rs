use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use hertrain::config::{self, DEFAULT_ENV};
use hertrain::control;
use hertrain::launch::{self, LaunchArgs};
use hertrain::learner::ReplayStrategy;
use hertrain::logger;

#[derive(Parser, Debug)]
#[command(
    name = "her-train",
    version,
    about = "Train a goal-conditioned policy with hindsight experience replay"
)]
struct Cli {
    /// Environment id
    #[arg(long, default_value = DEFAULT_ENV)]
    env: String,

    /// Log directory, suffixed with the environment name
    #[arg(long, default_value = "logs/ddpg_her")]
    logdir: String,

    #[arg(long = "n_epochs", default_value_t = 200)]
    n_epochs: usize,

    /// Number of worker processes
    #[arg(long = "num_cpu", default_value_t = 1)]
    num_cpu: usize,

    /// Base seed; each rank adds 1000000 * rank
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Epochs between periodic checkpoints, 0 disables them
    #[arg(long = "policy_save_interval", default_value_t = 10)]
    policy_save_interval: usize,

    #[arg(long = "replay_strategy", value_enum, default_value_t = ReplayStrategy::Future)]
    replay_strategy: ReplayStrategy,

    /// Clip target returns to [-1/(1-gamma), 0] (1) or not (0)
    #[arg(long = "clip_return", default_value_t = 1)]
    clip_return: u8,

    /// Demonstration episodes, required with bc_loss=true
    #[arg(long = "demo_file")]
    demo_file: Option<PathBuf>,

    /// Parameter override, may be repeated
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let rank = control::rank_from_env()?.unwrap_or(0);
    logger::init_tracing(rank);

    let args = LaunchArgs {
        logdir: Some(launch::logdir_for_env(&cli.logdir, &cli.env)),
        overrides: config::parse_overrides(&cli.params)?,
        env: cli.env,
        n_epochs: cli.n_epochs,
        num_cpu: cli.num_cpu,
        seed: cli.seed,
        replay_strategy: cli.replay_strategy,
        policy_save_interval: cli.policy_save_interval,
        clip_return: cli.clip_return != 0,
        demo_file: cli.demo_file,
    };

    if let Some(stats) = launch::launch(args).await? {
        info!(
            "Finished {} epochs in {:.1?}: best success rate {} at epoch {}",
            stats.total_epochs, stats.training_time, stats.best_success_rate, stats.best_epoch
        );
    }
    Ok(())
}
