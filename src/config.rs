//! Run parameters: defaults, per-environment overrides and explicit overrides.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::env::{Dims, make_env};
use crate::error::{Error, Result};
use crate::learner::{LinearPolicy, LinearPolicyConfig, ReplayStrategy};

pub const DEFAULT_ENV: &str = "PointReach-v1";
pub const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub env_name: String,
    /// Episode horizon; taken from the environment when unset.
    #[serde(rename = "T")]
    pub t: Option<usize>,
    /// Discount; `1 - 1/T` when unset.
    pub gamma: Option<f64>,
    pub max_u: f64,
    pub pi_lr: f64,
    pub q_lr: f64,
    pub buffer_size: usize,
    pub polyak: f64,
    pub clip_obs: f64,
    pub relative_goals: bool,
    pub n_cycles: usize,
    pub rollout_batch_size: usize,
    pub n_batches: usize,
    pub batch_size: usize,
    pub n_test_rollouts: usize,
    pub test_with_polyak: bool,
    pub random_eps: f64,
    pub noise_eps: f64,
    pub replay_strategy: ReplayStrategy,
    pub replay_k: usize,
    pub norm_eps: f64,
    pub norm_clip: f64,
    pub bc_loss: bool,
    pub num_demo: usize,
    pub demo_batch_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            env_name: DEFAULT_ENV.to_string(),
            t: None,
            gamma: None,
            max_u: 1.0,
            pi_lr: 0.05,
            q_lr: 0.01,
            buffer_size: 1_000_000,
            polyak: 0.95,
            clip_obs: 200.0,
            relative_goals: false,
            n_cycles: 50,
            rollout_batch_size: 2,
            n_batches: 40,
            batch_size: 256,
            n_test_rollouts: 10,
            test_with_polyak: false,
            random_eps: 0.3,
            noise_eps: 0.2,
            replay_strategy: ReplayStrategy::Future,
            replay_k: 4,
            norm_eps: 0.01,
            norm_clip: 5.0,
            bc_loss: false,
            num_demo: 100,
            demo_batch_size: 128,
        }
    }
}

/// Parameters that differ from the defaults for a given environment.
pub fn default_env_params(env_name: &str) -> Option<Map<String, Value>> {
    let overrides = match env_name {
        "PointReach-v1" => json!({ "n_cycles": 10 }),
        "PointReachFar-v1" => json!({ "n_cycles": 20, "replay_k": 8 }),
        _ => return None,
    };
    match overrides {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Layers defaults, environment-specific values and explicit overrides, in
/// increasing order of precedence.
pub fn build_params(
    env_name: &str,
    replay_strategy: ReplayStrategy,
    overrides: &Map<String, Value>,
) -> Result<Params> {
    let mut layered = match serde_json::to_value(Params::default())? {
        Value::Object(map) => map,
        other => {
            return Err(Error::Config(format!(
                "default parameters are not a mapping: {other}"
            )));
        }
    };
    layered.insert("env_name".to_string(), json!(env_name));
    layered.insert("replay_strategy".to_string(), json!(replay_strategy));
    if let Some(env_params) = default_env_params(env_name) {
        layered.extend(env_params);
    }
    layered.extend(overrides.clone());

    serde_json::from_value(Value::Object(layered)).map_err(|e| Error::Config(e.to_string()))
}

/// Parses one `KEY=VALUE` override. The value is read as JSON when possible
/// and kept as a plain string otherwise.
pub fn parse_override(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("override {raw:?} is not KEY=VALUE")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Config(format!("override {raw:?} has an empty key")));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn parse_overrides<S: AsRef<str>>(raw: &[S]) -> Result<Map<String, Value>> {
    raw.iter().map(|s| parse_override(s.as_ref())).collect()
}

/// Writes `params.json` into `dir`.
pub fn save_params(params: &Params, dir: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(dir.join(PARAMS_FILE))?);
    serde_json::to_writer_pretty(writer, params)?;
    Ok(())
}

/// Parameters with every derived value resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedParams {
    pub params: Params,
    pub t: usize,
    pub gamma: f64,
}

pub fn prepare_params(params: Params) -> Result<PreparedParams> {
    let env = make_env(&params.env_name)?;
    let t = params.t.unwrap_or_else(|| env.max_episode_steps());
    if t == 0 {
        return Err(Error::Config("T must be positive".to_string()));
    }
    let gamma = params.gamma.unwrap_or(1.0 - 1.0 / t as f64);
    if !(0.0..1.0).contains(&gamma) {
        return Err(Error::Config(format!("gamma must lie in [0, 1), got {gamma}")));
    }
    if params.max_u.is_nan() || params.max_u <= 0.0 {
        return Err(Error::Config(format!(
            "max_u must be positive, got {}",
            params.max_u
        )));
    }
    for (name, value) in [("clip_obs", params.clip_obs), ("norm_clip", params.norm_clip)] {
        if !(0.0..).contains(&value) {
            return Err(Error::Config(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
    }
    if !(0.0..=1.0).contains(&params.polyak) {
        return Err(Error::Config("polyak must lie in [0, 1]".to_string()));
    }
    if params.bc_loss && params.demo_batch_size == 0 {
        return Err(Error::Config("demo_batch_size must be positive with bc_loss".to_string()));
    }
    if params.rollout_batch_size == 0 {
        return Err(Error::Config("rollout_batch_size must be positive".to_string()));
    }
    if params.batch_size == 0 {
        return Err(Error::Config("batch_size must be positive".to_string()));
    }
    if !(0.0..=1.0).contains(&params.random_eps) {
        return Err(Error::Config("random_eps must lie in [0, 1]".to_string()));
    }
    Ok(PreparedParams { params, t, gamma })
}

pub fn log_params(prepared: &PreparedParams) -> Result<()> {
    if let Value::Object(map) = serde_json::to_value(&prepared.params)? {
        let mut keys: Vec<_> = map.keys().collect();
        keys.sort();
        for key in keys {
            info!("{key}: {}", map[key]);
        }
    }
    info!("T (resolved): {}", prepared.t);
    info!("gamma (resolved): {}", prepared.gamma);
    Ok(())
}

/// Reads observation, goal and action sizes off a fresh environment.
pub fn configure_dims(prepared: &PreparedParams) -> Result<Dims> {
    let mut env = make_env(&prepared.params.env_name)?;
    let obs = env.reset()?;
    Ok(Dims {
        o: obs.observation.len(),
        g: obs.desired_goal.len(),
        u: env.action_dim(),
    })
}

pub fn configure_policy(
    dims: Dims,
    prepared: &PreparedParams,
    clip_return: bool,
    seed: u64,
) -> Result<LinearPolicy> {
    let p = &prepared.params;
    let env = make_env(&p.env_name)?;
    let cfg = LinearPolicyConfig {
        dims,
        horizon: prepared.t,
        max_u: p.max_u,
        pi_lr: p.pi_lr,
        q_lr: p.q_lr,
        polyak: p.polyak,
        gamma: prepared.gamma,
        clip_return: if clip_return {
            1.0 / (1.0 - prepared.gamma)
        } else {
            f64::INFINITY
        },
        clip_obs: p.clip_obs,
        relative_goals: p.relative_goals,
        buffer_size: p.buffer_size,
        batch_size: p.batch_size,
        replay_strategy: p.replay_strategy,
        replay_k: p.replay_k,
        norm_eps: p.norm_eps,
        norm_clip: p.norm_clip,
        bc_loss: p.bc_loss,
        num_demo: p.num_demo,
        demo_batch_size: p.demo_batch_size,
    };
    Ok(LinearPolicy::new(cfg, env.reward_fn(), seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_then_env_then_overrides() {
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &Map::new()).unwrap();
        assert_eq!(params.n_cycles, 10, "env-specific value beats the default");
        assert_eq!(params.n_batches, 40);

        let overrides = parse_overrides(&["n_cycles=3", "noise_eps=0.5"]).unwrap();
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &overrides).unwrap();
        assert_eq!(params.n_cycles, 3, "explicit override beats the env value");
        assert_eq!(params.noise_eps, 0.5);
    }

    #[test]
    fn test_unregistered_env_keeps_defaults() {
        let params = build_params("Other-v0", ReplayStrategy::None, &Map::new()).unwrap();
        assert_eq!(params.env_name, "Other-v0");
        assert_eq!(params.n_cycles, 50);
        assert_eq!(params.replay_strategy, ReplayStrategy::None);
    }

    #[test]
    fn test_replay_strategy_can_be_overridden() {
        let overrides = parse_overrides(&["replay_strategy=none"]).unwrap();
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &overrides).unwrap();
        assert_eq!(params.replay_strategy, ReplayStrategy::None);
    }

    #[test]
    fn test_unknown_or_mistyped_override_is_config_error() {
        let overrides = parse_overrides(&["no_such_param=1"]).unwrap();
        assert!(matches!(
            build_params("PointReach-v1", ReplayStrategy::Future, &overrides),
            Err(Error::Config(_))
        ));
        let overrides = parse_overrides(&["n_cycles=many"]).unwrap();
        assert!(matches!(
            build_params("PointReach-v1", ReplayStrategy::Future, &overrides),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override("T=20").unwrap(), ("T".to_string(), json!(20)));
        assert_eq!(
            parse_override("env_name=PointReach-v1").unwrap(),
            ("env_name".to_string(), json!("PointReach-v1"))
        );
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=1").is_err());
    }

    #[test]
    fn test_prepare_derives_horizon_and_discount() {
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &Map::new()).unwrap();
        let prepared = prepare_params(params).unwrap();
        assert_eq!(prepared.t, 50);
        assert!((prepared.gamma - 0.98).abs() < 1e-12);

        let overrides = parse_overrides(&["T=10", "gamma=0.5"]).unwrap();
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &overrides).unwrap();
        let prepared = prepare_params(params).unwrap();
        assert_eq!(prepared.t, 10);
        assert_eq!(prepared.gamma, 0.5);
    }

    fn prepare_with(overrides: &[&str]) -> Result<PreparedParams> {
        let overrides = parse_overrides(overrides).unwrap();
        prepare_params(build_params("PointReach-v1", ReplayStrategy::Future, &overrides)?)
    }

    #[test]
    fn test_prepare_rejects_out_of_range_values() {
        for bad in [
            "gamma=1.5",
            "gamma=1.0",
            "gamma=-0.1",
            "max_u=-1.0",
            "max_u=0.0",
            "clip_obs=-1.0",
            "norm_clip=-5.0",
            "polyak=2.0",
        ] {
            assert!(
                matches!(prepare_with(&[bad]), Err(Error::Config(_))),
                "{bad} should be rejected"
            );
        }
        assert!(prepare_with(&["gamma=0.0", "clip_obs=0.0", "norm_clip=0.0"]).is_ok());
    }

    #[test]
    fn test_bc_loss_needs_demo_batch() {
        assert!(matches!(
            prepare_with(&["bc_loss=true", "demo_batch_size=0"]),
            Err(Error::Config(_))
        ));
        assert!(prepare_with(&["bc_loss=false", "demo_batch_size=0"]).is_ok());
        assert!(prepare_with(&["bc_loss=true"]).is_ok());
    }

    #[test]
    fn test_prepare_rejects_unknown_env() {
        let params = build_params("Other-v0", ReplayStrategy::Future, &Map::new()).unwrap();
        assert!(matches!(prepare_params(params), Err(Error::Env(_))));
    }

    #[test]
    fn test_dims_of_point_reach() {
        let params = build_params("PointReachFar-v1", ReplayStrategy::Future, &Map::new()).unwrap();
        let prepared = prepare_params(params).unwrap();
        assert_eq!(
            configure_dims(&prepared).unwrap(),
            Dims { o: 3, g: 3, u: 3 }
        );
    }

    #[test]
    fn test_params_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let params = build_params("PointReach-v1", ReplayStrategy::Future, &Map::new()).unwrap();
        save_params(&params, dir.path()).unwrap();
        let text = std::fs::read_to_string(dir.path().join(PARAMS_FILE)).unwrap();
        let loaded: Params = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, params);
    }
}
