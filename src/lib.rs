//! Goal-conditioned off-policy training with hindsight experience replay.
//!
//! A [`launch::launch`] call forks worker processes, wires them together
//! with a [`control::Communicator`], and drives [`train::train`] on each.

pub mod config;
pub mod control;
pub mod env;
pub mod error;
pub mod launch;
pub mod learner;
pub mod logger;
pub mod metrics;
pub mod rollout;
pub mod train;

pub use error::{Error, Result};
