pub mod errors;
pub mod linear;
pub mod normalizer;
pub mod replay;
pub mod traits;

pub use errors::PolicyError;
pub use linear::{LinearPolicy, LinearPolicyConfig, PolicySnapshot};
pub use normalizer::Normalizer;
pub use replay::{HerSampler, ReplayBuffer, ReplayStrategy, Transitions};
pub use traits::{ActOptions, Actions, Policy, TrainStats};
