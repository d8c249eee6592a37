use async_trait::async_trait;

use super::errors::CommError;

/// Collective operations across the cooperating worker processes.
///
/// Every operation is a barrier: all ranks must call it, in the same order,
/// before any of them returns.
#[async_trait]
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Element-wise sum of `values` over all ranks.
    async fn allreduce_sum(&self, values: &[f64]) -> Result<Vec<f64>, CommError>;

    /// Returns the `values` passed by `root` on every rank.
    async fn broadcast(&self, values: &[f64], root: usize) -> Result<Vec<f64>, CommError>;
}
