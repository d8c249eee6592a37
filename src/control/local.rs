use async_trait::async_trait;

use super::{CommError, Communicator};

/// Communicator of a single-process run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalComm;

#[async_trait]
impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    async fn allreduce_sum(&self, values: &[f64]) -> Result<Vec<f64>, CommError> {
        Ok(values.to_vec())
    }

    async fn broadcast(&self, values: &[f64], root: usize) -> Result<Vec<f64>, CommError> {
        if root != 0 {
            return Err(CommError::Protocol(format!(
                "broadcast root {root} outside a group of size 1"
            )));
        }
        Ok(values.to_vec())
    }
}
