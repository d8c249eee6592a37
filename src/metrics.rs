//! Cross-worker reduction of scalar statistics.

use crate::control::{CommError, Communicator};

/// Mean, standard deviation and element count of values pooled over all ranks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: f64,
    pub std: f64,
    pub count: f64,
}

/// Pools `values` from every rank and computes their moments.
///
/// Two reductions: one for the global sum and count, one for the squared
/// deviations from the global mean.
pub async fn moments(comm: &dyn Communicator, values: &[f64]) -> Result<Moments, CommError> {
    let local_sum: f64 = values.iter().sum();
    let global = comm
        .allreduce_sum(&[local_sum, values.len() as f64])
        .await?;
    let (sum, count) = (global[0], global[1]);
    let mean = sum / count;

    let local_sqdiff: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let sqdiff = comm.allreduce_sum(&[local_sqdiff]).await?[0];

    Ok(Moments {
        mean,
        std: (sqdiff / count).sqrt(),
        count,
    })
}

/// Cross-worker mean of one worker's values.
///
/// An empty slice counts as a single `0.0`, so the reduction always has
/// something to average.
pub async fn average(comm: &dyn Communicator, values: &[f64]) -> Result<f64, CommError> {
    let values = if values.is_empty() { &[0.0][..] } else { values };
    Ok(moments(comm, values).await?.mean)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::try_join_all;
    use tokio::net::TcpListener;

    use super::*;
    use crate::control::{LocalComm, TcpComm};

    #[tokio::test]
    async fn test_empty_input_averages_to_zero() {
        assert_eq!(average(&LocalComm, &[]).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_single_worker_single_value() {
        assert_eq!(average(&LocalComm, &[0.75]).await.unwrap(), 0.75);
    }

    #[tokio::test]
    async fn test_local_moments() {
        let m = moments(&LocalComm, &[1.0, 3.0]).await.unwrap();
        assert_eq!(m.mean, 2.0);
        assert_eq!(m.std, 1.0);
        assert_eq!(m.count, 2.0);
    }

    #[tokio::test]
    async fn test_mean_is_weighted_by_count_across_ranks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = tokio::spawn(TcpComm::hub(listener, 2));
        let peer = Arc::new(TcpComm::connect(addr, 1, 2).await.unwrap());
        let hub = Arc::new(hub.await.unwrap().unwrap());

        let results = try_join_all([
            tokio::spawn({
                let hub = hub.clone();
                async move { average(hub.as_ref(), &[1.0]).await }
            }),
            tokio::spawn({
                let peer = peer.clone();
                async move { average(peer.as_ref(), &[2.0, 3.0, 6.0]).await }
            }),
        ])
        .await
        .unwrap();

        for result in results {
            assert_eq!(result.unwrap(), 3.0);
        }
    }
}
