use serde::{Deserialize, Serialize};

/// Running mean/std normalizer with a std floor and output clipping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    sum: Vec<f64>,
    sumsq: Vec<f64>,
    count: f64,
    mean: Vec<f64>,
    std: Vec<f64>,
    eps: f64,
    clip: f64,
}

impl Normalizer {
    pub fn new(size: usize, eps: f64, clip: f64) -> Self {
        Self {
            sum: vec![0.0; size],
            sumsq: vec![0.0; size],
            count: 0.0,
            mean: vec![0.0; size],
            std: vec![1.0; size],
            eps,
            clip,
        }
    }

    pub fn size(&self) -> usize {
        self.mean.len()
    }

    pub fn update<'a, I>(&mut self, xs: I)
    where
        I: IntoIterator<Item = &'a Vec<f64>>,
    {
        for x in xs {
            for (i, v) in x.iter().enumerate().take(self.sum.len()) {
                self.sum[i] += v;
                self.sumsq[i] += v * v;
            }
            self.count += 1.0;
        }
        self.recompute_stats();
    }

    fn recompute_stats(&mut self) {
        if self.count == 0.0 {
            return;
        }
        for i in 0..self.mean.len() {
            let mean = self.sum[i] / self.count;
            let var = self.sumsq[i] / self.count - mean * mean;
            self.mean[i] = mean;
            self.std[i] = var.max(self.eps * self.eps).sqrt();
        }
    }

    pub fn normalize(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| ((v - m) / s).clamp(-self.clip, self.clip))
            .collect()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_normalizer_is_identity_up_to_clip() {
        let norm = Normalizer::new(2, 0.01, 5.0);
        assert_eq!(norm.normalize(&[0.5, 10.0]), vec![0.5, 5.0]);
    }

    #[test]
    fn test_stats_follow_data() {
        let mut norm = Normalizer::new(1, 0.01, 5.0);
        norm.update(&[vec![1.0], vec![3.0]]);
        assert!((norm.mean()[0] - 2.0).abs() < 1e-12);
        assert!((norm.std()[0] - 1.0).abs() < 1e-12);
        assert!((norm.normalize(&[3.0])[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_std_floor() {
        let mut norm = Normalizer::new(1, 0.01, 5.0);
        norm.update(&[vec![4.0], vec![4.0]]);
        assert!((norm.std()[0] - 0.01).abs() < 1e-12);
    }
}
