use crate::apmi::ApmiEstimator;
use indicatif::ParallelProgressIterator;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

/// Empirical null distribution of APMI between independent vectors of a
/// fixed sample size.
///
/// The null is estimated by pairing random permutations of the copula
/// marginal `(1/(N+1), ..., N/(N+1))` with the identity permutation and
/// keeping the sorted MI values.
pub struct NullMiModel {
    sorted_mi: Vec<f32>,
    num_samples: usize,
}

impl NullMiModel {
    /// Build the null model for vectors of `num_samples` values from
    /// `num_nulls` permutations. Each permutation draws from its own
    /// seeded generator, so the result does not depend on the thread
    /// count.
    pub fn build(num_samples: usize, num_nulls: usize, seed: u64) -> anyhow::Result<Self> {
        if num_samples < 2 {
            anyhow::bail!(
                "null MI model needs at least 2 samples, got {}",
                num_samples
            );
        }
        if num_nulls == 0 {
            anyhow::bail!("null MI model needs at least one permutation");
        }

        let marginal: Vec<f32> = (1..=num_samples)
            .map(|r| r as f32 / (num_samples as f32 + 1.0))
            .collect();

        log::info!(
            "estimating the null MI distribution: {} permutations of {} samples",
            num_nulls,
            num_samples
        );

        let mut sorted_mi: Vec<f32> = (0..num_nulls)
            .into_par_iter()
            .progress_count(num_nulls as u64)
            .map_init(ApmiEstimator::default, |est, i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut permuted = marginal.clone();
                permuted.shuffle(&mut rng);
                est.estimate(&marginal, &permuted)
            })
            .collect();

        sorted_mi.sort_unstable_by(f32::total_cmp);

        Ok(Self {
            sorted_mi,
            num_samples,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Right-tail p-value: the fraction of null MI values at or above
    /// `mi`, located by binary search.
    pub fn p_value(&self, mi: f32) -> f64 {
        let below = self.sorted_mi.partition_point(|&v| v < mi);
        (self.sorted_mi.len() - below) as f64 / self.sorted_mi.len() as f64
    }

    /// Smallest MI value whose right-tail p-value is at most `alpha`.
    /// Returns infinity when no stored value qualifies, so thresholding
    /// with the result keeps nothing.
    pub fn mi_threshold(&self, alpha: f64) -> f32 {
        let n = self.sorted_mi.len();
        let max_tail = (alpha * n as f64).floor() as usize;
        let mut i = n - max_tail.min(n);
        while i < n {
            let v = self.sorted_mi[i];
            let first = self.sorted_mi.partition_point(|&u| u < v);
            if n - first <= max_tail {
                return v;
            }
            // ties inflate the tail beyond max_tail; skip past the run
            i = self.sorted_mi.partition_point(|&u| u <= v);
        }
        f32::INFINITY
    }
}
