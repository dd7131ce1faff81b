use crate::grn_common::*;
use crate::input::ExpressionData;

use indicatif::ParallelProgressIterator;
use mi_util::apmi::ApmiEstimator;
use mi_util::stats::{right_tail_binomial_p, spearman_rho};

/// One row of the final consolidated network.
#[derive(Debug, Clone)]
pub struct ConsolidatedEdge {
    pub regulator: GeneId,
    pub target: GeneId,
    /// MI recomputed on the full, non-subsampled matrix
    pub mi: f32,
    /// Spearman correlation on the full-sample rank vectors
    pub scc: f32,
    /// number of subnetworks containing the edge
    pub count: usize,
    /// right-tail binomial p-value of `count`; NaN for a single subnet
    pub p_value: f64,
}

/// Merge subnetworks into the final edge table: one row per distinct
/// (regulator, target) pair seen in any subnetwork, ordered by gene id.
/// The binomial null rate is the mean of the per-subnet FPR estimates.
pub fn consolidate(
    data: &ExpressionData,
    subnets: &[GeneToGeneToMi],
    fpr_estimates: &[f64],
) -> Vec<ConsolidatedEdge> {
    let num_subnets = subnets.len();
    let theta = fpr_estimates.iter().sum::<f64>() / fpr_estimates.len().max(1) as f64;

    let mut edges: Vec<(GeneId, GeneId)> = {
        let mut set: FnvHashSet<(GeneId, GeneId)> = FnvHashSet::default();
        for subnet in subnets.iter() {
            for (&reg, targets) in subnet.iter() {
                for &tar in targets.keys() {
                    set.insert((reg, tar));
                }
            }
        }
        set.into_iter().collect()
    };
    edges.sort_unstable();

    info!(
        "consolidating {} edges across {} subnetworks (theta = {:.4e})",
        edges.len(),
        num_subnets,
        theta
    );

    edges
        .par_iter()
        .progress_count(edges.len() as u64)
        .map_init(ApmiEstimator::default, |est, &(reg, tar)| {
            let count = subnets
                .iter()
                .filter(|s| s.get(&reg).is_some_and(|t| t.contains_key(&tar)))
                .count();
            let mi = est.estimate(data.copula[reg].as_slice(), data.copula[tar].as_slice());
            let scc = spearman_rho(&data.ranks[reg], &data.ranks[tar]);
            let p_value = if num_subnets == 1 {
                f64::NAN
            } else {
                right_tail_binomial_p(num_subnets as u64, count as u64, theta)
            };
            ConsolidatedEdge {
                regulator: reg,
                target: tar,
                mi,
                scc,
                count,
                p_value,
            }
        })
        .collect()
}
