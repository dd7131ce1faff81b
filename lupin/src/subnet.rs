use crate::grn_common::*;
use crate::input::ExpressionData;
use crate::prune::{prune_alpha, prune_maxent, AlphaPruneOut, PruneMethod};
use crate::subnet_io::{self, OutputLayout, SubnetSummary};

use indicatif::ParallelProgressIterator;
use mi_util::apmi::ApmiEstimator;
use mi_util::copula::copula_transform;
use mi_util::null_model::NullMiModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Backstop for adaptive mode when the stopping criterion is
/// unreachable.
const MAX_ADAPTIVE_SUBNETS: usize = 65_536;

/// Knobs of a single subnetwork run.
#[derive(Debug, Clone)]
pub struct SubnetConfig {
    pub alpha: f64,
    pub method: PruneMethod,
    pub prune_maxent: bool,
    /// raw edges below this MI never enter the network
    pub mi_cutoff: f32,
    pub subsample_size: usize,
}

/// Driver-level knobs on top of the per-subnet configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub subnet: SubnetConfig,
    pub num_subnets: usize,
    pub adaptive: bool,
    pub targets_per_regulator: usize,
}

/// A pruned subnetwork with its realized false-positive-rate estimate.
pub struct SubnetOut {
    pub network: GeneToGeneToMi,
    pub fpr_estimate: f64,
}

/// Select the columns in `fold` and copula-transform each row anew, so
/// ranks are relative to the subsample.
fn subsample_and_transform(
    data: &ExpressionData,
    fold: &[usize],
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    data.copula
        .iter()
        .map(|row| {
            let picked: Vec<f32> = fold.iter().map(|&j| row[j]).collect();
            copula_transform(&picked, rng)
        })
        .collect()
}

/// Realized false-positive rate reported by one subnetwork. The FDR
/// branch is a realized FDR-at-threshold quantity, not a classical
/// Benjamini-Hochberg estimate.
pub fn subnet_fpr_estimate(
    alpha: f64,
    method: PruneMethod,
    pruned_maxent: bool,
    num_regulators: usize,
    num_genes: usize,
    num_after_threshold: usize,
    num_after_maxent: usize,
) -> f64 {
    if num_after_threshold == 0 {
        return 0.0;
    }
    let r = num_regulators as f64;
    let g = num_genes as f64;
    let n_thresh = num_after_threshold as f64;
    let n_maxent = num_after_maxent as f64;

    match (method, pruned_maxent) {
        (PruneMethod::Fdr, true) => alpha * n_maxent / (r * g - (1.0 - alpha) * n_thresh),
        (PruneMethod::Fdr, false) => alpha * n_thresh / (r * g - (1.0 - alpha) * n_thresh),
        (PruneMethod::Fwer, true) => alpha / (r * (g - 1.0)) * n_maxent / n_thresh,
        (PruneMethod::Fwer, false) => alpha / (r * (g - 1.0)),
        (PruneMethod::Fpr, true) => alpha * n_maxent / n_thresh,
        (PruneMethod::Fpr, false) => alpha,
    }
}

/// Run one subnetwork end to end: subsample, MI pass, significance
/// pruning, MaxEnt pruning, and the subnet/log file pair.
pub fn run_subnet(
    data: &ExpressionData,
    regulators: &[GeneId],
    null: &NullMiModel,
    cfg: &SubnetConfig,
    fold: &[usize],
    subnet_seed: u64,
    subnet_num: usize,
    layout: &OutputLayout,
) -> anyhow::Result<SubnetOut> {
    let num_genes = data.num_genes();
    let mut rng = StdRng::seed_from_u64(subnet_seed);
    let matrix = subsample_and_transform(data, fold, &mut rng);

    // raw MI pass: one regulator per worker against every other gene
    let rows: Vec<(GeneId, Vec<EdgeTar>)> = regulators
        .par_iter()
        .progress_count(regulators.len() as u64)
        .map_init(ApmiEstimator::default, |est, &reg| {
            let x = &matrix[reg];
            let mut edges = Vec::with_capacity(num_genes - 1);
            for tar in 0..num_genes {
                if tar == reg {
                    continue;
                }
                let mi = est.estimate(x, &matrix[tar]);
                if mi >= cfg.mi_cutoff {
                    edges.push(EdgeTar { target: tar, mi });
                }
            }
            (reg, edges)
        })
        .collect();

    let num_raw: usize = rows.iter().map(|(_, e)| e.len()).sum();
    let network: GeneToEdges = rows.into_iter().collect();

    let regulator_set: FnvHashSet<GeneId> = regulators.iter().copied().collect();
    let AlphaPruneOut {
        network,
        tf_tf,
        num_edges: num_after_threshold,
    } = prune_alpha(
        network,
        cfg.alpha,
        cfg.method,
        null,
        regulators.len(),
        num_genes,
        &regulator_set,
    );

    let (network, num_after_maxent) = if cfg.prune_maxent {
        prune_maxent(network, &tf_tf)
    } else {
        (network, num_after_threshold)
    };

    let fpr_estimate = subnet_fpr_estimate(
        cfg.alpha,
        cfg.method,
        cfg.prune_maxent,
        regulators.len(),
        num_genes,
        num_after_threshold,
        num_after_maxent,
    );

    let summary = SubnetSummary {
        subnet_num,
        num_regulators: regulators.len(),
        num_genes,
        num_samples: data.num_samples,
        num_subsampled: cfg.subsample_size,
        method: cfg.method,
        alpha: cfg.alpha,
        prune_maxent: cfg.prune_maxent,
        num_edges_raw: num_raw,
        num_edges_after_threshold: num_after_threshold,
        num_edges_after_maxent: num_after_maxent,
    };
    subnet_io::write_subnet(&layout.subnet_file(subnet_num), &network, &data.gene_names)?;
    subnet_io::write_subnet_log(&layout.subnet_log_file(subnet_num), &summary)?;

    info!(
        "subnetwork {} complete: {} edges",
        subnet_num, num_after_maxent
    );

    Ok(SubnetOut {
        network: edges_to_map(&network),
        fpr_estimate,
    })
}

/// Generate subnetworks. Sample folds and per-subnet seeds are drawn
/// serially from the master generator before any worker forks, so the
/// output is identical for every thread count.
pub fn generate_subnets(
    data: &ExpressionData,
    regulators: &[GeneId],
    null: &NullMiModel,
    cfg: &DriverConfig,
    master_rng: &mut StdRng,
    layout: &OutputLayout,
) -> anyhow::Result<Vec<SubnetOut>> {
    let num_samples = data.num_samples;
    let subsample = cfg.subnet.subsample_size;

    let draw = |rng: &mut StdRng| -> (Vec<usize>, u64) {
        let mut fold = rand::seq::index::sample(rng, num_samples, subsample).into_vec();
        fold.sort_unstable();
        (fold, rng.random::<u64>())
    };

    if cfg.adaptive {
        let mut regulons: FnvHashMap<GeneId, FnvHashSet<GeneId>> = regulators
            .iter()
            .map(|&r| (r, FnvHashSet::default()))
            .collect();

        let mut subnets: Vec<SubnetOut> = Vec::new();
        while subnets.len() < MAX_ADAPTIVE_SUBNETS {
            let (fold, seed) = draw(master_rng);
            let out = run_subnet(
                data,
                regulators,
                null,
                &cfg.subnet,
                &fold,
                seed,
                subnets.len() + 1,
                layout,
            )?;
            for (&reg, targets) in out.network.iter() {
                if let Some(regulon) = regulons.get_mut(&reg) {
                    regulon.extend(targets.keys().copied());
                }
            }
            subnets.push(out);

            let min_regulon = regulators
                .iter()
                .map(|r| regulons[r].len())
                .min()
                .unwrap_or(0);
            if min_regulon >= cfg.targets_per_regulator {
                break;
            }
        }
        info!("adaptive mode settled on {} subnetworks", subnets.len());
        Ok(subnets)
    } else {
        let draws: Vec<(Vec<usize>, u64)> = (0..cfg.num_subnets).map(|_| draw(master_rng)).collect();
        draws
            .par_iter()
            .enumerate()
            .map(|(i, (fold, seed))| {
                run_subnet(
                    data,
                    regulators,
                    null,
                    &cfg.subnet,
                    fold,
                    *seed,
                    i + 1,
                    layout,
                )
            })
            .collect()
    }
}
