use crate::grn_common::*;
use mi_util::null_model::NullMiModel;

/// Significance criterion of the first pruning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMethod {
    Fdr,
    Fwer,
    Fpr,
}

impl std::fmt::Display for PruneMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruneMethod::Fdr => write!(f, "FDR"),
            PruneMethod::Fwer => write!(f, "FWER"),
            PruneMethod::Fpr => write!(f, "FPR"),
        }
    }
}

impl std::str::FromStr for PruneMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FDR" => Ok(PruneMethod::Fdr),
            "FWER" => Ok(PruneMethod::Fwer),
            "FPR" => Ok(PruneMethod::Fpr),
            _ => anyhow::bail!("unknown pruning method: {}", s),
        }
    }
}

/// Alpha above one disables the criterion and keeps every edge.
pub const KEEP_ALL_ALPHA: f64 = 1.01;

/// Result of the significance pruning step.
pub struct AlphaPruneOut {
    pub network: GeneToEdges,
    /// surviving regulator -> regulator edges, consumed by MaxEnt pruning
    pub tf_tf: GeneToGeneToMi,
    pub num_edges: usize,
}

/// Remove edges whose MI is not significant against the null model.
///
/// FPR keeps an edge when its right-tail p-value is at most alpha; FWER
/// applies a Bonferroni correction over the `|R| * (G - 1)` candidate
/// edges; FDR applies Benjamini-Hochberg pooled over the candidate
/// edges of the whole subnetwork, so every regulator shares one
/// threshold.
pub fn prune_alpha(
    network: GeneToEdges,
    alpha: f64,
    method: PruneMethod,
    null: &NullMiModel,
    num_regulators: usize,
    num_genes: usize,
    regulator_set: &FnvHashSet<GeneId>,
) -> AlphaPruneOut {
    let num_candidates = (num_regulators * (num_genes - 1)) as f64;

    let p_max: f64 = if alpha > 1.0 {
        f64::INFINITY
    } else {
        match method {
            PruneMethod::Fpr => alpha,
            PruneMethod::Fwer => alpha / num_candidates,
            PruneMethod::Fdr => {
                let mut pvals: Vec<f64> = network
                    .values()
                    .flat_map(|edges| edges.iter().map(|e| null.p_value(e.mi)))
                    .collect();
                pvals.sort_unstable_by(f64::total_cmp);

                let mut thresh = f64::NEG_INFINITY;
                for (i, &p) in pvals.iter().enumerate() {
                    if p <= alpha * (i + 1) as f64 / num_candidates {
                        thresh = p;
                    }
                }
                thresh
            }
        }
    };

    let mut out = GeneToEdges::default();
    let mut tf_tf = GeneToGeneToMi::default();
    let mut num_edges = 0_usize;

    for (reg, edges) in network.into_iter() {
        let kept: Vec<EdgeTar> = edges
            .into_iter()
            .filter(|e| null.p_value(e.mi) <= p_max)
            .collect();
        num_edges += kept.len();
        for e in kept.iter().filter(|e| regulator_set.contains(&e.target)) {
            tf_tf.entry(reg).or_default().insert(e.target, e.mi);
        }
        out.insert(reg, kept);
    }

    AlphaPruneOut {
        network: out,
        tf_tf,
        num_edges,
    }
}

/// MaxEnt (data-processing-inequality) pruning: in every triangle made
/// of two regulators and a shared target, drop the weakest edge. Ties
/// conservatively drop the regulator-regulator edge. Each worker owns
/// one first-regulator slice and collects removals locally; the sets
/// are merged sequentially, so edge membership does not depend on the
/// thread count.
pub fn prune_maxent(network: GeneToEdges, tf_tf: &GeneToGeneToMi) -> (GeneToEdges, usize) {
    let final_net: GeneToGeneToMi = edges_to_map(&network);

    let mut regulators: Vec<GeneId> = network.keys().copied().collect();
    regulators.sort_unstable();

    let removals: Vec<FnvHashMap<GeneId, FnvHashSet<GeneId>>> = regulators
        .par_iter()
        .map(|&reg1| {
            let mut removed: FnvHashMap<GeneId, FnvHashSet<GeneId>> = FnvHashMap::default();
            let (Some(tft1), Some(fin1)) = (tf_tf.get(&reg1), final_net.get(&reg1)) else {
                return removed;
            };
            for &reg2 in regulators.iter().filter(|&&r| r > reg1) {
                let Some(&tftf_mi) = tft1.get(&reg2) else {
                    continue;
                };
                let Some(fin2) = final_net.get(&reg2) else {
                    continue;
                };
                for (&target, &mi2) in fin2.iter() {
                    let Some(&mi1) = fin1.get(&target) else {
                        continue;
                    };
                    if mi1 < tftf_mi && mi1 < mi2 {
                        removed.entry(reg1).or_default().insert(target);
                    } else if mi2 < tftf_mi && mi2 < mi1 {
                        removed.entry(reg2).or_default().insert(target);
                    } else {
                        // the regulator-regulator edge is the weakest
                        removed.entry(reg1).or_default().insert(reg2);
                        removed.entry(reg2).or_default().insert(reg1);
                    }
                }
            }
            removed
        })
        .collect();

    let mut removed: FnvHashMap<GeneId, FnvHashSet<GeneId>> = FnvHashMap::default();
    for worker in removals {
        for (reg, targets) in worker {
            removed.entry(reg).or_default().extend(targets);
        }
    }

    let mut pruned = GeneToEdges::default();
    let mut num_edges = 0_usize;
    for (reg, edges) in network.into_iter() {
        let kept: Vec<EdgeTar> = match removed.get(&reg) {
            Some(rem) => edges.into_iter().filter(|e| !rem.contains(&e.target)).collect(),
            None => edges,
        };
        num_edges += kept.len();
        pruned.insert(reg, kept);
    }
    (pruned, num_edges)
}
