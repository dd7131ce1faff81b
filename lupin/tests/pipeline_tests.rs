use lupin::consolidate::consolidate;
use lupin::grn_common::*;
use lupin::input::ExpressionData;
use lupin::prune::{prune_alpha, prune_maxent, PruneMethod, KEEP_ALL_ALPHA};
use lupin::subnet_io::{read_subnet, write_subnet};

use mi_util::copula::{copula_transform, rank_vector};
use mi_util::null_model::NullMiModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn edge_list(pairs: &[(GeneId, f32)]) -> Vec<EdgeTar> {
    pairs
        .iter()
        .map(|&(target, mi)| EdgeTar { target, mi })
        .collect()
}

fn network_of(rows: &[(GeneId, &[(GeneId, f32)])]) -> GeneToEdges {
    rows.iter()
        .map(|&(reg, pairs)| (reg, edge_list(pairs)))
        .collect()
}

fn has_edge(network: &GeneToEdges, reg: GeneId, tar: GeneId) -> bool {
    network
        .get(&reg)
        .is_some_and(|edges| edges.iter().any(|e| e.target == tar))
}

/// Random expression profiles, copula-transformed, with the rank matrix
/// attached. Gene names are g0, g1, ...
fn synthetic_data(num_genes: usize, num_samples: usize, seed: u64) -> ExpressionData {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut copula = Vec::with_capacity(num_genes);
    let mut ranks = Vec::with_capacity(num_genes);
    let mut gene_names = Vec::with_capacity(num_genes);
    let mut gene_ids = FnvHashMap::default();

    for g in 0..num_genes {
        let raw: Vec<f32> = (0..num_samples).map(|_| rng.random::<f32>()).collect();
        copula.push(DVec::from_vec(copula_transform(&raw, &mut rng)));
        ranks.push(rank_vector(&raw, &mut rng));
        let name: Box<str> = format!("g{}", g).into();
        gene_ids.insert(name.clone(), g);
        gene_names.push(name);
    }

    ExpressionData {
        copula,
        ranks,
        gene_names,
        gene_ids,
        num_samples,
    }
}

#[test]
fn maxent_removes_the_weakest_triangle_edge() {
    // A -> B -> T chain: mi(A,B) = 0.9, mi(B,T) = 0.7, mi(A,T) = 0.4
    let (a, b, t) = (0, 1, 2);
    let network = network_of(&[
        (a, &[(b, 0.9), (t, 0.4)]),
        (b, &[(a, 0.9), (t, 0.7)]),
    ]);
    let mut tf_tf = GeneToGeneToMi::default();
    tf_tf.entry(a).or_default().insert(b, 0.9);
    tf_tf.entry(b).or_default().insert(a, 0.9);

    let (pruned, num_edges) = prune_maxent(network, &tf_tf);

    assert!(!has_edge(&pruned, a, t), "indirect edge must be removed");
    assert!(has_edge(&pruned, a, b));
    assert!(has_edge(&pruned, b, a));
    assert!(has_edge(&pruned, b, t));
    assert_eq!(num_edges, 3);
}

#[test]
fn maxent_ties_drop_the_regulator_regulator_edge() {
    // the TF-TF edge is the weakest; both directed copies must go
    let (a, b, t) = (0, 1, 2);
    let network = network_of(&[
        (a, &[(b, 0.2), (t, 0.8)]),
        (b, &[(a, 0.2), (t, 0.7)]),
    ]);
    let mut tf_tf = GeneToGeneToMi::default();
    tf_tf.entry(a).or_default().insert(b, 0.2);
    tf_tf.entry(b).or_default().insert(a, 0.2);

    let (pruned, _) = prune_maxent(network, &tf_tf);

    assert!(!has_edge(&pruned, a, b));
    assert!(!has_edge(&pruned, b, a));
    assert!(has_edge(&pruned, a, t));
    assert!(has_edge(&pruned, b, t));
}

#[test]
fn maxent_never_adds_edges_and_keeps_strong_triangles() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let num_regs = 6;
    let num_genes = 20;

    let mut network = GeneToEdges::default();
    for reg in 0..num_regs {
        let mut edges = Vec::new();
        for tar in 0..num_genes {
            if tar != reg && rng.random::<f32>() < 0.7 {
                edges.push(EdgeTar {
                    target: tar,
                    mi: rng.random::<f32>(),
                });
            }
        }
        network.insert(reg, edges);
    }

    let mut tf_tf = GeneToGeneToMi::default();
    for (&reg, edges) in network.iter() {
        for e in edges.iter().filter(|e| e.target < num_regs) {
            tf_tf.entry(reg).or_default().insert(e.target, e.mi);
        }
    }

    let before = edges_to_map(&network);
    let (pruned, _) = prune_maxent(network, &tf_tf);
    let after = edges_to_map(&pruned);

    // pruning is strictly a subset operation
    for (&reg, targets) in after.iter() {
        for (&tar, &mi) in targets.iter() {
            assert_eq!(before[&reg][&tar], mi);
        }
    }

    // every surviving triangle satisfies the DPI condition
    for reg1 in 0..num_regs {
        for reg2 in (reg1 + 1)..num_regs {
            let Some(&w12) = after.get(&reg1).and_then(|t| t.get(&reg2)) else {
                continue;
            };
            let (Some(t1), Some(t2)) = (after.get(&reg1), after.get(&reg2)) else {
                continue;
            };
            for (&tar, &w2) in t2.iter() {
                let Some(&w1) = t1.get(&tar) else { continue };
                assert!(
                    w1 >= w12 && w2 >= w12,
                    "triangle ({}, {}, {}) kept a weakest TF-TF edge",
                    reg1,
                    reg2,
                    tar
                );
            }
        }
    }
    Ok(())
}

#[test]
fn fpr_pruning_controls_the_false_positive_rate() -> anyhow::Result<()> {
    let num_samples = 50;
    let null = NullMiModel::build(num_samples, 20_000, 3)?;

    // all-null data: every edge is noise
    let data = synthetic_data(101, num_samples, 4);
    let regulators: Vec<GeneId> = (0..5).collect();
    let regulator_set: FnvHashSet<GeneId> = regulators.iter().copied().collect();

    let mut est = mi_util::apmi::ApmiEstimator::default();
    let mut network = GeneToEdges::default();
    for &reg in regulators.iter() {
        let mut edges = Vec::new();
        for tar in 0..data.num_genes() {
            if tar != reg {
                let mi = est.estimate(data.copula[reg].as_slice(), data.copula[tar].as_slice());
                edges.push(EdgeTar { target: tar, mi });
            }
        }
        network.insert(reg, edges);
    }
    let num_candidates = regulators.len() * (data.num_genes() - 1);

    let alpha = 0.05;
    let out = prune_alpha(
        network,
        alpha,
        PruneMethod::Fpr,
        &null,
        regulators.len(),
        data.num_genes(),
        &regulator_set,
    );

    let fraction = out.num_edges as f64 / num_candidates as f64;
    let sigma = (alpha * (1.0 - alpha) / num_candidates as f64).sqrt();
    assert!(
        fraction <= alpha + 3.0 * sigma,
        "retained fraction {} above alpha {}",
        fraction,
        alpha
    );
    Ok(())
}

#[test]
fn stricter_alpha_yields_a_subset() -> anyhow::Result<()> {
    let num_samples = 40;
    let null = NullMiModel::build(num_samples, 10_000, 7)?;
    let data = synthetic_data(60, num_samples, 8);
    let regulators: Vec<GeneId> = (0..4).collect();
    let regulator_set: FnvHashSet<GeneId> = regulators.iter().copied().collect();

    let mut est = mi_util::apmi::ApmiEstimator::default();
    let mut network = GeneToEdges::default();
    for &reg in regulators.iter() {
        let mut edges = Vec::new();
        for tar in 0..data.num_genes() {
            if tar != reg {
                let mi = est.estimate(data.copula[reg].as_slice(), data.copula[tar].as_slice());
                edges.push(EdgeTar { target: tar, mi });
            }
        }
        network.insert(reg, edges);
    }

    let loose = prune_alpha(
        network.clone(),
        0.05,
        PruneMethod::Fdr,
        &null,
        regulators.len(),
        data.num_genes(),
        &regulator_set,
    );
    let strict = prune_alpha(
        network,
        0.01,
        PruneMethod::Fdr,
        &null,
        regulators.len(),
        data.num_genes(),
        &regulator_set,
    );

    assert!(strict.num_edges <= loose.num_edges);
    for (&reg, edges) in strict.network.iter() {
        for e in edges.iter() {
            assert!(
                has_edge(&loose.network, reg, e.target),
                "edge ({}, {}) kept at 0.01 but not at 0.05",
                reg,
                e.target
            );
        }
    }
    Ok(())
}

#[test]
fn keep_all_sentinel_preserves_every_edge() -> anyhow::Result<()> {
    let null = NullMiModel::build(20, 1_000, 9)?;
    let network = network_of(&[(0, &[(1, 0.0), (2, 0.5)]), (1, &[(0, 0.0), (2, 0.01)])]);
    let regulator_set: FnvHashSet<GeneId> = [0, 1].into_iter().collect();

    for method in [PruneMethod::Fdr, PruneMethod::Fwer, PruneMethod::Fpr] {
        let out = prune_alpha(
            network.clone(),
            KEEP_ALL_ALPHA,
            method,
            &null,
            2,
            3,
            &regulator_set,
        );
        assert_eq!(out.num_edges, 4, "method {} dropped edges", method);
    }
    Ok(())
}

#[test]
fn subnet_files_round_trip() -> anyhow::Result<()> {
    let data = synthetic_data(10, 20, 10);
    let network = network_of(&[
        (0, &[(3, 0.12345678_f32), (7, 1.5e-7)]),
        (2, &[(1, 0.9876543), (9, 0.333333343)]),
    ]);

    let dir = tempfile::tempdir()?;
    let path = dir
        .path()
        .join("subnet1.tsv")
        .to_str()
        .unwrap()
        .to_string();

    write_subnet(&path, &network, &data.gene_names)?;
    let restored = read_subnet(&path, &data)?;

    let written = edges_to_map(&network);
    assert_eq!(restored.len(), written.len());
    for (&reg, targets) in written.iter() {
        for (&tar, &mi) in targets.iter() {
            assert_eq!(restored[&reg][&tar], mi, "edge ({}, {})", reg, tar);
        }
    }
    Ok(())
}

#[test]
fn consolidation_emits_one_row_per_distinct_edge() {
    let data = synthetic_data(8, 30, 11);

    let mut s1 = GeneToGeneToMi::default();
    s1.entry(0).or_default().insert(2, 0.5);
    s1.entry(0).or_default().insert(3, 0.4);
    s1.entry(1).or_default().insert(2, 0.3);

    let mut s2 = GeneToGeneToMi::default();
    s2.entry(0).or_default().insert(2, 0.55);
    s2.entry(1).or_default().insert(4, 0.2);

    let subnets = vec![s1, s2];
    let edges = consolidate(&data, &subnets, &[1e-4, 2e-4]);

    assert_eq!(edges.len(), 4);
    // rows come back ordered by (regulator, target)
    let pairs: Vec<(GeneId, GeneId)> = edges.iter().map(|e| (e.regulator, e.target)).collect();
    assert_eq!(pairs, vec![(0, 2), (0, 3), (1, 2), (1, 4)]);

    let recurrent = edges.iter().find(|e| e.regulator == 0 && e.target == 2).unwrap();
    assert_eq!(recurrent.count, 2);
    let singleton = edges.iter().find(|e| e.regulator == 1 && e.target == 4).unwrap();
    assert_eq!(singleton.count, 1);
    assert!(recurrent.p_value < singleton.p_value);

    for e in edges.iter() {
        assert!(e.mi >= 0.0);
        assert!((-1.0..=1.0).contains(&e.scc));
        assert!(e.p_value > 0.0 && e.p_value <= 1.0);
    }
}

#[test]
fn planted_edges_survive_the_full_subnet_pipeline() -> anyhow::Result<()> {
    use lupin::subnet::{generate_subnets, DriverConfig, SubnetConfig};
    use lupin::subnet_io::{read_subnets, OutputLayout};

    let num_samples = 100;
    let num_genes = 50;
    let mut rng = StdRng::seed_from_u64(1);

    // noise everywhere, then plant monotone copies of the regulators
    let mut raw: Vec<Vec<f32>> = (0..num_genes)
        .map(|_| (0..num_samples).map(|_| rng.random::<f32>()).collect())
        .collect();
    raw[10] = raw[0].clone();
    raw[11] = raw[0].iter().map(|v| 2.0 * v + 1.0).collect();
    raw[12] = raw[1].iter().map(|v| v * 0.5).collect();

    let data = {
        let mut copula = Vec::with_capacity(num_genes);
        let mut ranks = Vec::with_capacity(num_genes);
        let mut gene_names = Vec::with_capacity(num_genes);
        let mut gene_ids = FnvHashMap::default();
        for (g, row) in raw.iter().enumerate() {
            copula.push(DVec::from_vec(copula_transform(row, &mut rng)));
            ranks.push(rank_vector(row, &mut rng));
            let name: Box<str> = format!("g{}", g).into();
            gene_ids.insert(name.clone(), g);
            gene_names.push(name);
        }
        ExpressionData {
            copula,
            ranks,
            gene_names,
            gene_ids,
            num_samples,
        }
    };

    let regulators: Vec<GeneId> = vec![0, 1];
    let subsample_size = (0.6321_f64 * num_samples as f64).ceil() as usize;
    let null = NullMiModel::build(subsample_size, 20_000, 99)?;

    let dir = tempfile::tempdir()?;
    let layout = OutputLayout::create(dir.path().to_str().unwrap())?;

    let driver = DriverConfig {
        subnet: SubnetConfig {
            alpha: 0.05,
            method: PruneMethod::Fpr,
            prune_maxent: false,
            mi_cutoff: 0.0,
            subsample_size,
        },
        num_subnets: 3,
        adaptive: false,
        targets_per_regulator: 3,
    };
    let mut master = StdRng::seed_from_u64(1);
    let outs = generate_subnets(&data, &regulators, &null, &driver, &mut master, &layout)?;
    assert_eq!(outs.len(), 3);

    let (nets, fprs): (Vec<_>, Vec<_>) = outs
        .into_iter()
        .map(|o| (o.network, o.fpr_estimate))
        .unzip();
    // FPR without MaxEnt reports alpha itself
    for &f in fprs.iter() {
        approx::assert_abs_diff_eq!(f, 0.05, epsilon = 1e-12);
    }

    let edges = consolidate(&data, &nets, &fprs);
    for (reg, tar) in [(0, 10), (0, 11), (1, 12)] {
        let e = edges
            .iter()
            .find(|e| e.regulator == reg && e.target == tar)
            .unwrap_or_else(|| panic!("planted edge ({}, {}) missing", reg, tar));
        assert_eq!(e.count, 3, "planted edge ({}, {})", reg, tar);
        assert!(e.p_value < 1e-3);
        assert!(e.scc.abs() > 0.99);
    }

    // consolidating the files on disk reproduces the same table
    let (reread, refprs) = read_subnets(&layout, Some(3), &data)?;
    let edges2 = consolidate(&data, &reread, &refprs);
    assert_eq!(edges.len(), edges2.len());
    for (a, b) in edges.iter().zip(edges2.iter()) {
        assert_eq!(
            (a.regulator, a.target, a.count),
            (b.regulator, b.target, b.count)
        );
        assert_eq!(a.mi, b.mi);
        assert_eq!(a.scc, b.scc);
        assert_eq!(a.p_value, b.p_value);
    }
    Ok(())
}

#[test]
fn single_subnet_consolidation_has_undefined_p_values() {
    let data = synthetic_data(5, 25, 12);

    let mut s1 = GeneToGeneToMi::default();
    s1.entry(0).or_default().insert(1, 0.5);

    let edges = consolidate(&data, &[s1], &[1e-4]);
    assert_eq!(edges.len(), 1);
    assert!(edges[0].p_value.is_nan());
}
