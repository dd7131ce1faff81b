use lupin::consolidate::consolidate;
use lupin::errors::PipelineError;
use lupin::grn_common::*;
use lupin::input::{read_expression_matrix, read_regulator_list};
use lupin::prune::{PruneMethod, KEEP_ALL_ALPHA};
use lupin::subnet::{generate_subnets, DriverConfig, SubnetConfig};
use lupin::subnet_io::{read_subnets, write_consolidated, FinalLog, OutputLayout};

use clap::Parser;
use mi_util::null_model::NullMiModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Regulatory network inference by adaptive-partitioning mutual
/// information
///
/// Scores every (regulator, target) pair on random sample subsets,
/// prunes each subnetwork against an empirical null MI distribution
/// and the data-processing inequality, and consolidates the surviving
/// edges into one table with per-edge occurrence statistics.
///
#[derive(Parser, Debug)]
#[command(name = "lupin", version, about, long_about, term_width = 80)]
struct Cli {
    /// gene expression matrix (genes x samples; tab, comma, or space
    /// separated; optionally gzipped)
    #[arg(short = 'e', required = true)]
    expression_file: Box<str>,

    /// newline-separated list of regulator gene names
    #[arg(short = 'r', required = true)]
    regulator_file: Box<str>,

    /// output directory
    #[arg(short = 'o', required = true)]
    output_dir: Box<str>,

    /// significance level of the first pruning step
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// fraction of samples drawn (without replacement) per subnetwork;
    /// defaults to 1 - 1/e
    #[arg(long)]
    subsample: Option<f64>,

    /// sets the number of subnetworks, the adaptive target count, and
    /// the number of subnetworks to consolidate at once
    #[arg(short = 'x')]
    x: Option<usize>,

    /// worker threads
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// keep every edge in the first pruning step
    #[arg(long = "noAlpha")]
    no_alpha: bool,

    /// skip MaxEnt pruning
    #[arg(long = "noMaxEnt")]
    no_maxent: bool,

    /// spawn subnetworks until every regulator has enough targets
    #[arg(long)]
    adaptive: bool,

    /// generate subnetworks only; skip consolidation
    #[arg(long)]
    noconsolidate: bool,

    /// consolidate previously generated subnetworks and exit
    #[arg(long, conflicts_with = "noconsolidate")]
    consolidate: bool,

    /// control the false discovery rate, Benjamini-Hochberg (default)
    #[arg(long = "FDR")]
    fdr: bool,

    /// control the family-wise error rate, Bonferroni
    #[arg(long = "FWER", conflicts_with = "fdr")]
    fwer: bool,

    /// threshold each edge at a fixed false-positive rate
    #[arg(long = "FPR", conflicts_with_all = ["fdr", "fwer"])]
    fpr: bool,

    /// random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// discard raw edges below this MI before pruning
    #[arg(long = "mithresh", default_value_t = 0.0)]
    mi_thresh: f32,

    /// number of permutations in the null MI model
    #[arg(long = "numnulls", default_value_t = 1_000_000)]
    num_nulls: usize,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

struct Params {
    alpha: f64,
    method: PruneMethod,
    subsample: f64,
    num_subnets: usize,
    targets_per_regulator: usize,
    num_subnets_to_consolidate: Option<usize>,
    seed: u64,
    mi_cutoff: f32,
    num_nulls: usize,
    adaptive: bool,
    prune_maxent: bool,
    consolidate_only: bool,
    no_consolidate: bool,
}

/// Clamp out-of-range parameters with a warning: a bad alpha falls
/// back to the keep-all sentinel and a bad subsample fraction keeps
/// every sample.
fn resolve_params(cli: &Cli) -> Params {
    let mut alpha = cli.alpha;
    if cli.no_alpha {
        alpha = KEEP_ALL_ALPHA;
    } else if !(alpha > 0.0 && alpha < 1.0) {
        warn!(
            "alpha {} outside (0, 1); keeping every edge in the threshold step",
            alpha
        );
        alpha = KEEP_ALL_ALPHA;
    }

    let mut subsample = cli.subsample.unwrap_or(1.0 - (-1.0_f64).exp());
    if !(subsample > 0.0 && subsample <= 1.0) {
        warn!(
            "subsample fraction {} outside (0, 1]; using all samples",
            subsample
        );
        subsample = 1.0;
    }

    let mi_cutoff = if cli.mi_thresh < 0.0 {
        warn!("negative --mithresh clamped to 0");
        0.0
    } else {
        cli.mi_thresh
    };

    let num_nulls = if cli.num_nulls == 0 {
        warn!("--numnulls must be positive; using the default of 1000000");
        1_000_000
    } else {
        cli.num_nulls
    };

    let method = if cli.fpr {
        PruneMethod::Fpr
    } else if cli.fwer {
        PruneMethod::Fwer
    } else {
        PruneMethod::Fdr
    };

    Params {
        alpha,
        method,
        subsample,
        num_subnets: cli.x.unwrap_or(1),
        targets_per_regulator: cli.x.unwrap_or(30),
        num_subnets_to_consolidate: cli.x,
        seed: cli.seed,
        mi_cutoff,
        num_nulls,
        adaptive: cli.adaptive,
        prune_maxent: !cli.no_maxent,
        consolidate_only: cli.consolidate,
        no_consolidate: cli.noconsolidate,
    }
}

fn pipeline(
    cli: &Cli,
    params: &Params,
    layout: &OutputLayout,
    log: &mut FinalLog,
) -> anyhow::Result<()> {
    let mut master_rng = StdRng::seed_from_u64(params.seed);

    let data = read_expression_matrix(&cli.expression_file, &mut master_rng)?;
    let regulators = read_regulator_list(&cli.regulator_file, &data)?;
    log.note(&format!(
        "genes: {} samples: {} regulators: {}",
        data.num_genes(),
        data.num_samples,
        regulators.len()
    ))?;

    let mut subsample_size = (params.subsample * data.num_samples as f64).ceil() as usize;
    if subsample_size >= data.num_samples {
        subsample_size = data.num_samples;
    }
    info!(
        "subsampling {} of {} samples per subnetwork",
        subsample_size, data.num_samples
    );

    let null_seed: u64 = master_rng.random();

    let (subnets, fpr_estimates) = if params.consolidate_only {
        let (nets, fprs) = read_subnets(layout, params.num_subnets_to_consolidate, &data)?;
        log.note(&format!("subnetworks read back: {}", nets.len()))?;
        (nets, fprs)
    } else {
        let null = NullMiModel::build(subsample_size, params.num_nulls, null_seed)?;
        log.note("null MI model ready")?;

        let driver = DriverConfig {
            subnet: SubnetConfig {
                alpha: params.alpha,
                method: params.method,
                prune_maxent: params.prune_maxent,
                mi_cutoff: params.mi_cutoff,
                subsample_size,
            },
            num_subnets: params.num_subnets,
            adaptive: params.adaptive,
            targets_per_regulator: params.targets_per_regulator,
        };
        let outs = generate_subnets(&data, &regulators, &null, &driver, &mut master_rng, layout)?;
        log.note(&format!("subnetworks generated: {}", outs.len()))?;
        outs.into_iter()
            .map(|o| (o.network, o.fpr_estimate))
            .unzip()
    };
    let num_subnets = subnets.len();

    if params.no_consolidate {
        log.note("no consolidation requested")?;
        log.finalize(&format!("{}subnets-noconsolidate", num_subnets))?;
        info!("Done");
        return Ok(());
    }

    let edges = consolidate(&data, &subnets, &fpr_estimates);
    let final_file = layout.final_net_file(num_subnets);
    write_consolidated(&final_file, &edges, &data.gene_names)?;
    log.note(&format!(
        "final network: {} ({} edges)",
        final_file,
        edges.len()
    ))?;

    let suffix = if params.consolidate_only {
        format!("{}subnets-consolidate", num_subnets)
    } else {
        format!("{}subnets", num_subnets)
    };
    log.finalize(&suffix)?;

    info!("Done");
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let params = resolve_params(&cli);

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads.max(1))
        .build_global()?;

    let layout = OutputLayout::create(&cli.output_dir)?;
    let mut log = FinalLog::create(&layout)?;

    match pipeline(&cli, &params, &layout, &mut log) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = log.note(&format!("error: {:#}", err));
            Err(err)
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("error: {:#}", err);
        let code = err
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
