use crate::consolidate::ConsolidatedEdge;
use crate::errors::PipelineError;
use crate::grn_common::*;
use crate::input::ExpressionData;
use crate::prune::PruneMethod;
use crate::subnet::subnet_fpr_estimate;

use mi_util::common_io::{mkdir, open_buf_reader, open_buf_writer, read_lines};
use std::io::{BufRead, Write};
use std::path::Path;

pub const SUBNET_HEADER: &str = "regulator.values\ttarget.values\tmi.values";
pub const CONSOLIDATED_HEADER: &str =
    "regulator.values\ttarget.values\tmi.values\tscc.values\tcount.values\tp.values";

/// Output directory scaffolding: subnet files under `<root>/subnets/`
/// and their run summaries under `<root>/subnets_log/`.
pub struct OutputLayout {
    pub root: Box<str>,
    subnets_dir: String,
    logs_dir: String,
}

impl OutputLayout {
    pub fn create(root: &str) -> anyhow::Result<Self> {
        let root = root.trim_end_matches('/');
        let subnets_dir = format!("{}/subnets", root);
        let logs_dir = format!("{}/subnets_log", root);
        for dir in [root, subnets_dir.as_str(), logs_dir.as_str()] {
            mkdir(dir)
                .map_err(|e| PipelineError::Io(format!("cannot create directory {}: {}", dir, e)))?;
        }
        Ok(Self {
            root: root.into(),
            subnets_dir,
            logs_dir,
        })
    }

    pub fn subnet_file(&self, subnet_num: usize) -> String {
        format!("{}/subnet{}.tsv", self.subnets_dir, subnet_num)
    }

    pub fn subnet_log_file(&self, subnet_num: usize) -> String {
        format!("{}/log_subnet{}.txt", self.logs_dir, subnet_num)
    }

    pub fn final_net_file(&self, num_subnets: usize) -> String {
        format!("{}/finalNet_{}subnets.tsv", self.root, num_subnets)
    }

    pub fn final_log_file(&self) -> String {
        format!("{}/finalLog.txt", self.root)
    }
}

/// Fill a `.tmp` sibling and rename it into place, so a crash never
/// leaves a truncated file under the final name.
fn write_atomically<F>(path: &str, fill: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Box<dyn Write>) -> anyhow::Result<()>,
{
    let tmp = format!("{}.tmp", path);
    {
        let mut out = open_buf_writer(&tmp)?;
        fill(&mut out)?;
        out.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write one subnetwork as regulator/target/MI rows, ordered by gene
/// id. MI uses the shortest round-tripping decimal representation.
pub fn write_subnet(
    path: &str,
    network: &GeneToEdges,
    gene_names: &[Box<str>],
) -> anyhow::Result<()> {
    let mut regulators: Vec<GeneId> = network.keys().copied().collect();
    regulators.sort_unstable();

    write_atomically(path, |out| {
        writeln!(out, "{}", SUBNET_HEADER)?;
        for &reg in regulators.iter() {
            let mut edges = network[&reg].clone();
            edges.sort_unstable_by_key(|e| e.target);
            for e in edges.iter() {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    gene_names[reg], gene_names[e.target], e.mi
                )?;
            }
        }
        Ok(())
    })
    .map_err(|e| PipelineError::Io(format!("cannot write subnet file {}: {}", path, e)).into())
}

/// Load a subnet file back into the nested-map form, resolving gene
/// names through the expression matrix.
pub fn read_subnet(path: &str, data: &ExpressionData) -> anyhow::Result<GeneToGeneToMi> {
    let reader = open_buf_reader(path)
        .map_err(|e| PipelineError::Io(format!("cannot open subnet file {}: {}", path, e)))?;

    let mut network = GeneToGeneToMi::default();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PipelineError::Io(e.to_string()))?;
        let line = line.trim_end_matches('\r');
        if i == 0 {
            if !line.starts_with("regulator.values") {
                return Err(PipelineError::Consistency(format!(
                    "{} does not look like a subnet file",
                    path
                ))
                .into());
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split('\t');
        let (Some(reg), Some(tar), Some(mi)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(PipelineError::Consistency(format!(
                "{} line {}: expected regulator, target, and MI",
                path,
                i + 1
            ))
            .into());
        };

        let resolve = |name: &str| -> anyhow::Result<GeneId> {
            data.gene_ids.get(name).copied().ok_or_else(|| {
                PipelineError::Consistency(format!(
                    "{} line {}: gene {} is absent from the expression matrix",
                    path,
                    i + 1,
                    name
                ))
                .into()
            })
        };
        let reg = resolve(reg)?;
        let tar = resolve(tar)?;
        let mi: f32 = mi.parse().map_err(|_| {
            PipelineError::Consistency(format!("{} line {}: bad MI value", path, i + 1))
        })?;

        network.entry(reg).or_default().insert(tar, mi);
    }
    Ok(network)
}

/// Per-subnet run summary. The key/value lines written here are the
/// persistence format that consolidate-only mode reads back.
#[derive(Debug, Clone)]
pub struct SubnetSummary {
    pub subnet_num: usize,
    pub num_regulators: usize,
    pub num_genes: usize,
    pub num_samples: usize,
    pub num_subsampled: usize,
    pub method: PruneMethod,
    pub alpha: f64,
    pub prune_maxent: bool,
    pub num_edges_raw: usize,
    pub num_edges_after_threshold: usize,
    pub num_edges_after_maxent: usize,
}

pub fn write_subnet_log(path: &str, s: &SubnetSummary) -> anyhow::Result<()> {
    write_atomically(path, |out| {
        writeln!(out, "subnet: {}", s.subnet_num)?;
        writeln!(out, "regulators: {}", s.num_regulators)?;
        writeln!(out, "genes: {}", s.num_genes)?;
        writeln!(out, "samples: {}", s.num_samples)?;
        writeln!(out, "subsampled: {}", s.num_subsampled)?;
        writeln!(out, "method: {}", s.method)?;
        writeln!(out, "alpha: {}", s.alpha)?;
        writeln!(out, "maxent: {}", s.prune_maxent)?;
        writeln!(out, "edges_raw: {}", s.num_edges_raw)?;
        writeln!(out, "edges_after_threshold: {}", s.num_edges_after_threshold)?;
        writeln!(out, "edges_after_maxent: {}", s.num_edges_after_maxent)?;
        Ok(())
    })
    .map_err(|e| PipelineError::Io(format!("cannot write subnet log {}: {}", path, e)).into())
}

/// Recompute a subnet's FPR estimate from its logged summary.
pub fn read_subnet_log(path: &str) -> anyhow::Result<f64> {
    let lines = read_lines(path)
        .map_err(|e| PipelineError::Io(format!("cannot open subnet log {}: {}", path, e)))?;

    let mut fields: FnvHashMap<&str, &str> = FnvHashMap::default();
    for line in lines.iter() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }

    let get = |key: &str| -> anyhow::Result<&str> {
        fields.get(key).copied().ok_or_else(|| {
            PipelineError::Consistency(format!("subnet log {} is missing field '{}'", path, key))
                .into()
        })
    };
    let parse_err = |key: &str| {
        PipelineError::Consistency(format!("subnet log {}: cannot parse field '{}'", path, key))
    };

    let method: PruneMethod = get("method")?.parse().map_err(|_| parse_err("method"))?;
    let alpha: f64 = get("alpha")?.parse().map_err(|_| parse_err("alpha"))?;
    let maxent: bool = get("maxent")?.parse().map_err(|_| parse_err("maxent"))?;
    let num_regulators: usize = get("regulators")?
        .parse()
        .map_err(|_| parse_err("regulators"))?;
    let num_genes: usize = get("genes")?.parse().map_err(|_| parse_err("genes"))?;
    let num_after_threshold: usize = get("edges_after_threshold")?
        .parse()
        .map_err(|_| parse_err("edges_after_threshold"))?;
    let num_after_maxent: usize = get("edges_after_maxent")?
        .parse()
        .map_err(|_| parse_err("edges_after_maxent"))?;

    Ok(subnet_fpr_estimate(
        alpha,
        method,
        maxent,
        num_regulators,
        num_genes,
        num_after_threshold,
        num_after_maxent,
    ))
}

/// Load previously generated subnet/log pairs, stopping at the first
/// missing pair.
pub fn read_subnets(
    layout: &OutputLayout,
    requested: Option<usize>,
    data: &ExpressionData,
) -> anyhow::Result<(Vec<GeneToGeneToMi>, Vec<f64>)> {
    let mut subnets = Vec::new();
    let mut fprs = Vec::new();

    let limit = requested.unwrap_or(usize::MAX);
    for subnet_num in 1..=limit {
        let subnet_file = layout.subnet_file(subnet_num);
        let log_file = layout.subnet_log_file(subnet_num);
        if !Path::new(&subnet_file).exists() || !Path::new(&log_file).exists() {
            if requested.is_some() {
                warn!(
                    "requested {} subnetworks but only {} were found under {}",
                    limit,
                    subnet_num - 1,
                    layout.root
                );
            }
            break;
        }
        subnets.push(read_subnet(&subnet_file, data)?);
        fprs.push(read_subnet_log(&log_file)?);
    }

    if subnets.is_empty() {
        return Err(PipelineError::Consistency(format!(
            "no subnet files to consolidate under {}",
            layout.root
        ))
        .into());
    }

    info!("read {} subnetworks back from disk", subnets.len());
    Ok((subnets, fprs))
}

/// Write the consolidated network table.
pub fn write_consolidated(
    path: &str,
    edges: &[ConsolidatedEdge],
    gene_names: &[Box<str>],
) -> anyhow::Result<()> {
    write_atomically(path, |out| {
        writeln!(out, "{}", CONSOLIDATED_HEADER)?;
        for e in edges.iter() {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}",
                gene_names[e.regulator],
                gene_names[e.target],
                e.mi,
                e.scc,
                e.count,
                e.p_value
            )?;
        }
        Ok(())
    })
    .map_err(|e| PipelineError::Io(format!("cannot write final network {}: {}", path, e)).into())
}

/// The run-wide log: records the command line up front, stage notes as
/// the run progresses, and is renamed at exit to carry the subnetwork
/// count.
pub struct FinalLog {
    out: Box<dyn Write>,
    root: String,
    path: String,
}

impl FinalLog {
    pub fn create(layout: &OutputLayout) -> anyhow::Result<Self> {
        let path = layout.final_log_file();
        let mut out = open_buf_writer(&path)
            .map_err(|e| PipelineError::Io(format!("cannot write log {}: {}", path, e)))?;
        let command: Vec<String> = std::env::args().collect();
        writeln!(out, "command: {}", command.join(" "))?;
        out.flush()?;
        Ok(Self {
            out,
            root: layout.root.to_string(),
            path,
        })
    }

    pub fn note(&mut self, msg: &str) -> anyhow::Result<()> {
        writeln!(self.out, "{}", msg)?;
        self.out.flush()?;
        Ok(())
    }

    /// Rename `finalLog.txt` to its suffixed name now that the
    /// subnetwork count is known.
    pub fn finalize(&mut self, suffix: &str) -> anyhow::Result<()> {
        self.out.flush()?;
        let renamed = format!("{}/finalLog_{}.txt", self.root, suffix);
        std::fs::rename(&self.path, &renamed)?;
        Ok(())
    }
}
