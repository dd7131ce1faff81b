use crate::errors::PipelineError;
use crate::grn_common::*;

use mi_util::common_io::{open_buf_reader, read_lines};
use mi_util::copula::rank_indices;
use rand::rngs::StdRng;
use std::io::BufRead;

/// Copula-transformed expression profiles plus the rank matrix kept for
/// Spearman correlation at consolidation. Built once per run and
/// immutable afterwards.
pub struct ExpressionData {
    /// gene id -> copula-transformed expression, one value per sample
    pub copula: Vec<DVec>,
    /// gene id -> 1-based sample ranks
    pub ranks: Vec<Vec<u32>>,
    /// gene id -> gene name
    pub gene_names: Vec<Box<str>>,
    /// gene name -> gene id
    pub gene_ids: FnvHashMap<Box<str>, GeneId>,
    pub num_samples: usize,
}

impl ExpressionData {
    pub fn num_genes(&self) -> usize {
        self.gene_names.len()
    }
}

/// tab, comma, or space separated
fn split_fields(line: &str) -> Vec<&str> {
    line.split(['\t', ',', ' ']).collect()
}

/// Read a (G+1) x (N+1) expression matrix: a header row of sample names
/// behind an ignored corner cell, then one gene per row. Every row is
/// copula-transformed on the spot; the same tie-broken ranking feeds
/// the copula values and the integer rank matrix.
///
/// * `path` - matrix file, gzipped or not
/// * `rng` - master generator, consumed serially for tie breaking
pub fn read_expression_matrix(path: &str, rng: &mut StdRng) -> anyhow::Result<ExpressionData> {
    let reader = open_buf_reader(path)
        .map_err(|e| PipelineError::Io(format!("cannot open expression matrix {}: {}", path, e)))?;
    let mut lines = reader.lines().enumerate();

    let header = match lines.next() {
        Some((_, line)) => line.map_err(|e| PipelineError::Io(e.to_string()))?,
        None => {
            return Err(PipelineError::Data(format!("{} is empty", path)).into());
        }
    };
    let header = header.trim_end_matches('\r');
    let num_samples = split_fields(header).len().saturating_sub(1);
    if num_samples < 2 {
        return Err(PipelineError::Data(format!(
            "{} must have at least 2 sample columns, found {}",
            path, num_samples
        ))
        .into());
    }

    let mut data = ExpressionData {
        copula: Vec::new(),
        ranks: Vec::new(),
        gene_names: Vec::new(),
        gene_ids: FnvHashMap::default(),
        num_samples,
    };

    for (lineno, line) in lines {
        let line = line.map_err(|e| PipelineError::Io(e.to_string()))?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let fields = split_fields(line);
        let gene = fields[0];
        if gene.is_empty() {
            return Err(PipelineError::Data(format!(
                "{} line {}: missing gene name",
                path,
                lineno + 1
            ))
            .into());
        }
        if data.gene_ids.contains_key(gene) {
            return Err(PipelineError::Data(format!(
                "{} line {}: duplicate row for gene {}",
                path,
                lineno + 1,
                gene
            ))
            .into());
        }

        let mut values = Vec::with_capacity(num_samples);
        for field in fields[1..].iter().filter(|f| !f.is_empty()) {
            let v: f32 = field.parse().map_err(|_| {
                PipelineError::Data(format!(
                    "{} line {}: cannot parse '{}' as a number",
                    path,
                    lineno + 1,
                    field
                ))
            })?;
            values.push(v);
        }
        if values.len() != num_samples {
            return Err(PipelineError::Data(format!(
                "{} line {}: expected {} values, found {}",
                path,
                lineno + 1,
                num_samples,
                values.len()
            ))
            .into());
        }

        let idx = rank_indices(&values, rng);
        let mut copula = vec![0.0_f32; num_samples];
        let mut ranks = vec![0_u32; num_samples];
        for (r, &i) in idx.iter().enumerate() {
            copula[i] = (r + 1) as f32 / (num_samples as f32 + 1.0);
            ranks[i] = (r + 1) as u32;
        }

        let id = data.gene_names.len();
        data.gene_ids.insert(gene.into(), id);
        data.gene_names.push(gene.into());
        data.copula.push(DVec::from_vec(copula));
        data.ranks.push(ranks);
    }

    if data.num_genes() == 0 {
        return Err(PipelineError::Data(format!("{} has no gene rows", path)).into());
    }

    info!(
        "read {} genes x {} samples from {}",
        data.num_genes(),
        data.num_samples,
        path
    );
    Ok(data)
}

/// Read the newline-separated regulator list. Names without an
/// expression profile are warned about and dropped; the surviving ids
/// come back sorted and deduplicated.
pub fn read_regulator_list(path: &str, data: &ExpressionData) -> anyhow::Result<Vec<GeneId>> {
    let lines = read_lines(path)
        .map_err(|e| PipelineError::Io(format!("cannot open regulator list {}: {}", path, e)))?;

    let mut regulators: Vec<GeneId> = Vec::new();
    let mut seen: FnvHashSet<GeneId> = FnvHashSet::default();
    for name in lines.iter().filter(|l| !l.is_empty()) {
        match data.gene_ids.get(name.as_ref()) {
            Some(&id) => {
                if seen.insert(id) {
                    regulators.push(id);
                }
            }
            None => {
                warn!(
                    "regulator {} has no entry in the expression matrix; ignored",
                    name
                );
            }
        }
    }

    if regulators.is_empty() {
        return Err(PipelineError::Data(format!(
            "no regulator in {} matches the expression matrix",
            path
        ))
        .into());
    }

    regulators.sort_unstable();
    info!("{} regulators with expression profiles", regulators.len());
    Ok(regulators)
}
