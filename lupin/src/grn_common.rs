pub use fnv::{FnvHashMap, FnvHashSet};
pub use log::{info, warn};
pub use rayon::prelude::*;

/// Dense gene identifier assigned in matrix row order
pub type GeneId = usize;

pub type DVec = nalgebra::DVector<f32>;

/// A scored edge from some regulator to `target`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeTar {
    pub target: GeneId,
    pub mi: f32,
}

/// regulator -> scored target list
pub type GeneToEdges = FnvHashMap<GeneId, Vec<EdgeTar>>;

/// regulator -> target -> MI, for O(1) shared-target lookups
pub type GeneToGeneToMi = FnvHashMap<GeneId, FnvHashMap<GeneId, f32>>;

/// Reshape edge lists into nested maps
pub fn edges_to_map(network: &GeneToEdges) -> GeneToGeneToMi {
    let mut out = GeneToGeneToMi::default();
    for (&reg, edges) in network.iter() {
        let tar_mi = out.entry(reg).or_default();
        for e in edges.iter() {
            tar_mi.insert(e.target, e.mi);
        }
    }
    out
}
