//! Graph Splitting (GS) trees from sequence similarity matrices, with optional
//! Edge Perturbation (EP) support values.
//!
//! Pipeline: `SplitEngine` clusters the matrix into a binary tree, `newick::render`
//! turns it into tree text, `PerturbationSampler` re-clusters perturbed copies of
//! the matrix to build a `SupportTally`, and `support::annotate` writes the
//! support of every non-root clade into the text.

pub mod config;
pub mod error;
pub mod export;
pub mod matrix;
pub mod newick;
pub mod perturb;
pub mod spectral;
pub mod split;
pub mod support;
pub mod tree;

use std::time::Instant;

use rand::Rng;
use tracing::info;

pub use config::RunConfig;
pub use error::{GsError, Result};
pub use matrix::{load_matrix, parse_matrix, SimilarityMatrix};
pub use newick::render;
pub use perturb::{PerturbationSampler, SupportTally};
pub use spectral::SpectralOptions;
pub use split::SplitEngine;
pub use support::annotate;
pub use tree::{BinaryTree, CladeSignature};

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct GsOutput {
    /// The clustering of the unperturbed matrix.
    pub tree: BinaryTree,
    /// Tree text without support values.
    pub base_text: String,
    /// Present when at least one EP trial ran.
    pub tally: Option<SupportTally>,
    /// Final output: annotated text with EP, otherwise equal to `base_text`.
    pub text: String,
}

/// Runs GS on `w` and, if `config.ep_num > 0`, the EP stage using `rng`.
pub fn run_pipeline<R: Rng + ?Sized>(w: &SimilarityMatrix, config: &RunConfig, rng: &mut R) -> Result<GsOutput> {
    let trials = config.validate()?;
    let n = w.size();
    let engine = SplitEngine::new(config.spectral);

    let gs_start = Instant::now();
    let tree = engine.run(w, n)?;
    let base_text = render(&tree);
    info!(sequences = n, elapsed_ms = gs_start.elapsed().as_millis() as u64, "GS method done");

    if trials == 0 {
        return Ok(GsOutput {
            text: base_text.clone(),
            tree,
            base_text,
            tally: None,
        });
    }

    let sampler = PerturbationSampler::new(engine);
    let tally = sampler.run_ep(w, n, trials, config.resolved_batch_size(), rng)?;
    let text = annotate(&base_text, &tally, trials, n)?;
    Ok(GsOutput {
        tree,
        base_text,
        tally: Some(tally),
        text,
    })
}
