//! Edge Perturbation (EP): randomized re-clustering used to estimate how robust
//! each clade of the base tree is.
//!
//! One trial perturbs every off-diagonal similarity with mean-preserving
//! multiplicative noise, reruns the split engine on the perturbed matrix, and
//! counts every internal clade of the resulting tree in a shared `SupportTally`.
//!
//! Noise model: for each pair `i < j`, visited row by row, one value `u` is drawn
//! uniformly from `[0, 1)` and `W'[i][j] = W'[j][i] = W[i][j] * 2u`. The diagonal
//! is copied unchanged. A trial over `n` leaves consumes exactly `n(n-1)/2` draws.

use std::time::Instant;

use ndarray::Array2;
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::EP_BATCH_MEMORY_BUDGET;
use crate::error::{GsError, Result};
use crate::matrix::SimilarityMatrix;
use crate::split::SplitEngine;
use crate::tree::CladeSignature;

// --- Support Tally ---

/// Occurrence count per clade, accumulated over EP trials. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportTally {
    counts: FxHashMap<CladeSignature, usize>,
    trials: usize,
}

impl SupportTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the internal clades of one completed trial.
    pub fn record<'a, I: IntoIterator<Item = &'a CladeSignature>>(&mut self, clades: I) {
        for sig in clades {
            *self.counts.entry(sig.clone()).or_insert(0) += 1;
        }
        self.trials += 1;
    }

    /// Number of trials in which `signature` occurred (0 if never).
    pub fn count(&self, signature: &CladeSignature) -> usize {
        self.counts.get(signature).copied().unwrap_or(0)
    }

    /// Number of trials recorded so far.
    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Number of distinct clades seen.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CladeSignature, usize)> {
        self.counts.iter().map(|(sig, &count)| (sig, count))
    }
}

// --- Perturbation ---

/// Draws a perturbed copy of `w` from `rng` (see the module docs for the model).
pub fn perturb_matrix<R: Rng + ?Sized>(w: &SimilarityMatrix, rng: &mut R) -> Result<SimilarityMatrix> {
    let n = w.size();
    let mut values = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        values[[i, i]] = w.get(i, i);
        for j in (i + 1)..n {
            let u: f64 = rng.gen();
            let v = w.get(i, j) * 2.0 * u;
            values[[i, j]] = v;
            values[[j, i]] = v;
        }
    }
    SimilarityMatrix::new(values)
}

/// Number of perturbed `n x n` matrices a batch may hold: `requested`, capped
/// so the batch stays within `EP_BATCH_MEMORY_BUDGET` bytes, never below one.
pub fn effective_batch_size(requested: usize, n: usize) -> usize {
    let per_matrix = n.saturating_mul(n).saturating_mul(std::mem::size_of::<f64>()).max(1);
    requested.min(EP_BATCH_MEMORY_BUDGET / per_matrix).max(1)
}

/// Runs single EP trials against a fixed split engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerturbationSampler {
    engine: SplitEngine,
}

impl PerturbationSampler {
    pub fn new(engine: SplitEngine) -> Self {
        PerturbationSampler { engine }
    }

    /// One trial: perturb, re-cluster, tally. The tally is only touched once the
    /// perturbed tree has been built, so a failed trial leaves it unchanged.
    pub fn trial<R: Rng + ?Sized>(
        &self,
        w: &SimilarityMatrix,
        n: usize,
        rng: &mut R,
        tally: &mut SupportTally,
    ) -> Result<()> {
        let perturbed = perturb_matrix(w, rng)?;
        let tree = self.engine.run(&perturbed, n)?;
        tally.record(&tree.clade_signatures());
        Ok(())
    }

    /// Runs `ep_num` trials and returns the accumulated tally.
    ///
    /// Perturbed matrices are drawn from `rng` strictly in trial order. Unless the
    /// `non-parallel` feature is enabled, up to `batch_size` of them (see
    /// `effective_batch_size`) are then clustered concurrently and their clades recorded in trial order, so the
    /// tally is identical to the sequential one for the same stream.
    ///
    /// Any failing trial aborts the whole stage; no partial tally is returned.
    pub fn run_ep<R: Rng + ?Sized>(
        &self,
        w: &SimilarityMatrix,
        n: usize,
        ep_num: usize,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<SupportTally> {
        if batch_size == 0 {
            return Err(GsError::Argument("EP batch size must be at least 1".into()));
        }
        let start = Instant::now();
        let mut tally = SupportTally::new();

        #[cfg(feature = "non-parallel")]
        {
            for trial in 1..=ep_num {
                self.trial(w, n, rng, &mut tally)?;
                debug!(trial, total = ep_num, "EP trial done");
            }
        }

        #[cfg(not(feature = "non-parallel"))]
        {
            use rayon::prelude::*;

            let batch_size = effective_batch_size(batch_size, n);
            debug!(batch_size, "EP batch size");
            let mut done = 0;
            while done < ep_num {
                let this_batch = batch_size.min(ep_num - done);
                let perturbed = (0..this_batch)
                    .map(|_| perturb_matrix(w, rng))
                    .collect::<Result<Vec<_>>>()?;
                let clade_lists = perturbed
                    .par_iter()
                    .map(|m| self.engine.run(m, n).map(|tree| tree.clade_signatures()))
                    .collect::<Result<Vec<_>>>()?;
                for clades in &clade_lists {
                    tally.record(clades);
                }
                done += this_batch;
                debug!(done, total = ep_num, "EP batch done");
            }
        }

        info!(
            trials = ep_num,
            clades = tally.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "EP stage finished"
        );
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::{rngs::StdRng, SeedableRng};

    fn two_blocks() -> SimilarityMatrix {
        SimilarityMatrix::new(arr2(&[
            [1.0, 0.9, 0.1, 0.1],
            [0.9, 1.0, 0.1, 0.1],
            [0.1, 0.1, 1.0, 0.9],
            [0.1, 0.1, 0.9, 1.0],
        ]))
        .unwrap()
    }

    #[test]
    fn perturbation_keeps_symmetry_and_diagonal() {
        let w = two_blocks();
        let mut rng = StdRng::seed_from_u64(7);
        let p = perturb_matrix(&w, &mut rng).unwrap();
        for i in 0..4 {
            assert_eq!(p.get(i, i), w.get(i, i));
            for j in 0..4 {
                assert_eq!(p.get(i, j), p.get(j, i));
                assert!(p.get(i, j) >= 0.0 && p.get(i, j) < 2.0 * w.get(i, j) + 1e-12);
            }
        }
    }

    #[test]
    fn perturbation_consumes_one_draw_per_pair() {
        let w = two_blocks();
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        perturb_matrix(&w, &mut a).unwrap();
        for _ in 0..6 {
            let _: f64 = b.gen();
        }
        assert_eq!(a.gen::<u64>(), b.gen::<u64>());
    }

    #[test]
    fn trial_records_every_internal_clade() {
        let w = two_blocks();
        let mut rng = StdRng::seed_from_u64(3);
        let mut tally = SupportTally::new();
        let sampler = PerturbationSampler::default();
        sampler.trial(&w, 4, &mut rng, &mut tally).unwrap();
        assert_eq!(tally.trials(), 1);
        let total: usize = tally.iter().map(|(_, c)| c).sum();
        assert_eq!(total, 3);
        assert_eq!(tally.count(&CladeSignature::from_leaves(4, 0..4)), 1);
    }

    #[test]
    fn tally_is_never_reset() {
        let w = two_blocks();
        let mut rng = StdRng::seed_from_u64(5);
        let mut tally = SupportTally::new();
        let sampler = PerturbationSampler::default();
        for _ in 0..10 {
            sampler.trial(&w, 4, &mut rng, &mut tally).unwrap();
        }
        assert_eq!(tally.trials(), 10);
        assert_eq!(tally.count(&CladeSignature::from_leaves(4, 0..4)), 10);
        assert!(tally.iter().all(|(_, c)| c <= 10));
    }

    #[test]
    fn failed_trial_leaves_tally_untouched() {
        let w = two_blocks();
        let mut rng = StdRng::seed_from_u64(5);
        let mut tally = SupportTally::new();
        let err = PerturbationSampler::default().trial(&w, 5, &mut rng, &mut tally).unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
        assert_eq!(tally, SupportTally::new());
    }

    #[test]
    fn run_ep_matches_sequential_trials() {
        let w = two_blocks();
        let sampler = PerturbationSampler::default();

        let mut rng = StdRng::seed_from_u64(42);
        let batched = sampler.run_ep(&w, 4, 25, 4, &mut rng).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut sequential = SupportTally::new();
        for _ in 0..25 {
            sampler.trial(&w, 4, &mut rng, &mut sequential).unwrap();
        }
        assert_eq!(batched, sequential);
    }

    #[test]
    fn run_ep_is_reproducible_for_a_seed() {
        let w = two_blocks();
        let sampler = PerturbationSampler::default();
        let a = sampler.run_ep(&w, 4, 30, 8, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = sampler.run_ep(&w, 4, 30, 8, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.trials(), 30);
    }

    #[test]
    fn failing_trial_aborts_run_ep() {
        let w = two_blocks();
        let err = PerturbationSampler::default()
            .run_ep(&w, 5, 10, 4, &mut StdRng::seed_from_u64(2))
            .unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
    }

    #[test]
    fn batch_size_is_capped_by_memory() {
        assert_eq!(effective_batch_size(8, 10), 8);
        assert_eq!(effective_batch_size(64, 2_000), 16);
        assert_eq!(effective_batch_size(64, 20_000), 1);
        assert_eq!(effective_batch_size(0, 10), 1);
        let n = 5_000;
        let batch = effective_batch_size(usize::MAX, n);
        assert!(batch * n * n * std::mem::size_of::<f64>() <= EP_BATCH_MEMORY_BUDGET);
    }

    #[test]
    fn run_ep_rejects_zero_batch() {
        let w = two_blocks();
        let err = PerturbationSampler::default()
            .run_ep(&w, 4, 3, 0, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, GsError::Argument(_)));
    }

    #[test]
    fn single_leaf_ep_is_a_no_op() {
        let w = SimilarityMatrix::new(arr2(&[[1.0]])).unwrap();
        let tally = PerturbationSampler::default()
            .run_ep(&w, 1, 5, 2, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(tally.is_empty());
        assert_eq!(tally.trials(), 5);
    }
}
