//! Graph Splitting: divisive spectral bipartition of the leaf set.
//!
//! A FIFO work queue starts with the cluster of all leaves. Every cluster with
//! two or more members is bipartitioned by the sign of its spectral partition
//! vector, and each side of size two or more goes back on the queue. The result
//! is a strict binary tree with exactly `n - 1` internal nodes.
//!
//! No randomness is involved: identical matrices always produce identical trees.

use std::cmp::Ordering;
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::{GsError, Result};
use crate::matrix::SimilarityMatrix;
use crate::spectral::{fiedler_vector, SpectralOptions};
use crate::tree::{Arena, BinaryTree};

/// Components within this fraction of the largest magnitude count as zero.
const ZERO_COMPONENT_EPS: f64 = 1e-9;

/// The deterministic clustering engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitEngine {
    options: SpectralOptions,
}

impl SplitEngine {
    pub fn new(options: SpectralOptions) -> Self {
        SplitEngine { options }
    }

    /// Clusters the `n` leaves of `w` into a binary tree.
    ///
    /// # Errors
    /// * `GsError::InputFormat` if `n` is zero or does not match the matrix size.
    /// * `GsError::DegenerateInput` if a cluster cannot be split in two.
    pub fn run(&self, w: &SimilarityMatrix, n: usize) -> Result<BinaryTree> {
        if n == 0 {
            return Err(GsError::input("cannot cluster zero sequences"));
        }
        if n != w.size() {
            return Err(GsError::input(format!(
                "matrix has {} rows but {} sequences were requested",
                w.size(),
                n
            )));
        }

        let mut arena = Arena::with_capacity(n);
        let all: Vec<usize> = (0..n).collect();
        let root = arena.push_cluster(&all);

        let mut queue = VecDeque::new();
        if n >= 2 {
            queue.push_back((root, all));
        }

        // --- Divisive loop ---
        while let Some((node_id, members)) = queue.pop_front() {
            let (left, right) = self.bipartition(w, &members)?;
            trace!(size = members.len(), left = left.len(), right = right.len(), "split cluster");

            let left_id = arena.push_cluster(&left);
            let right_id = arena.push_cluster(&right);
            arena.attach_children(node_id, left_id, right_id);

            if left.len() >= 2 {
                queue.push_back((left_id, left));
            }
            if right.len() >= 2 {
                queue.push_back((right_id, right));
            }
        }

        Ok(BinaryTree::new(arena, root))
    }

    /// Splits `members` (ascending leaf indices, at least two) into two
    /// nonempty ascending groups. The group holding the smallest member comes first.
    pub fn bipartition(&self, w: &SimilarityMatrix, members: &[usize]) -> Result<(Vec<usize>, Vec<usize>)> {
        let k = members.len();
        if k < 2 {
            return Err(GsError::DegenerateInput { size: k });
        }
        debug_assert!(members.windows(2).all(|p| p[0] < p[1]), "members must be strictly ascending");
        if k == 2 {
            return Ok((vec![members[0]], vec![members[1]]));
        }

        let affinity = w.affinity_on(members);
        let mut f = fiedler_vector(&affinity, &self.options);
        let scale = f.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let eps = scale * ZERO_COMPONENT_EPS;
        // Orient on the lowest-index member with a nonzero component; zero
        // components (isolated members) follow that member to side A.
        if let Some(&pivot) = f.iter().find(|v| v.abs() > eps) {
            if pivot < 0.0 {
                f.mapv_inplace(|v| -v);
            }
        }

        let (mut left, mut right) = (Vec::with_capacity(k), Vec::with_capacity(k));
        for (pos, &leaf) in members.iter().enumerate() {
            if f[pos] >= -eps {
                left.push(leaf);
            } else {
                right.push(leaf);
            }
        }

        // --- Degenerate-split guard ---
        if left.is_empty() || right.is_empty() {
            debug!(size = k, "sign split left one side empty; using balanced split");
            let mut order: Vec<usize> = (0..k).collect();
            // Descending component value, ties by ascending leaf index.
            order.sort_by(|&a, &b| {
                f[b].partial_cmp(&f[a]).unwrap_or(Ordering::Equal).then(members[a].cmp(&members[b]))
            });
            let half = k.div_ceil(2);
            left = order[..half].iter().map(|&p| members[p]).collect();
            right = order[half..].iter().map(|&p| members[p]).collect();
            left.sort_unstable();
            right.sort_unstable();
        }

        if left.is_empty() || right.is_empty() {
            return Err(GsError::DegenerateInput { size: k });
        }
        if left[0] > right[0] {
            std::mem::swap(&mut left, &mut right);
        }
        Ok((left, right))
    }
}
