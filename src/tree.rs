//! Core data structures for the divisive clustering tree: the clade signature
//! (a leaf-membership bitset), the arena holding `ClusterNode` entries addressed
//! by `NodeId`, and the finished `BinaryTree`.
//!
//! Nodes never hold references to each other, only indices into the arena, so a
//! tree is a plain `Vec` that can be moved between threads and dropped in one go.

use std::fmt;

/// Type alias for a node identifier within the `Arena`.
pub type NodeId = usize;

const WORD_BITS: usize = u64::BITS as usize;

// --- Clade Signature ---

/// Canonical identifier of the leaf set below a node.
///
/// Two signatures built over the same number of leaves compare equal exactly
/// when they contain the same leaves, regardless of insertion order or of which
/// clustering run produced them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CladeSignature {
    words: Box<[u64]>,
}

impl CladeSignature {
    /// Empty signature able to hold leaves `0..n_leaves`.
    pub fn empty(n_leaves: usize) -> Self {
        CladeSignature {
            words: vec![0u64; n_leaves.div_ceil(WORD_BITS)].into_boxed_slice(),
        }
    }

    /// Signature containing every leaf in `leaves`.
    ///
    /// # Panics
    /// Panics if a leaf is `>= n_leaves`.
    pub fn from_leaves<I: IntoIterator<Item = usize>>(n_leaves: usize, leaves: I) -> Self {
        let mut sig = Self::empty(n_leaves);
        for leaf in leaves {
            sig.insert(leaf);
        }
        sig
    }

    #[inline(always)]
    pub fn insert(&mut self, leaf: usize) {
        self.words[leaf / WORD_BITS] |= 1u64 << (leaf % WORD_BITS);
    }

    #[inline(always)]
    pub fn contains(&self, leaf: usize) -> bool {
        self.words
            .get(leaf / WORD_BITS)
            .is_some_and(|w| w & (1u64 << (leaf % WORD_BITS)) != 0)
    }

    /// Number of leaves in the clade.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Leaves in ascending order.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(wi * WORD_BITS + bit)
            })
        })
    }

    /// Union of two signatures of the same capacity.
    pub fn union(&self, other: &CladeSignature) -> CladeSignature {
        debug_assert_eq!(self.words.len(), other.words.len(), "signatures built over different leaf counts");
        CladeSignature {
            words: self
                .words
                .iter()
                .zip(other.words.iter())
                .map(|(a, b)| a | b)
                .collect(),
        }
    }
}

impl fmt::Debug for CladeSignature {
    // 1-based, matching the tree text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.leaves().map(|l| l + 1)).finish()
    }
}

// --- Arena ---

/// A node of the divisive tree.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    parent: Option<NodeId>,
    /// `(first, second)` with `first` holding the smaller minimum leaf.
    children: Option<(NodeId, NodeId)>,
    /// Set for leaves only.
    leaf: Option<usize>,
    min_leaf: usize,
    signature: CladeSignature,
}

/// Flat storage for the nodes of one clustering run.
#[derive(Debug, Clone)]
pub struct Arena {
    nodes: Vec<ClusterNode>,
    n_leaves: usize,
}

impl Arena {
    /// Creates an arena sized for a full binary tree over `n_leaves` leaves.
    pub fn with_capacity(n_leaves: usize) -> Self {
        Arena {
            nodes: Vec::with_capacity((2 * n_leaves).saturating_sub(1)),
            n_leaves,
        }
    }

    /// Allocates a node for the cluster `members`. A single member makes a leaf;
    /// larger clusters stay childless until `attach_children` is called.
    pub fn push_cluster(&mut self, members: &[usize]) -> NodeId {
        debug_assert!(!members.is_empty(), "Attempted to allocate an empty cluster");
        let id = self.nodes.len();
        let min_leaf = members.iter().copied().min().unwrap_or(usize::MAX);
        self.nodes.push(ClusterNode {
            parent: None,
            children: None,
            leaf: (members.len() == 1).then_some(min_leaf),
            min_leaf,
            signature: CladeSignature::from_leaves(self.n_leaves, members.iter().copied()),
        });
        id
    }

    /// Makes `a` and `b` the children of `parent`, ordered by minimum leaf.
    pub fn attach_children(&mut self, parent: NodeId, a: NodeId, b: NodeId) {
        debug_assert!(self.nodes[parent].leaf.is_none(), "Attempted to attach children to a leaf");
        debug_assert!(self.nodes[parent].children.is_none(), "Node {} already split", parent);
        let pair = if self.nodes[a].min_leaf <= self.nodes[b].min_leaf { (a, b) } else { (b, a) };
        self.nodes[parent].children = Some(pair);
        self.nodes[a].parent = Some(parent);
        self.nodes[b].parent = Some(parent);
    }

    // --- Accessors ---

    #[inline(always)]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].leaf.is_some()
    }

    /// Leaf index for leaves, `None` for internal nodes.
    #[inline(always)]
    pub fn get_leaf(&self, id: NodeId) -> Option<usize> {
        self.nodes[id].leaf
    }

    #[inline(always)]
    pub fn get_children(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        self.nodes[id].children
    }

    #[inline(always)]
    pub fn get_parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    #[inline(always)]
    pub fn get_min_leaf(&self, id: NodeId) -> usize {
        self.nodes[id].min_leaf
    }

    #[inline(always)]
    pub fn get_signature(&self, id: NodeId) -> &CladeSignature {
        &self.nodes[id].signature
    }

    #[inline(always)]
    pub fn nodes_len(&self) -> usize {
        self.nodes.len()
    }

    #[inline(always)]
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }
}

// --- Binary Tree ---

/// A finished clustering: every non-leaf node of the arena has two children.
#[derive(Debug, Clone)]
pub struct BinaryTree {
    arena: Arena,
    root: NodeId,
}

impl BinaryTree {
    pub(crate) fn new(arena: Arena, root: NodeId) -> Self {
        debug_assert!(
            (0..arena.nodes_len()).all(|id| arena.is_leaf(id) || arena.get_children(id).is_some()),
            "BinaryTree built with an unsplit cluster"
        );
        BinaryTree { arena, root }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn leaf_count(&self) -> usize {
        self.arena.n_leaves()
    }

    pub fn internal_count(&self) -> usize {
        (0..self.arena.nodes_len()).filter(|&id| !self.arena.is_leaf(id)).count()
    }

    /// Node ids in pre-order, smaller-minimum-leaf child first. This is the
    /// order in which opening parentheses appear in the rendered text.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.arena.nodes_len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some((first, second)) = self.arena.get_children(id) {
                stack.push(second);
                stack.push(first);
            }
        }
        order
    }

    /// Internal node ids in pre-order (root first).
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.preorder().into_iter().filter(|&id| !self.arena.is_leaf(id)).collect()
    }

    /// Signatures of every internal node, root included, in pre-order.
    pub fn clade_signatures(&self) -> Vec<CladeSignature> {
        self.internal_nodes()
            .into_iter()
            .map(|id| self.arena.get_signature(id).clone())
            .collect()
    }
}
