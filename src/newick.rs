//! Renders a `BinaryTree` as tree text: fully parenthesized, comma separated,
//! 1-based leaf numbers in matrix row order, terminated by `;`.
//!
//! Children are visited in arena order, which is already smaller-minimum-leaf
//! first, so the output is fully determined by the clade structure.

use crate::tree::{BinaryTree, NodeId};

enum Step {
    Enter(NodeId),
    Comma,
    Close,
}

/// Renders `tree` without any branch annotations.
pub fn render(tree: &BinaryTree) -> String {
    let arena = tree.arena();
    let mut out = String::with_capacity(arena.n_leaves() * 5 + 1);

    // Explicit stack: chain-shaped trees are as deep as they are wide.
    let mut stack = vec![Step::Enter(tree.root())];
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(id) => match arena.get_children(id) {
                Some((first, second)) => {
                    out.push('(');
                    stack.push(Step::Close);
                    stack.push(Step::Enter(second));
                    stack.push(Step::Comma);
                    stack.push(Step::Enter(first));
                }
                None => {
                    debug_assert!(arena.is_leaf(id), "Node {} has no children but is not a leaf", id);
                    if let Some(leaf) = arena.get_leaf(id) {
                        out.push_str(&(leaf + 1).to_string());
                    }
                }
            },
            Step::Comma => out.push(','),
            Step::Close => out.push(')'),
        }
    }
    out.push(';');
    out
}
