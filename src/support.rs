//! Merges an EP tally into base tree text.
//!
//! The base text is re-parsed rather than re-rendered, so the annotation works on
//! any tree text produced by `newick::render`. Every closing parenthesis except
//! the root's is followed by the support of the clade it closes:
//! `round(100 * count / trials)`, nearest integer with halves rounded up.

use crate::error::{GsError, Result};
use crate::perturb::SupportTally;
use crate::tree::{BinaryTree, CladeSignature};

/// Support percentage for a clade seen `count` times in `trials` trials.
pub fn support_percent(count: usize, trials: usize) -> u32 {
    debug_assert!(trials > 0);
    let pct = (100.0 * count as f64 / trials as f64).round();
    pct.clamp(0.0, 100.0) as u32
}

/// Inserts a support value after every non-root internal clade of `base`.
///
/// # Errors
/// * `GsError::Argument` if `trials` is zero.
/// * `GsError::InputFormat` if `base` is not well-formed tree text over leaves
///   `1..=n`, each appearing exactly once.
pub fn annotate(base: &str, tally: &SupportTally, trials: usize, n: usize) -> Result<String> {
    if trials == 0 {
        return Err(GsError::Argument("support annotation needs at least one trial".into()));
    }

    let mut out = String::with_capacity(base.len() + base.len() / 2);
    let mut open: Vec<CladeSignature> = Vec::new();
    let mut seen = CladeSignature::empty(n);
    let mut terminated = false;
    let mut after_close = false;
    let mut chars = base.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if terminated {
            if c.is_whitespace() {
                continue;
            }
            return Err(GsError::input(format!("unexpected '{c}' after ';' at offset {pos}")));
        }
        match c {
            '(' => {
                open.push(CladeSignature::empty(n));
                out.push(c);
                after_close = false;
            }
            ',' => {
                out.push(c);
                after_close = false;
            }
            ')' => {
                let clade = open
                    .pop()
                    .ok_or_else(|| GsError::input(format!("unbalanced ')' at offset {pos}")))?;
                out.push(c);
                // The root has no parent and stays unlabeled.
                if let Some(parent) = open.last_mut() {
                    *parent = parent.union(&clade);
                    let support = support_percent(tally.count(&clade), trials);
                    out.push_str(&support.to_string());
                }
                after_close = true;
            }
            ';' => {
                if !open.is_empty() {
                    return Err(GsError::input(format!("{} unclosed '(' before ';'", open.len())));
                }
                out.push(c);
                terminated = true;
            }
            '0'..='9' => {
                if after_close {
                    return Err(GsError::input(format!("label after ')' at offset {pos}; text is already annotated")));
                }
                let mut end = pos + c.len_utf8();
                while let Some(&(next_pos, next)) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    end = next_pos + next.len_utf8();
                    chars.next();
                }
                let number = &base[pos..end];
                let leaf = number
                    .parse::<usize>()
                    .ok()
                    .filter(|&k| (1..=n).contains(&k))
                    .ok_or_else(|| GsError::input(format!("leaf '{number}' outside 1..={n}")))?
                    - 1;
                if seen.contains(leaf) {
                    return Err(GsError::input(format!("leaf {number} appears twice")));
                }
                seen.insert(leaf);
                if let Some(top) = open.last_mut() {
                    top.insert(leaf);
                }
                out.push_str(number);
            }
            c if c.is_whitespace() => {}
            other => {
                return Err(GsError::input(format!("unexpected '{other}' at offset {pos}")));
            }
        }
    }

    if !terminated {
        return Err(GsError::input("tree text is missing its terminating ';'"));
    }
    if seen.len() != n {
        return Err(GsError::input(format!("tree text has {} leaves, expected {}", seen.len(), n)));
    }
    Ok(out)
}

/// One row per non-root internal clade of `tree`, in pre-order:
/// `(clade, count, support)`.
pub fn clade_supports(tree: &BinaryTree, tally: &SupportTally, trials: usize) -> Vec<(CladeSignature, usize, u32)> {
    let arena = tree.arena();
    tree.internal_nodes()
        .into_iter()
        .filter(|&id| id != tree.root())
        .map(|id| {
            let sig = arena.get_signature(id).clone();
            let count = tally.count(&sig);
            let support = if trials > 0 { support_percent(count, trials) } else { 0 };
            (sig, count, support)
        })
        .collect()
}
