//! Exports the per-clade EP support of the base tree as a CSV table, one row per
//! non-root internal clade in tree order. Useful for inspecting support values
//! without parsing the annotated tree text.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;

use crate::error::{GsError, Result};
use crate::perturb::SupportTally;
use crate::support::clade_supports;
use crate::tree::BinaryTree;

/// One CSV row.
#[derive(Debug, Serialize)]
struct SupportRecord {
    /// 1-based leaf numbers, space separated.
    clade: String,
    size: usize,
    count: usize,
    support: u32,
}

/// Writes the support table to any writer.
pub fn write_support_records<W: Write>(
    writer: W,
    tree: &BinaryTree,
    tally: &SupportTally,
    trials: usize,
) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(writer);
    for (sig, count, support) in clade_supports(tree, tally, trials) {
        let clade = sig
            .leaves()
            .map(|leaf| (leaf + 1).to_string())
            .collect::<Vec<_>>()
            .join(" ");
        wtr.serialize(SupportRecord {
            clade,
            size: sig.len(),
            count,
            support,
        })?;
    }
    wtr.flush().map_err(|e| GsError::Csv(e.into()))?;
    Ok(())
}

/// Creates (or truncates) `path` and writes the support table into it.
pub fn write_support_table<P: AsRef<Path>>(
    path: P,
    tree: &BinaryTree,
    tally: &SupportTally,
    trials: usize,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| GsError::io(path, e))?;
    write_support_records(file, tree, tally, trials)
}
