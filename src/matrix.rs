//! The similarity matrix type and its plain-text loader.
//!
//! A `SimilarityMatrix` can only be built through `SimilarityMatrix::new`, which
//! checks the shape, finiteness and exact symmetry of the values. Everything
//! downstream (splitting, perturbation) relies on those checks having happened.
//!
//! Loading is not performance critical, so the loader reports precise line
//! numbers rather than failing fast.

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{GsError, Result};

/// Symmetric, finite, square matrix of pairwise similarities. Row `i`
/// corresponds to leaf number `i + 1` in the rendered tree text.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    values: Array2<f64>,
}

impl SimilarityMatrix {
    /// Wraps `values` after validating it.
    ///
    /// # Errors
    /// `GsError::InputFormat` if the array is empty, not square, contains a
    /// non-finite entry, or has `values[i][j] != values[j][i]` for some pair.
    pub fn new(values: Array2<f64>) -> Result<Self> {
        validate(values.view())?;
        Ok(SimilarityMatrix { values })
    }

    /// Builds a matrix from row vectors; rows must all have length `rows.len()`.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let mut flat = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n {
                return Err(GsError::input(format!(
                    "row {} has {} values, expected {}",
                    i + 1,
                    row.len(),
                    n
                )));
            }
            flat.extend(row);
        }
        let values = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| GsError::input(format!("cannot shape {n}x{n} matrix: {e}")))?;
        Self::new(values)
    }

    /// Number of rows (= number of leaves).
    #[inline]
    pub fn size(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    /// Induced submatrix on `members` (in the given order), diagonal zeroed.
    pub(crate) fn affinity_on(&self, members: &[usize]) -> Array2<f64> {
        let k = members.len();
        Array2::from_shape_fn((k, k), |(a, b)| {
            if a == b {
                0.0
            } else {
                self.values[[members[a], members[b]]]
            }
        })
    }
}

/// Checks the invariants of a similarity matrix.
pub fn validate(values: ArrayView2<'_, f64>) -> Result<()> {
    let (rows, cols) = values.dim();
    if rows == 0 {
        return Err(GsError::input("similarity matrix is empty"));
    }
    if rows != cols {
        return Err(GsError::input(format!("similarity matrix is {rows}x{cols}, expected a square matrix")));
    }
    for i in 0..rows {
        for j in i..cols {
            let a = values[[i, j]];
            let b = values[[j, i]];
            if !a.is_finite() || !b.is_finite() {
                return Err(GsError::input(format!(
                    "non-finite similarity at ({}, {})",
                    i + 1,
                    j + 1
                )));
            }
            if a != b {
                return Err(GsError::input(format!(
                    "similarity matrix is not symmetric: W[{0}][{1}] = {2} but W[{1}][{0}] = {3}",
                    i + 1,
                    j + 1,
                    a,
                    b
                )));
            }
        }
    }
    Ok(())
}

/// Parses a whitespace separated matrix.
///
/// Blank lines and lines starting with `#` are skipped. If the first remaining
/// line holds a single integer and the following line has more than one value
/// (or there is exactly one row after it), it is taken as the row count and checked.
pub fn parse_matrix(text: &str) -> Result<SimilarityMatrix> {
    let mut lines: Vec<(usize, Vec<&str>)> = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(lineno, line)| (lineno, line.split_whitespace().collect()))
        .collect();

    let declared = declared_row_count(&lines);
    if declared.is_some() {
        lines.remove(0);
    }

    let mut rows = Vec::with_capacity(lines.len());
    for (lineno, tokens) in &lines {
        let row = tokens
            .iter()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|_| GsError::input(format!("line {lineno}: '{tok}' is not a number")))
            })
            .collect::<Result<Vec<f64>>>()?;
        if row.len() != lines.len() {
            return Err(GsError::input(format!(
                "line {lineno}: expected {} values, found {}",
                lines.len(),
                row.len()
            )));
        }
        rows.push(row);
    }

    if let Some(n) = declared {
        if n != rows.len() {
            return Err(GsError::input(format!(
                "header declares {n} sequences but {} rows were found",
                rows.len()
            )));
        }
    }

    SimilarityMatrix::from_rows(rows)
}

// A lone integer on the first line is a header unless the matrix itself is 1x1.
fn declared_row_count(lines: &[(usize, Vec<&str>)]) -> Option<usize> {
    let (_, first) = lines.first()?;
    if first.len() != 1 {
        return None;
    }
    let n = first[0].parse::<usize>().ok()?;
    match lines.get(1) {
        Some((_, next)) if next.len() > 1 || lines.len() == 2 => Some(n),
        _ => None,
    }
}

/// Reads and parses a matrix file.
pub fn load_matrix<P: AsRef<Path>>(path: P) -> Result<SimilarityMatrix> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| GsError::io(path, e))?;
    let matrix = parse_matrix(&text)?;
    debug!(path = %path.display(), size = matrix.size(), "loaded similarity matrix");
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::io::Write;

    #[test]
    fn accepts_symmetric_matrix() {
        let w = SimilarityMatrix::new(arr2(&[[1.0, 0.5], [0.5, 1.0]])).unwrap();
        assert_eq!(w.size(), 2);
        assert_eq!(w.get(0, 1), 0.5);
    }

    #[test]
    fn rejects_asymmetric_matrix() {
        let err = SimilarityMatrix::new(arr2(&[[1.0, 0.5], [0.4, 1.0]])).unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
    }

    #[test]
    fn rejects_non_finite_entries() {
        let err = SimilarityMatrix::new(arr2(&[[1.0, f64::NAN], [f64::NAN, 1.0]])).unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
        let err = SimilarityMatrix::new(arr2(&[[f64::INFINITY]])).unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
    }

    #[test]
    fn rejects_empty_and_non_square() {
        assert!(SimilarityMatrix::new(Array2::zeros((0, 0))).is_err());
        assert!(SimilarityMatrix::new(Array2::zeros((2, 3))).is_err());
        assert!(SimilarityMatrix::from_rows(vec![vec![1.0, 0.0], vec![0.0]]).is_err());
    }

    #[test]
    fn affinity_zeroes_the_diagonal() {
        let w = SimilarityMatrix::new(arr2(&[
            [1.0, 0.2, 0.3],
            [0.2, 1.0, 0.4],
            [0.3, 0.4, 1.0],
        ]))
        .unwrap();
        let a = w.affinity_on(&[2, 0]);
        assert_eq!(a, arr2(&[[0.0, 0.3], [0.3, 0.0]]));
    }

    #[test]
    fn parses_with_header_and_comments() {
        let text = "# similarity\n3\n1 0.9 0.1\n0.9 1 0.2\n\n0.1 0.2 1\n";
        let w = parse_matrix(text).unwrap();
        assert_eq!(w.size(), 3);
        assert_eq!(w.get(2, 1), 0.2);
    }

    #[test]
    fn parses_without_header() {
        let w = parse_matrix("1 0.5\n0.5 1\n").unwrap();
        assert_eq!(w.size(), 2);
    }

    #[test]
    fn single_value_is_a_matrix_not_a_header() {
        let w = parse_matrix("1\n").unwrap();
        assert_eq!(w.size(), 1);
        let w = parse_matrix("1\n7\n").unwrap();
        assert_eq!(w.size(), 1);
        assert_eq!(w.get(0, 0), 7.0);
    }

    #[test]
    fn reports_bad_tokens_and_ragged_rows() {
        let err = parse_matrix("1 x\n0.5 1\n").unwrap_err().to_string();
        assert!(err.contains("line 1"), "{err}");
        let err = parse_matrix("1 0.5\n0.5\n").unwrap_err().to_string();
        assert!(err.contains("line 2"), "{err}");
    }

    #[test]
    fn header_count_must_match() {
        let err = parse_matrix("3\n1 0.5\n0.5 1\n").unwrap_err();
        assert!(matches!(err, GsError::InputFormat(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2\n1 0.3\n0.3 1").unwrap();
        let w = load_matrix(file.path()).unwrap();
        assert_eq!(w.size(), 2);

        let err = load_matrix("/definitely/not/here.mat").unwrap_err();
        assert!(matches!(err, GsError::Io { .. }));
    }
}
