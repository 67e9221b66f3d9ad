//! Dense feature matrices: one row per sample, one column per feature.

use crate::errors::{RegressionError, Result};

/// Row-major matrix of `f64` features
///
/// ```
/// use gpr_lib::FeatureMatrix;
///
/// // the same 2x3 matrix, stored column by column and row by row
/// let by_col = FeatureMatrix::from_column_major(&[1., 4., 2., 5., 3., 6.], 2, 3).unwrap();
/// let by_row = FeatureMatrix::from_row_major(vec![1., 2., 3., 4., 5., 6.], 2, 3).unwrap();
/// assert_eq!(by_col, by_row);
/// assert_eq!(by_row.row(1), &[4., 5., 6.]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

fn checked_len(nrows: usize, ncols: usize, len: usize) -> Result<()> {
    match nrows.checked_mul(ncols) {
        Some(expected) if expected == len => Ok(()),
        _ => Err(RegressionError::ShapeMismatch(format!(
            "buffer of length {len} cannot hold a {nrows}x{ncols} matrix"
        ))),
    }
}

impl FeatureMatrix {
    /// Builds a matrix from nested rows
    ///
    /// # Errors
    ///
    /// Returns [`RegressionError::ShapeMismatch`] if the rows are ragged
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, Vec::len);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
            return Err(RegressionError::ShapeMismatch(format!(
                "row {i} has {} features, expected {ncols}",
                row.len()
            )));
        }
        Ok(FeatureMatrix {
            data: rows.into_iter().flatten().collect(),
            nrows,
            ncols,
        })
    }

    /// Wraps a row-major buffer
    ///
    /// # Errors
    ///
    /// Returns [`RegressionError::ShapeMismatch`] if `data.len() != nrows * ncols`
    pub fn from_row_major(data: Vec<f64>, nrows: usize, ncols: usize) -> Result<Self> {
        checked_len(nrows, ncols, data.len())?;
        Ok(FeatureMatrix { data, nrows, ncols })
    }

    /// Copies a column-major buffer, the layout used by flat-buffer callers
    ///
    /// # Errors
    ///
    /// Returns [`RegressionError::ShapeMismatch`] if `data.len() != nrows * ncols`
    pub fn from_column_major(data: &[f64], nrows: usize, ncols: usize) -> Result<Self> {
        checked_len(nrows, ncols, data.len())?;
        Ok(Self::from_fn(nrows, ncols, |i, j| data[i + j * nrows]))
    }

    pub fn from_fn(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                data.push(f(i, j));
            }
        }
        FeatureMatrix { data, nrows, ncols }
    }

    /// Number of samples
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Feature dimensionality
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// # Panics
    ///
    /// Panics if `i >= self.nrows()`
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        assert!(i < self.nrows, "row {i} out of bounds ({} rows)", self.nrows);
        &self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.nrows).map(move |i| self.row(i))
    }

    /// Position `(row, col)` of the first NaN or infinite feature, if any
    #[must_use]
    pub fn find_non_finite(&self) -> Option<(usize, usize)> {
        let ncols = self.ncols;
        self.data
            .iter()
            .position(|x| !x.is_finite())
            .map(|idx| (idx / ncols, idx % ncols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_rows_are_rejected() {
        let err = FeatureMatrix::from_rows(vec![vec![1., 2.], vec![3.]]).unwrap_err();
        assert!(matches!(err, RegressionError::ShapeMismatch(_)));
    }

    #[test]
    fn buffer_length_must_match_shape() {
        assert!(FeatureMatrix::from_row_major(vec![1., 2., 3.], 2, 2).is_err());
        assert!(FeatureMatrix::from_column_major(&[1., 2., 3.], 1, 2).is_err());
        assert!(FeatureMatrix::from_column_major(&[], usize::MAX, 2).is_err());
    }

    #[test]
    fn rows_follow_sample_order() {
        let m = FeatureMatrix::from_rows(vec![vec![0., 1.], vec![2., 3.], vec![4., 5.]]).unwrap();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 2);
        let rows: Vec<&[f64]> = m.rows().collect();
        assert_eq!(rows, vec![&[0., 1.][..], &[2., 3.][..], &[4., 5.][..]]);
    }

    #[test]
    fn zero_width_rows_are_empty_slices() {
        let m = FeatureMatrix::from_row_major(Vec::new(), 3, 0).unwrap();
        assert_eq!(m.nrows(), 3);
        assert!(m.row(2).is_empty());
    }

    #[test]
    fn locates_first_non_finite_feature() {
        let m = FeatureMatrix::from_rows(vec![vec![0., 1.], vec![2., f64::NAN], vec![f64::INFINITY, 5.]])
            .unwrap();
        assert_eq!(m.find_non_finite(), Some((1, 1)));
        assert_eq!(FeatureMatrix::from_fn(2, 2, |i, j| (i + j) as f64).find_non_finite(), None);
        assert_eq!(FeatureMatrix::from_row_major(Vec::new(), 3, 0).unwrap().find_non_finite(), None);
    }
}
