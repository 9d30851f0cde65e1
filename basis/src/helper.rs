//! Eigendecomposition and SVD wrappers with ordering control, plus a few
//! small dense-matrix helpers shared by the orbital code.

use nalgebra::{DMatrix, DVector};
use std::cmp::Ordering;

/// Threshold below which eigen/singular values count as zero.
pub const ZERO_TOL: f64 = 1e-8;

/// Ordering applied to eigen/singular pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
    Unsorted,
}

/// Given a matrix where each column is an eigenvector,
/// this function aligns each eigenvector so that the entry with the largest
/// absolute value is positive.
pub fn align_eigenvectors(mut eigvecs: DMatrix<f64>) -> DMatrix<f64> {
    for j in 0..eigvecs.ncols() {
        let max_val = eigvecs
            .column(j)
            .iter()
            .copied()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Less))
            .unwrap_or(0.0);
        if max_val < 0.0 {
            eigvecs.column_mut(j).neg_mut();
        }
    }
    eigvecs
}

fn sorted_indices(values: &DVector<f64>, order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    match order {
        SortOrder::Ascending => indices.sort_by(|&a, &b| {
            values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal)
        }),
        SortOrder::Descending => indices.sort_by(|&a, &b| {
            values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal)
        }),
        SortOrder::Unsorted => {}
    }
    indices
}

/// Eigendecomposition of the symmetric part of `m`.
///
/// Returns `(eigenvalues, eigenvectors)` ordered as requested. With
/// `only_nonzero`, pairs whose eigenvalue magnitude is below [`ZERO_TOL`] are
/// dropped.
pub fn matrix_eigen_control_options(
    m: &DMatrix<f64>,
    order: SortOrder,
    only_nonzero: bool,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = m.nrows();
    if n == 0 {
        return (DVector::zeros(0), DMatrix::zeros(0, 0));
    }
    let sym = (m + m.transpose()) * 0.5;
    let eig = sym.symmetric_eigen();

    let indices: Vec<usize> = sorted_indices(&eig.eigenvalues, order)
        .into_iter()
        .filter(|&i| !only_nonzero || eig.eigenvalues[i].abs() > ZERO_TOL)
        .collect();

    let evals = DVector::from_iterator(indices.len(), indices.iter().map(|&i| eig.eigenvalues[i]));
    let evecs = if indices.is_empty() {
        DMatrix::zeros(n, 0)
    } else {
        eig.eigenvectors.select_columns(&indices)
    };
    (evals, align_eigenvectors(evecs))
}

/// Singular value decomposition `m = U diag(s) V^T`.
///
/// Returns `(U, s, V)` with `V` holding right singular vectors as columns.
/// With `only_nonzero`, singular triples below [`ZERO_TOL`] are dropped, so the
/// length of `s` is the numerical rank of `m`.
pub fn matrix_svd_control_options(
    m: &DMatrix<f64>,
    order: SortOrder,
    only_nonzero: bool,
) -> (DMatrix<f64>, DVector<f64>, DMatrix<f64>) {
    let (nr, nc) = m.shape();
    if nr == 0 || nc == 0 {
        return (DMatrix::zeros(nr, 0), DVector::zeros(0), DMatrix::zeros(nc, 0));
    }
    let svd = m.clone().svd(true, true);
    let u = svd.u.unwrap_or_else(|| DMatrix::zeros(nr, 0));
    let v = svd
        .v_t
        .map(|v_t| v_t.transpose())
        .unwrap_or_else(|| DMatrix::zeros(nc, 0));

    let indices: Vec<usize> = sorted_indices(&svd.singular_values, order)
        .into_iter()
        .filter(|&i| !only_nonzero || svd.singular_values[i] > ZERO_TOL)
        .collect();

    let svals = DVector::from_iterator(
        indices.len(),
        indices.iter().map(|&i| svd.singular_values[i]),
    );
    if indices.is_empty() {
        return (DMatrix::zeros(nr, 0), svals, DMatrix::zeros(nc, 0));
    }
    (u.select_columns(&indices), svals, v.select_columns(&indices))
}

/// Löwdin-orthonormalize the columns of `c`: `C (C^T C)^{-1/2}`.
///
/// Columns must be linearly independent; near-null directions of the overlap
/// are projected out, which would leave zero columns behind.
pub fn lowdin_orthonormalize(c: &DMatrix<f64>) -> DMatrix<f64> {
    if c.ncols() == 0 {
        return c.clone();
    }
    let ovlp = c.transpose() * c;
    let eig = ovlp.symmetric_eigen();
    let inv_sqrt = DVector::from_iterator(
        eig.eigenvalues.len(),
        eig.eigenvalues
            .iter()
            .map(|&v| if v > 1e-12 { 1.0 / v.sqrt() } else { 0.0 }),
    );
    let x = &eig.eigenvectors * DMatrix::from_diagonal(&inv_sqrt) * eig.eigenvectors.transpose();
    c * x
}

/// Exponential of a real antisymmetric matrix.
///
/// Uses `exp(K) = cos(T) + K sinc(T)` with `T = sqrt(-K^2)`, both evaluated on
/// the eigenbasis of the symmetric matrix `-K^2`, so the result is orthogonal
/// to machine precision.
pub fn expmat(kappa: &DMatrix<f64>) -> DMatrix<f64> {
    let n = kappa.nrows();
    if n == 0 {
        return DMatrix::zeros(0, 0);
    }
    let minus_k2 = -(kappa * kappa);
    let minus_k2 = (&minus_k2 + minus_k2.transpose()) * 0.5;
    let eig = minus_k2.symmetric_eigen();

    let thetas: Vec<f64> = eig.eigenvalues.iter().map(|&v| v.max(0.0).sqrt()).collect();
    let cos_d = DVector::from_iterator(n, thetas.iter().map(|t| t.cos()));
    let sinc_d = DVector::from_iterator(
        n,
        thetas
            .iter()
            .map(|&t| if t < 1e-8 { 1.0 - t * t / 6.0 } else { t.sin() / t }),
    );

    let v = &eig.eigenvectors;
    let cos_t = v * DMatrix::from_diagonal(&cos_d) * v.transpose();
    let sinc_t = v * DMatrix::from_diagonal(&sinc_d) * v.transpose();
    cos_t + kappa * sinc_t
}

/// Concatenate matrices with equal row counts side by side.
pub fn hstack(blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let nrows = blocks.first().map(|b| b.nrows()).unwrap_or(0);
    let ncols: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(nrows, ncols);
    let mut offset = 0;
    for block in blocks {
        assert_eq!(block.nrows(), nrows, "hstack: row count mismatch");
        out.view_mut((0, offset), (nrows, block.ncols())).copy_from(block);
        offset += block.ncols();
    }
    out
}
