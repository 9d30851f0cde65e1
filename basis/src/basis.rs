//! Operators and orthonormal bases.
//!
//! All bases are stored column-wise: a matrix `B` of shape `(n, k)` holds `k`
//! vectors of an `n`-dimensional ambient space with identity metric.

use crate::helper::{matrix_eigen_control_options, SortOrder, ZERO_TOL};
use nalgebra::DMatrix;

/// Represent `op` (ambient space) in `basis`: `B^T op B`.
pub fn represent_operator_in_basis(op: &DMatrix<f64>, basis: &DMatrix<f64>) -> DMatrix<f64> {
    basis.transpose() * op * basis
}

/// Project an ambient-space operator onto the span of `basis`: `P op P`.
pub fn project_operator_into_subspace(op: &DMatrix<f64>, basis: &DMatrix<f64>) -> DMatrix<f64> {
    let proj = basis * basis.transpose();
    &proj * op * &proj
}

/// `(m + m^T) / 2`
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Frobenius norm of `B^T B - 1`.
pub fn measure_basis_nonorthonormality(basis: &DMatrix<f64>) -> f64 {
    let k = basis.ncols();
    (basis.transpose() * basis - DMatrix::identity(k, k)).norm()
}

pub fn is_basis_orthonormal(basis: &DMatrix<f64>, tol: f64) -> bool {
    measure_basis_nonorthonormality(basis) < tol
}

/// Orthonormal and spanning the whole ambient space.
pub fn is_basis_orthonormal_and_complete(basis: &DMatrix<f64>, tol: f64) -> bool {
    basis.nrows() == basis.ncols() && is_basis_orthonormal(basis, tol)
}

/// Orthonormal basis for the span of `basis`, dropping linear dependencies.
pub fn orthonormalize_a_basis(basis: &DMatrix<f64>) -> DMatrix<f64> {
    if basis.ncols() == 0 {
        return basis.clone();
    }
    let ovlp = basis.transpose() * basis;
    let (evals, evecs) = matrix_eigen_control_options(&ovlp, SortOrder::Descending, true);
    let mut out = basis * &evecs;
    for (j, &ev) in evals.iter().enumerate() {
        out.column_mut(j).scale_mut(1.0 / ev.sqrt());
    }
    out
}

/// Orthonormal basis for the orthogonal complement of `span(basis)`.
pub fn get_complementary_states(basis: &DMatrix<f64>) -> DMatrix<f64> {
    let n = basis.nrows();
    let span = orthonormalize_a_basis(basis);
    let comp_proj = DMatrix::<f64>::identity(n, n) - &span * span.transpose();
    let (_, evecs) = matrix_eigen_control_options(&comp_proj, SortOrder::Descending, false);
    let ncomp = n - span.ncols();
    evecs.columns(0, ncomp).into_owned()
}

/// Complete an orthonormal set to a full orthonormal basis, existing vectors first.
pub fn get_complete_basis(basis: &DMatrix<f64>) -> DMatrix<f64> {
    let comp = get_complementary_states(basis);
    crate::helper::hstack(&[basis, &comp])
}

/// Orthonormal basis of the part of `span(a)` that overlaps `span(b)`.
pub fn get_overlapping_states(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let ovlp = a.transpose() * b;
    let proj = &ovlp * ovlp.transpose();
    let (_, evecs) = matrix_eigen_control_options(&proj, SortOrder::Descending, true);
    a * evecs
}

/// Number of electrons of `dm` inside the subspace spanned by `basis`.
pub fn compute_nelec_in_subspace(dm: &DMatrix<f64>, basis: &DMatrix<f64>) -> f64 {
    represent_operator_in_basis(dm, basis).trace()
}

/// Whether `basis` has no component outside of `span(space)`.
pub fn is_subspace_contained(basis: &DMatrix<f64>, space: &DMatrix<f64>) -> bool {
    let residual = basis - space * (space.transpose() * basis);
    residual.norm() < ZERO_TOL.sqrt()
}
