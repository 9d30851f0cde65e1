//! Mean-field driver with DIIS acceleration
//!
//! This module provides the DIIS (Direct Inversion in the Iterative Subspace)
//! accelerator and the restricted open-shell Hartree-Fock solver run over the
//! orthonormal impurity basis.

mod rohf;
#[cfg(test)]
mod tests;

pub use rohf::{ImpurityRohf, MeanFieldResult};

use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// DIIS (Direct Inversion in the Iterative Subspace) convergence accelerator
///
/// The extrapolated Fock matrix is `F_DIIS = sum_i c_i F_i` where the
/// coefficients minimize `|sum_i c_i E_i|^2` subject to `sum_i c_i = 1`. In an
/// orthonormal basis the error matrix is the commutator `E = FD - DF`.
#[derive(Clone)]
pub struct DIIS {
    error_matrices: Vec<DMatrix<f64>>,
    fock_matrices: Vec<DMatrix<f64>>,
    max_subspace_size: usize,
}

impl DIIS {
    pub fn new(max_subspace_size: usize) -> Self {
        DIIS {
            error_matrices: Vec::new(),
            fock_matrices: Vec::new(),
            max_subspace_size: max_subspace_size.max(1),
        }
    }

    /// Commutator `FD - DF`.
    pub fn calculate_error_matrix(fock: &DMatrix<f64>, density: &DMatrix<f64>) -> DMatrix<f64> {
        fock * density - density * fock
    }

    /// Add a Fock matrix and its error to the history, dropping the oldest
    /// entry when the subspace is full.
    pub fn update(&mut self, fock_matrix: DMatrix<f64>, error: DMatrix<f64>) {
        if self.error_matrices.len() >= self.max_subspace_size {
            self.error_matrices.remove(0);
            self.fock_matrices.remove(0);
        }
        self.error_matrices.push(error);
        self.fock_matrices.push(fock_matrix);
    }

    /// Extrapolate the Fock matrix from the stored subspace.
    ///
    /// Returns None if the DIIS equations cannot be solved (e.g., singular B matrix).
    pub fn extrapolate(&self) -> Option<DMatrix<f64>> {
        let n = self.error_matrices.len();
        if n == 0 {
            return None;
        }

        // B_ij = <e_i|e_j>, bordered by the normalization constraint
        let mut b = DMatrix::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..=i {
                let dot = self.error_matrices[i].dot(&self.error_matrices[j]);
                b[(i, j)] = dot;
                b[(j, i)] = dot;
            }
            b[(i, n)] = -1.0;
            b[(n, i)] = -1.0;
        }

        let mut rhs = DVector::zeros(n + 1);
        rhs[n] = -1.0;

        let coeffs = match b.lu().solve(&rhs) {
            Some(x) => x,
            None => {
                debug!("DIIS extrapolation failed: singular B matrix");
                return None;
            }
        };

        let mut fock_extrapolated = DMatrix::zeros(
            self.fock_matrices[0].nrows(),
            self.fock_matrices[0].ncols(),
        );
        for i in 0..n {
            fock_extrapolated += &self.fock_matrices[i] * coeffs[i];
        }
        Some(fock_extrapolated)
    }

    pub fn reset(&mut self) {
        self.error_matrices.clear();
        self.fock_matrices.clear();
    }

    pub fn size(&self) -> usize {
        self.error_matrices.len()
    }
}
