//! Two-electron integral sources of the impurity Hamiltonian.

use basis::tensor::Eri4;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Electron-repulsion integrals `(pq|rs)` over the impurity orbitals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TwoElectronIntegrals {
    /// Full four-index tensor.
    Dense(Eri4),
    /// Three-index factors `B^P`, with `(pq|rs) = sum_P B^P_pq B^P_rs`.
    DensityFitted(Vec<DMatrix<f64>>),
}

impl TwoElectronIntegrals {
    pub fn norb(&self) -> usize {
        match self {
            TwoElectronIntegrals::Dense(eri) => eri.norb(),
            TwoElectronIntegrals::DensityFitted(cderi) => cderi.first().map(|b| b.nrows()).unwrap_or(0),
        }
    }

    pub fn is_density_fitted(&self) -> bool {
        matches!(self, TwoElectronIntegrals::DensityFitted(_))
    }

    /// Coulomb and exchange matrices of a density:
    /// `J_pq = sum_rs (pq|rs) D_rs`, `K_pq = sum_rs (pr|sq) D_rs`.
    pub fn get_jk(&self, dm: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        match self {
            TwoElectronIntegrals::Dense(eri) => {
                let n = eri.norb();
                let rows: Vec<(Vec<f64>, Vec<f64>)> = (0..n)
                    .into_par_iter()
                    .map(|p| {
                        let mut jrow = vec![0.0; n];
                        let mut krow = vec![0.0; n];
                        for q in 0..n {
                            for r in 0..n {
                                for s in 0..n {
                                    jrow[q] += eri[(p, q, r, s)] * dm[(r, s)];
                                    krow[s] += eri[(p, q, r, s)] * dm[(q, r)];
                                }
                            }
                        }
                        (jrow, krow)
                    })
                    .collect();
                let j = DMatrix::from_fn(n, n, |p, q| rows[p].0[q]);
                let k = DMatrix::from_fn(n, n, |p, q| rows[p].1[q]);
                (j, k)
            }
            TwoElectronIntegrals::DensityFitted(cderi) => {
                let n = self.norb();
                cderi
                    .par_iter()
                    .map(|b| {
                        let coef = b.component_mul(dm).sum();
                        (b * coef, b * dm * b)
                    })
                    .reduce(
                        || (DMatrix::zeros(n, n), DMatrix::zeros(n, n)),
                        |(j1, k1), (j2, k2)| (j1 + j2, k1 + k2),
                    )
            }
        }
    }

    /// Spin-averaged two-electron potential `J(D) - K(D)/2`.
    pub fn get_veff(&self, dm: &DMatrix<f64>) -> DMatrix<f64> {
        let (j, k) = self.get_jk(dm);
        j - k * 0.5
    }

    /// Integrals in a new orbital basis: `(ij|kl) = sum C_pi C_qj C_rk C_sl (pq|rs)`.
    pub fn transform(&self, c: &DMatrix<f64>) -> Eri4 {
        match self {
            TwoElectronIntegrals::Dense(eri) => eri.transform_all(c),
            TwoElectronIntegrals::DensityFitted(cderi) => {
                let factors: Vec<DMatrix<f64>> =
                    cderi.par_iter().map(|b| c.transpose() * b * c).collect();
                from_cholesky_factors(&factors)
            }
        }
    }

    /// Dense tensor in the impurity basis.
    pub fn to_dense(&self) -> Eri4 {
        match self {
            TwoElectronIntegrals::Dense(eri) => eri.clone(),
            TwoElectronIntegrals::DensityFitted(cderi) => from_cholesky_factors(cderi),
        }
    }
}

fn from_cholesky_factors(factors: &[DMatrix<f64>]) -> Eri4 {
    let n = factors.first().map(|b| b.nrows()).unwrap_or(0);
    Eri4::from_fn(n, |p, q, r, s| {
        factors.iter().map(|b| b[(p, q)] * b[(r, s)]).sum()
    })
}
