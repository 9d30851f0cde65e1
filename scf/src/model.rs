//! Model impurity Hamiltonians.
//!
//! An extended Hubbard chain stands in for the impurity Hamiltonian an outer
//! embedding loop would produce. Its interaction is density-density,
//! `(pq|rs) = d_pq d_rs W_pr`, so exact density-fitting factors follow from
//! the eigendecomposition of `W`.

use crate::config::ModelConfig;
use crate::error::{Result, SolverError};
use crate::integrals::TwoElectronIntegrals;
use basis::helper::{matrix_eigen_control_options, SortOrder};
use basis::tensor::Eri4;
use nalgebra::{DMatrix, DVector};

/// One-electron operator, interaction and optional spin-exchange operator.
#[derive(Debug, Clone)]
pub struct ModelHamiltonian {
    pub constant: f64,
    pub h1e: DMatrix<f64>,
    pub h1e_s: Option<DMatrix<f64>>,
    pub eri: TwoElectronIntegrals,
}

/// Site-pair interaction `W` of an extended Hubbard chain.
fn site_interaction(n: usize, u: f64, v: f64, periodic: bool) -> DMatrix<f64> {
    DMatrix::from_fn(n, n, |i, j| {
        let d = i.abs_diff(j);
        if d == 0 {
            u
        } else if d == 1 || (periodic && n > 2 && d == n - 1) {
            v
        } else {
            0.0
        }
    })
}

/// Factors `B^k = diag(sqrt(l_k) v_k)` of a positive semidefinite `W`.
pub fn density_fitting_factors(w: &DMatrix<f64>) -> Result<Vec<DMatrix<f64>>> {
    let (evals, evecs) = matrix_eigen_control_options(w, SortOrder::Descending, false);
    if let Some(lowest) = evals.iter().copied().reduce(f64::min) {
        if lowest < -1e-10 {
            return Err(SolverError::InvalidInput(format!(
                "interaction has negative eigenvalue {:.3e}; no real density fitting",
                lowest
            )));
        }
    }
    Ok((0..evals.len())
        .filter(|&k| evals[k] > 1e-12)
        .map(|k| {
            let scaled = evecs.column(k) * evals[k].sqrt();
            DMatrix::from_diagonal(&scaled)
        })
        .collect())
}

impl ModelHamiltonian {
    /// Extended Hubbard chain described by `cfg`.
    pub fn hubbard_chain(cfg: &ModelConfig) -> Result<Self> {
        let n = cfg.nsites;
        if n == 0 {
            return Err(SolverError::InvalidInput("model needs at least one site".to_string()));
        }
        let periodic = cfg.periodic.unwrap_or(false);
        let site_energies = match &cfg.site_energies {
            Some(e) if e.len() != n => {
                return Err(SolverError::InvalidInput(format!(
                    "{} site energies given for {} sites",
                    e.len(),
                    n
                )))
            }
            Some(e) => DVector::from_vec(e.clone()),
            None => DVector::zeros(n),
        };

        let mut h1e = DMatrix::from_diagonal(&site_energies);
        for i in 0..n.saturating_sub(1) {
            h1e[(i, i + 1)] = -cfg.hopping;
            h1e[(i + 1, i)] = -cfg.hopping;
        }
        if periodic && n > 2 {
            h1e[(0, n - 1)] = -cfg.hopping;
            h1e[(n - 1, 0)] = -cfg.hopping;
        }

        let w = site_interaction(n, cfg.onsite_u, cfg.nearest_neighbor_v.unwrap_or(0.0), periodic);
        let eri = if cfg.density_fitting.unwrap_or(false) {
            TwoElectronIntegrals::DensityFitted(density_fitting_factors(&w)?)
        } else {
            TwoElectronIntegrals::Dense(Eri4::from_fn(n, |p, q, r, s| {
                if p == q && r == s {
                    w[(p, r)]
                } else {
                    0.0
                }
            }))
        };

        let h1e_s = cfg.spin_field.filter(|h| *h != 0.0).map(|h| {
            DMatrix::from_fn(n, n, |i, j| {
                if i != j {
                    0.0
                } else if i % 2 == 0 {
                    h
                } else {
                    -h
                }
            })
        });

        Ok(ModelHamiltonian {
            constant: cfg.constant.unwrap_or(0.0),
            h1e,
            h1e_s,
            eri,
        })
    }
}

/// Chemical potential acting on the first `nfrag` impurity orbitals.
pub fn fragment_chemical_potential(norb: usize, nfrag: usize, mu: f64) -> DMatrix<f64> {
    DMatrix::from_fn(norb, norb, |i, j| if i == j && i < nfrag { mu } else { 0.0 })
}
