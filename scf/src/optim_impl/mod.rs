//! Orbital-rotation optimization machinery
//!
//! Orbitals are rotated as `C' = C exp(K)` with `K` real antisymmetric. Only a
//! subset of the lower-triangular entries of `K` are independent variables;
//! [`UniqueVariables`] packs and unpacks them. The Newton step is solved by a
//! truncated conjugate-gradient method inside a trust region.

mod cg;

pub use cg::{steihaug_cg, CgStep};

use basis::helper::expmat;
use nalgebra::{DMatrix, DVector};

/// Independent rotation parameters `(p, q)` with `p > q`.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueVariables {
    norb: usize,
    pairs: Vec<(usize, usize)>,
}

impl UniqueVariables {
    pub fn from_pairs(norb: usize, pairs: Vec<(usize, usize)>) -> Self {
        debug_assert!(pairs.iter().all(|&(p, q)| p > q && p < norb));
        UniqueVariables { norb, pairs }
    }

    /// Core-active, core-external and active-external rotations, minus pairs
    /// touching a frozen orbital and pairs of different orbital symmetry.
    pub fn casscf(
        norb: usize,
        ncore: usize,
        ncas: usize,
        frozen: &[usize],
        orbsym: Option<&[u32]>,
    ) -> Self {
        let nocc = ncore + ncas;
        let mut pairs = Vec::new();
        for p in ncore..norb {
            for q in 0..nocc.min(p) {
                let rotatable = q < ncore || p >= nocc;
                if !rotatable || frozen.contains(&p) || frozen.contains(&q) {
                    continue;
                }
                if let Some(sym) = orbsym {
                    if sym[p] != sym[q] {
                        continue;
                    }
                }
                pairs.push((p, q));
            }
        }
        UniqueVariables { norb, pairs }
    }

    /// Rotations between orbitals of different spin-resolved occupation.
    pub fn from_occupations(occ_alpha: &[f64], occ_beta: &[f64]) -> Self {
        let norb = occ_alpha.len();
        let mut pairs = Vec::new();
        for p in 0..norb {
            for q in 0..p {
                let differs = (occ_alpha[p] - occ_alpha[q]).abs() > 1e-8
                    || (occ_beta[p] - occ_beta[q]).abs() > 1e-8;
                if differs {
                    pairs.push((p, q));
                }
            }
        }
        UniqueVariables { norb, pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// Lower-triangular entries `m[(p, q)]` of the independent pairs.
    pub fn pack(&self, m: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.pairs.iter().map(|&(p, q)| m[(p, q)]))
    }

    /// Antisymmetric matrix with `K[(p, q)] = x` and `K[(q, p)] = -x`.
    pub fn unpack(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut k = DMatrix::zeros(self.norb, self.norb);
        for (&(p, q), &v) in self.pairs.iter().zip(x.iter()) {
            k[(p, q)] = v;
            k[(q, p)] = -v;
        }
        k
    }

    /// Packed lower triangle of `m - m^T`.
    pub fn pack_antisymmetric(&self, m: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.len(),
            self.pairs.iter().map(|&(p, q)| m[(p, q)] - m[(q, p)]),
        )
    }

    /// Orthogonal matrix `exp(K(x))`.
    pub fn rotation(&self, x: &DVector<f64>) -> DMatrix<f64> {
        expmat(&self.unpack(x))
    }
}

/// Hessian-vector product by central differences of a gradient function
/// evaluated at rotated orbitals.
pub fn finite_difference_hessian_vector<G>(gradient_at: G, x: &DVector<f64>) -> DVector<f64>
where
    G: Fn(&DVector<f64>) -> DVector<f64>,
{
    let norm = x.norm();
    if norm < 1e-14 {
        return DVector::zeros(x.len());
    }
    let t = 1e-4 / norm;
    let plus = gradient_at(&(x * t));
    let minus = gradient_at(&(x * -t));
    (plus - minus) / (2.0 * t)
}

/// Trust radius adapted from the ratio of actual to predicted energy change.
#[derive(Debug, Clone)]
pub struct TrustRegion {
    pub radius: f64,
    pub max_radius: f64,
}

impl TrustRegion {
    pub fn new(radius: f64) -> Self {
        TrustRegion {
            radius,
            max_radius: radius * 8.0,
        }
    }

    /// Update the radius after a step; returns whether the step is accepted.
    pub fn update(&mut self, actual: f64, predicted: f64, hit_boundary: bool) -> bool {
        // Energy went up beyond noise: reject and shrink hard.
        if actual > 1e-10 {
            self.radius *= 0.25;
            return false;
        }
        let ratio = if predicted.abs() > 1e-14 {
            actual / predicted
        } else {
            1.0
        };
        if ratio < 0.25 {
            self.radius *= 0.5;
        } else if ratio > 0.75 && hit_boundary {
            self.radius = (self.radius * 2.0).min(self.max_radius);
        }
        self.radius = self.radius.max(1e-6);
        true
    }
}
