//! Energy, generalized Fock matrix and orbital gradient of a CASSCF state in
//! a fixed orbital frame.

use super::GradHop;
use crate::ci_impl::Rdm1;
use crate::optim_impl::{finite_difference_hessian_vector, UniqueVariables};
use basis::tensor::Eri4;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Integrals over all orbitals of one MO set, plus the core/active partition.
#[derive(Debug, Clone)]
pub struct ActiveFrame {
    pub h_mo: DMatrix<f64>,
    pub eri_mo: Eri4,
    pub ncore: usize,
    pub ncas: usize,
}

impl ActiveFrame {
    pub fn new(h_mo: DMatrix<f64>, eri_mo: Eri4, ncore: usize, ncas: usize) -> Self {
        ActiveFrame {
            h_mo,
            eri_mo,
            ncore,
            ncas,
        }
    }

    pub fn norb(&self) -> usize {
        self.h_mo.nrows()
    }

    /// The same quantities after the orbitals are rotated as `C u`.
    pub fn rotated(&self, u: &DMatrix<f64>) -> ActiveFrame {
        ActiveFrame {
            h_mo: u.transpose() * &self.h_mo * u,
            eri_mo: self.eri_mo.transform_all(u),
            ncore: self.ncore,
            ncas: self.ncas,
        }
    }

    /// Inactive and active Fock matrices.
    ///
    /// `FI_pq = h_pq + sum_i [2 (pq|ii) - (pi|iq)]`,
    /// `FA_pq = sum_tu D_tu [(pq|tu) - (pt|uq)/2]`.
    pub fn fock_blocks(&self, dm1: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = self.norb();
        let (nc, na) = (self.ncore, self.ncas);
        let eri = &self.eri_mo;
        let fi = DMatrix::from_fn(n, n, |p, q| {
            self.h_mo[(p, q)]
                + (0..nc)
                    .map(|i| 2.0 * eri[(p, q, i, i)] - eri[(p, i, i, q)])
                    .sum::<f64>()
        });
        let fa = DMatrix::from_fn(n, n, |p, q| {
            let mut acc = 0.0;
            for t in 0..na {
                for u in 0..na {
                    let d = dm1[(t, u)];
                    if d != 0.0 {
                        acc += d * (eri[(p, q, nc + t, nc + u)] - 0.5 * eri[(p, nc + t, nc + u, q)]);
                    }
                }
            }
            acc
        });
        (fi, fa)
    }

    /// Generalized Fock matrix `F[p, m]`, `m` running over all orbitals;
    /// columns of external orbitals vanish.
    pub fn generalized_fock(&self, dm1: &DMatrix<f64>, dm2: &Eri4) -> DMatrix<f64> {
        let n = self.norb();
        let (nc, na) = (self.ncore, self.ncas);
        let (fi, fa) = self.fock_blocks(dm1);
        let mut gfock = DMatrix::zeros(n, n);
        for p in 0..n {
            for i in 0..nc {
                gfock[(p, i)] = 2.0 * (fi[(p, i)] + fa[(p, i)]);
            }
            for t in 0..na {
                let mut acc = 0.0;
                for u in 0..na {
                    acc += fi[(p, nc + u)] * dm1[(u, t)];
                    for v in 0..na {
                        for w in 0..na {
                            acc += self.eri_mo[(p, nc + u, nc + v, nc + w)] * dm2[(t, u, v, w)];
                        }
                    }
                }
                gfock[(p, nc + t)] = acc;
            }
        }
        gfock
    }

    /// Total energy of fixed active densities in this frame.
    pub fn energy(&self, dm1: &DMatrix<f64>, dm2: &Eri4, energy_nuc: f64) -> f64 {
        let (nc, na) = (self.ncore, self.ncas);
        let (fi, _) = self.fock_blocks(dm1);
        let e_core: f64 = (0..nc).map(|i| self.h_mo[(i, i)] + fi[(i, i)]).sum();
        let mut e_act = 0.0;
        for t in 0..na {
            for u in 0..na {
                e_act += fi[(nc + t, nc + u)] * dm1[(t, u)];
            }
        }
        let e2 = 0.5 * self.eri_mo.block(nc, na).contract(dm2);
        energy_nuc + e_core + e_act + e2
    }

    /// Occupation numbers used by the diagonal Hessian estimate.
    fn occupations(&self, dm1: &DMatrix<f64>) -> Vec<f64> {
        (0..self.norb())
            .map(|p| {
                if p < self.ncore {
                    2.0
                } else if p < self.ncore + self.ncas {
                    dm1[(p - self.ncore, p - self.ncore)]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// `h_pq ~ 2 n_q Fc_pp + 2 n_p Fc_qq - 2 (F_pp + F_qq)`, clamped positive.
    pub fn hessian_diagonal(&self, vars: &UniqueVariables, dm1: &DMatrix<f64>, gfock: &DMatrix<f64>) -> DVector<f64> {
        let (fi, fa) = self.fock_blocks(dm1);
        let fc = fi + fa;
        let occ = self.occupations(dm1);
        DVector::from_iterator(
            vars.len(),
            vars.pairs().iter().map(|&(p, q)| {
                let h = 2.0 * occ[q] * fc[(p, p)] + 2.0 * occ[p] * fc[(q, q)]
                    - 2.0 * (gfock[(p, p)] + gfock[(q, q)]);
                h.max(1e-2)
            }),
        )
    }
}

/// `g_(p,q) = 2 (F_pq - F_qp)`.
pub fn pack_gradient(vars: &UniqueVariables, gfock: &DMatrix<f64>) -> DVector<f64> {
    vars.pack_antisymmetric(gfock) * 2.0
}

/// Gradient, Hessian diagonal and the two closures of the orbital step at
/// fixed active densities.
pub fn base_grad_hop(frame: ActiveFrame, dm1: DMatrix<f64>, dm2: Eri4, vars: UniqueVariables) -> GradHop {
    let gfock = frame.generalized_fock(&dm1, &dm2);
    let g_orb = pack_gradient(&vars, &gfock);
    let h_diag = frame.hessian_diagonal(&vars, &dm1, &gfock);
    let frame = Arc::new(frame);
    let vars = Arc::new(vars);

    let h_op = {
        let frame = Arc::clone(&frame);
        let vars = Arc::clone(&vars);
        Box::new(move |x: &DVector<f64>| {
            finite_difference_hessian_vector(
                |k| pack_gradient(&vars, &frame.rotated(&vars.rotation(k)).generalized_fock(&dm1, &dm2)),
                x,
            )
        })
    };
    let gorb_update = Box::new(move |u: &DMatrix<f64>, rdm1: &Rdm1, dm2: &Eri4| {
        pack_gradient(&vars, &frame.rotated(u).generalized_fock(&rdm1.dm, dm2))
    });

    GradHop {
        g_orb,
        h_diag,
        h_op,
        gorb_update,
    }
}
