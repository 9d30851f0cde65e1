//! CASSCF in a spin-polarized environment.
//!
//! The environment adds `+h_s` to the alpha and `-h_s` to the beta
//! one-electron operator. Orbitals stay spin-restricted; the CI problem sees
//! both operators, and the orbital gradient and Hessian gain the terms of
//! `E_s = sum_pq (h_s)_pq (D^a - D^b)_pq`.

use super::casscf::{casci_default, gen_g_hop_default, solve_approx_ci_default, update_casdm_default};
use super::{CasciResult, Casscf, CasscfCore, CasscfHooks, CiResponseEnv, GradHop};
use crate::ci_impl::{CiSolver, CiVector, OneBody, Rdm1};
use crate::error::Result;
use crate::optim_impl::UniqueVariables;
use basis::tensor::Eri4;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// CI sub-solver that supplements single-component operators with the cached
/// active-space spin potential and tags its 1-RDM with the spin density.
#[derive(Debug, Clone)]
pub struct SpinPolarizedCi<F> {
    inner: F,
    h1e_s_act: Option<DMatrix<f64>>,
}

impl<F: CiSolver> SpinPolarizedCi<F> {
    pub fn new(inner: F) -> Self {
        SpinPolarizedCi { inner, h1e_s_act: None }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Spin potential in the current active orbitals.
    pub fn set_spin_potential(&mut self, h1e_s_act: DMatrix<f64>) {
        self.h1e_s_act = Some(h1e_s_act);
    }

    fn dress(&self, h1: &OneBody) -> OneBody {
        match (h1, &self.h1e_s_act) {
            (OneBody::Charge(h), Some(hs)) if hs.shape() == h.shape() => OneBody::Polarized {
                charge: h.clone(),
                spin: hs.clone(),
            },
            _ => h1.clone(),
        }
    }
}

impl<F: CiSolver> CiSolver for SpinPolarizedCi<F> {
    fn kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: Option<&CiVector>,
        ecore: f64,
    ) -> Result<(f64, CiVector)> {
        self.inner.kernel(&self.dress(h1), h2, norb, nelec, ci0, ecore)
    }

    fn approx_kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: &CiVector,
        ecore: f64,
    ) -> Result<CiVector> {
        self.inner.approx_kernel(&self.dress(h1), h2, norb, nelec, ci0, ecore)
    }

    fn make_rdm12(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (Rdm1, Eri4) {
        let (rdm1, dm2) = self.inner.make_rdm12(ci, norb, nelec);
        let (dma, dmb) = self.inner.make_rdm1s(ci, norb, nelec);
        (
            Rdm1 {
                dm: rdm1.dm,
                sdm: Some(dma - dmb),
            },
            dm2,
        )
    }

    fn make_rdm1s(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (DMatrix<f64>, DMatrix<f64>) {
        self.inner.make_rdm1s(ci, norb, nelec)
    }

    fn spin_square(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (f64, f64) {
        self.inner.spin_square(ci, norb, nelec)
    }

    fn set_orbsym(&mut self, orbsym: Option<Vec<u32>>) {
        self.inner.set_orbsym(orbsym);
    }

    fn drop_symmetry(&mut self) {
        self.inner.drop_symmetry();
    }
}

/// `s + s^T` of the active spin density, embedded in the active block.
fn embed_spin_density(sdm_act: &DMatrix<f64>, ncore: usize, norb: usize) -> DMatrix<f64> {
    let ncas = sdm_act.nrows();
    let mut s = DMatrix::zeros(norb, norb);
    s.view_mut((ncore, ncore), (ncas, ncas))
        .copy_from(&(sdm_act + sdm_act.transpose()));
    s
}

/// Add the spin-potential terms to a gradient/Hessian bundle.
///
/// With `k = h_s S` (`S` from [`embed_spin_density`]) the gradient gains
/// `k - k^T`, the Hessian-vector product `h_s X S + S X h_s - X k - k^T X`
/// and the diagonal `h_pp S_qq + S_pp h_qq - 2 h_pq S_pq - k_pp - k_qq`.
pub fn patch_grad_hop(
    hop: GradHop,
    hs_mo: DMatrix<f64>,
    sdm_act: &DMatrix<f64>,
    ncore: usize,
    vars: UniqueVariables,
) -> GradHop {
    let norb = hs_mo.nrows();
    let s = embed_spin_density(sdm_act, ncore, norb);
    let gen_k = &hs_mo * &s;

    let g_orb = hop.g_orb + vars.pack_antisymmetric(&gen_k);
    let h_diag = hop.h_diag
        + DVector::from_iterator(
            vars.len(),
            vars.pairs().iter().map(|&(p, q)| {
                hs_mo[(p, p)] * s[(q, q)] + s[(p, p)] * hs_mo[(q, q)]
                    - 2.0 * hs_mo[(p, q)] * s[(p, q)]
                    - gen_k[(p, p)]
                    - gen_k[(q, q)]
            }),
        );

    let vars = Arc::new(vars);
    let hs_mo = Arc::new(hs_mo);
    let h_op = {
        let base = hop.h_op;
        let vars = Arc::clone(&vars);
        let hs = Arc::clone(&hs_mo);
        Box::new(move |x: &DVector<f64>| {
            let kx = vars.unpack(x);
            let m = hs.as_ref() * &kx * &s + &s * &kx * hs.as_ref()
                - &kx * &gen_k
                - gen_k.transpose() * &kx;
            base(x) + vars.pack(&m)
        })
    };
    let gorb_update = {
        let base = hop.gorb_update;
        Box::new(move |u: &DMatrix<f64>, rdm1: &Rdm1, dm2: &Eri4| {
            let g = base(u, rdm1, dm2);
            match &rdm1.sdm {
                Some(sdm) => {
                    let hs_u = u.transpose() * hs_mo.as_ref() * u;
                    let k = hs_u * embed_spin_density(sdm, ncore, norb);
                    g + vars.pack_antisymmetric(&k)
                }
                None => g,
            }
        })
    };

    GradHop {
        g_orb,
        h_diag,
        h_op,
        gorb_update,
    }
}

/// Two-step optimizer decorated for a spin-polarized environment.
pub struct SpinPolarizedCasscf<F> {
    pub inner: Casscf<SpinPolarizedCi<F>>,
    pub h1e_s: Arc<DMatrix<f64>>,
}

impl<F: CiSolver> SpinPolarizedCasscf<F> {
    pub fn new(core: CasscfCore, fcisolver: F, h1e_s: Arc<DMatrix<f64>>) -> Self {
        SpinPolarizedCasscf {
            inner: Casscf::new(core, SpinPolarizedCi::new(fcisolver)),
            h1e_s,
        }
    }

    /// `C_act^T h_s C_act`.
    pub fn active_spin_potential(&self, mo: &DMatrix<f64>) -> DMatrix<f64> {
        let core = &self.inner.core;
        let c_act = mo.columns(core.ncore, core.ncas);
        c_act.transpose() * self.h1e_s.as_ref() * c_act
    }
}

impl<F: CiSolver> CasscfHooks for SpinPolarizedCasscf<F> {
    type Ci = SpinPolarizedCi<F>;

    fn core(&self) -> &CasscfCore {
        &self.inner.core
    }

    fn core_mut(&mut self) -> &mut CasscfCore {
        &mut self.inner.core
    }

    fn fcisolver(&self) -> &SpinPolarizedCi<F> {
        &self.inner.fcisolver
    }

    fn fcisolver_mut(&mut self) -> &mut SpinPolarizedCi<F> {
        &mut self.inner.fcisolver
    }

    fn casci(&mut self, mo: &DMatrix<f64>, ci0: Option<&CiVector>) -> Result<CasciResult> {
        let hs_act = self.active_spin_potential(mo);
        self.inner.fcisolver.set_spin_potential(hs_act);
        casci_default(self, mo, ci0)
    }

    fn update_casdm(&mut self, mo: &DMatrix<f64>, u: &DMatrix<f64>, ci: &CiVector) -> Result<(CiVector, Rdm1, Eri4)> {
        let env = CiResponseEnv {
            h1e_s: Some(self.active_spin_potential(&(mo * u))),
        };
        update_casdm_default(self, mo, u, ci, &env)
    }

    fn solve_approx_ci(
        &mut self,
        h1: OneBody,
        h2: &Eri4,
        ci0: &CiVector,
        ecore: f64,
        env: &CiResponseEnv,
    ) -> Result<CiVector> {
        let h1 = match (h1, &env.h1e_s) {
            (OneBody::Charge(charge), Some(spin)) => OneBody::Polarized {
                charge,
                spin: spin.clone(),
            },
            (h1, _) => h1,
        };
        solve_approx_ci_default(self, h1, h2, ci0, ecore)
    }

    fn gen_g_hop(&self, mo: &DMatrix<f64>, rdm1: &Rdm1, dm2: &Eri4) -> GradHop {
        let hop = gen_g_hop_default(self, mo, rdm1, dm2);
        let core = self.core();
        let hs_mo = mo.transpose() * self.h1e_s.as_ref() * mo;
        let sdm = rdm1
            .sdm
            .clone()
            .unwrap_or_else(|| DMatrix::zeros(core.ncas, core.ncas));
        patch_grad_hop(hop, hs_mo, &sdm, core.ncore, core.rotation_variables())
    }
}
