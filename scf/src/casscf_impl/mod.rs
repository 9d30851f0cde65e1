//! Two-step CASSCF orbital optimization
//!
//! Each macro iteration solves the CI problem in the current orbitals, builds
//! the orbital gradient and Hessian machinery from the active densities, takes
//! a trust-region Newton-CG step in the orbital rotations and refreshes the CI
//! vector approximately in the rotated orbitals.
//!
//! The individual steps are hooks of [`CasscfHooks`]. The shared algorithm is
//! written as free functions over `&mut impl CasscfHooks`, so a decorator that
//! overrides one hook (see [`SpinPolarizedCasscf`]) is seen by every other step.
//!
//! # Usage
//!
//! ```rust,ignore
//! let core = CasscfCore::new(h1e, eri, e0, nelec, ncas, nelecas, &params, 50)?;
//! let mut solver = ActiveSpaceSolver::new(core, FciSolver::new(1, &fci_params), h1e_s);
//! let outcome = solver.kernel_with_ladder(&mo_guess, None)?;
//! ```

mod casscf;
mod gradient;
mod ladder;
mod spin_patch;
mod tests;

pub use casscf::{
    casci_default, gen_g_hop_default, kernel, make_rdm12_default, solve_approx_ci_default,
    update_casdm_default, Casscf, CasscfCore, CasscfHooks,
};
pub use gradient::{base_grad_hop, pack_gradient, ActiveFrame};
pub use ladder::{run_ladder, LadderOutcome, LadderStage};
pub use spin_patch::{patch_grad_hop, SpinPolarizedCasscf, SpinPolarizedCi};

use crate::ci_impl::{CiSolver, CiVector, FciSolver, Rdm1};
use crate::error::Result;
use basis::tensor::Eri4;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// How hard each macro iteration works on the orbital step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerMode {
    /// Few CG iterations and a single micro step.
    FirstOrder,
    /// Tightly solved Newton equations and several micro steps.
    Newton,
}

/// CASCI solution in one set of orbitals.
#[derive(Debug, Clone)]
pub struct CasciResult {
    pub e_tot: f64,
    pub e_cas: f64,
    pub ci: CiVector,
}

/// Outcome of one optimizer run.
#[derive(Debug, Clone)]
pub struct CasscfResult {
    pub converged: bool,
    pub e_tot: f64,
    pub e_cas: f64,
    pub mo_coeff: DMatrix<f64>,
    pub ci: CiVector,
    pub macro_iterations: usize,
    pub gradient_norm: f64,
}

/// Orbital gradient with its Hessian machinery at one point.
pub struct GradHop {
    pub g_orb: DVector<f64>,
    pub h_diag: DVector<f64>,
    /// Hessian-vector product.
    pub h_op: Box<dyn Fn(&DVector<f64>) -> DVector<f64>>,
    /// Gradient after rotating the orbitals by `u` and replacing the active
    /// densities.
    pub gorb_update: Box<dyn Fn(&DMatrix<f64>, &Rdm1, &Eri4) -> DVector<f64>>,
}

/// Extra one-body terms handed to the CI response solve.
#[derive(Debug, Clone, Default)]
pub struct CiResponseEnv {
    /// Active-space spin potential in the rotated orbitals.
    pub h1e_s: Option<DMatrix<f64>>,
}

/// Active-space optimizer, plain or decorated for a spin-polarized environment.
pub enum ActiveSpaceSolver {
    Plain(Casscf<FciSolver>),
    SpinPolarized(SpinPolarizedCasscf<FciSolver>),
}

macro_rules! dispatch {
    ($self:expr, $solver:ident => $body:expr) => {
        match $self {
            ActiveSpaceSolver::Plain($solver) => $body,
            ActiveSpaceSolver::SpinPolarized($solver) => $body,
        }
    };
}

impl ActiveSpaceSolver {
    /// Spin-polarized variant when `h1e_s` is present.
    pub fn new(core: CasscfCore, fcisolver: FciSolver, h1e_s: Option<Arc<DMatrix<f64>>>) -> Self {
        match h1e_s {
            Some(hs) => ActiveSpaceSolver::SpinPolarized(SpinPolarizedCasscf::new(core, fcisolver, hs)),
            None => ActiveSpaceSolver::Plain(Casscf::new(core, fcisolver)),
        }
    }

    pub fn is_spin_polarized(&self) -> bool {
        matches!(self, ActiveSpaceSolver::SpinPolarized(_))
    }

    pub fn core(&self) -> &CasscfCore {
        dispatch!(self, s => s.core())
    }

    pub fn core_mut(&mut self) -> &mut CasscfCore {
        dispatch!(self, s => s.core_mut())
    }

    pub fn kernel(&mut self, mo0: &DMatrix<f64>, ci0: Option<&CiVector>) -> Result<CasscfResult> {
        dispatch!(self, s => kernel(s, mo0, ci0))
    }

    /// Optimizer run with the retry ladder.
    pub fn kernel_with_ladder(&mut self, mo0: &DMatrix<f64>, ci0: Option<&CiVector>) -> Result<LadderOutcome> {
        run_ladder(self, mo0, ci0)
    }

    /// Rebuild the CI sub-solver without the wavefunction-symmetry restriction.
    pub fn drop_symmetry(&mut self) {
        dispatch!(self, s => s.fcisolver_mut().drop_symmetry())
    }

    pub fn make_rdm12(&self, ci: &CiVector) -> (Rdm1, Eri4) {
        dispatch!(self, s => s.make_rdm12(ci))
    }

    pub fn make_rdm1s(&self, ci: &CiVector) -> (DMatrix<f64>, DMatrix<f64>) {
        dispatch!(self, s => {
            let core = s.core();
            s.fcisolver().make_rdm1s(ci, core.ncas, core.nelecas)
        })
    }

    pub fn spin_square(&self, ci: &CiVector) -> (f64, f64) {
        dispatch!(self, s => {
            let core = s.core();
            s.fcisolver().spin_square(ci, core.ncas, core.nelecas)
        })
    }
}
