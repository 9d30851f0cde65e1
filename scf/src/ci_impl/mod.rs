//! Configuration Interaction (CI) active-space sub-solver
//!
//! A determinant-based full CI in the active orbitals. CI vectors are dense
//! matrices whose rows index alpha strings and whose columns index beta
//! strings, both in ascending bit-mask order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dmet_casscf::ci_impl::{CiSolver, FciSolver, OneBody};
//!
//! let solver = FciSolver::new(1, &FciParams::default());
//! let (e, ci) = solver.kernel(&OneBody::Charge(h1), &eri, 4, (2, 2), None, 0.0)?;
//! let (dm1, dm2) = solver.make_rdm12(&ci, 4, (2, 2));
//! ```

mod fci;
mod strings;
mod tests;
mod transform;

pub use fci::{make_rdm12, make_rdm1s, spin_square, FciSolver, FciSpace};
pub use strings::{excite, make_strings, StringSpace};
pub use transform::transform_ci_for_orbital_rotation;

use crate::error::Result;
use basis::tensor::Eri4;
use nalgebra::DMatrix;

/// CI coefficients, alpha strings by beta strings.
pub type CiVector = DMatrix<f64>;

/// One-electron operator handed to a CI sub-solver.
#[derive(Debug, Clone)]
pub enum OneBody {
    /// Same operator for both spins.
    Charge(DMatrix<f64>),
    /// `h_alpha = charge + spin`, `h_beta = charge - spin`.
    Polarized { charge: DMatrix<f64>, spin: DMatrix<f64> },
}

impl OneBody {
    pub fn charge(&self) -> &DMatrix<f64> {
        match self {
            OneBody::Charge(h) => h,
            OneBody::Polarized { charge, .. } => charge,
        }
    }

    pub fn alpha_beta(&self) -> (DMatrix<f64>, DMatrix<f64>) {
        match self {
            OneBody::Charge(h) => (h.clone(), h.clone()),
            OneBody::Polarized { charge, spin } => (charge + spin, charge - spin),
        }
    }
}

/// Spin-summed one-body density, optionally tagged with the alpha - beta
/// spin density.
#[derive(Debug, Clone)]
pub struct Rdm1 {
    pub dm: DMatrix<f64>,
    pub sdm: Option<DMatrix<f64>>,
}

impl Rdm1 {
    pub fn plain(dm: DMatrix<f64>) -> Self {
        Rdm1 { dm, sdm: None }
    }
}

/// Hooks the CASSCF driver needs from an active-space CI solver.
pub trait CiSolver {
    /// Lowest state of the target multiplicity: `(energy + ecore, ci)`.
    fn kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: Option<&CiVector>,
        ecore: f64,
    ) -> Result<(f64, CiVector)>;

    /// Cheap CI update used between orbital steps.
    fn approx_kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: &CiVector,
        ecore: f64,
    ) -> Result<CiVector> {
        Ok(self.kernel(h1, h2, norb, nelec, Some(ci0), ecore)?.1)
    }

    fn make_rdm12(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (Rdm1, Eri4);

    fn make_rdm1s(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (DMatrix<f64>, DMatrix<f64>);

    /// `(<S^2>, 2S+1)`.
    fn spin_square(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (f64, f64);

    /// Irrep ids of the active orbitals, `None` for no restriction.
    fn set_orbsym(&mut self, orbsym: Option<Vec<u32>>);

    /// Stop restricting the determinant space by symmetry.
    fn drop_symmetry(&mut self);
}
