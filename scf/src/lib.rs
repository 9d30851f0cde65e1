//! CASSCF impurity solver for density matrix embedding
//!
//! The crate turns an impurity Hamiltonian handed over by an outer embedding
//! loop into correlated densities and energies. See [`solve`] for the
//! pipeline and [`Fragment`] for what is read and written.

pub mod casscf_impl;
pub mod ci_impl;
pub mod config;
pub mod error;
pub mod fragment;
pub mod integrals;
pub mod io;
pub mod model;
pub mod optim_impl;
pub mod scf_impl;
pub mod solver;

pub use error::{Result, SolverError};
pub use fragment::{CasGuessCallback, Fragment, FragmentSymmetry, OrbitalOutput};
pub use integrals::TwoElectronIntegrals;
pub use solver::{solve, SolveReport};
