//! Input/Output operations for impurity solves
//!
//! This module handles logging setup, the run summary printed by the driver
//! and Molden export of guess orbitals.

mod molden;
mod output;

pub use molden::{write_guess_molden, write_molden, MoldenOrbitals};
pub use output::{print_solve_summary, setup_output, verbosity_level};
