//! Error type of the impurity solver.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mean-field calculation did not converge after {cycles} cycles (last energy {e_tot:.10})")]
    MeanFieldNotConverged { cycles: usize, e_tot: f64 },

    #[error(
        "Active-space optimization did not converge after {attempts} attempts. Last orbital gradient norm was {last_gradient:.6e}."
    )]
    ActiveSpaceNotConverged { attempts: usize, last_gradient: f64 },
}

pub type Result<T> = std::result::Result<T, SolverError>;
