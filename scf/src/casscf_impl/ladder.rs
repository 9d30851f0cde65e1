//! Retry policy for an optimizer run that fails to converge.

use super::{ActiveSpaceSolver, CasscfResult, OptimizerMode};
use crate::ci_impl::CiVector;
use crate::error::{Result, SolverError};
use nalgebra::DMatrix;
use tracing::{info, warn};

/// Stages of the convergence ladder, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderStage {
    /// First-order run from the guess.
    Primary,
    /// Newton run from where the primary run stopped.
    Newton,
    /// CI vector discarded, CI sub-solver rebuilt without symmetry.
    FreshCi,
    /// Newton run after the fresh-CI attempt.
    FreshCiNewton,
    Exhausted,
}

impl LadderStage {
    pub fn next(self) -> Self {
        match self {
            LadderStage::Primary => LadderStage::Newton,
            LadderStage::Newton => LadderStage::FreshCi,
            LadderStage::FreshCi => LadderStage::FreshCiNewton,
            LadderStage::FreshCiNewton | LadderStage::Exhausted => LadderStage::Exhausted,
        }
    }

    fn mode(self) -> OptimizerMode {
        match self {
            LadderStage::Newton | LadderStage::FreshCiNewton => OptimizerMode::Newton,
            _ => OptimizerMode::FirstOrder,
        }
    }
}

/// Converged run and the stage that produced it.
#[derive(Debug, Clone)]
pub struct LadderOutcome {
    pub result: CasscfResult,
    pub stage: LadderStage,
    pub attempts: usize,
}

/// Run the optimizer, escalating through the ladder until a run converges.
pub fn run_ladder(
    solver: &mut ActiveSpaceSolver,
    mo0: &DMatrix<f64>,
    ci0: Option<&CiVector>,
) -> Result<LadderOutcome> {
    let mut stage = LadderStage::Primary;
    let mut mo = mo0.clone();
    let mut ci = ci0.cloned();
    let mut attempts = 0;
    let mut last_gradient = f64::NAN;

    loop {
        match stage {
            LadderStage::Exhausted => {
                return Err(SolverError::ActiveSpaceNotConverged {
                    attempts,
                    last_gradient,
                })
            }
            LadderStage::FreshCi => {
                info!("Assuming the CI vector is poisoned; discarding it and dropping CI symmetry");
                ci = None;
                solver.drop_symmetry();
                solver.core_mut().frozen.clear();
            }
            _ => {}
        }
        solver.core_mut().mode = stage.mode();
        attempts += 1;
        let result = solver.kernel(&mo, ci.as_ref())?;
        if result.converged {
            return Ok(LadderOutcome {
                result,
                stage,
                attempts,
            });
        }
        warn!(
            "Active-space optimization not converged at ladder stage {:?} (|g_orb| = {:.3e})",
            stage, result.gradient_norm
        );
        last_gradient = result.gradient_norm;
        mo = result.mo_coeff;
        ci = Some(result.ci);
        stage = stage.next();
    }
}
