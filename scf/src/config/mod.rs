//! Configuration management for impurity solves
//!
//! Solver parameters follow the same pattern throughout: every field is an
//! `Option`, a `Default` impl carries the documented defaults and
//! `with_defaults` fills in whatever a YAML file or a caller left unset.

mod args;

pub use args::Args;

use serde::{Deserialize, Serialize};

/// Problem description read by the command-line driver.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub model: ModelConfig,
    pub nelec: usize,
    pub active_space: (usize, usize),
    pub target_ms: Option<f64>,
    pub target_s: Option<f64>,
    /// Chemical potentials visited in sequence by the driver.
    pub chemical_potentials: Vec<f64>,
    /// Number of leading impurity orbitals that feel the chemical potential.
    pub fragment_orbitals: Option<usize>,
    pub frag_name: Option<String>,
    pub filehead: Option<String>,
    pub num_mf_stab_checks: Option<usize>,
    pub imp_maxiter: Option<usize>,
    #[serde(default)]
    pub solver: SolverParams,
}

/// Extended Hubbard chain used as a stand-in impurity Hamiltonian.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    pub nsites: usize,
    pub hopping: f64,
    pub onsite_u: f64,
    pub nearest_neighbor_v: Option<f64>,
    pub site_energies: Option<Vec<f64>>,
    pub periodic: Option<bool>,
    /// Staggered spin field magnitude; enables the spin-polarized solver.
    pub spin_field: Option<f64>,
    pub constant: Option<f64>,
    /// Hand the interaction over as density-fitting factors.
    pub density_fitting: Option<bool>,
}

/// All tunable parameters of one impurity solve.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SolverParams {
    #[serde(default)]
    pub scf: ScfParams,
    #[serde(default)]
    pub casscf: CasscfParams,
    #[serde(default)]
    pub fci: FciParams,
}

impl SolverParams {
    pub fn with_defaults(self) -> Self {
        SolverParams {
            scf: self.scf.with_defaults(),
            casscf: self.casscf.with_defaults(),
            fci: self.fci.with_defaults(),
        }
    }
}

/// Mean-field parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScfParams {
    pub max_cycle: Option<usize>,
    pub diis_subspace_size: Option<usize>,
    pub conv_tol: Option<f64>,
    pub conv_tol_grad: Option<f64>,
    /// Cycle cap when only a continuation guess is needed.
    pub guess_max_cycle: Option<usize>,
    pub newton_max_cycle: Option<usize>,
    pub require_convergence: Option<bool>,
}

impl Default for ScfParams {
    fn default() -> Self {
        ScfParams {
            max_cycle: Some(100),
            diis_subspace_size: Some(8),
            conv_tol: Some(1e-10),
            conv_tol_grad: Some(1e-6),
            guess_max_cycle: Some(2),
            newton_max_cycle: Some(50),
            require_convergence: Some(false),
        }
    }
}

impl ScfParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.max_cycle.is_none() {
            self.max_cycle = defaults.max_cycle;
        }
        if self.diis_subspace_size.is_none() {
            self.diis_subspace_size = defaults.diis_subspace_size;
        }
        if self.conv_tol.is_none() {
            self.conv_tol = defaults.conv_tol;
        }
        if self.conv_tol_grad.is_none() {
            self.conv_tol_grad = defaults.conv_tol_grad;
        }
        if self.guess_max_cycle.is_none() {
            self.guess_max_cycle = defaults.guess_max_cycle;
        }
        if self.newton_max_cycle.is_none() {
            self.newton_max_cycle = defaults.newton_max_cycle;
        }
        if self.require_convergence.is_none() {
            self.require_convergence = defaults.require_convergence;
        }
        self
    }
}

/// Orbital optimizer parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CasscfParams {
    /// `None` falls back to the fragment's `imp_maxiter`, then to 50.
    pub max_cycle_macro: Option<usize>,
    pub max_cycle_micro: Option<usize>,
    pub conv_tol: Option<f64>,
    pub conv_tol_grad: Option<f64>,
    pub max_stepsize: Option<f64>,
    pub ah_conv_tol: Option<f64>,
    pub ah_max_cycle: Option<usize>,
}

impl Default for CasscfParams {
    fn default() -> Self {
        CasscfParams {
            max_cycle_macro: None,
            max_cycle_micro: Some(4),
            conv_tol: Some(1e-9),
            conv_tol_grad: Some(1e-5),
            max_stepsize: Some(0.1),
            ah_conv_tol: Some(1e-10),
            ah_max_cycle: Some(40),
        }
    }
}

impl CasscfParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.max_cycle_micro.is_none() {
            self.max_cycle_micro = defaults.max_cycle_micro;
        }
        if self.conv_tol.is_none() {
            self.conv_tol = defaults.conv_tol;
        }
        if self.conv_tol_grad.is_none() {
            self.conv_tol_grad = defaults.conv_tol_grad;
        }
        if self.max_stepsize.is_none() {
            self.max_stepsize = defaults.max_stepsize;
        }
        if self.ah_conv_tol.is_none() {
            self.ah_conv_tol = defaults.ah_conv_tol;
        }
        if self.ah_max_cycle.is_none() {
            self.ah_max_cycle = defaults.ah_max_cycle;
        }
        self
    }

    /// Macro-iteration cap: explicit setting, then `imp_maxiter`, then 50.
    pub fn macro_cap(&self, imp_maxiter: Option<usize>) -> usize {
        self.max_cycle_macro.or(imp_maxiter).unwrap_or(50)
    }
}

/// CI sub-solver parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FciParams {
    pub conv_tol: Option<f64>,
    pub max_cycle: Option<usize>,
    pub max_space: Option<usize>,
    /// Shift of the `(S^2 - S(S+1))^2` penalty.
    pub spin_penalty: Option<f64>,
    /// Largest determinant space diagonalized densely.
    pub dense_limit: Option<usize>,
}

impl Default for FciParams {
    fn default() -> Self {
        FciParams {
            conv_tol: Some(1e-12),
            max_cycle: Some(200),
            max_space: Some(16),
            spin_penalty: Some(0.2),
            dense_limit: Some(400),
        }
    }
}

impl FciParams {
    /// Apply default values to any missing parameters
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.conv_tol.is_none() {
            self.conv_tol = defaults.conv_tol;
        }
        if self.max_cycle.is_none() {
            self.max_cycle = defaults.max_cycle;
        }
        if self.max_space.is_none() {
            self.max_space = defaults.max_space;
        }
        if self.spin_penalty.is_none() {
            self.spin_penalty = defaults.spin_penalty;
        }
        if self.dense_limit.is_none() {
            self.dense_limit = defaults.dense_limit;
        }
        self
    }
}

impl Config {
    /// Fill in defaults of the nested solver parameters.
    pub fn with_defaults(mut self) -> Self {
        self.solver = self.solver.with_defaults();
        self
    }
}
