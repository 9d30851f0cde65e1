//! Per-impurity state shared between successive solves.
//!
//! A [`Fragment`] is owned by the caller and handed to [`crate::solve`] by
//! exclusive reference. The solver reads the fields grouped under *inputs*
//! and *overrides*, consumes the one-shot overrides, and writes the fields
//! grouped under *caches* and *outputs*.

use crate::ci_impl::CiVector;
use crate::config::SolverParams;
use crate::error::{Result, SolverError};
use crate::integrals::TwoElectronIntegrals;
use basis::symmetry::{get_subspace_symmetry_blocks, SymmetryBlocks};
use basis::tensor::Eri4;
use nalgebra::DMatrix;

/// Caller hook applied once to the guess orbitals, expressed in the local
/// basis (columns are orbitals).
pub type CasGuessCallback = Box<dyn FnMut(&DMatrix<f64>) -> DMatrix<f64>>;

/// Abelian point-group information of the local basis.
#[derive(Debug, Clone)]
pub struct FragmentSymmetry {
    /// Align, label and clean orbitals by irrep and restrict the CI
    /// wavefunction to `wfnsym`.
    pub enforce: bool,
    pub group: String,
    /// One orthonormal block per irrep, local basis.
    pub loc2symm: SymmetryBlocks,
    /// Target irrep id of the wavefunction.
    pub wfnsym: Option<u32>,
}

/// Where guess orbitals are exported for visualization.
#[derive(Debug, Clone, Default)]
pub struct OrbitalOutput {
    /// Local-to-AO coefficients; without them orbitals are written over the
    /// local basis.
    pub ao2loc: Option<DMatrix<f64>>,
}

pub struct Fragment {
    // inputs
    pub frag_name: String,
    pub filehead: String,
    pub impham_const: f64,
    pub impham_oei_c: DMatrix<f64>,
    /// Spin-exchange operator of a spin-polarized environment.
    pub impham_oei_s: Option<DMatrix<f64>>,
    pub impham_eri: TwoElectronIntegrals,
    /// Local-to-impurity orbitals, orthonormal columns.
    pub loc2imp: DMatrix<f64>,
    pub nelec_imp: usize,
    pub target_ms: f64,
    pub target_s: Option<f64>,
    /// `(electrons, orbitals)`.
    pub active_space: (usize, usize),
    pub symmetry: Option<FragmentSymmetry>,
    pub one_rdm_froz_loc: DMatrix<f64>,
    pub orbital_output: Option<OrbitalOutput>,

    // overrides
    pub imp_maxiter: Option<usize>,
    pub num_mf_stab_checks: usize,
    pub params: SolverParams,
    /// 1-based orbitals to move into the active space; consumed once.
    pub active_orb_list: Vec<usize>,
    /// 0-based orbitals excluded from rotations; consumed once.
    pub frozen_orb_list: Vec<usize>,
    pub cas_guess_callback: Option<CasGuessCallback>,
    /// Active orbitals (local basis) to project onto the impurity; consumed once.
    pub loc2amo_guess: Option<DMatrix<f64>>,

    // caches
    pub imp_cache: Option<(DMatrix<f64>, CiVector)>,
    pub ci_as: Option<CiVector>,
    pub ci_as_orb: Option<DMatrix<f64>>,
    pub loc2mo: DMatrix<f64>,
    pub loc2amo: DMatrix<f64>,
    pub one_rdm_as_loc: Option<DMatrix<f64>>,
    pub one_rsm_as_loc: Option<DMatrix<f64>>,
    pub mfmo_printed: bool,

    // outputs
    pub one_rdm_loc: Option<DMatrix<f64>>,
    pub two_cdm_imp_amo: Option<Eri4>,
    pub e_imp: f64,
    pub e2_cum: f64,
}

impl Fragment {
    pub fn new(
        frag_name: &str,
        loc2imp: DMatrix<f64>,
        nelec_imp: usize,
        impham_const: f64,
        impham_oei_c: DMatrix<f64>,
        impham_eri: TwoElectronIntegrals,
    ) -> Self {
        let nloc = loc2imp.nrows();
        Fragment {
            frag_name: frag_name.to_string(),
            filehead: String::new(),
            impham_const,
            impham_oei_c,
            impham_oei_s: None,
            impham_eri,
            loc2imp,
            nelec_imp,
            target_ms: 0.0,
            target_s: None,
            active_space: (0, 0),
            symmetry: None,
            one_rdm_froz_loc: DMatrix::zeros(nloc, nloc),
            orbital_output: None,
            imp_maxiter: None,
            num_mf_stab_checks: 0,
            params: SolverParams::default(),
            active_orb_list: Vec::new(),
            frozen_orb_list: Vec::new(),
            cas_guess_callback: None,
            loc2amo_guess: None,
            imp_cache: None,
            ci_as: None,
            ci_as_orb: None,
            loc2mo: DMatrix::zeros(nloc, 0),
            loc2amo: DMatrix::zeros(nloc, 0),
            one_rdm_as_loc: None,
            one_rsm_as_loc: None,
            mfmo_printed: false,
            one_rdm_loc: None,
            two_cdm_imp_amo: None,
            e_imp: 0.0,
            e2_cum: 0.0,
        }
    }

    pub fn norbs_imp(&self) -> usize {
        self.loc2imp.ncols()
    }

    pub fn norbs_loc(&self) -> usize {
        self.loc2imp.nrows()
    }

    pub fn norbs_as(&self) -> usize {
        self.loc2amo.ncols()
    }

    pub fn enforce_symmetry(&self) -> bool {
        self.symmetry.as_ref().is_some_and(|s| s.enforce)
    }

    /// Current 1-RDM restricted to the impurity orbitals.
    pub fn get_one_rdm_imp(&self) -> Option<DMatrix<f64>> {
        self.one_rdm_loc
            .as_ref()
            .map(|dm| self.loc2imp.transpose() * dm * &self.loc2imp)
    }

    /// Symmetry blocks expressed over the impurity orbitals.
    pub fn impurity_symmetry(&self) -> Option<SymmetryBlocks> {
        let symm = self.symmetry.as_ref()?;
        let blocks = get_subspace_symmetry_blocks(&self.loc2imp, &symm.loc2symm.blocks);
        Some(SymmetryBlocks::new(
            blocks,
            symm.loc2symm.irrep_ids.clone(),
            symm.loc2symm.irrep_names.clone(),
        ))
    }

    /// Forget everything learned by earlier solves.
    pub fn reset_caches(&mut self) {
        let nloc = self.norbs_loc();
        self.imp_cache = None;
        self.ci_as = None;
        self.ci_as_orb = None;
        self.loc2mo = DMatrix::zeros(nloc, 0);
        self.loc2amo = DMatrix::zeros(nloc, 0);
        self.one_rdm_as_loc = None;
        self.one_rsm_as_loc = None;
    }

    /// Check shapes and electron counts of the input fields.
    pub fn validate(&self) -> Result<()> {
        let (nloc, nimp) = self.loc2imp.shape();
        let square = |m: &DMatrix<f64>, n: usize| m.nrows() == n && m.ncols() == n;
        if !square(&self.impham_oei_c, nimp) {
            return Err(SolverError::InvalidInput(format!(
                "impham_oei_c is {:?}, expected {} x {}",
                self.impham_oei_c.shape(),
                nimp,
                nimp
            )));
        }
        if let Some(hs) = &self.impham_oei_s {
            if !square(hs, nimp) {
                return Err(SolverError::InvalidInput(format!(
                    "impham_oei_s is {:?}, expected {} x {}",
                    hs.shape(),
                    nimp,
                    nimp
                )));
            }
        }
        if self.impham_eri.norb() != nimp {
            return Err(SolverError::InvalidInput(format!(
                "two-electron integrals span {} orbitals, impurity has {}",
                self.impham_eri.norb(),
                nimp
            )));
        }
        if !square(&self.one_rdm_froz_loc, nloc) {
            return Err(SolverError::InvalidInput(format!(
                "one_rdm_froz_loc is {:?}, expected {} x {}",
                self.one_rdm_froz_loc.shape(),
                nloc,
                nloc
            )));
        }
        if self.nelec_imp > 2 * nimp {
            return Err(SolverError::InvalidInput(format!(
                "{} electrons do not fit into {} impurity orbitals",
                self.nelec_imp, nimp
            )));
        }
        if (self.target_ms * 2.0).fract().abs() > 1e-8 {
            return Err(SolverError::InvalidInput(format!(
                "target_ms = {} is not a half-integer",
                self.target_ms
            )));
        }
        Ok(())
    }
}
