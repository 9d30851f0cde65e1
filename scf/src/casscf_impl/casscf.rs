//! Active-space system, hook trait and the macro-iteration driver.

use super::gradient::{base_grad_hop, ActiveFrame};
use super::{CasciResult, CasscfResult, CiResponseEnv, GradHop, OptimizerMode};
use crate::ci_impl::{CiSolver, CiVector, OneBody, Rdm1};
use crate::config::CasscfParams;
use crate::error::{Result, SolverError};
use crate::integrals::TwoElectronIntegrals;
use crate::optim_impl::{steihaug_cg, TrustRegion, UniqueVariables};
use basis::tensor::Eri4;
use nalgebra::DMatrix;
use std::sync::Arc;
use tracing::{debug, info};

/// Impurity Hamiltonian, active-space partition and optimizer settings.
#[derive(Debug, Clone)]
pub struct CasscfCore {
    pub h1e: Arc<DMatrix<f64>>,
    pub eri: Arc<TwoElectronIntegrals>,
    pub energy_nuc: f64,
    pub ncore: usize,
    pub ncas: usize,
    pub nelecas: (usize, usize),
    /// Orbitals excluded from rotations.
    pub frozen: Vec<usize>,
    /// Irrep ids of the orbitals; rotations between irreps are excluded.
    pub orbsym: Option<Vec<u32>>,
    pub mode: OptimizerMode,
    pub max_cycle_macro: usize,
    pub max_cycle_micro: usize,
    pub conv_tol: f64,
    pub conv_tol_grad: f64,
    pub max_stepsize: f64,
    pub ah_conv_tol: f64,
    pub ah_max_cycle: usize,
}

impl CasscfCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        h1e: Arc<DMatrix<f64>>,
        eri: Arc<TwoElectronIntegrals>,
        energy_nuc: f64,
        nelec: usize,
        ncas: usize,
        nelecas: (usize, usize),
        params: &CasscfParams,
        max_cycle_macro: usize,
    ) -> Result<Self> {
        let norb = h1e.nrows();
        let nelec_cas = nelecas.0 + nelecas.1;
        if nelec_cas > nelec || (nelec - nelec_cas) % 2 != 0 {
            return Err(SolverError::InvalidInput(format!(
                "{} active electrons leave no closed-shell core in {} electrons",
                nelec_cas, nelec
            )));
        }
        let ncore = (nelec - nelec_cas) / 2;
        if ncore + ncas > norb || nelecas.0 > ncas || nelecas.1 > ncas {
            return Err(SolverError::InvalidInput(format!(
                "CAS({}, {}) with {} core orbitals does not fit into {} orbitals",
                nelec_cas, ncas, ncore, norb
            )));
        }
        let params = params.clone().with_defaults();
        Ok(CasscfCore {
            h1e,
            eri,
            energy_nuc,
            ncore,
            ncas,
            nelecas,
            frozen: Vec::new(),
            orbsym: None,
            mode: OptimizerMode::FirstOrder,
            max_cycle_macro,
            max_cycle_micro: params.max_cycle_micro.unwrap_or(4),
            conv_tol: params.conv_tol.unwrap_or(1e-9),
            conv_tol_grad: params.conv_tol_grad.unwrap_or(1e-5),
            max_stepsize: params.max_stepsize.unwrap_or(0.1),
            ah_conv_tol: params.ah_conv_tol.unwrap_or(1e-10),
            ah_max_cycle: params.ah_max_cycle.unwrap_or(40),
        })
    }

    pub fn norb(&self) -> usize {
        self.h1e.nrows()
    }

    pub fn nocc(&self) -> usize {
        self.ncore + self.ncas
    }

    pub fn rotation_variables(&self) -> UniqueVariables {
        UniqueVariables::casscf(self.norb(), self.ncore, self.ncas, &self.frozen, self.orbsym.as_deref())
    }

    fn core_density(&self, mo: &DMatrix<f64>) -> DMatrix<f64> {
        let c = mo.columns(0, self.ncore);
        &c * c.transpose() * 2.0
    }

    /// Effective active-space one-electron operator and the core energy.
    pub fn h1e_for_cas(&self, mo: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
        let dm_core = self.core_density(mo);
        let vhf = self.eri.get_veff(&dm_core);
        let e_core = self.energy_nuc + (self.h1e.as_ref() + &vhf * 0.5).component_mul(&dm_core).sum();
        let c_act = mo.columns(self.ncore, self.ncas);
        let h1eff = c_act.transpose() * (self.h1e.as_ref() + vhf) * c_act;
        (h1eff, e_core)
    }

    /// Two-electron integrals over the active orbitals.
    pub fn cas_eri(&self, mo: &DMatrix<f64>) -> Eri4 {
        self.eri.transform(&mo.columns(self.ncore, self.ncas).into_owned())
    }

    /// Integrals over every orbital of `mo`.
    pub fn active_frame(&self, mo: &DMatrix<f64>) -> ActiveFrame {
        let h_mo = mo.transpose() * self.h1e.as_ref() * mo;
        ActiveFrame::new(h_mo, self.eri.transform(mo), self.ncore, self.ncas)
    }

    /// Spin-summed impurity-basis density of core plus active orbitals.
    pub fn make_rdm1(&self, mo: &DMatrix<f64>, casdm1: &DMatrix<f64>) -> DMatrix<f64> {
        let c_act = mo.columns(self.ncore, self.ncas);
        self.core_density(mo) + &c_act * casdm1 * c_act.transpose()
    }

    /// Spin-averaged Fock matrix of the CASSCF density, impurity basis.
    pub fn fock(&self, mo: &DMatrix<f64>, casdm1: &DMatrix<f64>) -> DMatrix<f64> {
        self.h1e.as_ref() + self.eri.get_veff(&self.make_rdm1(mo, casdm1))
    }
}

/// Hooks of the two-step optimizer. Every default delegates to the free
/// function of the same name, which is also what an override calls to reach
/// the base behavior.
pub trait CasscfHooks {
    type Ci: CiSolver;

    fn core(&self) -> &CasscfCore;
    fn core_mut(&mut self) -> &mut CasscfCore;
    fn fcisolver(&self) -> &Self::Ci;
    fn fcisolver_mut(&mut self) -> &mut Self::Ci;

    fn casci(&mut self, mo: &DMatrix<f64>, ci0: Option<&CiVector>) -> Result<CasciResult> {
        casci_default(self, mo, ci0)
    }

    fn make_rdm12(&self, ci: &CiVector) -> (Rdm1, Eri4) {
        make_rdm12_default(self, ci)
    }

    /// Approximate CI vector and densities after the orbitals rotate by `u`.
    fn update_casdm(&mut self, mo: &DMatrix<f64>, u: &DMatrix<f64>, ci: &CiVector) -> Result<(CiVector, Rdm1, Eri4)> {
        update_casdm_default(self, mo, u, ci, &CiResponseEnv::default())
    }

    fn solve_approx_ci(
        &mut self,
        h1: OneBody,
        h2: &Eri4,
        ci0: &CiVector,
        ecore: f64,
        _env: &CiResponseEnv,
    ) -> Result<CiVector> {
        solve_approx_ci_default(self, h1, h2, ci0, ecore)
    }

    fn gen_g_hop(&self, mo: &DMatrix<f64>, rdm1: &Rdm1, dm2: &Eri4) -> GradHop {
        gen_g_hop_default(self, mo, rdm1, dm2)
    }
}

pub fn casci_default<H: CasscfHooks + ?Sized>(
    hooks: &mut H,
    mo: &DMatrix<f64>,
    ci0: Option<&CiVector>,
) -> Result<CasciResult> {
    let core = hooks.core();
    let (h1eff, ecore) = core.h1e_for_cas(mo);
    let h2 = core.cas_eri(mo);
    let (ncas, nelecas) = (core.ncas, core.nelecas);
    let (e_tot, ci) = hooks
        .fcisolver()
        .kernel(&OneBody::Charge(h1eff), &h2, ncas, nelecas, ci0, ecore)?;
    Ok(CasciResult {
        e_tot,
        e_cas: e_tot - ecore,
        ci,
    })
}

pub fn make_rdm12_default<H: CasscfHooks + ?Sized>(hooks: &H, ci: &CiVector) -> (Rdm1, Eri4) {
    let core = hooks.core();
    hooks.fcisolver().make_rdm12(ci, core.ncas, core.nelecas)
}

pub fn update_casdm_default<H: CasscfHooks + ?Sized>(
    hooks: &mut H,
    mo: &DMatrix<f64>,
    u: &DMatrix<f64>,
    ci: &CiVector,
    env: &CiResponseEnv,
) -> Result<(CiVector, Rdm1, Eri4)> {
    let mo_new = mo * u;
    let (h1eff, ecore) = hooks.core().h1e_for_cas(&mo_new);
    let h2 = hooks.core().cas_eri(&mo_new);
    let ci1 = hooks.solve_approx_ci(OneBody::Charge(h1eff), &h2, ci, ecore, env)?;
    let (rdm1, dm2) = hooks.make_rdm12(&ci1);
    Ok((ci1, rdm1, dm2))
}

pub fn solve_approx_ci_default<H: CasscfHooks + ?Sized>(
    hooks: &mut H,
    h1: OneBody,
    h2: &Eri4,
    ci0: &CiVector,
    ecore: f64,
) -> Result<CiVector> {
    let core = hooks.core();
    let (ncas, nelecas) = (core.ncas, core.nelecas);
    hooks.fcisolver().approx_kernel(&h1, h2, ncas, nelecas, ci0, ecore)
}

pub fn gen_g_hop_default<H: CasscfHooks + ?Sized>(
    hooks: &H,
    mo: &DMatrix<f64>,
    rdm1: &Rdm1,
    dm2: &Eri4,
) -> GradHop {
    let core = hooks.core();
    base_grad_hop(
        core.active_frame(mo),
        rdm1.dm.clone(),
        dm2.clone(),
        core.rotation_variables(),
    )
}

/// Two-step macro iterations from `mo0` (and optionally `ci0`).
pub fn kernel<H: CasscfHooks + ?Sized>(
    hooks: &mut H,
    mo0: &DMatrix<f64>,
    ci0: Option<&CiVector>,
) -> Result<CasscfResult> {
    let core = hooks.core().clone();
    let vars = core.rotation_variables();
    let (nmicro, cg_iters) = match core.mode {
        OptimizerMode::FirstOrder => (1, 4),
        OptimizerMode::Newton => (core.max_cycle_micro.max(1), core.ah_max_cycle),
    };

    let mut mo = mo0.clone();
    let mut cas = hooks.casci(&mo, ci0)?;
    info!("CASCI E = {:.12}", cas.e_tot);
    let mut trust = TrustRegion::new(core.max_stepsize);
    let mut last_de = f64::INFINITY;
    let mut imacro = 0;
    let mut converged = false;
    let mut gnorm;

    loop {
        let (rdm1, dm2) = hooks.make_rdm12(&cas.ci);
        let hop = hooks.gen_g_hop(&mo, &rdm1, &dm2);
        gnorm = hop.g_orb.norm();
        if gnorm < core.conv_tol_grad && (imacro == 0 || last_de.abs() < core.conv_tol) {
            converged = true;
            break;
        }
        if imacro >= core.max_cycle_macro {
            break;
        }
        imacro += 1;

        let tol = match core.mode {
            OptimizerMode::FirstOrder => 0.1 * gnorm,
            OptimizerMode::Newton => core.ah_conv_tol.max(0.01 * gnorm * gnorm.min(1.0)),
        };
        let mut u = DMatrix::identity(mo.nrows(), mo.ncols());
        let mut g = hop.g_orb.clone();
        let mut ci = cas.ci.clone();
        let mut predicted = 0.0;
        let mut hit_boundary = false;
        for micro in 0..nmicro {
            let step = steihaug_cg(|x| (hop.h_op)(x), &hop.h_diag, &g, trust.radius, tol, cg_iters);
            predicted += step.predicted;
            hit_boundary |= step.hit_boundary;
            u = u * vars.rotation(&step.x);
            let (ci1, rdm1, dm2) = hooks.update_casdm(&mo, &u, &ci)?;
            ci = ci1;
            debug!(
                "    micro {:2}: |x| = {:.3e} ({} CG) |g| = {:.3e}",
                micro,
                step.x.norm(),
                step.iterations,
                g.norm()
            );
            if micro + 1 < nmicro {
                g = (hop.gorb_update)(&u, &rdm1, &dm2);
                if g.norm() < 0.3 * core.conv_tol_grad {
                    break;
                }
            }
        }

        let mo_new = &mo * &u;
        let cas_new = hooks.casci(&mo_new, Some(&ci))?;
        let de = cas_new.e_tot - cas.e_tot;
        let accepted = trust.update(de, predicted, hit_boundary);
        info!(
            "macro iter {:3}: E = {:.12} dE = {:.3e} |g_orb| = {:.3e} radius = {:.3e}{}",
            imacro,
            cas_new.e_tot,
            de,
            gnorm,
            trust.radius,
            if accepted { "" } else { " (rejected)" }
        );
        if accepted {
            mo = mo_new;
            cas = cas_new;
            last_de = de;
        }
    }

    if converged {
        info!("CASSCF converged in {} macro iterations, E = {:.12}", imacro, cas.e_tot);
    } else {
        info!("CASSCF not converged after {} macro iterations (|g_orb| = {:.3e})", imacro, gnorm);
    }
    Ok(CasscfResult {
        converged,
        e_tot: cas.e_tot,
        e_cas: cas.e_cas,
        mo_coeff: mo,
        ci: cas.ci,
        macro_iterations: imacro,
        gradient_norm: gnorm,
    })
}

/// Plain two-step optimizer with CI sub-solver `F`.
pub struct Casscf<F> {
    pub core: CasscfCore,
    pub fcisolver: F,
}

impl<F: CiSolver> Casscf<F> {
    pub fn new(core: CasscfCore, fcisolver: F) -> Self {
        Casscf { core, fcisolver }
    }
}

impl<F: CiSolver> CasscfHooks for Casscf<F> {
    type Ci = F;

    fn core(&self) -> &CasscfCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CasscfCore {
        &mut self.core
    }

    fn fcisolver(&self) -> &F {
        &self.fcisolver
    }

    fn fcisolver_mut(&mut self) -> &mut F {
        &mut self.fcisolver
    }
}
