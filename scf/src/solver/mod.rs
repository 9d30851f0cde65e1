//! Impurity solve: mean field, guess continuation, CASSCF and result assembly
//!
//! [`solve`] runs the whole pipeline for one fragment. Everything learned
//! along the way (optimized orbitals, CI vector, active-space densities) is
//! cached on the fragment and seeds the next call, so successive solves in an
//! outer embedding loop start close to their answer.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut frag = Fragment::new("A", loc2imp, nelec, e0, h1e, eri);
//! frag.active_space = (2, 2);
//! let report = solve(&mut frag, &guess_1rdm, &chempot)?;
//! println!("E_imp = {}", frag.e_imp);
//! ```

mod align;
mod assembly;
mod guess;
#[cfg(test)]
mod tests;

pub use align::{align_orbital_block, align_orbital_blocks, cleanup_symmetry, ActiveMetric, AlignedOrbitals};
pub use assembly::{assemble, AssemblySummary};
pub use guess::{build_guess, ci_shape, project_amo_manually, sort_mo, ActivePartition, GuessSource, OrbitalGuess, ProjectedGuess};

use crate::casscf_impl::{ActiveSpaceSolver, CasscfCore, LadderStage};
use crate::ci_impl::{transform_ci_for_orbital_rotation, CiSolver, FciSolver};
use crate::error::{Result, SolverError};
use crate::fragment::Fragment;
use crate::io::write_guess_molden;
use crate::scf_impl::ImpurityRohf;
use basis::basis::measure_basis_nonorthonormality;
use nalgebra::DMatrix;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Diagnostics of one solve. The physical results live on the fragment.
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Mean-field energy including the same-spin exchange of singly occupied
    /// orbitals.
    pub e_mean_field: f64,
    pub e_casscf: f64,
    pub e_imp: f64,
    pub macro_iterations: usize,
    pub ladder_stage: LadderStage,
    pub attempts: usize,
    pub guess_source: GuessSource,
    /// Non-orthonormality of the orbitals handed to the optimizer.
    pub guess_nonorthonormality: f64,
    pub spin_square: f64,
    pub multiplicity: f64,
    pub wall_time: Duration,
}

/// Active-space size, electron split and spin multiplicity of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSpaceLayout {
    pub ncas: usize,
    pub nelecas: (usize, usize),
    pub smult: usize,
}

fn twice_abs(x: f64) -> usize {
    (2.0 * x.abs()).round() as usize
}

/// Resolve the requested active space against the impurity.
///
/// Requests larger than the impurity fall back to the full impurity space.
/// Electron counts that do not fit the target spin are split with integer
/// division, so leftover electrons end up in the core.
pub fn resolve_active_space(frag: &Fragment) -> ActiveSpaceLayout {
    let (mut cas_e, mut cas_orb) = frag.active_space;
    if cas_e > frag.nelec_imp || cas_orb > frag.norbs_imp() {
        info!(
            "Active space ({}, {}) exceeds the impurity ({}, {}); using the full impurity space",
            cas_e,
            cas_orb,
            frag.nelec_imp,
            frag.norbs_imp()
        );
        cas_e = frag.nelec_imp;
        cas_orb = frag.norbs_imp();
    }
    let abs_2ms = twice_abs(frag.target_ms);
    let abs_2s = frag.target_s.map(twice_abs);
    let two_sp = abs_2s.map_or(abs_2ms, |s| s.min(abs_2ms));
    if two_sp > cas_e {
        info!(
            "{} active electrons cannot carry 2S = {}; using {} active electrons",
            cas_e, two_sp, two_sp
        );
        cas_e = two_sp;
    }
    // floor split; an electron left over by the parity mismatch joins the core
    let nelecas = ((cas_e + two_sp) / 2, (cas_e - two_sp) / 2);
    if nelecas.0 + nelecas.1 != cas_e {
        info!(
            "{} active electrons do not match 2S = {}; solving with nelecas = {:?}",
            cas_e, two_sp, nelecas
        );
    }
    let smult = match abs_2s {
        Some(s) => s + 1,
        None => (frag.nelec_imp % 2 + 1).max(two_sp + 1),
    };
    ActiveSpaceLayout {
        ncas: cas_orb,
        nelecas,
        smult,
    }
}

fn check_square(name: &str, m: &DMatrix<f64>, n: usize) -> Result<()> {
    if m.shape() != (n, n) {
        return Err(SolverError::InvalidInput(format!(
            "{} is {:?}, expected {} x {}",
            name,
            m.shape(),
            n,
            n
        )));
    }
    Ok(())
}

/// Solve the impurity problem of `frag`.
///
/// `guess_1rdm` (impurity basis) seeds the mean field; `chempot` is
/// subtracted from the one-electron operator. On success the densities,
/// energies and caches of `frag` are overwritten. On failure the outputs are
/// left as they were; one-shot overrides that were already applied stay
/// consumed.
pub fn solve(frag: &mut Fragment, guess_1rdm: &DMatrix<f64>, chempot: &DMatrix<f64>) -> Result<SolveReport> {
    frag.validate()?;
    let nimp = frag.norbs_imp();
    check_square("guess_1rdm", guess_1rdm, nimp)?;
    check_square("chempot", chempot, nimp)?;
    let t_start = Instant::now();
    let params = frag.params.clone().with_defaults();
    let h1e = &frag.impham_oei_c - chempot;
    let guess_orbs_av = frag.imp_cache.is_some() || frag.norbs_as() > 0;
    let cas = resolve_active_space(frag);

    // Mean field
    let (mf, e_mean_field, fock_imp, fock_mf) = {
        let rohf = ImpurityRohf::new(
            &h1e,
            &frag.impham_eri,
            frag.impham_oei_s.as_ref(),
            frag.impham_const,
            frag.nelec_imp,
            twice_abs(frag.target_ms),
            &params.scf,
        )?;
        let mf = rohf.kernel(guess_1rdm, guess_orbs_av, frag.num_mf_stab_checks);
        if !guess_orbs_av && !mf.converged {
            if params.scf.require_convergence.unwrap_or(false) {
                return Err(SolverError::MeanFieldNotConverged {
                    cycles: mf.cycles,
                    e_tot: mf.e_tot,
                });
            }
            warn!("Mean-field step not converged; continuing from its last orbitals");
        }
        let nsomo = mf.somo_indices().len();
        let mut e_mf = mf.e_tot;
        if nsomo > 0 {
            let ssk = rohf.somo_spin_exchange(&mf);
            info!("Found {} singly-occupied orbitals; adding same-spin exchange {:.10}", nsomo, ssk);
            e_mf += ssk;
        }
        info!("Impurity mean-field energy: {:.12}", e_mf);
        let dm_mf = mf.make_rdm1();
        let fock_imp = rohf.fock_for_density(&frag.get_one_rdm_imp().unwrap_or_else(|| dm_mf.clone()));
        let fock_mf = rohf.fock_for_density(&dm_mf);
        (mf, e_mf, fock_imp, fock_mf)
    };

    // Active-space solver
    let mut core = CasscfCore::new(
        Arc::new(h1e.clone()),
        Arc::new(frag.impham_eri.clone()),
        frag.impham_const,
        frag.nelec_imp,
        cas.ncas,
        cas.nelecas,
        &params.casscf,
        params.casscf.macro_cap(frag.imp_maxiter),
    )?;
    let (ncore, ncas) = (core.ncore, core.ncas);
    let symm_imp = if frag.enforce_symmetry() {
        frag.impurity_symmetry()
    } else {
        None
    };
    let wfnsym = symm_imp.as_ref().and(frag.symmetry.as_ref()).and_then(|s| s.wfnsym);
    let mut fcisolver = FciSolver::new(cas.smult, &params.fci).with_wfnsym(wfnsym);
    info!(
        "CAS({}e, {}o), nelecas = {:?}, 2S+1 = {}, {} core orbitals",
        cas.nelecas.0 + cas.nelecas.1,
        ncas,
        cas.nelecas,
        cas.smult,
        ncore
    );

    // Guess
    let part = ActivePartition {
        ncore,
        ncas,
        nelecas: cas.nelecas,
    };
    let guess = build_guess(frag, &mf, &fock_imp, &fock_mf, part)?;
    let aligned = align_orbital_blocks(
        &guess.imp2mo,
        ncore,
        ncas,
        &guess.fock,
        ActiveMetric::Fock,
        symm_imp.as_ref(),
        "Guess",
    );
    let mut imp2mo = aligned.mo;
    let ci0 = guess
        .ci0
        .map(|ci| transform_ci_for_orbital_rotation(&ci, ncas, cas.nelecas, &aligned.active_umat));

    if !frag.mfmo_printed {
        let labels = symm_imp.as_ref().map(|symm| {
            symm.label_orb_symm(&imp2mo)
                .into_iter()
                .map(|l| symm.irrep_name(l).to_string())
                .collect::<Vec<_>>()
        });
        write_guess_molden(frag, &imp2mo, &guess.occ, labels.as_deref());
        frag.mfmo_printed = true;
    } else if !frag.active_orb_list.is_empty() {
        let caslst = std::mem::take(&mut frag.active_orb_list);
        info!("Applying caslst: {:?}", caslst);
        imp2mo = sort_mo(&imp2mo, &caslst, ncore, ncas)?;
    }
    if !frag.frozen_orb_list.is_empty() {
        let frozen = std::mem::take(&mut frag.frozen_orb_list);
        if let Some(&bad) = frozen.iter().find(|&&i| i >= nimp) {
            return Err(SolverError::InvalidInput(format!(
                "frozen orbital {} outside {} impurity orbitals",
                bad, nimp
            )));
        }
        info!("Applying frozen-orbital list (this solve only): {:?}", frozen);
        core.frozen = frozen;
    }
    if let Some(symm) = &symm_imp {
        let orbsym = symm.label_irrep_ids(&imp2mo);
        fcisolver.set_orbsym(Some(orbsym[ncore..ncore + ncas].to_vec()));
        core.orbsym = Some(orbsym);
    }
    let guess_nonorthonormality = measure_basis_nonorthonormality(&imp2mo);

    // Optimization
    let t_opt = Instant::now();
    let mut solver = ActiveSpaceSolver::new(core, fcisolver, frag.impham_oei_s.clone().map(Arc::new));
    let outcome = solver.kernel_with_ladder(&imp2mo, ci0.as_ref())?;
    let e_casscf = outcome.result.e_tot;

    // Canonicalize the optimized orbitals
    let (rdm1, _) = solver.make_rdm12(&outcome.result.ci);
    let fock_cas = solver.core().fock(&outcome.result.mo_coeff, &rdm1.dm);
    let aligned = align_orbital_blocks(
        &outcome.result.mo_coeff,
        ncore,
        ncas,
        &fock_cas,
        ActiveMetric::Occupation(&rdm1.dm),
        symm_imp.as_ref(),
        "Optimized",
    );
    let ci = transform_ci_for_orbital_rotation(&outcome.result.ci, ncas, cas.nelecas, &aligned.active_umat);

    let summary = assemble(frag, &solver, &aligned.mo, &ci, e_casscf, chempot);
    info!(
        "Impurity CASSCF energy (incl chempot): {:.12}; spin multiplicity: {:.6}; time to solve: {:.3} s",
        e_casscf,
        summary.multiplicity,
        t_opt.elapsed().as_secs_f64()
    );

    Ok(SolveReport {
        e_mean_field,
        e_casscf,
        e_imp: summary.e_imp,
        macro_iterations: outcome.result.macro_iterations,
        ladder_stage: outcome.stage,
        attempts: outcome.attempts,
        guess_source: guess.source,
        guess_nonorthonormality,
        spin_square: summary.spin_square,
        multiplicity: summary.multiplicity,
        wall_time: t_start.elapsed(),
    })
}
