//! Densities, energies and caches written back to the fragment.

use crate::casscf_impl::ActiveSpaceSolver;
use crate::ci_impl::CiVector;
use crate::fragment::Fragment;
use basis::basis::{represent_operator_in_basis, symmetrize};
use basis::tensor::get_2cdm_from_2rdm;
use nalgebra::DMatrix;
use tracing::info;

/// Quantities of the converged solution that are reported but not stored.
#[derive(Debug, Clone, Copy)]
pub struct AssemblySummary {
    pub spin_square: f64,
    pub multiplicity: f64,
    pub e_imp: f64,
}

/// Store the optimized orbitals `imp2mo`, the CI vector `ci` (in the same
/// active orbitals) and everything derived from them in `frag`.
pub fn assemble(
    frag: &mut Fragment,
    solver: &ActiveSpaceSolver,
    imp2mo: &DMatrix<f64>,
    ci: &CiVector,
    e_casscf: f64,
    chempot: &DMatrix<f64>,
) -> AssemblySummary {
    let core = solver.core();
    let (ncore, ncas) = (core.ncore, core.ncas);
    let loc2mo = &frag.loc2imp * imp2mo;
    let imp2amo = imp2mo.columns(ncore, ncas).into_owned();
    let loc2amo = loc2mo.columns(ncore, ncas).into_owned();

    let (rdm1, dm2) = solver.make_rdm12(ci);
    let dm1_amo = rdm1.dm;
    let (dma, dmb) = solver.make_rdm1s(ci);
    let rsm_amo = if frag.target_ms >= 0.0 { dma - dmb } else { dmb - dma };
    let rsm_imp = &imp2amo * &rsm_amo * imp2amo.transpose();
    info!("Norm of spin density: {:.6e}", rsm_amo.norm());
    // cumulant of the equal-spin decomposition; the exchange term of E2_cum makes up for it
    let cdm_amo = get_2cdm_from_2rdm(&dm2, &dm1_amo);

    let one_rdm_imp = core.make_rdm1(imp2mo, &dm1_amo);
    let e_imp = e_casscf + chempot.component_mul(&one_rdm_imp).sum();
    let e2_cum = 0.5 * core.cas_eri(imp2mo).contract(&cdm_amo)
        + 0.25 * frag.impham_eri.get_jk(&rsm_imp).1.component_mul(&rsm_imp).sum();
    let (spin_square, multiplicity) = solver.spin_square(ci);

    frag.imp_cache = Some((imp2mo.clone(), ci.clone()));
    frag.ci_as = Some(ci.clone());
    frag.ci_as_orb = Some(loc2amo.clone());
    frag.one_rdm_loc = Some(symmetrize(
        &(&frag.one_rdm_froz_loc + &frag.loc2imp * &one_rdm_imp * frag.loc2imp.transpose()),
    ));
    frag.e_imp = e_imp;
    frag.one_rdm_as_loc = Some(symmetrize(&represent_operator_in_basis(&dm1_amo, &loc2amo.transpose())));
    frag.one_rsm_as_loc = Some(symmetrize(&represent_operator_in_basis(&rsm_amo, &loc2amo.transpose())));
    frag.two_cdm_imp_amo = Some(cdm_amo);
    frag.loc2mo = loc2mo;
    frag.loc2amo = loc2amo;
    frag.e2_cum = e2_cum;

    AssemblySummary {
        spin_square,
        multiplicity,
        e_imp,
    }
}
