//! Initial orbitals and CI vector for the active-space optimizer.
//!
//! Guesses are taken, in order of preference, from the cached solution of the
//! previous solve, from the stored active orbitals and their density, from a
//! caller-supplied active-orbital guess, or from the canonical mean-field
//! orbitals.

use crate::ci_impl::{transform_ci_for_orbital_rotation, CiVector};
use crate::error::{Result, SolverError};
use crate::fragment::Fragment;
use crate::scf_impl::MeanFieldResult;
use basis::basis::{measure_basis_nonorthonormality, represent_operator_in_basis};
use basis::helper::{hstack, lowdin_orthonormalize, matrix_eigen_control_options, matrix_svd_control_options, SortOrder};
use nalgebra::{DMatrix, DVector};
use tracing::{info, warn};

/// Where the guess orbitals came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessSource {
    Cached,
    ActiveSpaceProjection,
    StoredActiveOrbitals,
    Canonical,
}

/// Orbitals (impurity basis, columns), optional CI vector and the operator
/// used to order the orbital blocks.
#[derive(Debug, Clone)]
pub struct OrbitalGuess {
    pub imp2mo: DMatrix<f64>,
    pub ci0: Option<CiVector>,
    pub occ: DVector<f64>,
    pub fock: DMatrix<f64>,
    pub source: GuessSource,
}

/// Result of projecting guess active orbitals onto the impurity space.
#[derive(Debug, Clone)]
pub struct ProjectedGuess {
    /// `[core | active | external]`.
    pub imp2mo: DMatrix<f64>,
    pub occ: DVector<f64>,
    /// Weight of each guess orbital captured by its assigned active orbital.
    pub fidelities: Vec<f64>,
}

/// Active-space partition the guess is built for.
#[derive(Debug, Clone, Copy)]
pub struct ActivePartition {
    pub ncore: usize,
    pub ncas: usize,
    pub nelecas: (usize, usize),
}

fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    (0..k.min(n - k)).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

/// Shape of a CI vector for `ncas` orbitals and `nelecas` electrons.
pub fn ci_shape(ncas: usize, nelecas: (usize, usize)) -> (usize, usize) {
    (binomial(ncas, nelecas.0), binomial(ncas, nelecas.1))
}

fn default_occupations(nmo: usize, ncore: usize, ncas: usize) -> DVector<f64> {
    DVector::from_fn(nmo, |i, _| {
        if i < ncore {
            2.0
        } else if i < ncore + ncas {
            1.0
        } else {
            0.0
        }
    })
}

/// Map guess active orbitals `loc2gamo` (local basis) onto the impurity
/// orbitals `loc2imp`.
///
/// The best-fit active subspace is spanned by the leading eigenvectors of the
/// projector onto the guess. Its vectors are then matched greedily to the
/// guess orbitals (largest captured weight first), so the `j`-th active
/// orbital corresponds to the `j`-th guess orbital. The rest of the impurity
/// space is ordered by `fock` and split into `ncore` core and the external
/// orbitals. With `dm` (local basis) the active orbitals are rotated to its
/// natural orbitals afterwards.
pub fn project_amo_manually(
    loc2imp: &DMatrix<f64>,
    loc2gamo: &DMatrix<f64>,
    fock: &DMatrix<f64>,
    ncore: usize,
    dm: Option<&DMatrix<f64>>,
) -> Result<ProjectedGuess> {
    let nimp = loc2imp.ncols();
    let namo = loc2gamo.ncols();
    if loc2gamo.nrows() != loc2imp.nrows() || namo + ncore > nimp {
        return Err(SolverError::InvalidInput(format!(
            "cannot place {} guess active and {} core orbitals into {} impurity orbitals",
            namo, ncore, nimp
        )));
    }

    let imp2gamo = loc2imp.transpose() * loc2gamo;
    let proj = &imp2gamo * imp2gamo.transpose();
    let (_, evecs) = matrix_eigen_control_options(&proj, SortOrder::Descending, false);
    let mut imp2amo = evecs.columns(0, namo).into_owned();
    let imp2imo = evecs.columns(namo, nimp - namo).into_owned();
    let fock_imo = represent_operator_in_basis(fock, &imp2imo);
    let (_, fevecs) = matrix_eigen_control_options(&fock_imo, SortOrder::Ascending, false);
    let imp2imo = imp2imo * fevecs;
    let imp2cmo = imp2imo.columns(0, ncore).into_owned();
    let imp2vmo = imp2imo.columns(ncore, nimp - namo - ncore).into_owned();

    let mut assigned = DMatrix::zeros(nimp, namo);
    let mut fidelities = vec![0.0; namo];
    let mut open: Vec<usize> = (0..namo).collect();
    while imp2amo.ncols() > 0 && !open.is_empty() {
        let overlaps = imp2amo.transpose() * &imp2gamo;
        let mut best: Option<(f64, usize, DMatrix<f64>)> = None;
        for (pos, &slot) in open.iter().enumerate() {
            let o = overlaps.column(slot);
            let (evals, vecs) = matrix_eigen_control_options(&(o * o.transpose()), SortOrder::Descending, false);
            if best.as_ref().map_or(true, |b| evals[0] > b.0) {
                best = Some((evals[0], pos, vecs));
            }
        }
        let Some((weight, pos, vecs)) = best else { break };
        let slot = open.remove(pos);
        fidelities[slot] = weight;
        assigned.set_column(slot, &(&imp2amo * vecs.column(0)));
        imp2amo = &imp2amo * vecs.columns(1, vecs.ncols() - 1);
    }
    for (slot, k) in open.into_iter().zip(0..imp2amo.ncols()) {
        assigned.set_column(slot, &imp2amo.column(k));
    }
    info!("Fidelity of projection of guess active orbitals onto impurity space: {:?}", fidelities);

    for j in 0..namo {
        if assigned.column(j).dot(&imp2gamo.column(j)) < 0.0 {
            assigned.column_mut(j).neg_mut();
        }
    }

    let mut occ = default_occupations(nimp, ncore, namo);
    if let Some(dm) = dm {
        let loc2amo = loc2imp * &assigned;
        let (evals, nat) = matrix_eigen_control_options(&represent_operator_in_basis(dm, &loc2amo), SortOrder::Descending, false);
        assigned = assigned * nat;
        info!("Guess density matrix eigenvalues for guess active orbitals: {:?}", evals.as_slice());
        occ.rows_mut(ncore, namo).copy_from(&evals);
    }

    Ok(ProjectedGuess {
        imp2mo: hstack(&[&imp2cmo, &assigned, &imp2vmo]),
        occ,
        fidelities,
    })
}

/// Mean-field orbitals rotated onto the eigenvectors of their Fock matrix.
fn canonical_guess(mf: &MeanFieldResult, fock: &DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let dm = mf.make_rdm1();
    let fock_mo = represent_operator_in_basis(fock, &mf.mo_coeff);
    let (_, evecs) = matrix_eigen_control_options(&fock_mo, SortOrder::Ascending, false);
    let imp2mo = &mf.mo_coeff * evecs;
    let occ = represent_operator_in_basis(&dm, &imp2mo).diagonal();
    (imp2mo, occ)
}

fn cached_guess(frag: &Fragment, part: ActivePartition) -> Option<(DMatrix<f64>, Option<CiVector>)> {
    let (mo, ci) = frag.imp_cache.as_ref()?;
    let nimp = frag.norbs_imp();
    if mo.shape() != (nimp, nimp) {
        warn!("Discarding cached orbitals of shape {:?}; impurity has {} orbitals", mo.shape(), nimp);
        return None;
    }
    let ci = if ci.shape() == ci_shape(part.ncas, part.nelecas) {
        Some(ci.clone())
    } else {
        info!("Discarding cached CI vector of shape {:?}", ci.shape());
        None
    };
    Some((mo.clone(), ci))
}

/// Rotate the stored CI vector into the new active orbitals when they span
/// the same space as the orbitals it was solved in.
pub(super) fn project_ci_guess(frag: &Fragment, imp2mo: &mut DMatrix<f64>, part: ActivePartition) -> Option<CiVector> {
    let ci_as = frag.ci_as.as_ref()?;
    let ci_as_orb = frag.ci_as_orb.as_ref()?;
    let ActivePartition { ncore, ncas, nelecas } = part;
    if ci_as.shape() != ci_shape(ncas, nelecas) || ci_as_orb.ncols() != ncas {
        info!("Discarding stored CI guess: it belongs to a different active space");
        return None;
    }
    let loc2amo = &frag.loc2imp * imp2mo.columns(ncore, ncas);
    let overlap = loc2amo.transpose() * ci_as_orb;
    let (umat_g, svals, umat_c) = matrix_svd_control_options(&overlap, SortOrder::Descending, true);
    if svals.len() != ncas {
        info!(
            "Discarding stored CI guess because orbitals are too different (missing {} nonzero singular values)",
            ncas - svals.len()
        );
        return None;
    }
    info!("Loading CI guess despite shifted impurity orbitals; singular value sum: {:.6}", svals.sum());
    let rotated = imp2mo.columns(ncore, ncas) * umat_g;
    imp2mo.columns_mut(ncore, ncas).copy_from(&rotated);
    Some(transform_ci_for_orbital_rotation(ci_as, ncas, nelecas, &umat_c))
}

/// Build the guess and consume the one-shot overrides it uses.
///
/// `fock_imp` orders projected guesses; `fock_mf` (the Fock matrix of the
/// mean-field density) orders the canonical one.
pub fn build_guess(
    frag: &mut Fragment,
    mf: &MeanFieldResult,
    fock_imp: &DMatrix<f64>,
    fock_mf: &DMatrix<f64>,
    part: ActivePartition,
) -> Result<OrbitalGuess> {
    let nimp = frag.norbs_imp();
    let nelecas_total = part.nelecas.0 + part.nelecas.1;

    let mut guess = if let Some((imp2mo, ci0)) = cached_guess(frag, part) {
        info!("Taking molecular orbitals and CI vector from cache");
        OrbitalGuess {
            imp2mo,
            ci0,
            occ: default_occupations(nimp, part.ncore, part.ncas),
            fock: fock_imp.clone(),
            source: GuessSource::Cached,
        }
    } else if frag.norbs_as() > 0 {
        let dm = frag.one_rdm_as_loc.clone();
        let nelec_guess = dm
            .as_ref()
            .map_or(nelecas_total, |dm| dm.trace().round().max(0.0) as usize);
        let ncore_guess = frag.nelec_imp.saturating_sub(nelec_guess) / 2;
        info!(
            "Projecting stored active orbitals (spanning {} electrons) onto the impurity basis",
            nelec_guess
        );
        let projected = project_amo_manually(&frag.loc2imp, &frag.loc2amo, fock_imp, ncore_guess, dm.as_ref())?;
        OrbitalGuess {
            imp2mo: projected.imp2mo,
            ci0: None,
            occ: projected.occ,
            fock: fock_imp.clone(),
            source: GuessSource::ActiveSpaceProjection,
        }
    } else if let Some(loc2gamo) = frag.loc2amo_guess.take() {
        info!("Projecting the supplied active-orbital guess onto the impurity basis (no density available)");
        let projected = project_amo_manually(&frag.loc2imp, &loc2gamo, fock_imp, part.ncore, None)?;
        OrbitalGuess {
            imp2mo: projected.imp2mo,
            ci0: None,
            occ: projected.occ,
            fock: fock_imp.clone(),
            source: GuessSource::StoredActiveOrbitals,
        }
    } else {
        info!("No stored active orbitals; using canonical mean-field orbitals as initial guess");
        let (imp2mo, occ) = canonical_guess(mf, fock_mf);
        OrbitalGuess {
            imp2mo,
            ci0: None,
            occ,
            fock: fock_mf.clone(),
            source: GuessSource::Canonical,
        }
    };

    if let Some(mut callback) = frag.cas_guess_callback.take() {
        let loc2mo = &frag.loc2imp * &guess.imp2mo;
        let imp2mo = frag.loc2imp.transpose() * callback(&loc2mo);
        let err = measure_basis_nonorthonormality(&imp2mo);
        guess.imp2mo = if err > 1e-10 {
            warn!("Guess callback returned non-orthonormal orbitals (error {:.3e}); Lowdin-orthonormalizing", err);
            lowdin_orthonormalize(&imp2mo)
        } else {
            imp2mo
        };
    }

    if guess.source != GuessSource::Cached {
        guess.ci0 = project_ci_guess(frag, &mut guess.imp2mo, part);
    }
    Ok(guess)
}

/// Reorder `mo` so the listed orbitals (1-based) form the active block.
pub fn sort_mo(mo: &DMatrix<f64>, caslst: &[usize], ncore: usize, ncas: usize) -> Result<DMatrix<f64>> {
    let nmo = mo.ncols();
    if caslst.len() != ncas || caslst.iter().any(|&i| i == 0 || i > nmo) {
        return Err(SolverError::InvalidInput(format!(
            "active orbital list {:?} does not select {} of {} orbitals",
            caslst, ncas, nmo
        )));
    }
    let cas: Vec<usize> = caslst.iter().map(|&i| i - 1).collect();
    let rest: Vec<usize> = (0..nmo).filter(|i| !cas.contains(i)).collect();
    if rest.len() + ncas != nmo || rest.len() < ncore {
        return Err(SolverError::InvalidInput(format!(
            "active orbital list {:?} repeats orbitals or leaves no room for {} core orbitals",
            caslst, ncore
        )));
    }
    let order: Vec<usize> = rest[..ncore]
        .iter()
        .chain(cas.iter())
        .chain(rest[ncore..].iter())
        .copied()
        .collect();
    Ok(mo.select_columns(&order))
}
