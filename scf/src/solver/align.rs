//! Canonical ordering of the core, active and external orbital blocks.

use basis::basis::measure_basis_nonorthonormality;
use basis::helper::{hstack, SortOrder};
use basis::symmetry::{
    align_subspace, cleanup_subspace_symmetry, measure_subspace_blockbreaking, SortingMetric,
    SymmetryBlocks,
};
use nalgebra::DMatrix;
use tracing::{debug, info};

/// Rotate one orbital block onto the eigenvectors of `metric`.
///
/// Returns `(aligned, umat, labels)` with `aligned = block * umat`; `labels`
/// holds the dominant irrep of each aligned orbital when `symm` is given.
pub fn align_orbital_block(
    block: &DMatrix<f64>,
    metric: SortingMetric<'_>,
    order: SortOrder,
    symm: Option<&SymmetryBlocks>,
    orbital_type: &str,
) -> (DMatrix<f64>, DMatrix<f64>, Vec<usize>) {
    let (aligned, umat, labels) = align_subspace(block, metric, order, symm);
    if let Some(symm) = symm {
        let names: Vec<&str> = labels.iter().map(|&l| symm.irrep_name(l)).collect();
        debug!("{} orbital irreps: {:?}", orbital_type, names);
    }
    (aligned, umat, labels)
}

/// Orbitals after alignment plus the rotation applied inside the active block.
#[derive(Debug, Clone)]
pub struct AlignedOrbitals {
    pub mo: DMatrix<f64>,
    /// `new_active = old_active * active_umat`.
    pub active_umat: DMatrix<f64>,
}

/// Ordering of the active block.
#[derive(Debug, Clone, Copy)]
pub enum ActiveMetric<'a> {
    /// Ambient Fock operator, ascending. Used for guesses.
    Fock,
    /// Active 1-RDM, descending. Used for optimized orbitals.
    Occupation(&'a DMatrix<f64>),
}

/// Align core, active and external blocks of `mo`.
///
/// Core and external blocks are ordered by ascending `fock`. With `symm` the
/// whole set is cleaned up afterwards and the active rotation is extended by
/// the cleanup, so the CI vector can follow it.
pub fn align_orbital_blocks(
    mo: &DMatrix<f64>,
    ncore: usize,
    ncas: usize,
    fock: &DMatrix<f64>,
    active: ActiveMetric<'_>,
    symm: Option<&SymmetryBlocks>,
    stage: &str,
) -> AlignedOrbitals {
    let nocc = ncore + ncas;
    let core = mo.columns(0, ncore).into_owned();
    let amo = mo.columns(ncore, ncas).into_owned();
    let ext = mo.columns(nocc, mo.ncols() - nocc).into_owned();

    let fock_metric = SortingMetric::Ambient(fock);
    let (core, _, _) = align_orbital_block(&core, fock_metric, SortOrder::Ascending, symm, &format!("{} inactive", stage));
    let (amo, mut umat, _) = match active {
        ActiveMetric::Fock => {
            align_orbital_block(&amo, fock_metric, SortOrder::Ascending, symm, &format!("{} active", stage))
        }
        ActiveMetric::Occupation(dm) => align_orbital_block(
            &amo,
            SortingMetric::Block(dm),
            SortOrder::Descending,
            symm,
            &format!("{} active", stage),
        ),
    };
    let (ext, _, _) = align_orbital_block(&ext, fock_metric, SortOrder::Ascending, symm, &format!("{} external", stage));

    let mut aligned = hstack(&[&core, &amo, &ext]);
    if let Some(symm) = symm {
        aligned = cleanup_symmetry(&aligned, symm, stage);
        if ncas > 0 {
            umat = umat * (amo.transpose() * aligned.columns(ncore, ncas));
        }
    }
    AlignedOrbitals {
        mo: aligned,
        active_umat: umat,
    }
}

/// Project orbitals onto their dominant irreps and log what is left over.
pub fn cleanup_symmetry(mo: &DMatrix<f64>, symm: &SymmetryBlocks, stage: &str) -> DMatrix<f64> {
    let cleaned = cleanup_subspace_symmetry(mo, symm);
    info!(
        "{} symmetry error after cleanup = {:.3e}",
        stage,
        measure_subspace_blockbreaking(&cleaned, symm)
    );
    info!(
        "{} orthonormality error after cleanup = {:.3e}",
        stage,
        measure_basis_nonorthonormality(&cleaned)
    );
    cleaned
}
