//! Symmetry-adapted subspaces.
//!
//! A set of symmetry blocks is a list of orthonormal bases, one per irreducible
//! representation, that together span an ambient space. Orbitals are
//! classified by how much of their norm falls inside each block.

use crate::basis::{is_basis_orthonormal, represent_operator_in_basis};
use crate::helper::{lowdin_orthonormalize, matrix_eigen_control_options, SortOrder};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Eigenvalue of a projector above which a direction belongs to the block.
const BLOCK_MEMBERSHIP: f64 = 0.5;

/// Per-irrep orthonormal bases of one ambient space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetryBlocks {
    pub blocks: Vec<DMatrix<f64>>,
    pub irrep_ids: Vec<u32>,
    pub irrep_names: Vec<String>,
}

/// Metric used to order the vectors of an orbital block.
#[derive(Debug, Clone, Copy)]
pub enum SortingMetric<'a> {
    /// Operator over the ambient space; represented in the block before use.
    Ambient(&'a DMatrix<f64>),
    /// Operator already expressed over the block's columns.
    Block(&'a DMatrix<f64>),
}

/// Restrict symmetry blocks given over a large space to the subspace spanned by
/// the columns of `loc2sub`.
///
/// Each returned block is expressed in the coordinates of `loc2sub` and keeps
/// the directions whose weight inside the parent block exceeds one half.
pub fn get_subspace_symmetry_blocks(
    loc2sub: &DMatrix<f64>,
    loc2symm: &[DMatrix<f64>],
) -> Vec<DMatrix<f64>> {
    loc2symm
        .iter()
        .map(|symm| {
            let ovlp = loc2sub.transpose() * symm;
            let proj = &ovlp * ovlp.transpose();
            let (evals, evecs) = matrix_eigen_control_options(&proj, SortOrder::Descending, false);
            let keep: Vec<usize> = (0..evals.len())
                .filter(|&i| evals[i] > BLOCK_MEMBERSHIP)
                .collect();
            if keep.is_empty() {
                DMatrix::zeros(loc2sub.ncols(), 0)
            } else {
                evecs.select_columns(&keep)
            }
        })
        .collect()
}

impl SymmetryBlocks {
    pub fn new(blocks: Vec<DMatrix<f64>>, irrep_ids: Vec<u32>, irrep_names: Vec<String>) -> Self {
        SymmetryBlocks {
            blocks,
            irrep_ids,
            irrep_names,
        }
    }

    pub fn nirrep(&self) -> usize {
        self.blocks.len()
    }

    pub fn dim(&self) -> usize {
        self.blocks.first().map(|b| b.nrows()).unwrap_or(0)
    }

    /// Whether the blocks are mutually orthonormal and span the ambient space.
    pub fn is_complete(&self, tol: f64) -> bool {
        let refs: Vec<&DMatrix<f64>> = self.blocks.iter().collect();
        let all = crate::helper::hstack(&refs);
        all.ncols() == self.dim() && is_basis_orthonormal(&all, tol)
    }

    /// `w[(i, j)]`: squared norm of orbital `j` inside block `i`.
    pub fn orbital_weights(&self, orbs: &DMatrix<f64>) -> DMatrix<f64> {
        let mut weights = DMatrix::zeros(self.nirrep(), orbs.ncols());
        for (i, block) in self.blocks.iter().enumerate() {
            let proj = block.transpose() * orbs;
            for j in 0..orbs.ncols() {
                weights[(i, j)] = proj.column(j).norm_squared();
            }
        }
        weights
    }

    /// Index of the dominant block of each orbital.
    pub fn label_orb_symm(&self, orbs: &DMatrix<f64>) -> Vec<usize> {
        let weights = self.orbital_weights(orbs);
        (0..orbs.ncols())
            .map(|j| {
                (0..self.nirrep())
                    .max_by(|&a, &b| {
                        weights[(a, j)]
                            .partial_cmp(&weights[(b, j)])
                            .unwrap_or(Ordering::Equal)
                    })
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Irrep ids of the dominant blocks.
    pub fn label_irrep_ids(&self, orbs: &DMatrix<f64>) -> Vec<u32> {
        self.label_orb_symm(orbs)
            .into_iter()
            .map(|i| self.irrep_ids.get(i).copied().unwrap_or(0))
            .collect()
    }

    pub fn irrep_name(&self, label: usize) -> &str {
        self.irrep_names.get(label).map(String::as_str).unwrap_or("?")
    }

    /// Split the span of `block` into its components inside each irrep.
    ///
    /// Returns, per irrep, the coefficients (in terms of the columns of
    /// `block`) of an orthonormal basis of that irrep's share of the span.
    pub fn irrep_subspaces(&self, block: &DMatrix<f64>) -> Vec<DMatrix<f64>> {
        self.blocks
            .iter()
            .map(|symm| {
                let ovlp = symm.transpose() * block;
                let proj = ovlp.transpose() * &ovlp;
                let (evals, evecs) =
                    matrix_eigen_control_options(&proj, SortOrder::Descending, false);
                let keep: Vec<usize> = (0..evals.len())
                    .filter(|&i| evals[i] > BLOCK_MEMBERSHIP)
                    .collect();
                if keep.is_empty() {
                    DMatrix::zeros(block.ncols(), 0)
                } else {
                    evecs.select_columns(&keep)
                }
            })
            .collect()
    }
}

/// Largest departure of any orbital from its dominant symmetry block,
/// `max_j (1 - max_i w_ij)`.
pub fn measure_subspace_blockbreaking(orbs: &DMatrix<f64>, symm: &SymmetryBlocks) -> f64 {
    let weights = symm.orbital_weights(orbs);
    (0..orbs.ncols())
        .map(|j| {
            let best = weights.column(j).iter().copied().fold(0.0, f64::max);
            1.0 - best
        })
        .fold(0.0, f64::max)
}

/// Project every orbital onto its dominant block and Löwdin-orthonormalize the
/// orbitals of each irrep among themselves. Column order is preserved.
pub fn cleanup_subspace_symmetry(orbs: &DMatrix<f64>, symm: &SymmetryBlocks) -> DMatrix<f64> {
    if orbs.ncols() == 0 || symm.nirrep() == 0 {
        return orbs.clone();
    }
    let labels = symm.label_orb_symm(orbs);
    let mut cleaned = orbs.clone();
    for (irrep, block) in symm.blocks.iter().enumerate() {
        let cols: Vec<usize> = (0..labels.len()).filter(|&j| labels[j] == irrep).collect();
        if cols.is_empty() {
            continue;
        }
        let projected = block * (block.transpose() * orbs.select_columns(&cols));
        let orthonormal = lowdin_orthonormalize(&projected);
        for (k, &j) in cols.iter().enumerate() {
            cleaned.set_column(j, &orthonormal.column(k));
        }
    }
    cleaned
}

/// Rotate an orbital block onto the eigenvectors of a sorting metric.
///
/// Returns `(aligned, umat, labels)` with `aligned = block * umat`. With
/// symmetry, the metric is diagonalized separately inside each irrep's share of
/// the block and `labels` holds the dominant irrep of every aligned vector;
/// otherwise `labels` is empty. If the block is not symmetry-adapted the irrep
/// split does not cover it and the unsymmetrized alignment is used.
pub fn align_subspace(
    block: &DMatrix<f64>,
    metric: SortingMetric<'_>,
    order: SortOrder,
    symm: Option<&SymmetryBlocks>,
) -> (DMatrix<f64>, DMatrix<f64>, Vec<usize>) {
    let k = block.ncols();
    if k == 0 {
        return (block.clone(), DMatrix::zeros(0, 0), Vec::new());
    }
    let metric = match metric {
        SortingMetric::Ambient(m) => represent_operator_in_basis(m, block),
        SortingMetric::Block(m) => m.clone(),
    };

    let unsymmetrized = |metric: &DMatrix<f64>| {
        let (_, umat) = matrix_eigen_control_options(metric, order, false);
        (block * &umat, umat)
    };

    let Some(symm) = symm else {
        let (aligned, umat) = unsymmetrized(&metric);
        return (aligned, umat, Vec::new());
    };

    let subspaces = symm.irrep_subspaces(block);
    let covered: usize = subspaces.iter().map(|v| v.ncols()).sum();
    if covered != k {
        let (aligned, umat) = unsymmetrized(&metric);
        let labels = symm.label_orb_symm(&aligned);
        return (aligned, umat, labels);
    }

    let mut candidates: Vec<(f64, usize, nalgebra::DVector<f64>)> = Vec::with_capacity(k);
    for (irrep, v) in subspaces.iter().enumerate() {
        if v.ncols() == 0 {
            continue;
        }
        let local = represent_operator_in_basis(&metric, v);
        let (evals, evecs) = matrix_eigen_control_options(&local, SortOrder::Unsorted, false);
        let rotated = v * evecs;
        for j in 0..rotated.ncols() {
            candidates.push((evals[j], irrep, rotated.column(j).into_owned()));
        }
    }
    match order {
        SortOrder::Ascending => {
            candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
        }
        SortOrder::Descending => {
            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal))
        }
        SortOrder::Unsorted => {}
    }

    let mut umat = DMatrix::zeros(k, k);
    let mut labels = Vec::with_capacity(k);
    for (j, (_, irrep, col)) in candidates.iter().enumerate() {
        umat.set_column(j, col);
        labels.push(*irrep);
    }
    let umat = lowdin_orthonormalize(&umat);
    (block * &umat, umat, labels)
}
