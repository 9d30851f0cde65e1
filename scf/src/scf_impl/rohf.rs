//! Restricted (open-shell) Hartree-Fock over an orthonormal impurity basis

use super::DIIS;
use crate::config::ScfParams;
use crate::error::{Result, SolverError};
use crate::integrals::TwoElectronIntegrals;
use crate::optim_impl::{finite_difference_hessian_vector, steihaug_cg, TrustRegion, UniqueVariables};
use basis::helper::{matrix_eigen_control_options, SortOrder};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

/// Converged (or last) mean-field state.
#[derive(Debug, Clone)]
pub struct MeanFieldResult {
    pub mo_coeff: DMatrix<f64>,
    pub mo_energy: DVector<f64>,
    /// 2 / 1 / 0 occupations in column order.
    pub mo_occ: DVector<f64>,
    /// Energy without the spin-exchange dressing.
    pub e_tot: f64,
    pub converged: bool,
    pub cycles: usize,
}

impl MeanFieldResult {
    /// Spin-summed density matrix.
    pub fn make_rdm1(&self) -> DMatrix<f64> {
        let scaled = DMatrix::from_fn(self.mo_coeff.nrows(), self.mo_coeff.ncols(), |i, j| {
            self.mo_coeff[(i, j)] * self.mo_occ[j]
        });
        scaled * self.mo_coeff.transpose()
    }

    pub fn somo_indices(&self) -> Vec<usize> {
        (0..self.mo_occ.len())
            .filter(|&i| (self.mo_occ[i] - 1.0).abs() < 1e-8)
            .collect()
    }
}

/// ROHF for the impurity Hamiltonian `E0 + h + (pq|rs)`.
///
/// For open shells the alpha and beta Fock matrices are dressed with `+h_s`
/// and `-h_s`; the reported energy leaves the dressing out.
pub struct ImpurityRohf<'a> {
    h1e: &'a DMatrix<f64>,
    eri: &'a TwoElectronIntegrals,
    h1e_s: Option<&'a DMatrix<f64>>,
    energy_nuc: f64,
    nalpha: usize,
    nbeta: usize,
    pub max_cycle: usize,
    pub guess_max_cycle: usize,
    pub conv_tol: f64,
    pub conv_tol_grad: f64,
    pub diis_subspace_size: usize,
    pub newton_max_cycle: usize,
}

impl<'a> ImpurityRohf<'a> {
    pub fn new(
        h1e: &'a DMatrix<f64>,
        eri: &'a TwoElectronIntegrals,
        h1e_s: Option<&'a DMatrix<f64>>,
        energy_nuc: f64,
        nelec: usize,
        two_ms: usize,
        params: &ScfParams,
    ) -> Result<Self> {
        let norb = h1e.nrows();
        if two_ms > nelec || (nelec - two_ms) % 2 != 0 {
            return Err(SolverError::InvalidInput(format!(
                "2|M_S| = {} incompatible with {} electrons",
                two_ms, nelec
            )));
        }
        let nalpha = (nelec + two_ms) / 2;
        let nbeta = (nelec - two_ms) / 2;
        if nalpha > norb {
            return Err(SolverError::InvalidInput(format!(
                "{} alpha electrons do not fit into {} orbitals",
                nalpha, norb
            )));
        }
        if eri.norb() != norb {
            return Err(SolverError::InvalidInput(format!(
                "two-electron integrals span {} orbitals, one-electron operator {}",
                eri.norb(),
                norb
            )));
        }
        let params = params.clone().with_defaults();
        Ok(ImpurityRohf {
            h1e,
            eri,
            h1e_s,
            energy_nuc,
            nalpha,
            nbeta,
            max_cycle: params.max_cycle.unwrap_or(100),
            guess_max_cycle: params.guess_max_cycle.unwrap_or(2),
            conv_tol: params.conv_tol.unwrap_or(1e-10),
            conv_tol_grad: params.conv_tol_grad.unwrap_or(1e-6),
            diis_subspace_size: params.diis_subspace_size.unwrap_or(8),
            newton_max_cycle: params.newton_max_cycle.unwrap_or(50),
        })
    }

    pub fn norb(&self) -> usize {
        self.h1e.nrows()
    }

    pub fn nelec(&self) -> (usize, usize) {
        (self.nalpha, self.nbeta)
    }

    fn dressing(&self) -> Option<&DMatrix<f64>> {
        if self.nalpha != self.nbeta {
            self.h1e_s
        } else {
            None
        }
    }

    fn occupations(&self) -> (Vec<f64>, Vec<f64>) {
        let norb = self.norb();
        let occ_a = (0..norb).map(|i| if i < self.nalpha { 1.0 } else { 0.0 }).collect();
        let occ_b = (0..norb).map(|i| if i < self.nbeta { 1.0 } else { 0.0 }).collect();
        (occ_a, occ_b)
    }

    fn mo_occ(&self) -> DVector<f64> {
        let (occ_a, occ_b) = self.occupations();
        DVector::from_iterator(self.norb(), occ_a.iter().zip(&occ_b).map(|(a, b)| a + b))
    }

    fn densities(&self, mo: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let ca = mo.columns(0, self.nalpha);
        let cb = mo.columns(0, self.nbeta);
        (&ca * ca.transpose(), &cb * cb.transpose())
    }

    /// Undressed spin Fock matrices.
    fn fock_spin_bare(&self, dma: &DMatrix<f64>, dmb: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        if self.nalpha == self.nbeta {
            let f = self.fock_for_density(&(dma + dmb));
            return (f.clone(), f);
        }
        let (ja, ka) = self.eri.get_jk(dma);
        let (jb, kb) = self.eri.get_jk(dmb);
        let common = self.h1e + ja + jb;
        (&common - ka, common - kb)
    }

    /// Alpha and beta Fock matrices including the spin-exchange dressing.
    pub fn get_fock_spin(&self, dma: &DMatrix<f64>, dmb: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let (fa, fb) = self.fock_spin_bare(dma, dmb);
        match self.dressing() {
            Some(hs) => (fa + hs, fb - hs),
            None => (fa, fb),
        }
    }

    /// Spin-averaged Fock operator of a spin-summed density, `h + J - K/2`.
    pub fn fock_for_density(&self, dm: &DMatrix<f64>) -> DMatrix<f64> {
        self.h1e + self.eri.get_veff(dm)
    }

    fn energy_bare(&self, dma: &DMatrix<f64>, dmb: &DMatrix<f64>) -> f64 {
        let (fa, fb) = self.fock_spin_bare(dma, dmb);
        let ea = (self.h1e + fa).component_mul(dma).sum();
        let eb = (self.h1e + fb).component_mul(dmb).sum();
        self.energy_nuc + 0.5 * (ea + eb)
    }

    /// Energy whose stationary points the dressed Fock matrices describe.
    fn energy_dressed(&self, mo: &DMatrix<f64>) -> f64 {
        let (dma, dmb) = self.densities(mo);
        let bare = self.energy_bare(&dma, &dmb);
        match self.dressing() {
            Some(hs) => bare + hs.component_mul(&(dma - dmb)).sum(),
            None => bare,
        }
    }

    /// Roothaan effective Fock matrix in the impurity basis.
    ///
    /// In the MO basis: closed-open block from beta, open-virtual from alpha,
    /// everything else the average.
    fn roothaan_fock(&self, fa: &DMatrix<f64>, fb: &DMatrix<f64>, mo: &DMatrix<f64>) -> DMatrix<f64> {
        if self.nalpha == self.nbeta {
            return (fa + fb) * 0.5;
        }
        let fa_mo = mo.transpose() * fa * mo;
        let fb_mo = mo.transpose() * fb * mo;
        let mut f_mo = (&fa_mo + &fb_mo) * 0.5;
        let norb = self.norb();
        let (nc, no) = (self.nbeta, self.nalpha);
        for p in 0..norb {
            for q in 0..norb {
                let (lo, hi) = (p.min(q), p.max(q));
                if lo < nc && (nc..no).contains(&hi) {
                    f_mo[(p, q)] = fb_mo[(p, q)];
                } else if (nc..no).contains(&lo) && hi >= no {
                    f_mo[(p, q)] = fa_mo[(p, q)];
                }
            }
        }
        mo * f_mo * mo.transpose()
    }

    /// Fixed-point iteration with DIIS from a spin-summed guess density.
    pub fn scf_cycle(&self, dm0: &DMatrix<f64>, max_cycle: usize) -> MeanFieldResult {
        let mut dma = dm0 * 0.5;
        let mut dmb = dm0 * 0.5;
        // natural orbitals of the guess fix the closed/open/virtual partition of the first cycle
        let (_, mut mo) = matrix_eigen_control_options(dm0, SortOrder::Descending, false);
        let mut mo_energy = DVector::zeros(self.norb());
        let mut diis = DIIS::new(self.diis_subspace_size);
        let mut e_prev = self.energy_bare(&dma, &dmb);
        let mut converged = false;
        let mut cycles = 0;

        for cycle in 0..max_cycle {
            let (fa, fb) = self.get_fock_spin(&dma, &dmb);
            let f_eff = self.roothaan_fock(&fa, &fb, &mo);
            let error = DIIS::calculate_error_matrix(&f_eff, &(&dma + &dmb));
            let norm_gorb = error.norm();

            diis.update(f_eff.clone(), error);
            let f_use = if cycle > 0 {
                diis.extrapolate().unwrap_or_else(|| f_eff.clone())
            } else {
                f_eff
            };
            let (evals, evecs) = matrix_eigen_control_options(&f_use, SortOrder::Ascending, false);
            mo = evecs;
            mo_energy = evals;
            let (na, nb) = self.densities(&mo);
            dma = na;
            dmb = nb;
            cycles = cycle + 1;

            let e_tot = self.energy_bare(&dma, &dmb);
            let delta = e_tot - e_prev;
            debug!(
                "  mean-field cycle {:3}: E = {:.12} dE = {:.3e} |[F,D]| = {:.3e}",
                cycles, e_tot, delta, norm_gorb
            );
            e_prev = e_tot;
            if cycle > 0 && delta.abs() < self.conv_tol && norm_gorb < self.conv_tol_grad {
                converged = true;
                break;
            }
        }

        MeanFieldResult {
            mo_coeff: mo,
            mo_energy,
            mo_occ: self.mo_occ(),
            e_tot: e_prev,
            converged,
            cycles,
        }
    }

    /// Orbital gradient `2 sum_s F^s_pq (n^s_q - n^s_p)` over the rotation variables.
    fn orbital_gradient(&self, mo: &DMatrix<f64>, vars: &UniqueVariables) -> DVector<f64> {
        let (dma, dmb) = self.densities(mo);
        let (fa, fb) = self.get_fock_spin(&dma, &dmb);
        let fa_mo = mo.transpose() * fa * mo;
        let fb_mo = mo.transpose() * fb * mo;
        let (occ_a, occ_b) = self.occupations();
        DVector::from_iterator(
            vars.len(),
            vars.pairs().iter().map(|&(p, q)| {
                2.0 * (fa_mo[(p, q)] * (occ_a[q] - occ_a[p]) + fb_mo[(p, q)] * (occ_b[q] - occ_b[p]))
            }),
        )
    }

    fn hessian_diagonal(&self, mo: &DMatrix<f64>, vars: &UniqueVariables) -> DVector<f64> {
        let (dma, dmb) = self.densities(mo);
        let (fa, fb) = self.get_fock_spin(&dma, &dmb);
        let fa_mo = mo.transpose() * fa * mo;
        let fb_mo = mo.transpose() * fb * mo;
        let (occ_a, occ_b) = self.occupations();
        DVector::from_iterator(
            vars.len(),
            vars.pairs().iter().map(|&(p, q)| {
                2.0 * ((occ_a[q] - occ_a[p]) * (fa_mo[(p, p)] - fa_mo[(q, q)])
                    + (occ_b[q] - occ_b[p]) * (fb_mo[(p, p)] - fb_mo[(q, q)]))
            }),
        )
    }

    /// Diagonalize the Roothaan Fock matrix within the closed, open and virtual
    /// blocks separately.
    fn canonicalize(&self, mo: &DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
        let (dma, dmb) = self.densities(mo);
        let (fa, fb) = self.get_fock_spin(&dma, &dmb);
        let f_mo = mo.transpose() * self.roothaan_fock(&fa, &fb, mo) * mo;
        let norb = self.norb();
        let mut rotated = mo.clone();
        let mut energies = DVector::zeros(norb);
        for (start, end) in [(0, self.nbeta), (self.nbeta, self.nalpha), (self.nalpha, norb)] {
            if end <= start {
                continue;
            }
            let len = end - start;
            let block = f_mo.view((start, start), (len, len)).into_owned();
            let (evals, evecs) = matrix_eigen_control_options(&block, SortOrder::Ascending, false);
            let cols = mo.columns(start, len) * evecs;
            rotated.columns_mut(start, len).copy_from(&cols);
            energies.rows_mut(start, len).copy_from(&evals);
        }
        (rotated, energies)
    }

    /// Second-order solver started from `mo0`.
    pub fn newton(&self, mo0: &DMatrix<f64>) -> MeanFieldResult {
        let (occ_a, occ_b) = self.occupations();
        let vars = UniqueVariables::from_occupations(&occ_a, &occ_b);
        let mut mo = mo0.clone();
        let mut e_tot = self.energy_dressed(&mo);
        let mut trust = TrustRegion::new(0.5);
        let mut converged = vars.is_empty();
        let mut cycles = 0;

        while !converged && cycles < self.newton_max_cycle {
            cycles += 1;
            let g = self.orbital_gradient(&mo, &vars);
            let gnorm = g.norm();
            if gnorm < self.conv_tol_grad {
                converged = true;
                break;
            }
            let h_diag = self.hessian_diagonal(&mo, &vars);
            let mo_ref = &mo;
            let h_op = |x: &DVector<f64>| {
                finite_difference_hessian_vector(
                    |k| self.orbital_gradient(&(mo_ref * vars.rotation(k)), &vars),
                    x,
                )
            };
            let step = steihaug_cg(h_op, &h_diag, &g, trust.radius, 0.1 * gnorm.min(1.0) * gnorm, 40);
            let mo_new = &mo * vars.rotation(&step.x);
            let e_new = self.energy_dressed(&mo_new);
            debug!(
                "  Newton cycle {:3}: E = {:.12} |g| = {:.3e} step = {:.3e} ({} CG)",
                cycles,
                e_new,
                gnorm,
                step.x.norm(),
                step.iterations
            );
            if trust.update(e_new - e_tot, step.predicted, step.hit_boundary) {
                mo = mo_new;
                e_tot = e_new;
            }
        }

        let (mo, mo_energy) = self.canonicalize(&mo);
        let (dma, dmb) = self.densities(&mo);
        MeanFieldResult {
            mo_coeff: mo,
            mo_energy,
            mo_occ: self.mo_occ(),
            e_tot: self.energy_bare(&dma, &dmb),
            converged,
            cycles,
        }
    }

    /// Internal stability analysis. Returns rotated orbitals along the lowest
    /// Hessian mode when it is negative, `None` when the state is stable.
    pub fn stability(&self, mo: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        let (occ_a, occ_b) = self.occupations();
        let vars = UniqueVariables::from_occupations(&occ_a, &occ_b);
        let nvar = vars.len();
        if nvar == 0 {
            return None;
        }
        let mut hess = DMatrix::zeros(nvar, nvar);
        for i in 0..nvar {
            let mut e = DVector::zeros(nvar);
            e[i] = 1.0;
            let col = finite_difference_hessian_vector(
                |k| self.orbital_gradient(&(mo * vars.rotation(k)), &vars),
                &e,
            );
            hess.set_column(i, &col);
        }
        let (evals, evecs) = matrix_eigen_control_options(&hess, SortOrder::Ascending, false);
        let lowest = evals[0];
        debug!("  lowest mean-field Hessian eigenvalue: {:.6e}", lowest);
        if lowest > -1e-5 {
            return None;
        }
        info!("Mean-field instability detected (Hessian eigenvalue {:.6e})", lowest);
        let mode = evecs.column(0).into_owned();
        let e0 = self.energy_dressed(mo);
        [0.1, 0.25, 0.5, 1.0]
            .iter()
            .map(|&t| {
                let rotated = mo * vars.rotation(&(&mode * t));
                (self.energy_dressed(&rotated), rotated)
            })
            .filter(|(e, _)| *e < e0)
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, rotated)| rotated)
    }

    /// Full driver: fixed point, Newton fallback and stability checks.
    ///
    /// With `guess_only` the fixed-point iteration is capped at
    /// `guess_max_cycle` and no fallback is attempted.
    pub fn kernel(&self, dm0: &DMatrix<f64>, guess_only: bool, num_stab_checks: usize) -> MeanFieldResult {
        let max_cycle = if guess_only { self.guess_max_cycle } else { self.max_cycle };
        let mut result = self.scf_cycle(dm0, max_cycle);
        if guess_only {
            return result;
        }
        if !result.converged {
            info!("Mean-field fixed-point iteration not converged; initiating Newton solver");
            result = self.newton(&result.mo_coeff);
            if !result.converged {
                warn!("Mean-field Newton solver did not converge; proceeding with last orbitals");
            }
        }
        for check in 0..num_stab_checks {
            let Some(mo) = self.stability(&result.mo_coeff) else {
                debug!("Mean-field stability check {}: stable", check + 1);
                break;
            };
            let (dma, dmb) = self.densities(&mo);
            result = self.scf_cycle(&(dma + dmb), self.max_cycle);
            if !result.converged {
                result = self.newton(&result.mo_coeff);
            }
        }
        result
    }

    /// Trace of `h_s` over the singly occupied orbitals.
    pub fn somo_spin_exchange(&self, result: &MeanFieldResult) -> f64 {
        match self.h1e_s {
            Some(hs) => result
                .somo_indices()
                .into_iter()
                .map(|i| {
                    let c = result.mo_coeff.column(i);
                    c.dot(&(hs * c))
                })
                .sum(),
            None => 0.0,
        }
    }
}
