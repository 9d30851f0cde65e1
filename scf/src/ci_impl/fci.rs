//! Determinant full CI with spin and symmetry selection

use super::strings::StringSpace;
use super::{CiSolver, CiVector, OneBody, Rdm1};
use crate::config::FciParams;
use crate::error::{Result, SolverError};
use basis::helper::{matrix_eigen_control_options, SortOrder};
use basis::tensor::Eri4;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Alpha and beta string spaces of one active space.
#[derive(Debug, Clone)]
pub struct FciSpace {
    pub norb: usize,
    pub alpha: StringSpace,
    pub beta: StringSpace,
}

impl FciSpace {
    pub fn new(norb: usize, nelec: (usize, usize)) -> Self {
        let alpha = StringSpace::new(norb, nelec.0);
        let beta = if nelec.1 == nelec.0 {
            alpha.clone()
        } else {
            StringSpace::new(norb, nelec.1)
        };
        FciSpace { norb, alpha, beta }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.alpha.len(), self.beta.len())
    }

    /// Spin-summed `E_pq c`.
    pub fn apply_epq(&self, p: usize, q: usize, c: &DMatrix<f64>) -> DMatrix<f64> {
        let (na, nb) = self.shape();
        let mut out = DMatrix::zeros(na, nb);
        self.alpha.apply_rows(p, q, c, &mut out, 1.0);
        self.beta.apply_cols(p, q, c, &mut out, 1.0);
        out
    }

    /// `E_rs c` for every pair, indexed `r * norb + s`.
    fn excitations(&self, c: &DMatrix<f64>) -> Vec<DMatrix<f64>> {
        let n = self.norb;
        (0..n * n)
            .into_par_iter()
            .map(|rs| self.apply_epq(rs / n, rs % n, c))
            .collect()
    }

    /// `S^2 c = (N_b + S_z + S_z^2) c - sum_pq E^a_qp E^b_pq c`.
    pub fn apply_spin_square(&self, c: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.norb;
        let (na, nb) = self.shape();
        let sz = 0.5 * (self.alpha.nelec() as f64 - self.beta.nelec() as f64);
        let mut out = c * (self.beta.nelec() as f64 + sz + sz * sz);
        for p in 0..n {
            for q in 0..n {
                let mut tmp = DMatrix::zeros(na, nb);
                self.beta.apply_cols(p, q, c, &mut tmp, 1.0);
                self.alpha.apply_rows(q, p, &tmp, &mut out, -1.0);
            }
        }
        out
    }

    /// Determinants `(alpha, beta)` whose irrep product equals `wfnsym`.
    fn allowed(&self, orbsym: Option<&[u32]>, wfnsym: Option<u32>) -> Vec<(usize, usize)> {
        let (na, nb) = self.shape();
        match (orbsym, wfnsym) {
            (Some(sym), Some(target)) => {
                let ia: Vec<u32> = (0..na).map(|i| self.alpha.irrep(i, sym)).collect();
                let ib: Vec<u32> = (0..nb).map(|i| self.beta.irrep(i, sym)).collect();
                (0..na)
                    .flat_map(|a| (0..nb).map(move |b| (a, b)))
                    .filter(|&(a, b)| ia[a] ^ ib[b] == target)
                    .collect()
            }
            _ => (0..na).flat_map(|a| (0..nb).map(move |b| (a, b))).collect(),
        }
    }
}

/// Active-space Hamiltonian with separate alpha and beta one-body parts.
struct Hamiltonian<'a> {
    space: &'a FciSpace,
    h_alpha: DMatrix<f64>,
    h_beta: DMatrix<f64>,
    eri: &'a Eri4,
}

impl<'a> Hamiltonian<'a> {
    fn new(space: &'a FciSpace, h1: &OneBody, eri: &'a Eri4) -> Self {
        let (h_alpha, h_beta) = h1.alpha_beta();
        Hamiltonian {
            space,
            h_alpha,
            h_beta,
            eri,
        }
    }

    /// `H c` with `H = sum h^s_pq E^s_pq + 1/2 sum (pq|rs) (E_pq E_rs - d_qr E_ps)`.
    fn sigma(&self, c: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.space.norb;
        let (na, nb) = self.space.shape();
        // fold the d_qr term into the one-body part
        let exchange = DMatrix::from_fn(n, n, |p, s| (0..n).map(|q| self.eri[(p, q, q, s)]).sum::<f64>());
        let ka = &self.h_alpha - &exchange * 0.5;
        let kb = &self.h_beta - &exchange * 0.5;

        let mut sigma = DMatrix::zeros(na, nb);
        for p in 0..n {
            for q in 0..n {
                self.space.alpha.apply_rows(p, q, c, &mut sigma, ka[(p, q)]);
                self.space.beta.apply_cols(p, q, c, &mut sigma, kb[(p, q)]);
            }
        }

        let t = self.space.excitations(c);
        let g: Vec<DMatrix<f64>> = (0..n * n)
            .into_par_iter()
            .map(|pq| {
                let (p, q) = (pq / n, pq % n);
                let mut acc = DMatrix::zeros(na, nb);
                for (rs, trs) in t.iter().enumerate() {
                    let v = self.eri[(p, q, rs / n, rs % n)];
                    if v.abs() > 1e-14 {
                        acc += trs * v;
                    }
                }
                acc
            })
            .collect();
        for (pq, gpq) in g.iter().enumerate() {
            let (p, q) = (pq / n, pq % n);
            self.space.alpha.apply_rows(p, q, gpq, &mut sigma, 0.5);
            self.space.beta.apply_cols(p, q, gpq, &mut sigma, 0.5);
        }
        sigma
    }

    /// Slater-rule diagonal of the allowed determinants.
    fn diagonal(&self, allowed: &[(usize, usize)]) -> DVector<f64> {
        let eri = self.eri;
        let same_spin = |occ: &[usize]| -> f64 {
            let mut e = 0.0;
            for &i in occ {
                for &j in occ {
                    e += 0.5 * (eri[(i, i, j, j)] - eri[(i, j, j, i)]);
                }
            }
            e
        };
        DVector::from_iterator(
            allowed.len(),
            allowed.iter().map(|&(a, b)| {
                let oa = self.space.alpha.occupied(a);
                let ob = self.space.beta.occupied(b);
                let mut e: f64 = oa.iter().map(|&i| self.h_alpha[(i, i)]).sum::<f64>()
                    + ob.iter().map(|&i| self.h_beta[(i, i)]).sum::<f64>();
                e += same_spin(&oa) + same_spin(&ob);
                for &i in &oa {
                    for &j in &ob {
                        e += eri[(i, i, j, j)];
                    }
                }
                e
            }),
        )
    }
}

/// Spin-resolved one-body densities `<a+_p a_q>`.
pub fn make_rdm1s(ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (DMatrix<f64>, DMatrix<f64>) {
    let space = FciSpace::new(norb, nelec);
    let (na, nb) = space.shape();
    let mut dma = DMatrix::zeros(norb, norb);
    let mut dmb = DMatrix::zeros(norb, norb);
    for p in 0..norb {
        for q in 0..norb {
            let mut ta = DMatrix::zeros(na, nb);
            space.alpha.apply_rows(p, q, ci, &mut ta, 1.0);
            dma[(p, q)] = ci.dot(&ta);
            let mut tb = DMatrix::zeros(na, nb);
            space.beta.apply_cols(p, q, ci, &mut tb, 1.0);
            dmb[(p, q)] = ci.dot(&tb);
        }
    }
    (dma, dmb)
}

/// Spin-summed densities: `dm1[p,q] = <E_pq>` and
/// `dm2[p,q,r,s] = <E_pq E_rs> - d_qr <E_ps>`.
pub fn make_rdm12(ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (DMatrix<f64>, Eri4) {
    let space = FciSpace::new(norb, nelec);
    let t = space.excitations(ci);
    let n = norb;
    let dm1 = DMatrix::from_fn(n, n, |p, q| ci.dot(&t[p * n + q]));
    let mut dm2 = Eri4::zeros(n);
    for p in 0..n {
        for q in 0..n {
            for r in 0..n {
                for s in 0..n {
                    let mut v = t[q * n + p].dot(&t[r * n + s]);
                    if q == r {
                        v -= dm1[(p, s)];
                    }
                    dm2[(p, q, r, s)] = v;
                }
            }
        }
    }
    (dm1, dm2)
}

/// `(<S^2>, 2S+1)` of a CI vector.
pub fn spin_square(ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (f64, f64) {
    let space = FciSpace::new(norb, nelec);
    let norm2 = ci.dot(ci);
    if norm2 < 1e-300 {
        return (0.0, 1.0);
    }
    let ss = ci.dot(&space.apply_spin_square(ci)) / norm2;
    let multip = 2.0 * (ss.max(0.0) + 0.25).sqrt();
    (ss, multip)
}

/// Lowest eigenpair of `apply` by Davidson iteration with a diagonal
/// preconditioner. Returns `(eigenvalue, vector, converged)`.
fn davidson<A>(
    apply: A,
    diag: &DVector<f64>,
    x0: DVector<f64>,
    tol: f64,
    max_cycle: usize,
    max_space: usize,
) -> (f64, DVector<f64>, bool)
where
    A: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = x0.len();
    let x0 = x0.normalize();
    let mut images = vec![apply(&x0)];
    let mut space = vec![x0];
    let mut theta = 0.0;
    let mut x = space[0].clone();
    let mut e_prev = f64::INFINITY;
    let mut converged = false;

    for cycle in 0..max_cycle {
        let k = space.len();
        let sub = DMatrix::from_fn(k, k, |i, j| space[i].dot(&images[j]));
        let (evals, evecs) = matrix_eigen_control_options(&sub, SortOrder::Ascending, false);
        theta = evals[0];
        let y = evecs.column(0);
        x = space.iter().zip(y.iter()).fold(DVector::zeros(n), |acc, (v, &w)| acc + v * w);
        let ax = images.iter().zip(y.iter()).fold(DVector::zeros(n), |acc, (v, &w)| acc + v * w);
        let r = &ax - &x * theta;
        let rnorm = r.norm();
        debug!("    Davidson {:3}: e = {:.12} |r| = {:.3e}", cycle, theta, rnorm);
        if rnorm < tol.sqrt() && (theta - e_prev).abs() < tol.max(1e-14) {
            converged = true;
            break;
        }
        e_prev = theta;

        let mut t = DVector::from_iterator(
            n,
            r.iter().zip(diag.iter()).map(|(ri, di)| {
                let d = theta - di;
                ri / if d.abs() < 1e-8 { 1e-8f64.copysign(d) } else { d }
            }),
        );
        if space.len() >= max_space {
            space = vec![x.clone()];
            images = vec![ax];
        }
        for _ in 0..2 {
            for v in &space {
                let ov = v.dot(&t);
                t -= v * ov;
            }
        }
        let tnorm = t.norm();
        if tnorm < 1e-12 {
            converged = rnorm < tol.sqrt().max(1e-7);
            break;
        }
        t /= tnorm;
        images.push(apply(&t));
        space.push(t);
    }
    (theta, x, converged)
}

/// Full CI over the active space, restricted to one spin multiplicity and
/// optionally one abelian irrep.
#[derive(Debug, Clone)]
pub struct FciSolver {
    pub smult: usize,
    pub orbsym: Option<Vec<u32>>,
    pub wfnsym: Option<u32>,
    pub conv_tol: f64,
    pub max_cycle: usize,
    pub max_space: usize,
    pub spin_penalty: f64,
    pub dense_limit: usize,
}

impl FciSolver {
    pub fn new(smult: usize, params: &FciParams) -> Self {
        let params = params.clone().with_defaults();
        FciSolver {
            smult: smult.max(1),
            orbsym: None,
            wfnsym: None,
            conv_tol: params.conv_tol.unwrap_or(1e-12),
            max_cycle: params.max_cycle.unwrap_or(200),
            max_space: params.max_space.unwrap_or(16),
            spin_penalty: params.spin_penalty.unwrap_or(0.2),
            dense_limit: params.dense_limit.unwrap_or(400),
        }
    }

    /// Target wavefunction irrep.
    pub fn with_wfnsym(mut self, wfnsym: Option<u32>) -> Self {
        self.wfnsym = wfnsym;
        self
    }

    fn target_s2(&self) -> f64 {
        let s = 0.5 * (self.smult as f64 - 1.0);
        s * (s + 1.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn solve(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: Option<&CiVector>,
        ecore: f64,
        max_cycle: usize,
    ) -> Result<(f64, CiVector)> {
        if nelec.0 > norb || nelec.1 > norb {
            return Err(SolverError::InvalidInput(format!(
                "{:?} electrons do not fit into {} active orbitals",
                nelec, norb
            )));
        }
        let two_sz = nelec.0.abs_diff(nelec.1);
        if two_sz + 1 > self.smult {
            return Err(SolverError::InvalidInput(format!(
                "2S+1 = {} cannot hold 2M_S = {}",
                self.smult, two_sz
            )));
        }
        let space = FciSpace::new(norb, nelec);
        let ham = Hamiltonian::new(&space, h1, h2);
        let allowed = space.allowed(self.orbsym.as_deref(), self.wfnsym);
        if allowed.is_empty() {
            return Err(SolverError::InvalidInput(format!(
                "no determinant of irrep {:?} in the active space",
                self.wfnsym
            )));
        }
        let (na, nb) = space.shape();
        let m = allowed.len();
        let gather = |c: &DMatrix<f64>| DVector::from_iterator(m, allowed.iter().map(|&(a, b)| c[(a, b)]));
        let scatter = |v: &DVector<f64>| {
            let mut c = DMatrix::zeros(na, nb);
            for (k, &(a, b)) in allowed.iter().enumerate() {
                c[(a, b)] = v[k];
            }
            c
        };
        let target = self.target_s2();
        let guess = ci0.filter(|c| c.shape() == (na, nb)).map(|c| gather(c)).filter(|v| v.norm() > 1e-8);

        let (e_cas, vec) = if m <= self.dense_limit {
            let mut hmat = DMatrix::zeros(m, m);
            let mut s2mat = DMatrix::zeros(m, m);
            for k in 0..m {
                let mut unit = DVector::zeros(m);
                unit[k] = 1.0;
                let c = scatter(&unit);
                hmat.set_column(k, &gather(&ham.sigma(&c)));
                s2mat.set_column(k, &gather(&space.apply_spin_square(&c)));
            }
            let (s_vals, s_vecs) = matrix_eigen_control_options(&s2mat, SortOrder::Ascending, false);
            let keep: Vec<usize> = (0..m).filter(|&i| (s_vals[i] - target).abs() < 1e-6).collect();
            if keep.is_empty() {
                return Err(SolverError::InvalidInput(format!(
                    "no state of multiplicity {} for {:?} electrons in {} orbitals",
                    self.smult, nelec, norb
                )));
            }
            let proj = s_vecs.select_columns(&keep);
            let h_proj = proj.transpose() * &hmat * &proj;
            let (evals, evecs) = matrix_eigen_control_options(&h_proj, SortOrder::Ascending, false);
            (evals[0], &proj * evecs.column(0))
        } else {
            let diag = ham.diagonal(&allowed);
            let x0 = guess.clone().unwrap_or_else(|| {
                let mut x = DVector::zeros(m);
                x[diag.imin()] = 1.0;
                x
            });
            let penalty = self.spin_penalty;
            let apply = |v: &DVector<f64>| {
                let c = scatter(v);
                let s2c = space.apply_spin_square(&c);
                let s4c = space.apply_spin_square(&s2c);
                let shifted = s4c - &s2c * (2.0 * target) + &c * (target * target);
                gather(&(ham.sigma(&c) + shifted * penalty))
            };
            let (_, vec, converged) = davidson(apply, &diag, x0, self.conv_tol, max_cycle, self.max_space);
            if !converged {
                warn!("FCI Davidson iteration not converged in {} cycles", max_cycle);
            }
            let c = scatter(&vec);
            (c.dot(&ham.sigma(&c)), vec)
        };

        let mut ci = scatter(&vec.normalize());
        if let Some(g) = &guess {
            if gather(&ci).dot(g) < 0.0 {
                ci.neg_mut();
            }
        }
        debug!("  FCI: {} determinants, E(CAS) = {:.12}", m, e_cas + ecore);
        Ok((e_cas + ecore, ci))
    }
}

impl CiSolver for FciSolver {
    fn kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: Option<&CiVector>,
        ecore: f64,
    ) -> Result<(f64, CiVector)> {
        self.solve(h1, h2, norb, nelec, ci0, ecore, self.max_cycle)
    }

    fn approx_kernel(
        &self,
        h1: &OneBody,
        h2: &Eri4,
        norb: usize,
        nelec: (usize, usize),
        ci0: &CiVector,
        ecore: f64,
    ) -> Result<CiVector> {
        Ok(self.solve(h1, h2, norb, nelec, Some(ci0), ecore, 4)?.1)
    }

    fn make_rdm12(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (Rdm1, Eri4) {
        let (dm1, dm2) = make_rdm12(ci, norb, nelec);
        (Rdm1::plain(dm1), dm2)
    }

    fn make_rdm1s(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (DMatrix<f64>, DMatrix<f64>) {
        make_rdm1s(ci, norb, nelec)
    }

    fn spin_square(&self, ci: &CiVector, norb: usize, nelec: (usize, usize)) -> (f64, f64) {
        spin_square(ci, norb, nelec)
    }

    fn set_orbsym(&mut self, orbsym: Option<Vec<u32>>) {
        self.orbsym = orbsym;
    }

    fn drop_symmetry(&mut self) {
        self.orbsym = None;
        self.wfnsym = None;
    }
}
