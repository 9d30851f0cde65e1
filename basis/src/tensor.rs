//! Dense four-index tensors (two-electron integrals, two-body density
//! matrices and cumulants) in chemists' notation `(pq|rs)`.

use itertools::iproduct;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Row-major dense tensor with four axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eri4 {
    dims: [usize; 4],
    data: Vec<f64>,
}

fn strides(dims: [usize; 4]) -> [usize; 4] {
    [dims[1] * dims[2] * dims[3], dims[2] * dims[3], dims[3], 1]
}

impl Eri4 {
    pub fn zeros(n: usize) -> Self {
        Self::zeros_with_dims([n, n, n, n])
    }

    pub fn zeros_with_dims(dims: [usize; 4]) -> Self {
        Eri4 {
            dims,
            data: vec![0.0; dims.iter().product()],
        }
    }

    pub fn from_fn<F>(n: usize, f: F) -> Self
    where
        F: Fn(usize, usize, usize, usize) -> f64,
    {
        let mut t = Self::zeros(n);
        for (p, q, r, s) in iproduct!(0..n, 0..n, 0..n, 0..n) {
            t[(p, q, r, s)] = f(p, q, r, s);
        }
        t
    }

    /// Build from a flat row-major buffer.
    pub fn from_vec(dims: [usize; 4], data: Vec<f64>) -> Option<Self> {
        (data.len() == dims.iter().product::<usize>()).then_some(Eri4 { dims, data })
    }

    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    /// Edge length of a cubic tensor.
    pub fn norb(&self) -> usize {
        self.dims[0]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    fn offset(&self, p: usize, q: usize, r: usize, s: usize) -> usize {
        ((p * self.dims[1] + q) * self.dims[2] + r) * self.dims[3] + s
    }

    /// Full contraction `sum_pqrs a_pqrs b_pqrs`.
    pub fn contract(&self, other: &Eri4) -> f64 {
        debug_assert_eq!(self.dims, other.dims, "contract: shape mismatch");
        self.data.iter().zip(&other.data).map(|(a, b)| a * b).sum()
    }

    pub fn sub(&self, other: &Eri4) -> Eri4 {
        debug_assert_eq!(self.dims, other.dims, "sub: shape mismatch");
        Eri4 {
            dims: self.dims,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a - b).collect(),
        }
    }

    /// Transform one axis: `T'[.., i, ..] = sum_p C[p, i] T[.., p, ..]`.
    pub fn transform_axis(&self, axis: usize, c: &DMatrix<f64>) -> Eri4 {
        assert_eq!(c.nrows(), self.dims[axis], "transform_axis: dimension mismatch");
        let old_strides = strides(self.dims);
        let mut dims = self.dims;
        dims[axis] = c.ncols();
        let new_strides = strides(dims);
        let n_old = self.dims[axis];

        let mut data = vec![0.0; dims.iter().product()];
        data.par_iter_mut().enumerate().for_each(|(flat, out)| {
            let mut rem = flat;
            let mut base = 0;
            let mut i = 0;
            for a in 0..4 {
                let idx = rem / new_strides[a];
                rem %= new_strides[a];
                if a == axis {
                    i = idx;
                } else {
                    base += idx * old_strides[a];
                }
            }
            let step = old_strides[axis];
            *out = (0..n_old)
                .map(|p| c[(p, i)] * self.data[base + p * step])
                .sum();
        });
        Eri4 { dims, data }
    }

    /// `(ij|kl) = sum C1_pi C2_qj C3_rk C4_sl (pq|rs)`
    pub fn transform(
        &self,
        c1: &DMatrix<f64>,
        c2: &DMatrix<f64>,
        c3: &DMatrix<f64>,
        c4: &DMatrix<f64>,
    ) -> Eri4 {
        self.transform_axis(0, c1)
            .transform_axis(1, c2)
            .transform_axis(2, c3)
            .transform_axis(3, c4)
    }

    /// Same coefficients on all four axes.
    pub fn transform_all(&self, c: &DMatrix<f64>) -> Eri4 {
        self.transform(c, c, c, c)
    }

    /// Sub-tensor `T[p0.., q0.., r0.., s0..]` of the given extent on every axis.
    pub fn block(&self, start: usize, len: usize) -> Eri4 {
        Eri4::from_fn(len, |p, q, r, s| {
            self[(start + p, start + q, start + r, start + s)]
        })
    }

    /// Contract the last two indices with a matrix: `J_pq = sum_rs (pq|rs) D_rs`.
    pub fn coulomb(&self, dm: &DMatrix<f64>) -> DMatrix<f64> {
        let [n0, n1, n2, n3] = self.dims;
        DMatrix::from_fn(n0, n1, |p, q| {
            let mut acc = 0.0;
            for r in 0..n2 {
                for s in 0..n3 {
                    acc += self[(p, q, r, s)] * dm[(r, s)];
                }
            }
            acc
        })
    }

    /// Exchange-type contraction: `K_ps = sum_qr (pq|rs) D_qr`.
    pub fn exchange(&self, dm: &DMatrix<f64>) -> DMatrix<f64> {
        let [n0, n1, n2, n3] = self.dims;
        DMatrix::from_fn(n0, n3, |p, s| {
            let mut acc = 0.0;
            for q in 0..n1 {
                for r in 0..n2 {
                    acc += self[(p, q, r, s)] * dm[(q, r)];
                }
            }
            acc
        })
    }
}

impl Index<(usize, usize, usize, usize)> for Eri4 {
    type Output = f64;

    #[inline]
    fn index(&self, (p, q, r, s): (usize, usize, usize, usize)) -> &f64 {
        &self.data[self.offset(p, q, r, s)]
    }
}

impl IndexMut<(usize, usize, usize, usize)> for Eri4 {
    #[inline]
    fn index_mut(&mut self, (p, q, r, s): (usize, usize, usize, usize)) -> &mut f64 {
        let off = self.offset(p, q, r, s);
        &mut self.data[off]
    }
}

/// Cumulant of a spin-summed two-body density matrix, assuming equal alpha and
/// beta one-body densities:
/// `L_pqrs = G_pqrs - D_pq D_rs + 1/2 D_ps D_rq`.
pub fn get_2cdm_from_2rdm(dm2: &Eri4, dm1: &DMatrix<f64>) -> Eri4 {
    let n = dm1.nrows();
    let mut cdm = dm2.clone();
    for (p, q, r, s) in iproduct!(0..n, 0..n, 0..n, 0..n) {
        cdm[(p, q, r, s)] -= dm1[(p, q)] * dm1[(r, s)] - 0.5 * dm1[(p, s)] * dm1[(r, q)];
    }
    cdm
}

/// Inverse of [`get_2cdm_from_2rdm`].
pub fn get_2rdm_from_2cdm(cdm: &Eri4, dm1: &DMatrix<f64>) -> Eri4 {
    let n = dm1.nrows();
    let mut dm2 = cdm.clone();
    for (p, q, r, s) in iproduct!(0..n, 0..n, 0..n, 0..n) {
        dm2[(p, q, r, s)] += dm1[(p, q)] * dm1[(r, s)] - 0.5 * dm1[(p, s)] * dm1[(r, q)];
    }
    dm2
}
