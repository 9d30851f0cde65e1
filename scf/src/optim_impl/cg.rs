//! Truncated (Steihaug-Toint) preconditioned conjugate gradient

use nalgebra::DVector;
use tracing::debug;

/// Result of one Newton-CG solve.
#[derive(Debug, Clone)]
pub struct CgStep {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub hit_boundary: bool,
    /// Model energy change `g.x + x.Hx / 2`.
    pub predicted: f64,
}

fn to_boundary(x: &DVector<f64>, d: &DVector<f64>, radius: f64) -> f64 {
    let a = d.dot(d);
    let b = 2.0 * x.dot(d);
    let c = x.dot(x) - radius * radius;
    if a < 1e-300 {
        return 0.0;
    }
    (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a)
}

/// Approximately minimize `g.x + x.H x / 2` subject to `|x| <= radius`.
///
/// `h_op` applies the Hessian, `h_diag` is its (approximate) diagonal used as
/// a Jacobi preconditioner. Iteration stops on negative curvature, at the
/// trust boundary, when the residual norm drops below `tol` or after
/// `max_iter` products.
pub fn steihaug_cg<H>(
    h_op: H,
    h_diag: &DVector<f64>,
    g: &DVector<f64>,
    radius: f64,
    tol: f64,
    max_iter: usize,
) -> CgStep
where
    H: Fn(&DVector<f64>) -> DVector<f64>,
{
    let n = g.len();
    let precond = |r: &DVector<f64>| {
        DVector::from_iterator(
            n,
            r.iter()
                .zip(h_diag.iter())
                .map(|(ri, hi)| ri / hi.abs().max(1e-2)),
        )
    };

    let mut x = DVector::zeros(n);
    let mut r = g.clone();
    let mut z = precond(&r);
    let mut d = -&z;
    let mut rz = r.dot(&z);
    let mut hit_boundary = false;
    let mut iterations = 0;

    if r.norm() >= tol {
        for it in 0..max_iter {
            iterations = it + 1;
            let hd = h_op(&d);
            let dhd = d.dot(&hd);
            if dhd <= 0.0 {
                debug!("Newton-CG: negative curvature {:.3e} at iteration {}", dhd, it);
                let tau = to_boundary(&x, &d, radius);
                x += &d * tau;
                hit_boundary = true;
                break;
            }
            let alpha = rz / dhd;
            let x_next = &x + &d * alpha;
            if x_next.norm() >= radius {
                let tau = to_boundary(&x, &d, radius);
                x += &d * tau;
                hit_boundary = true;
                break;
            }
            x = x_next;
            r += &hd * alpha;
            if r.norm() < tol {
                break;
            }
            z = precond(&r);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            d = -&z + &d * beta;
            rz = rz_next;
        }
    }

    let predicted = if x.norm() > 0.0 {
        g.dot(&x) + 0.5 * x.dot(&h_op(&x))
    } else {
        0.0
    };
    CgStep {
        x,
        iterations,
        hit_boundary,
        predicted,
    }
}
