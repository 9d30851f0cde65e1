use super::strings::StringSpace;
use super::CiVector;
use nalgebra::DMatrix;

/// Overlaps `<I|J'>` between strings over old orbitals and strings over
/// rotated orbitals `phi' = phi u`.
fn string_overlaps(space: &StringSpace, u: &DMatrix<f64>) -> DMatrix<f64> {
    let n = space.len();
    if space.nelec() == 0 {
        return DMatrix::identity(n, n);
    }
    let occ: Vec<Vec<usize>> = (0..n).map(|i| space.occupied(i)).collect();
    DMatrix::from_fn(n, n, |i, j| {
        u.select_rows(&occ[i]).select_columns(&occ[j]).determinant()
    })
}

/// Re-express a CI vector after the active orbitals are rotated by `u`
/// (`C_new = C_old u`).
pub fn transform_ci_for_orbital_rotation(
    ci: &CiVector,
    norb: usize,
    nelec: (usize, usize),
    u: &DMatrix<f64>,
) -> CiVector {
    let ta = string_overlaps(&StringSpace::new(norb, nelec.0), u);
    let tb = if nelec.1 == nelec.0 {
        ta.clone()
    } else {
        string_overlaps(&StringSpace::new(norb, nelec.1), u)
    };
    ta.transpose() * ci * tb
}
