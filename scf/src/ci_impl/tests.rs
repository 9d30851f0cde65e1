//! Tests for CI implementation

#[cfg(test)]
mod tests {
    use super::super::{
        excite, make_rdm12, make_strings, spin_square, transform_ci_for_orbital_rotation, CiSolver,
        FciSolver, FciSpace, OneBody,
    };
    use crate::config::FciParams;
    use basis::helper::{expmat, matrix_eigen_control_options, SortOrder};
    use basis::tensor::Eri4;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn hubbard(n: usize, t: f64, u: f64) -> (DMatrix<f64>, Eri4) {
        let mut h = DMatrix::zeros(n, n);
        for i in 0..n - 1 {
            h[(i, i + 1)] = -t;
            h[(i + 1, i)] = -t;
        }
        let eri = Eri4::from_fn(n, |p, q, r, s| {
            if p == q && q == r && r == s {
                u
            } else {
                0.0
            }
        });
        (h, eri)
    }

    /// Symmetric one-body operator and a positive semidefinite ERI tensor.
    fn random_hamiltonian(n: usize, seed: u64) -> (DMatrix<f64>, Eri4) {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.3).unwrap();
        let a = DMatrix::from_fn(n, n, |_, _| normal.sample(&mut rng));
        let h = (&a + a.transpose()) * 0.5;
        let factors: Vec<DMatrix<f64>> = (0..3)
            .map(|_| {
                let b = DMatrix::from_fn(n, n, |_, _| normal.sample(&mut rng));
                (&b + b.transpose()) * 0.5
            })
            .collect();
        let eri = Eri4::from_fn(n, |p, q, r, s| factors.iter().map(|b| b[(p, q)] * b[(r, s)]).sum());
        (h, eri)
    }

    fn random_rotation(n: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.5).unwrap();
        let a = DMatrix::from_fn(n, n, |_, _| normal.sample(&mut rng));
        expmat(&(&a - a.transpose()))
    }

    fn energy_from_rdms(h: &DMatrix<f64>, eri: &Eri4, ci: &DMatrix<f64>, norb: usize, nelec: (usize, usize)) -> f64 {
        let (dm1, dm2) = make_rdm12(ci, norb, nelec);
        h.component_mul(&dm1).sum() + 0.5 * eri.contract(&dm2)
    }

    #[test]
    fn test_strings_ascending() {
        let strings = make_strings(4, 2);
        assert_eq!(strings, vec![0b0011, 0b0101, 0b0110, 0b1001, 0b1010, 0b1100]);
    }

    #[test]
    fn test_excitation_signs() {
        // a+_2 a_0 |0,1> passes one electron on the way in
        assert_eq!(excite(0b011, 2, 0), Some((0b110, -1.0)));
        assert_eq!(excite(0b011, 2, 1), Some((0b101, 1.0)));
        assert_eq!(excite(0b011, 1, 0), None);
        assert_eq!(excite(0b011, 0, 0), Some((0b011, 1.0)));
        assert_eq!(excite(0b100, 0, 1), None);
    }

    #[test]
    fn test_spin_square_spectrum() {
        let space = FciSpace::new(2, (1, 1));
        let (na, nb) = space.shape();
        let m = na * nb;
        let mut s2 = DMatrix::zeros(m, m);
        for k in 0..m {
            let mut c = DMatrix::zeros(na, nb);
            c[(k / nb, k % nb)] = 1.0;
            let s2c = space.apply_spin_square(&c);
            for j in 0..m {
                s2[(j, k)] = s2c[(j / nb, j % nb)];
            }
        }
        let (evals, _) = matrix_eigen_control_options(&s2, SortOrder::Ascending, false);
        let expected = [0.0, 0.0, 0.0, 2.0];
        for (e, x) in evals.iter().zip(expected.iter()) {
            assert!((e - x).abs() < 1e-12, "S^2 eigenvalue {} != {}", e, x);
        }
    }

    #[test]
    fn test_hubbard_dimer_singlet_and_triplet() {
        let (t, u) = (1.0, 4.0);
        let (h, eri) = hubbard(2, t, u);
        let singlet = FciSolver::new(1, &FciParams::default());
        let (e, ci) = singlet.kernel(&OneBody::Charge(h.clone()), &eri, 2, (1, 1), None, 0.0).unwrap();
        let exact = 0.5 * (u - (u * u + 16.0 * t * t).sqrt());
        assert!((e - exact).abs() < 1e-10, "E = {}, exact {}", e, exact);
        let (ss, multip) = spin_square(&ci, 2, (1, 1));
        assert!(ss.abs() < 1e-10);
        assert!((multip - 1.0).abs() < 1e-10);

        let triplet = FciSolver::new(3, &FciParams::default());
        let (e3, ci3) = triplet.kernel(&OneBody::Charge(h), &eri, 2, (1, 1), None, 0.0).unwrap();
        assert!(e3.abs() < 1e-10);
        assert!((spin_square(&ci3, 2, (1, 1)).0 - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_rdm_traces_and_energy() {
        let (h, eri) = random_hamiltonian(4, 7);
        let nelec = (2, 2);
        let solver = FciSolver::new(1, &FciParams::default());
        let (e, ci) = solver.kernel(&OneBody::Charge(h.clone()), &eri, 4, nelec, None, 0.5).unwrap();
        let (dm1, dm2) = make_rdm12(&ci, 4, nelec);
        assert!((dm1.trace() - 4.0).abs() < 1e-10);
        let pair_trace: f64 = (0..4).flat_map(|p| (0..4).map(move |q| (p, q))).map(|(p, q)| dm2[(p, p, q, q)]).sum();
        assert!((pair_trace - 12.0).abs() < 1e-9);
        let e_rdm = energy_from_rdms(&h, &eri, &ci, 4, nelec) + 0.5;
        assert!((e - e_rdm).abs() < 1e-9, "kernel {} vs rdm {}", e, e_rdm);
    }

    #[test]
    fn test_energy_invariant_under_orbital_rotation() {
        let (h, eri) = random_hamiltonian(4, 11);
        let nelec = (2, 1);
        let solver = FciSolver::new(2, &FciParams::default());
        let (e, ci) = solver.kernel(&OneBody::Charge(h.clone()), &eri, 4, nelec, None, 0.0).unwrap();

        let u = random_rotation(4, 3);
        let h_rot = u.transpose() * &h * &u;
        let eri_rot = eri.transform_all(&u);
        let ci_rot = transform_ci_for_orbital_rotation(&ci, 4, nelec, &u);
        assert!((ci_rot.norm() - 1.0).abs() < 1e-10);
        let e_rot = energy_from_rdms(&h_rot, &eri_rot, &ci_rot, 4, nelec);
        assert!((e - e_rot).abs() < 1e-9, "E = {} vs rotated {}", e, e_rot);
    }

    #[test]
    fn test_wavefunction_symmetry_restriction() {
        let (h, eri) = hubbard(4, 1.0, 2.0);
        let mut solver = FciSolver::new(1, &FciParams::default()).with_wfnsym(Some(1));
        solver.set_orbsym(Some(vec![0, 1, 0, 1]));
        let (_, ci) = solver.kernel(&OneBody::Charge(h), &eri, 4, (1, 1), None, 0.0).unwrap();
        let space = FciSpace::new(4, (1, 1));
        let orbsym = [0u32, 1, 0, 1];
        for a in 0..ci.nrows() {
            for b in 0..ci.ncols() {
                let irrep = space.alpha.irrep(a, &orbsym) ^ space.beta.irrep(b, &orbsym);
                if irrep != 1 {
                    assert_eq!(ci[(a, b)], 0.0);
                }
            }
        }
        assert!((ci.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_davidson_matches_dense() {
        let (h, eri) = hubbard(5, 1.0, 3.0);
        let nelec = (2, 2);
        let dense = FciSolver::new(1, &FciParams::default());
        let (e_dense, _) = dense.kernel(&OneBody::Charge(h.clone()), &eri, 5, nelec, None, 0.0).unwrap();
        let mut iterative = FciSolver::new(1, &FciParams::default());
        iterative.dense_limit = 0;
        let (e_dav, ci) = iterative.kernel(&OneBody::Charge(h), &eri, 5, nelec, None, 0.0).unwrap();
        assert!((e_dense - e_dav).abs() < 1e-8, "dense {} vs Davidson {}", e_dense, e_dav);
        assert!(spin_square(&ci, 5, nelec).0.abs() < 1e-6);
    }

    #[test]
    fn test_polarized_operator_splits_spins() {
        let (h, eri) = hubbard(2, 1.0, 0.0);
        let spin = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![-0.3, 0.3]));
        let solver = FciSolver::new(2, &FciParams::default());
        let h1 = OneBody::Polarized { charge: h, spin };
        let (_, ci) = solver.kernel(&h1, &eri, 2, (1, 0), None, 0.0).unwrap();
        let (dma, dmb) = solver.make_rdm1s(&ci, 2, (1, 0));
        // alpha electron is pulled to site 0
        assert!(dma[(0, 0)] > dma[(1, 1)]);
        assert!(dmb.norm() < 1e-12);
    }

    #[test]
    fn test_high_spin_multiplicity() {
        let ci = DMatrix::from_element(1, 1, 1.0);
        let (ss, multip) = spin_square(&ci, 2, (2, 0));
        assert!((ss - 2.0).abs() < 1e-12);
        assert!((multip - 3.0).abs() < 1e-12);
    }
}
