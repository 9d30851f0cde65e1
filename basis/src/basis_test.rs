#[cfg(test)]
mod tests {
    use crate::basis::*;
    use crate::helper::*;
    use crate::symmetry::*;
    use crate::tensor::{get_2cdm_from_2rdm, get_2rdm_from_2cdm, Eri4};
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_matrix(rng: &mut StdRng, nrows: usize, ncols: usize) -> DMatrix<f64> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        DMatrix::from_fn(nrows, ncols, |_, _| normal.sample(rng))
    }

    fn random_orthogonal(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        random_matrix(rng, n, n).qr().q()
    }

    fn random_symmetric(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        let a = random_matrix(rng, n, n);
        symmetrize(&a)
    }

    /// Two irreps over six sites: even sites and odd sites.
    fn even_odd_blocks() -> SymmetryBlocks {
        let id = DMatrix::<f64>::identity(6, 6);
        SymmetryBlocks::new(
            vec![id.select_columns(&[0, 2, 4]), id.select_columns(&[1, 3, 5])],
            vec![0, 1],
            vec!["Ag".to_string(), "Bu".to_string()],
        )
    }

    #[test]
    fn test_expmat_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = random_matrix(&mut rng, 5, 5);
        let kappa = (&a - a.transpose()) * 0.3;
        let u = expmat(&kappa);
        let err = (u.transpose() * &u - DMatrix::<f64>::identity(5, 5)).norm();
        assert!(err < 1e-12, "exp of antisymmetric matrix not orthogonal: {}", err);
    }

    #[test]
    fn test_expmat_small_angle() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = random_matrix(&mut rng, 4, 4);
        let kappa = (&a - a.transpose()) * 1e-3;
        let taylor = DMatrix::<f64>::identity(4, 4) + &kappa + &kappa * &kappa * 0.5;
        let diff = (expmat(&kappa) - taylor).norm();
        assert!(diff < 1e-8, "expmat disagrees with Taylor series: {}", diff);
    }

    #[test]
    fn test_eigen_ordering_and_filter() {
        let m = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![3.0, 0.0, -1.0, 2.0]));
        let (evals, evecs) = matrix_eigen_control_options(&m, SortOrder::Descending, true);
        assert_eq!(evals.len(), 3);
        assert!((evals[0] - 3.0).abs() < 1e-12);
        assert!((evals[2] + 1.0).abs() < 1e-12);
        assert!((evecs[(0, 0)] - 1.0).abs() < 1e-12);

        let (evals, _) = matrix_eigen_control_options(&m, SortOrder::Ascending, false);
        assert!((evals[0] + 1.0).abs() < 1e-12);
        assert!((evals[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_svd_rank() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = random_matrix(&mut rng, 6, 2);
        let b = random_matrix(&mut rng, 2, 5);
        let (u, s, v) = matrix_svd_control_options(&(&a * &b), SortOrder::Descending, true);
        assert_eq!(s.len(), 2);
        assert_eq!(u.shape(), (6, 2));
        assert_eq!(v.shape(), (5, 2));
        assert!(s[0] >= s[1]);
        let rebuilt = &u * DMatrix::from_diagonal(&s) * v.transpose();
        assert!((rebuilt - &a * &b).norm() < 1e-10);
    }

    #[test]
    fn test_complement_completes_basis() {
        let mut rng = StdRng::seed_from_u64(5);
        let q = random_orthogonal(&mut rng, 7);
        let part = q.columns(0, 3).into_owned();
        let comp = get_complementary_states(&part);
        assert_eq!(comp.ncols(), 4);
        assert!((part.transpose() * &comp).norm() < 1e-10);
        let full = get_complete_basis(&part);
        assert!(is_basis_orthonormal_and_complete(&full, 1e-10));
    }

    #[test]
    fn test_orthonormalize_drops_dependencies() {
        let mut rng = StdRng::seed_from_u64(13);
        let a = random_matrix(&mut rng, 6, 3);
        let mut dependent = a.clone().insert_column(3, 0.0);
        dependent.set_column(3, &(a.column(0) + a.column(1)));
        let ortho = orthonormalize_a_basis(&dependent);
        assert_eq!(ortho.ncols(), 3);
        assert!(is_basis_orthonormal(&ortho, 1e-10));
        assert!(is_subspace_contained(&a, &ortho));
    }

    #[test]
    fn test_overlapping_states() {
        let id = DMatrix::<f64>::identity(5, 5);
        let a = id.select_columns(&[0, 1, 2]);
        let b = id.select_columns(&[2, 3]);
        let overlap = get_overlapping_states(&a, &b);
        assert_eq!(overlap.ncols(), 1);
        assert!((overlap[(2, 0)].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_nelec_in_subspace() {
        let dm = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![2.0, 1.5, 0.5, 0.0]));
        let id = DMatrix::<f64>::identity(4, 4);
        let n = compute_nelec_in_subspace(&dm, &id.select_columns(&[0, 2]));
        assert!((n - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_subspace_symmetry_blocks() {
        let symm = even_odd_blocks();
        assert!(symm.is_complete(1e-12));
        let id = DMatrix::<f64>::identity(6, 6);
        // subspace spanned by sites 0, 1, 2
        let loc2sub = id.select_columns(&[0, 1, 2]);
        let sub_blocks = get_subspace_symmetry_blocks(&loc2sub, &symm.blocks);
        assert_eq!(sub_blocks[0].ncols(), 2);
        assert_eq!(sub_blocks[1].ncols(), 1);
    }

    #[test]
    fn test_align_subspace_yields_block_pure_orbitals() {
        let mut rng = StdRng::seed_from_u64(17);
        let symm = even_odd_blocks();
        // a symmetry-adapted block: two even and one odd direction, then scrambled
        let even = &symm.blocks[0] * random_orthogonal(&mut rng, 3).columns(0, 2);
        let odd = &symm.blocks[1] * random_orthogonal(&mut rng, 3).columns(0, 1);
        let adapted = hstack(&[&even, &odd]);
        let block = &adapted * random_orthogonal(&mut rng, 3);
        assert!(measure_subspace_blockbreaking(&block, &symm) > 1e-3);

        let metric = random_symmetric(&mut rng, 6);
        let (aligned, umat, labels) =
            align_subspace(&block, SortingMetric::Ambient(&metric), SortOrder::Ascending, Some(&symm));
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.iter().filter(|&&l| l == 0).count(), 2);
        assert!(measure_subspace_blockbreaking(&aligned, &symm) < 1e-10);
        assert!(is_basis_orthonormal(&umat, 1e-10));
        assert!((&block * &umat - &aligned).norm() < 1e-12);

        let diag = represent_operator_in_basis(&metric, &aligned);
        let irrep_pairs = [(0usize, 1usize), (0, 2), (1, 2)];
        for (a, b) in irrep_pairs {
            if labels[a] == labels[b] {
                assert!(diag[(a, b)].abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_align_subspace_without_symmetry_sorts() {
        let mut rng = StdRng::seed_from_u64(19);
        let block = random_orthogonal(&mut rng, 5).columns(0, 4).into_owned();
        let metric = random_symmetric(&mut rng, 5);
        let (aligned, _, labels) =
            align_subspace(&block, SortingMetric::Ambient(&metric), SortOrder::Descending, None);
        assert!(labels.is_empty());
        let diag = represent_operator_in_basis(&metric, &aligned);
        for i in 0..3 {
            assert!(diag[(i, i)] >= diag[(i + 1, i + 1)] - 1e-12);
        }
        assert!((diag.clone() - DMatrix::from_diagonal(&diag.diagonal())).norm() < 1e-10);
    }

    #[test]
    fn test_cleanup_restores_symmetry() {
        let mut rng = StdRng::seed_from_u64(23);
        let symm = even_odd_blocks();
        let pure = hstack(&[
            &(&symm.blocks[0] * random_orthogonal(&mut rng, 3)),
            &(&symm.blocks[1] * random_orthogonal(&mut rng, 3)),
        ]);
        let noise = random_matrix(&mut rng, 6, 6) * 1e-4;
        let noisy = lowdin_orthonormalize(&(&pure + noise));
        assert!(measure_subspace_blockbreaking(&noisy, &symm) > 1e-12);

        let cleaned = cleanup_subspace_symmetry(&noisy, &symm);
        assert!(measure_subspace_blockbreaking(&cleaned, &symm) < 1e-12);
        assert!(measure_basis_nonorthonormality(&cleaned) < 1e-10);
        assert_eq!(symm.label_orb_symm(&cleaned), symm.label_orb_symm(&pure));
    }

    #[test]
    fn test_eri_transform_matches_loops() {
        let mut rng = StdRng::seed_from_u64(29);
        let n = 3;
        let raw = random_matrix(&mut rng, n * n, n * n);
        let eri = Eri4::from_fn(n, |p, q, r, s| raw[(p * n + q, r * n + s)]);
        let c = random_matrix(&mut rng, n, 2);
        let t = eri.transform_all(&c);
        assert_eq!(t.dims(), [2, 2, 2, 2]);
        for (i, j, k, l) in [(0, 0, 0, 0), (1, 0, 1, 1), (0, 1, 1, 0)] {
            let mut expect = 0.0;
            for p in 0..n {
                for q in 0..n {
                    for r in 0..n {
                        for s in 0..n {
                            expect += c[(p, i)] * c[(q, j)] * c[(r, k)] * c[(s, l)] * eri[(p, q, r, s)];
                        }
                    }
                }
            }
            assert!((t[(i, j, k, l)] - expect).abs() < 1e-10);
        }
    }

    #[test]
    fn test_coulomb_and_exchange() {
        let n = 3;
        let eri = Eri4::from_fn(n, |p, q, r, s| {
            if p == q && r == s {
                1.0 + (p + r) as f64
            } else {
                0.0
            }
        });
        let dm = DMatrix::<f64>::identity(n, n);
        let j = eri.coulomb(&dm);
        assert!((j[(0, 0)] - (1.0 + 2.0 + 3.0)).abs() < 1e-12);
        assert!(j[(0, 1)].abs() < 1e-12);
        let k = eri.exchange(&dm);
        assert!((k[(1, 1)] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cumulant_of_closed_shell_determinant_vanishes() {
        let n = 4;
        let mut dm1 = DMatrix::zeros(n, n);
        dm1[(0, 0)] = 2.0;
        dm1[(1, 1)] = 2.0;
        let dm2 = Eri4::from_fn(n, |p, q, r, s| {
            dm1[(p, q)] * dm1[(r, s)] - 0.5 * dm1[(p, s)] * dm1[(r, q)]
        });
        let cdm = get_2cdm_from_2rdm(&dm2, &dm1);
        assert!(cdm.as_slice().iter().all(|x| x.abs() < 1e-14));
        let back = get_2rdm_from_2cdm(&cdm, &dm1);
        assert!(back.sub(&dm2).as_slice().iter().all(|x| x.abs() < 1e-14));
    }
}
