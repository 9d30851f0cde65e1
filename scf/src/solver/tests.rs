//! Tests for guess construction and orbital alignment

#[cfg(test)]
mod tests {
    use super::super::guess::project_ci_guess;
    use super::super::{
        align_orbital_blocks, ci_shape, project_amo_manually, resolve_active_space, sort_mo, ActiveMetric,
        ActivePartition, ActiveSpaceLayout,
    };
    use crate::fragment::Fragment;
    use crate::integrals::TwoElectronIntegrals;
    use basis::basis::{get_complementary_states, measure_basis_nonorthonormality};
    use basis::helper::{expmat, hstack, lowdin_orthonormalize};
    use basis::symmetry::{measure_subspace_blockbreaking, SymmetryBlocks};
    use basis::tensor::Eri4;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_orthonormal(nrows: usize, ncols: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        lowdin_orthonormalize(&DMatrix::from_fn(nrows, ncols, |_, _| normal.sample(&mut rng)))
    }

    fn chain_h1e(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| if i.abs_diff(j) == 1 { -1.0 } else { 0.0 })
    }

    fn fragment(nimp: usize, nelec: usize) -> Fragment {
        Fragment::new(
            "test",
            DMatrix::identity(nimp, nimp),
            nelec,
            0.0,
            chain_h1e(nimp),
            TwoElectronIntegrals::Dense(Eri4::zeros(nimp)),
        )
    }

    #[test]
    fn test_projection_recovers_impurity_columns() {
        let loc2imp = random_orthonormal(7, 5, 21);
        let loc2gamo = loc2imp.select_columns(&[3, 1]);
        let fock = chain_h1e(5);
        let projected = project_amo_manually(&loc2imp, &loc2gamo, &fock, 1, None).unwrap();

        for f in &projected.fidelities {
            assert!((f - 1.0).abs() < 1e-10, "fidelities {:?}", projected.fidelities);
        }
        let active = projected.imp2mo.columns(1, 2);
        for (slot, target) in [3usize, 1].into_iter().enumerate() {
            let mut e = DMatrix::zeros(5, 1);
            e[(target, 0)] = 1.0;
            assert!((active.column(slot) - e.column(0)).norm() < 1e-10);
        }
        assert!(measure_basis_nonorthonormality(&projected.imp2mo) < 1e-10);
        assert_eq!(projected.occ.as_slice(), &[2.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_projection_orders_active_by_natural_occupation() {
        let loc2imp = DMatrix::identity(4, 4);
        let loc2gamo = loc2imp.select_columns(&[0, 1]);
        let mut dm = DMatrix::zeros(4, 4);
        dm[(0, 0)] = 0.2;
        dm[(1, 1)] = 1.8;
        let projected = project_amo_manually(&loc2imp, &loc2gamo, &chain_h1e(4), 1, Some(&dm)).unwrap();
        assert!((projected.occ[1] - 1.8).abs() < 1e-12);
        assert!((projected.occ[2] - 0.2).abs() < 1e-12);
        assert!((projected.imp2mo[(1, 1)].abs() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_projection_rejects_oversized_guess() {
        let loc2imp = DMatrix::identity(3, 3);
        let loc2gamo = DMatrix::identity(3, 3);
        assert!(project_amo_manually(&loc2imp, &loc2gamo, &chain_h1e(3), 1, None).is_err());
    }

    #[test]
    fn test_sort_mo_moves_listed_orbitals_into_active_block() {
        let mo = DMatrix::from_fn(5, 5, |i, j| (10 * i + j) as f64);
        let sorted = sort_mo(&mo, &[4, 3], 1, 2).unwrap();
        let cols: Vec<f64> = (0..5).map(|j| sorted[(0, j)]).collect();
        assert_eq!(cols, vec![0.0, 3.0, 2.0, 1.0, 4.0]);
        assert!(sort_mo(&mo, &[4, 4], 1, 2).is_err());
        assert!(sort_mo(&mo, &[6, 1], 1, 2).is_err());
    }

    #[test]
    fn test_ci_shape() {
        assert_eq!(ci_shape(4, (2, 2)), (6, 6));
        assert_eq!(ci_shape(5, (3, 1)), (10, 5));
        assert_eq!(ci_shape(3, (0, 0)), (1, 1));
    }

    #[test]
    fn test_ci_guess_needs_full_overlap_with_active_orbitals() {
        let loc2imp = random_orthonormal(6, 4, 5);
        let mut frag = Fragment::new(
            "test",
            loc2imp.clone(),
            4,
            0.0,
            chain_h1e(4),
            TwoElectronIntegrals::Dense(Eri4::zeros(4)),
        );
        let part = ActivePartition {
            ncore: 1,
            ncas: 2,
            nelecas: (1, 1),
        };
        let ci = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.1, -0.4]);
        let imp2mo = random_orthonormal(4, 4, 6);
        frag.ci_as = Some(ci.clone());
        frag.ci_as_orb = Some(&loc2imp * imp2mo.columns(1, 2));

        let mut mo = imp2mo.clone();
        let ci0 = project_ci_guess(&frag, &mut mo, part).unwrap();
        assert!((ci0.norm() - ci.norm()).abs() < 1e-10);
        assert!(measure_basis_nonorthonormality(&mo) < 1e-10);

        // second stored orbital lies outside the impurity space
        let outside = get_complementary_states(&loc2imp);
        assert_eq!(outside.ncols(), 2);
        let kept = &loc2imp * imp2mo.columns(1, 1);
        let lost = outside.columns(0, 1).into_owned();
        frag.ci_as_orb = Some(hstack(&[&kept, &lost]));
        let mut mo = imp2mo.clone();
        assert!(project_ci_guess(&frag, &mut mo, part).is_none());
        assert_eq!(mo, imp2mo);

        // wrong number of stored orbitals
        frag.ci_as_orb = Some(kept);
        assert!(project_ci_guess(&frag, &mut mo, part).is_none());
    }

    #[test]
    fn test_resolve_active_space() {
        let mut frag = fragment(4, 4);
        frag.active_space = (2, 2);
        assert_eq!(
            resolve_active_space(&frag),
            ActiveSpaceLayout {
                ncas: 2,
                nelecas: (1, 1),
                smult: 1
            }
        );

        // oversized requests fall back to the whole impurity
        frag.active_space = (6, 3);
        assert_eq!(resolve_active_space(&frag).ncas, 4);
        assert_eq!(resolve_active_space(&frag).nelecas, (2, 2));

        // |2S'| = min(|2M_S|, |2S|)
        frag.active_space = (2, 2);
        frag.target_ms = 1.0;
        frag.target_s = Some(1.0);
        let layout = resolve_active_space(&frag);
        assert_eq!(layout.nelecas, (2, 0));
        assert_eq!(layout.smult, 3);

        frag.target_ms = -1.0;
        frag.target_s = Some(0.0);
        let layout = resolve_active_space(&frag);
        assert_eq!(layout.nelecas, (1, 1));
        assert_eq!(layout.smult, 1);

        frag.target_ms = 1.0;
        frag.target_s = None;
        assert_eq!(resolve_active_space(&frag).smult, 3);

        // odd active count on a singlet: the extra electron moves to the core
        frag.target_ms = 0.0;
        frag.active_space = (3, 4);
        assert_eq!(resolve_active_space(&frag).nelecas, (1, 1));
    }

    #[test]
    fn test_mismatched_spin_parity_is_split_by_floor() {
        let mut odd = fragment(3, 3);
        odd.active_space = (2, 2);
        odd.target_ms = 0.5;
        let layout = resolve_active_space(&odd);
        assert_eq!(layout.nelecas, (1, 0));
        assert_eq!(layout.smult, 2);

        odd.active_space = (3, 2);
        assert_eq!(resolve_active_space(&odd).nelecas, (2, 1));
        assert_eq!(resolve_active_space(&odd).smult, 2);

        // too few active electrons for the spin: raised to 2S
        let mut high = fragment(4, 4);
        high.active_space = (0, 2);
        high.target_ms = 1.0;
        assert_eq!(resolve_active_space(&high).nelecas, (2, 0));
    }

    fn reflection_symmetry() -> SymmetryBlocks {
        let s = 0.5f64.sqrt();
        let even = DMatrix::from_row_slice(4, 2, &[s, 0.0, 0.0, s, 0.0, s, s, 0.0]);
        let odd = DMatrix::from_row_slice(4, 2, &[s, 0.0, 0.0, s, 0.0, -s, -s, 0.0]);
        SymmetryBlocks::new(vec![even, odd], vec![0, 1], vec!["Ag".to_string(), "Bu".to_string()])
    }

    #[test]
    fn test_symmetry_alignment_gives_block_pure_orbitals() {
        let symm = reflection_symmetry();
        let fock = chain_h1e(4);
        let mo = DMatrix::identity(4, 4);
        let aligned = align_orbital_blocks(&mo, 0, 4, &fock, ActiveMetric::Fock, Some(&symm), "Test");
        assert!(measure_subspace_blockbreaking(&aligned.mo, &symm) < 1e-10);
        assert!(measure_basis_nonorthonormality(&aligned.mo) < 1e-10);
        assert!((&mo * &aligned.active_umat - &aligned.mo).norm() < 1e-10);
        let energies = (aligned.mo.transpose() * &fock * &aligned.mo).diagonal();
        for k in 1..4 {
            assert!(energies[k - 1] <= energies[k] + 1e-12);
        }
    }

    #[test]
    fn test_alignment_orders_active_by_occupation() {
        let mo = random_orthonormal(4, 4, 5);
        let dm = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![0.5, 1.5]));
        let kappa = DMatrix::from_row_slice(4, 4, &[
            0.0, 0.1, 0.0, 0.0, //
            -0.1, 0.0, 0.2, 0.0, //
            0.0, -0.2, 0.0, 0.3, //
            0.0, 0.0, -0.3, 0.0,
        ]);
        let fock = expmat(&kappa) * chain_h1e(4) * expmat(&kappa).transpose();
        let aligned = align_orbital_blocks(&mo, 1, 2, &fock, ActiveMetric::Occupation(&dm), None, "Test");
        // descending occupation swaps the two active orbitals
        assert!((aligned.active_umat[(1, 0)].abs() - 1.0).abs() < 1e-10);
        assert!((aligned.mo.column(1) - mo.column(2)).norm() < 1e-10 || (aligned.mo.column(1) + mo.column(2)).norm() < 1e-10);
        assert!(measure_basis_nonorthonormality(&aligned.mo) < 1e-10);
    }
}
