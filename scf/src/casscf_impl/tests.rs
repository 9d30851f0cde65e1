//! Tests for the CASSCF optimizer and the spin-polarized patch

#[cfg(test)]
mod tests {
    use super::super::{
        kernel, ActiveSpaceSolver, Casscf, CasscfCore, CasscfHooks, LadderStage, SpinPolarizedCasscf,
    };
    use crate::ci_impl::FciSolver;
    use crate::config::{CasscfParams, FciParams, ModelConfig, ScfParams};
    use crate::error::SolverError;
    use crate::model::ModelHamiltonian;
    use crate::scf_impl::ImpurityRohf;
    use basis::helper::expmat;
    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::sync::Arc;

    fn chain(nsites: usize, u: f64, spin_field: Option<f64>) -> ModelHamiltonian {
        let cfg = ModelConfig {
            nsites,
            hopping: 1.0,
            onsite_u: u,
            nearest_neighbor_v: Some(0.3),
            site_energies: Some((0..nsites).map(|i| 0.1 * i as f64).collect()),
            periodic: Some(false),
            spin_field,
            constant: Some(0.5),
            density_fitting: None,
        };
        ModelHamiltonian::hubbard_chain(&cfg).unwrap()
    }

    fn random_orbitals(n: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.4).unwrap();
        let a = DMatrix::from_fn(n, n, |_, _| normal.sample(&mut rng));
        expmat(&(&a - a.transpose()))
    }

    fn core_for(model: &ModelHamiltonian, nelec: usize, ncas: usize, nelecas: (usize, usize), max_macro: usize) -> CasscfCore {
        CasscfCore::new(
            Arc::new(model.h1e.clone()),
            Arc::new(model.eri.clone()),
            model.constant,
            nelec,
            ncas,
            nelecas,
            &CasscfParams::default(),
            max_macro,
        )
        .unwrap()
    }

    fn rhf_orbitals(model: &ModelHamiltonian, nelec: usize) -> DMatrix<f64> {
        let n = model.h1e.nrows();
        let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, model.constant, nelec, nelec % 2, &ScfParams::default()).unwrap();
        let dm0 = DMatrix::identity(n, n) * (nelec as f64 / n as f64);
        rohf.kernel(&dm0, false, 0).mo_coeff
    }

    /// Central differences of the CASCI energy under orbital rotation.
    fn finite_difference_gradient<H: CasscfHooks>(hooks: &mut H, mo: &DMatrix<f64>) -> DVector<f64> {
        let vars = hooks.core().rotation_variables();
        let step = 1e-4;
        DVector::from_iterator(
            vars.len(),
            (0..vars.len()).map(|k| {
                let mut x = DVector::zeros(vars.len());
                x[k] = step;
                let e_plus = hooks.casci(&(mo * vars.rotation(&x)), None).unwrap().e_tot;
                let e_minus = hooks.casci(&(mo * vars.rotation(&(-&x))), None).unwrap().e_tot;
                (e_plus - e_minus) / (2.0 * step)
            }),
        )
    }

    #[test]
    fn test_plain_gradient_matches_finite_differences() {
        let model = chain(4, 2.0, None);
        let mut casscf = Casscf::new(core_for(&model, 4, 2, (1, 1), 50), FciSolver::new(1, &FciParams::default()));
        let mo = random_orbitals(4, 7);
        let cas = casscf.casci(&mo, None).unwrap();
        let (rdm1, dm2) = casscf.make_rdm12(&cas.ci);
        let hop = casscf.gen_g_hop(&mo, &rdm1, &dm2);
        let fd = finite_difference_gradient(&mut casscf, &mo);
        assert!((&hop.g_orb - &fd).amax() < 1e-5, "analytic {:?} vs fd {:?}", hop.g_orb, fd);
    }

    #[test]
    fn test_spin_polarized_gradient_matches_finite_differences() {
        let model = chain(4, 2.0, Some(0.3));
        let hs = Arc::new(model.h1e_s.clone().unwrap());
        let mut casscf = SpinPolarizedCasscf::new(core_for(&model, 3, 2, (1, 0), 50), FciSolver::new(2, &FciParams::default()), hs);
        let mo = random_orbitals(4, 11);
        let cas = casscf.casci(&mo, None).unwrap();
        let (rdm1, dm2) = casscf.make_rdm12(&cas.ci);
        assert!(rdm1.sdm.as_ref().is_some_and(|s| s.norm() > 0.1));
        let hop = casscf.gen_g_hop(&mo, &rdm1, &dm2);
        let fd = finite_difference_gradient(&mut casscf, &mo);
        assert!((&hop.g_orb - &fd).amax() < 1e-5, "analytic {:?} vs fd {:?}", hop.g_orb, fd);
    }

    #[test]
    fn test_spin_polarized_hessian_vector_matches_gradient_response() {
        let model = chain(4, 2.0, Some(0.3));
        let hs = Arc::new(model.h1e_s.clone().unwrap());
        let mut casscf = SpinPolarizedCasscf::new(core_for(&model, 3, 2, (1, 0), 50), FciSolver::new(2, &FciParams::default()), hs);
        let mo = random_orbitals(4, 3);
        let cas = casscf.casci(&mo, None).unwrap();
        let (rdm1, dm2) = casscf.make_rdm12(&cas.ci);
        let hop = casscf.gen_g_hop(&mo, &rdm1, &dm2);
        let vars = casscf.core().rotation_variables();

        let at_identity = (hop.gorb_update)(&DMatrix::identity(4, 4), &rdm1, &dm2);
        assert!((&at_identity - &hop.g_orb).amax() < 1e-10);

        let d = DVector::from_fn(vars.len(), |i, _| 0.3 - 0.1 * i as f64);
        let eps = 1e-4;
        let g_plus = (hop.gorb_update)(&vars.rotation(&(&d * eps)), &rdm1, &dm2);
        let g_minus = (hop.gorb_update)(&vars.rotation(&(&d * -eps)), &rdm1, &dm2);
        let fd = (g_plus - g_minus) / (2.0 * eps);
        let hx = (hop.h_op)(&d);
        assert!((&hx - &fd).amax() < 1e-5, "h_op {:?} vs fd {:?}", hx, fd);
    }

    #[test]
    fn test_casscf_lowers_casci_energy() {
        let model = chain(4, 3.0, None);
        let mo0 = rhf_orbitals(&model, 4);
        let mut casscf = Casscf::new(core_for(&model, 4, 2, (1, 1), 50), FciSolver::new(1, &FciParams::default()));
        let e_casci = casscf.casci(&mo0, None).unwrap().e_tot;
        let result = kernel(&mut casscf, &mo0, None).unwrap();
        assert!(result.converged);
        assert!(result.e_tot <= e_casci + 1e-10);
        assert!(result.gradient_norm < 1e-5);
        let orth = result.mo_coeff.transpose() * &result.mo_coeff - DMatrix::identity(4, 4);
        assert!(orth.norm() < 1e-10);
    }

    #[test]
    fn test_spin_polarized_solver_keeps_multiplicity() {
        let model = chain(4, 2.0, Some(0.2));
        let mo0 = random_orbitals(4, 5);
        let mut solver = ActiveSpaceSolver::new(
            core_for(&model, 3, 3, (2, 1), 50),
            FciSolver::new(2, &FciParams::default()),
            model.h1e_s.clone().map(Arc::new),
        );
        assert!(solver.is_spin_polarized());
        let outcome = solver.kernel_with_ladder(&mo0, None).unwrap();
        assert!(outcome.result.converged);
        let (_, mult) = solver.spin_square(&outcome.result.ci);
        assert!((mult - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ladder_stage_sequence() {
        let mut stage = LadderStage::Primary;
        let mut seen = vec![stage];
        while stage != LadderStage::Exhausted {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                LadderStage::Primary,
                LadderStage::Newton,
                LadderStage::FreshCi,
                LadderStage::FreshCiNewton,
                LadderStage::Exhausted
            ]
        );
    }

    #[test]
    fn test_ladder_exhausted_without_macro_iterations() {
        let model = chain(4, 2.0, None);
        let mut solver = ActiveSpaceSolver::new(core_for(&model, 4, 2, (1, 1), 0), FciSolver::new(1, &FciParams::default()), None);
        solver.core_mut().frozen = vec![3];
        match solver.kernel_with_ladder(&random_orbitals(4, 9), None) {
            Err(SolverError::ActiveSpaceNotConverged { attempts, last_gradient }) => {
                assert_eq!(attempts, 4);
                assert!(last_gradient > 1e-5);
            }
            other => panic!("expected ActiveSpaceNotConverged, got {:?}", other.map(|o| o.stage)),
        }
        // the fresh-CI stage releases frozen orbitals
        assert!(solver.core().frozen.is_empty());
    }
}
