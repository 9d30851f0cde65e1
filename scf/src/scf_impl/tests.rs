//! Tests for the mean-field driver

use super::{ImpurityRohf, DIIS};
use crate::config::{ModelConfig, ScfParams};
use crate::integrals::TwoElectronIntegrals;
use crate::model::ModelHamiltonian;
use basis::helper::expmat;
use nalgebra::DMatrix;

fn chain(nsites: usize, u: f64, v: f64, density_fitting: bool, spin_field: Option<f64>) -> ModelHamiltonian {
    let cfg = ModelConfig {
        nsites,
        hopping: 1.0,
        onsite_u: u,
        nearest_neighbor_v: Some(v),
        site_energies: None,
        periodic: Some(false),
        spin_field,
        constant: None,
        density_fitting: Some(density_fitting),
    };
    ModelHamiltonian::hubbard_chain(&cfg).unwrap()
}

fn half_filled_guess(n: usize, nelec: usize) -> DMatrix<f64> {
    DMatrix::identity(n, n) * (nelec as f64 / n as f64)
}

#[test]
fn test_diis_symmetric_errors_average() {
    let mut diis = DIIS::new(8);
    let f1 = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 3.0]);
    let f2 = DMatrix::from_row_slice(2, 2, &[3.0, 0.0, 0.0, 5.0]);
    let e = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]);
    diis.update(f1.clone(), e.clone());
    diis.update(f2.clone(), -e);
    let f = diis.extrapolate().unwrap();
    assert!((f - (f1 + f2) * 0.5).norm() < 1e-12);
}

#[test]
fn test_diis_drops_oldest_entry() {
    let mut diis = DIIS::new(2);
    for i in 0..5 {
        let f = DMatrix::from_element(2, 2, i as f64);
        diis.update(f, DMatrix::identity(2, 2) * (i + 1) as f64);
    }
    assert_eq!(diis.size(), 2);
    diis.reset();
    assert_eq!(diis.size(), 0);
    assert!(diis.extrapolate().is_none());
}

#[test]
fn test_commutator_error_vanishes_for_commuting_matrices() {
    let f = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
    let d = &f * 2.0;
    assert!(DIIS::calculate_error_matrix(&f, &d).norm() < 1e-14);
}

#[test]
fn test_hubbard_dimer_rhf_energy() {
    let u = 2.0;
    let model = chain(2, u, 0.0, false, None);
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 2, 0, &ScfParams::default()).unwrap();
    let result = rohf.kernel(&half_filled_guess(2, 2), false, 0);
    assert!(result.converged);
    // bonding orbital doubly occupied: E = -2t + U/2
    assert!((result.e_tot - (-2.0 + 0.5 * u)).abs() < 1e-9, "E = {}", result.e_tot);
    assert!((result.make_rdm1().trace() - 2.0).abs() < 1e-10);
}

#[test]
fn test_dense_and_density_fitted_jk_agree() {
    let dense = chain(4, 4.0, 1.0, false, None);
    let fitted = chain(4, 4.0, 1.0, true, None);
    assert!(fitted.eri.is_density_fitted());
    let a = DMatrix::from_fn(4, 4, |i, j| ((i * 3 + j * 5) % 7) as f64 / 7.0);
    let dm = &a + a.transpose();
    let (j1, k1) = dense.eri.get_jk(&dm);
    let (j2, k2) = fitted.eri.get_jk(&dm);
    assert!((j1 - j2).norm() < 1e-10);
    assert!((k1 - k2).norm() < 1e-10);
    assert!((dense.eri.to_dense().sub(&fitted.eri.to_dense())).as_slice().iter().all(|x| x.abs() < 1e-10));
}

#[test]
fn test_stable_closed_shell_has_no_instability() {
    let model = chain(4, 1.0, 0.0, false, None);
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 4, 0, &ScfParams::default()).unwrap();
    let result = rohf.kernel(&half_filled_guess(4, 4), false, 0);
    assert!(result.converged);
    assert!(rohf.stability(&result.mo_coeff).is_none());
    let checked = rohf.kernel(&half_filled_guess(4, 4), false, 2);
    assert!((checked.e_tot - result.e_tot).abs() < 1e-9);
}

#[test]
fn test_instability_restart_reaches_lower_solution() {
    // U = 0, V = 4 dimer: the uniform bond orbital is a saddle point at E = 0,
    // the charge-ordered state sits at E = -1/2
    let model = chain(2, 0.0, 4.0, false, None);
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 2, 0, &ScfParams::default()).unwrap();
    let uniform = rohf.kernel(&half_filled_guess(2, 2), false, 0);
    assert!(uniform.converged);
    assert!(uniform.e_tot.abs() < 1e-9, "E = {}", uniform.e_tot);
    assert!(rohf.stability(&uniform.mo_coeff).is_some());

    let restarted = rohf.kernel(&half_filled_guess(2, 2), false, 1);
    assert!(restarted.converged);
    assert!((restarted.e_tot + 0.5).abs() < 1e-6, "E = {}", restarted.e_tot);
    assert!(restarted.e_tot < uniform.e_tot);
    let dm = restarted.make_rdm1();
    assert!((dm[(0, 0)] - dm[(1, 1)]).abs() > 1.0);
    assert!(rohf.stability(&restarted.mo_coeff).is_none());
}

#[test]
fn test_newton_recovers_fixed_point_energy() {
    let model = chain(4, 2.0, 0.0, false, None);
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 4, 0, &ScfParams::default()).unwrap();
    let reference = rohf.scf_cycle(&half_filled_guess(4, 4), 100);
    assert!(reference.converged);
    let kappa = DMatrix::from_fn(4, 4, |i, j| match (i, j) {
        (0, 2) => 0.05,
        (2, 0) => -0.05,
        (1, 3) => -0.04,
        (3, 1) => 0.04,
        _ => 0.0,
    });
    let start = &reference.mo_coeff * expmat(&kappa);
    let newton = rohf.newton(&start);
    assert!(newton.converged);
    assert!((newton.e_tot - reference.e_tot).abs() < 1e-8);
}

#[test]
fn test_open_shell_somo_exchange() {
    let model = chain(3, 2.0, 0.0, false, Some(0.1));
    let hs = model.h1e_s.clone().unwrap();
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, Some(&hs), 0.0, 3, 1, &ScfParams::default()).unwrap();
    assert_eq!(rohf.nelec(), (2, 1));
    let result = rohf.kernel(&half_filled_guess(3, 3), false, 0);
    let somo = result.somo_indices();
    assert_eq!(somo.len(), 1);
    assert!((result.mo_occ.sum() - 3.0).abs() < 1e-12);
    let c = result.mo_coeff.column(somo[0]);
    let expected = c.dot(&(&hs * c));
    assert!((rohf.somo_spin_exchange(&result) - expected).abs() < 1e-12);
}

#[test]
fn test_guess_only_caps_cycles() {
    let model = chain(4, 4.0, 0.0, false, None);
    let rohf = ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 4, 0, &ScfParams::default()).unwrap();
    let result = rohf.kernel(&half_filled_guess(4, 4), true, 3);
    assert!(result.cycles <= rohf.guess_max_cycle);
}

#[test]
fn test_invalid_spin_projection() {
    let model = chain(3, 1.0, 0.0, false, None);
    assert!(ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 3, 0, &ScfParams::default()).is_err());
    assert!(ImpurityRohf::new(&model.h1e, &model.eri, None, 0.0, 3, 5, &ScfParams::default()).is_err());
    let wrong = TwoElectronIntegrals::Dense(basis::tensor::Eri4::zeros(2));
    assert!(ImpurityRohf::new(&model.h1e, &wrong, None, 0.0, 2, 0, &ScfParams::default()).is_err());
}
