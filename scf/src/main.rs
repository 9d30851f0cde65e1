//! Impurity-solver command-line interface
//!
//! Reads a YAML problem file, builds a model impurity Hamiltonian and solves
//! it once per requested chemical potential, reusing the fragment between
//! solves the way an outer embedding loop would.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use dmet_casscf::config::{Args, Config};
use dmet_casscf::io::{print_solve_summary, setup_output, verbosity_level};
use dmet_casscf::model::{fragment_chemical_potential, ModelHamiltonian};
use dmet_casscf::{solve, Fragment, OrbitalOutput};
use basis::helper::{matrix_eigen_control_options, SortOrder};
use nalgebra::DMatrix;
use std::fs;
use tracing::info;

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_output(args.output.as_deref(), verbosity_level(args.verbose))?;

    info!("Reading configuration from: {}", args.config_file);
    let config_content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;
    let mut config: Config = serde_yml::from_str::<Config>(&config_content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();

    if let Some(mc) = args.max_cycle {
        info!("Overriding mean-field max_cycle with: {}", mc);
        config.solver.scf.max_cycle = Some(mc);
    }
    if let Some(tol) = args.conv_tol {
        info!("Overriding CASSCF conv_tol with: {}", tol);
        config.solver.casscf.conv_tol = Some(tol);
    }
    if let Some(maxiter) = args.imp_maxiter {
        info!("Overriding imp_maxiter with: {}", maxiter);
        config.imp_maxiter = Some(maxiter);
    }
    info!("Configuration loaded:\n{:?}", config);

    let mut frag = build_fragment(&config)?;
    let guess = aufbau_density(&frag.impham_oei_c, config.nelec);
    let nfrag = config.fragment_orbitals.unwrap_or(frag.norbs_imp());

    let mut runs = Vec::with_capacity(config.chemical_potentials.len());
    for &mu in &config.chemical_potentials {
        info!("\nSolving impurity at chemical potential {:.6}", mu);
        let chempot = fragment_chemical_potential(frag.norbs_imp(), nfrag, mu);
        let guess_1rdm = frag.get_one_rdm_imp().unwrap_or_else(|| guess.clone());
        let report = solve(&mut frag, &guess_1rdm, &chempot)
            .wrap_err_with(|| format!("Impurity solve failed at chemical potential {}", mu))?;
        info!(
            "E_imp = {:.10}, E2_cum = {:.10}, ladder stage {:?}",
            frag.e_imp, frag.e2_cum, report.ladder_stage
        );
        runs.push((mu, report));
    }

    let mut stdout = std::io::stdout();
    print_solve_summary(&mut stdout, &runs)?;
    Ok(())
}

/// Fragment over the whole model: the local and impurity bases coincide.
fn build_fragment(config: &Config) -> Result<Fragment> {
    let model = ModelHamiltonian::hubbard_chain(&config.model).wrap_err("Failed to build model Hamiltonian")?;
    let n = model.h1e.nrows();
    let frag_name = config.frag_name.clone().unwrap_or_else(|| "imp".to_string());
    let mut frag = Fragment::new(
        &frag_name,
        DMatrix::identity(n, n),
        config.nelec,
        model.constant,
        model.h1e,
        model.eri,
    );
    frag.impham_oei_s = model.h1e_s;
    frag.active_space = config.active_space;
    frag.target_ms = config.target_ms.unwrap_or(0.5 * (config.nelec % 2) as f64);
    frag.target_s = config.target_s;
    frag.num_mf_stab_checks = config.num_mf_stab_checks.unwrap_or(0);
    frag.imp_maxiter = config.imp_maxiter;
    frag.params = config.solver.clone();
    if let Some(filehead) = &config.filehead {
        frag.filehead = filehead.clone();
        frag.orbital_output = Some(OrbitalOutput::default());
    }
    Ok(frag)
}

/// Spin-summed aufbau density of the one-electron operator.
fn aufbau_density(h1e: &DMatrix<f64>, nelec: usize) -> DMatrix<f64> {
    let (_, evecs) = matrix_eigen_control_options(h1e, SortOrder::Ascending, false);
    let n = h1e.nrows();
    let occ = |i: usize| {
        let left = nelec.saturating_sub(2 * i);
        left.min(2) as f64
    };
    let mut dm = DMatrix::zeros(n, n);
    for i in 0..n {
        let c = evecs.column(i);
        dm += c * c.transpose() * occ(i);
    }
    dm
}
