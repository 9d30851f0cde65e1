//! Command-line argument parsing for the impurity-solver driver

use clap::Parser;

/// DMET CASSCF impurity solve with YAML problem description
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML problem file
    #[arg(short, long, default_value = "problem.yaml")]
    pub config_file: String,

    /// Log file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<String>,

    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override maximum mean-field cycles
    #[arg(long)]
    pub max_cycle: Option<usize>,

    /// Override CASSCF energy convergence threshold
    #[arg(long)]
    pub conv_tol: Option<f64>,

    /// Override maximum CASSCF macro iterations
    #[arg(long)]
    pub imp_maxiter: Option<usize>,
}
