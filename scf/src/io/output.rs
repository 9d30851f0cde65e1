//! Output formatting and logging utilities

use crate::solver::SolveReport;
use color_eyre::eyre::{Result, WrapErr};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::Writer, fmt::layer, fmt::time::FormatTime, layer::SubscriberExt,
    util::SubscriberInitExt, Layer, Registry,
};

/// Stamps log lines with the wall time elapsed since logging started.
struct ElapsedTimer {
    start: Instant,
}

impl FormatTime for ElapsedTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let elapsed = self.start.elapsed();
        let total = elapsed.as_secs();
        write!(
            w,
            "{:02}:{:02}:{:02}.{:01}",
            total / 3600,
            (total / 60) % 60,
            total % 60,
            elapsed.subsec_millis() / 100
        )
    }
}

/// Map the number of `-v` flags to a log level.
pub fn verbosity_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Route log output to `output_path`, or stdout when none is given.
pub fn setup_output(output_path: Option<&str>, level: LevelFilter) -> Result<()> {
    let timer = ElapsedTimer { start: Instant::now() };
    match output_path {
        Some(path) => {
            let log = File::create(path).wrap_err_with(|| format!("Could not create output file: {}", path))?;
            let file_layer = layer()
                .with_writer(log)
                .with_timer(timer)
                .with_ansi(false)
                .with_filter(level);
            Registry::default().with(file_layer).init();
            info!("Log written to {} at level {}", path, level);
        }
        None => {
            let stdout_layer = layer()
                .with_writer(std::io::stdout)
                .with_timer(timer)
                .with_target(false)
                .with_filter(level);
            Registry::default().with(stdout_layer).init();
        }
    }
    Ok(())
}

/// Print one line per chemical potential visited by the driver.
pub fn print_solve_summary<W: Write>(writer: &mut W, runs: &[(f64, SolveReport)]) -> Result<()> {
    writeln!(writer, "Impurity solves:")?;
    writeln!(
        writer,
        "  {:>10} {:>18} {:>18} {:>8} {:>6} {:>10}",
        "mu", "E_CASSCF", "E_imp", "2S+1", "iters", "time (s)"
    )?;
    for (mu, report) in runs {
        writeln!(
            writer,
            "  {:>10.5} {:>18.10} {:>18.10} {:>8.4} {:>6} {:>10.3}",
            mu,
            report.e_casscf,
            report.e_imp,
            report.multiplicity,
            report.macro_iterations,
            report.wall_time.as_secs_f64()
        )?;
    }
    Ok(())
}
