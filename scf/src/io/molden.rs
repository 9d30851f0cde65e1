//! Molden-style orbital export.
//!
//! Only the `[MO]` section is written. Coefficients are given over the AO
//! basis when the local-to-AO map is known, otherwise over the local basis.

use crate::fragment::Fragment;
use nalgebra::{DMatrix, DVector};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Orbitals to export, one per column of `coeff`.
pub struct MoldenOrbitals<'a> {
    pub coeff: &'a DMatrix<f64>,
    pub energies: Option<&'a DVector<f64>>,
    pub occupations: &'a DVector<f64>,
    pub symmetry_labels: Option<&'a [String]>,
}

/// Write `orbs` to `path`.
pub fn write_molden(path: &Path, orbs: &MoldenOrbitals<'_>) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "[Molden Format]")?;
    writeln!(w, "[MO]")?;
    for j in 0..orbs.coeff.ncols() {
        let sym = orbs
            .symmetry_labels
            .and_then(|labels| labels.get(j))
            .map(String::as_str)
            .unwrap_or("A");
        writeln!(w, " Sym= {}", sym)?;
        writeln!(w, " Ene= {:.10}", orbs.energies.map_or(0.0, |e| e[j]))?;
        writeln!(w, " Spin= Alpha")?;
        writeln!(w, " Occup= {:.10}", orbs.occupations[j])?;
        for (i, c) in orbs.coeff.column(j).iter().enumerate() {
            writeln!(w, "{:5} {:16.10}", i + 1, c)?;
        }
    }
    w.flush()
}

/// Export the guess orbitals of `frag` to `<filehead><frag_name>_mfmorb.molden`.
///
/// Failures are logged and otherwise ignored.
pub fn write_guess_molden(frag: &Fragment, imp2mo: &DMatrix<f64>, occ: &DVector<f64>, labels: Option<&[String]>) {
    let Some(output) = &frag.orbital_output else {
        return;
    };
    let loc2mo = &frag.loc2imp * imp2mo;
    let coeff = match &output.ao2loc {
        Some(ao2loc) if ao2loc.ncols() == loc2mo.nrows() => ao2loc * &loc2mo,
        Some(ao2loc) => {
            warn!(
                "ao2loc has {} columns but the local basis has {} functions; writing local-basis coefficients",
                ao2loc.ncols(),
                loc2mo.nrows()
            );
            loc2mo
        }
        None => loc2mo,
    };
    let filename = format!("{}{}_mfmorb.molden", frag.filehead, frag.frag_name);
    info!("Writing {} CAS guess orbital molden to {}", frag.frag_name, filename);
    let orbs = MoldenOrbitals {
        coeff: &coeff,
        energies: None,
        occupations: occ,
        symmetry_labels: labels,
    };
    if let Err(err) = write_molden(Path::new(&filename), &orbs) {
        warn!("Could not write {}: {}", filename, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_molden_sections() {
        let coeff = DMatrix::from_row_slice(2, 2, &[0.6, 0.8, 0.8, -0.6]);
        let occ = DVector::from_vec(vec![2.0, 0.0]);
        let labels = vec!["Ag".to_string(), "Bu".to_string()];
        let path = std::env::temp_dir().join(format!("dmet_casscf_molden_{}.molden", std::process::id()));
        let orbs = MoldenOrbitals {
            coeff: &coeff,
            energies: None,
            occupations: &occ,
            symmetry_labels: Some(&labels),
        };
        write_molden(&path, &orbs).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(text.starts_with("[Molden Format]\n[MO]\n"));
        assert_eq!(text.matches("Sym=").count(), 2);
        assert!(text.contains(" Sym= Bu"));
        assert!(text.contains(" Occup= 2.0000000000"));
        assert!(text.contains("    2    -0.6000000000"));
    }
}
