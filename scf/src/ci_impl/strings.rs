//! Occupation strings and single-excitation tables

use itertools::Itertools;
use nalgebra::DMatrix;
use std::collections::HashMap;

/// One entry of a replacement table: `E_pq |I> = sign |J>`.
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub source: usize,
    pub target: usize,
    pub sign: f64,
}

/// All strings of `nelec` electrons in `norb` orbitals, as occupation bit
/// masks in ascending numeric order, with the links of every `E_pq`.
#[derive(Debug, Clone)]
pub struct StringSpace {
    norb: usize,
    nelec: usize,
    strings: Vec<u64>,
    links: Vec<Vec<Link>>,
}

/// Occupation bit masks of all `nelec`-electron strings.
pub fn make_strings(norb: usize, nelec: usize) -> Vec<u64> {
    let mut strings: Vec<u64> = (0..norb)
        .combinations(nelec)
        .map(|occ| occ.iter().fold(0u64, |acc, &i| acc | (1u64 << i)))
        .collect();
    strings.sort_unstable();
    strings
}

fn parity_below(string: u64, orb: usize) -> f64 {
    let below = string & ((1u64 << orb) - 1);
    if below.count_ones() % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// `a+_p a_q |string>` as `(new_string, sign)`, or `None` if it vanishes.
pub fn excite(string: u64, p: usize, q: usize) -> Option<(u64, f64)> {
    if string & (1u64 << q) == 0 {
        return None;
    }
    let removed = string & !(1u64 << q);
    if removed & (1u64 << p) != 0 {
        return None;
    }
    let sign = parity_below(string, q) * parity_below(removed, p);
    Some((removed | (1u64 << p), sign))
}

impl StringSpace {
    pub fn new(norb: usize, nelec: usize) -> Self {
        assert!(norb <= 63, "string space limited to 63 orbitals");
        let strings = make_strings(norb, nelec);
        let index: HashMap<u64, usize> = strings.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        let mut links = vec![Vec::new(); norb * norb];
        for (source, &string) in strings.iter().enumerate() {
            for q in 0..norb {
                for p in 0..norb {
                    if let Some((new, sign)) = excite(string, p, q) {
                        links[p * norb + q].push(Link {
                            source,
                            target: index[&new],
                            sign,
                        });
                    }
                }
            }
        }
        StringSpace {
            norb,
            nelec,
            strings,
            links,
        }
    }

    pub fn norb(&self) -> usize {
        self.norb
    }

    pub fn nelec(&self) -> usize {
        self.nelec
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn strings(&self) -> &[u64] {
        &self.strings
    }

    pub fn links(&self, p: usize, q: usize) -> &[Link] {
        &self.links[p * self.norb + q]
    }

    /// Occupied orbitals of string `i`, ascending.
    pub fn occupied(&self, i: usize) -> Vec<usize> {
        let s = self.strings[i];
        (0..self.norb).filter(|&k| s & (1u64 << k) != 0).collect()
    }

    /// Irrep of string `i` as the XOR of its orbitals' irrep ids.
    pub fn irrep(&self, i: usize, orbsym: &[u32]) -> u32 {
        self.occupied(i).iter().fold(0, |acc, &k| acc ^ orbsym[k])
    }

    /// `E_pq` acting on the row (alpha) index of a CI matrix.
    pub fn apply_rows(&self, p: usize, q: usize, c: &DMatrix<f64>, out: &mut DMatrix<f64>, scale: f64) {
        for link in self.links(p, q) {
            let factor = scale * link.sign;
            for col in 0..c.ncols() {
                out[(link.target, col)] += factor * c[(link.source, col)];
            }
        }
    }

    /// `E_pq` acting on the column (beta) index of a CI matrix.
    pub fn apply_cols(&self, p: usize, q: usize, c: &DMatrix<f64>, out: &mut DMatrix<f64>, scale: f64) {
        for link in self.links(p, q) {
            let factor = scale * link.sign;
            for row in 0..c.nrows() {
                out[(row, link.target)] += factor * c[(row, link.source)];
            }
        }
    }
}
