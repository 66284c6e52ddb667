//! # Neighbor Access Operators
//!
//! Dense `N×N` matrices (`N = Zgrid·Ygrid`) that shift a row-major flattened
//! `(Zgrid, Ygrid)` field by `k ∈ {-2, -1, 0, 1, 2}` cells along one axis:
//! `(q[k]·c)[r] = c[r + k]` in the interior. Rows touching a wall are rewritten
//! according to the boundary condition:
//!
//! - **Y, Neumann**: indices −1, −2 are copied from the nearest cells inside the
//!   row (reflection), the right wall is handled symmetrically and nothing bleeds
//!   into the neighbouring Z-row.
//! - **Y, Dirichlet**: the first and last cell of every Y-row get an all-zero row
//!   (absorbing wall).
//! - **Z**: Neumann at the top wall. At the bottom either Neumann, or a mirror
//!   plane when only the top half of a symmetric channel is simulated. The mirror
//!   plane lies on a cell edge for an even full grid and through the middle of the
//!   last simulated row for an odd one (`Zodd`).
//!
//! These operators are cheap compared to the step-matrix inversion and are not
//! cached; they are pure functions of their arguments.

use super::propagator_error::PropagatorError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Boundary condition at the side walls of the channel (Y direction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Boundary {
    /// constant (zero) derivative
    #[default]
    Neumann,
    /// constant (zero) value
    Dirichlet,
}

impl FromStr for Boundary {
    type Err = PropagatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Neumann" => Ok(Boundary::Neumann),
            "Dirichlet" => Ok(Boundary::Dirichlet),
            other => Err(PropagatorError::UnknownBoundary(other.to_string())),
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Neumann => write!(f, "Neumann"),
            Boundary::Dirichlet => write!(f, "Dirichlet"),
        }
    }
}

/// The five shift operators `q[-2] .. q[2]` along one axis
#[derive(Debug, Clone)]
pub struct NeighborSet {
    q: [DMatrix<f64>; 5],
}

impl NeighborSet {
    /// Operator shifting by `k` cells, `k ∈ -2..=2`
    pub fn shift(&self, k: i32) -> Result<&DMatrix<f64>, PropagatorError> {
        if !(-2..=2).contains(&k) {
            return Err(PropagatorError::InvalidConfiguration(format!(
                "only shifts in -2..=2 are stored (got {})",
                k
            )));
        }
        Ok(&self.q[(k + 2) as usize])
    }

    pub fn dim(&self) -> usize {
        self.q[2].nrows()
    }

    /// Second difference `q[-1] - 2q[0] + q[1]` (unscaled)
    pub fn second_difference(&self) -> DMatrix<f64> {
        &self.q[1] - &self.q[2] * 2.0 + &self.q[3]
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut DMatrix<f64>> {
        self.q.iter_mut()
    }
}

/// Identity shifted by `offset` columns: ones at `(r, r + offset)`
fn shifted_identity(n: usize, offset: isize) -> DMatrix<f64> {
    let mut m = DMatrix::<f64>::zeros(n, n);
    for r in 0..n {
        let c = r as isize + offset;
        if c >= 0 && (c as usize) < n {
            m[(r, c as usize)] = 1.0;
        }
    }
    m
}

fn base_set(n: usize, stride: usize) -> NeighborSet {
    NeighborSet {
        q: std::array::from_fn(|i| shifted_identity(n, (i as isize - 2) * stride as isize)),
    }
}

fn zero_block(m: &mut DMatrix<f64>, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) {
    for r in rows {
        for c in cols.clone() {
            m[(r, c)] = 0.0;
        }
    }
}

/// Shift operators along Y for every Z-row of a `(Zgrid, Ygrid)` grid.
#[allow(non_snake_case)]
pub fn get_qy(Zgrid: usize, Ygrid: usize, boundary: Boundary) -> Result<NeighborSet, PropagatorError> {
    if Ygrid < 2 || Zgrid == 0 {
        return Err(PropagatorError::InvalidConfiguration(format!(
            "Y neighbors need Ygrid >= 2 and Zgrid >= 1 (got {}x{})",
            Zgrid, Ygrid
        )));
    }
    let n = Zgrid * Ygrid;
    let mut q = base_set(n, 1);

    for start in (0..n).step_by(Ygrid) {
        let end = start + Ygrid - 1;
        // left wall: -2 -> 0 for the first two cells, -1 -> 0 for the first one
        q.q[0][(start, start)] = 1.0;
        q.q[0][(start + 1, start)] = 1.0;
        q.q[1][(start, start)] = 1.0;
        // right wall
        q.q[3][(end, end)] = 1.0;
        q.q[4][(end - 1, end)] = 1.0;
        q.q[4][(end, end)] = 1.0;
        if start > 0 {
            for m in q.all_mut() {
                zero_block(m, start..start + 2, start - 2..start);
                zero_block(m, start - 2..start, start..start + 2);
            }
        }
    }

    if boundary == Boundary::Dirichlet {
        for m in q.all_mut() {
            for start in (0..n).step_by(Ygrid) {
                m.row_mut(start).fill(0.0);
                m.row_mut(start + Ygrid - 1).fill(0.0);
            }
        }
    }
    Ok(q)
}

/// Shift operators along Z. `Zgrid` is the simulated (possibly halved) grid.
#[allow(non_snake_case)]
pub fn get_qz(Zgrid: usize, Ygrid: usize, Zmirror: bool, Zodd: bool) -> Result<NeighborSet, PropagatorError> {
    if Zgrid < 2 || Ygrid == 0 {
        return Err(PropagatorError::InvalidConfiguration(format!(
            "Z neighbors need Zgrid >= 2 (got {}x{})",
            Zgrid, Ygrid
        )));
    }
    let shift: isize = if Zmirror && Zodd { 1 } else { 0 };
    let z = Zgrid as isize;
    // resolves a (possibly negative, python-style) row index to a Z-row
    let block = |l: isize| -> usize {
        let mut l = l;
        if l >= z {
            l = z - l - 1 - shift;
        }
        if l < -z {
            l = -z - l - 1;
        }
        let b = if l < 0 { z + l } else { l };
        debug_assert!((0..z).contains(&b));
        b as usize
    };

    let n = Zgrid * Ygrid;
    let mut q = base_set(n, Ygrid);
    let mut set = |k: usize, row: isize, col: isize| {
        let (rb, cb) = (block(row), block(col));
        for j in 0..Ygrid {
            q.q[k][(rb * Ygrid + j, cb * Ygrid + j)] = 1.0;
        }
    };

    // top wall
    set(0, 1, 0);
    set(0, 0, 1);
    set(1, 0, 0);
    // bottom wall or mirror plane
    set(3, -1, -1 - shift);
    set(4, -2, -1 - shift);
    set(4, -1, -2 - shift);

    Ok(q)
}
