//! # Step Matrix Builder
//!
//! The unitless transport equation on the channel cross-section reads
//!
//! ```text
//! V'·∂φC = ∂y'²C + ∂z'²C − μ'E·∂y'C
//! ```
//!
//! with `φ = x·D/Q·β`, `y' = y/Wy`, `z' = z/Wy`, `β = Wz/Wy`, `V' = V·Wy²·β/Q` and
//! `μ'E = μE·Wy/D`. After dividing by `V'`, the discretized right-hand side is a
//! linear generator `dF = dφ·(Cyy + Czz − μ'E·Cy)` and one step of length `dφ`
//! is the transition matrix `F`:
//!
//! | method      | F                                   |
//! |-------------|-------------------------------------|
//! | `Explicit`  | `I + dF`                            |
//! | `Implicit`  | `(I − dF)⁻¹`                        |
//! | `Trapezoid` | `(I − dF/2)⁻¹·(I + dF/2)` (default) |
//!
//! `dφ` is bounded by `min(dy, dz)²·min(V)/2` (diffusion) and, with a drift, by
//! `min(V)/|μ'E|·dy/2`, which keeps the spectral radius of `F` at or below one.
//! The drift term `Cy` is the flux-conserving Fromm scheme with the upwind
//! stencil chosen by the sign of `μ'E`.

use super::flow_field::FlowFieldCache;
use super::neighbor_operators::{Boundary, get_qy, get_qz};
use super::propagator_error::PropagatorError;
use log::info;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time integration scheme used to turn the generator into a transition matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegrationMethod {
    Explicit,
    Implicit,
    /// Crank–Nicolson
    #[default]
    Trapezoid,
}

impl FromStr for IntegrationMethod {
    type Err = PropagatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Explicit" => Ok(IntegrationMethod::Explicit),
            "Implicit" => Ok(IntegrationMethod::Implicit),
            "Trapezoid" => Ok(IntegrationMethod::Trapezoid),
            other => Err(PropagatorError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrationMethod::Explicit => "Explicit",
            IntegrationMethod::Implicit => "Implicit",
            IntegrationMethod::Trapezoid => "Trapezoid",
        };
        write!(f, "{}", name)
    }
}

/// Discretization of the channel cross-section.
///
/// `Zgrid` is always the full number of Z cells; with `Zmirror` only the top
/// `(Zgrid + 1) / 2` rows are simulated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(non_snake_case)]
pub struct ChannelGrid {
    pub Zgrid: usize,
    pub Ygrid: usize,
    /// height over width
    pub beta: f64,
    pub Zmirror: bool,
}

#[allow(non_snake_case)]
impl ChannelGrid {
    pub fn new(Zgrid: usize, Ygrid: usize, beta: f64, Zmirror: bool) -> Result<Self, PropagatorError> {
        if Zgrid == 0 || Ygrid < 2 {
            return Err(PropagatorError::InvalidConfiguration(format!(
                "grid must have Zgrid >= 1 and Ygrid >= 2 (got {}x{})",
                Zgrid, Ygrid
            )));
        }
        if !(beta > 0.0) || !beta.is_finite() {
            return Err(PropagatorError::InvalidConfiguration(format!(
                "aspect ratio must be positive and finite (got {})",
                beta
            )));
        }
        Ok(Self {
            Zgrid,
            Ygrid,
            beta,
            Zmirror,
        })
    }

    /// Number of simulated Z rows
    pub fn effective_Zgrid(&self) -> usize {
        if self.Zmirror {
            (self.Zgrid + 1) / 2
        } else {
            self.Zgrid
        }
    }

    /// The mirror plane passes through the middle of the last simulated row
    pub fn Zodd(&self) -> bool {
        self.Zmirror && self.Zgrid % 2 == 1
    }

    /// Length of the flattened simulated field
    pub fn n_cells(&self) -> usize {
        self.effective_Zgrid() * self.Ygrid
    }

    pub fn dy(&self) -> f64 {
        1.0 / self.Ygrid as f64
    }

    pub fn dz(&self) -> f64 {
        self.beta / self.Zgrid as f64
    }
}

/// Physical and numerical options of a step matrix
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(non_snake_case)]
pub struct StepOptions {
    /// unitless electrophoretic drift μ'E
    pub mu_prime_E: f64,
    pub method: IntegrationMethod,
    /// shrink factor of dφ; derived from `dphi_max` when absent
    pub step_factor: Option<f64>,
    /// largest acceptable dφ
    pub dphi_max: Option<f64>,
    pub y_boundary: Boundary,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            mu_prime_E: 0.0,
            method: IntegrationMethod::Trapezoid,
            step_factor: None,
            dphi_max: None,
            y_boundary: Boundary::Neumann,
        }
    }
}

/// One-step transition matrix together with its step length
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct StepMatrix {
    pub F: DMatrix<f64>,
    pub dphi: f64,
    pub step_factor: f64,
}

/// Stable step length for the grid, shrunk by `step_factor`.
///
/// `V` is the full (not mirrored) unitless flow field. Without an explicit
/// `step_factor`, `dphi_max` selects `exp(floor(ln(dphi_max / dphi)))`, capped at 1.
/// Returns `(dphi, step_factor)`.
#[allow(non_snake_case)]
pub fn get_dphi(
    grid: &ChannelGrid,
    V: &DMatrix<f64>,
    mu_prime_E: f64,
    step_factor: Option<f64>,
    dphi_max: Option<f64>,
) -> Result<(f64, f64), PropagatorError> {
    let dy = grid.dy();
    let dz = grid.dz();
    let v_min = V.min();

    let mut dphi = dy.min(dz).powi(2) * v_min / 2.0;
    if mu_prime_E != 0.0 {
        let dphi_drift = v_min / mu_prime_E.abs() * dy / 2.0;
        dphi = dphi.min(dphi_drift);
    }
    if !(dphi > 0.0) || !dphi.is_finite() {
        return Err(PropagatorError::DegenerateStep(dphi));
    }

    let mut step_factor = match (step_factor, dphi_max) {
        (Some(factor), _) => factor,
        (None, None) => 1.0,
        (None, Some(dphi_max)) => {
            if !(dphi_max > 0.0) {
                return Err(PropagatorError::DegenerateStep(dphi_max));
            }
            (dphi_max / dphi).ln().floor().exp()
        }
    };
    if !(step_factor > 0.0) {
        return Err(PropagatorError::InvalidConfiguration(format!(
            "step factor must be positive (got {})",
            step_factor
        )));
    }
    if step_factor > 1.0 {
        step_factor = 1.0;
    }

    Ok((dphi * step_factor, step_factor))
}

/// Multiplies row `r` of `m` by `factors[r]`, i.e. `diag(factors)·m`
fn scale_rows(mut m: DMatrix<f64>, factors: &DVector<f64>) -> DMatrix<f64> {
    for r in 0..m.nrows() {
        m.row_mut(r).scale_mut(factors[r]);
    }
    m
}

/// Fromm drift operator `Cy ≈ (1/V)·∂y` on the simulated grid.
///
/// `Viy` is the unitless flow at the Y interfaces, shape `Zgrid × (Ygrid − 1)`.
#[allow(non_snake_case)]
pub fn get_cy(
    mu_prime_E: f64,
    dphi: f64,
    Viy: &DMatrix<f64>,
    Zgrid: usize,
    Ygrid: usize,
    dy: f64,
    boundary: Boundary,
) -> Result<DMatrix<f64>, PropagatorError> {
    if Ygrid < 2 || Zgrid == 0 {
        return Err(PropagatorError::InvalidConfiguration(format!(
            "drift needs Ygrid >= 2 and Zgrid >= 1 (got {}x{})",
            Zgrid, Ygrid
        )));
    }
    if Viy.shape() != (Zgrid, Ygrid - 1) {
        return Err(PropagatorError::ShapeMismatch(format!(
            "interface flow is {:?}, expected ({}, {})",
            Viy.shape(),
            Zgrid,
            Ygrid - 1
        )));
    }
    let n = Zgrid * Ygrid;

    // inverse interface flow, with a zero after the last interface of every row
    let mut iVyp = vec![0.0; n];
    for z in 0..Zgrid {
        for y in 0..Ygrid - 1 {
            iVyp[z * Ygrid + y] = 1.0 / Viy[(z, y)];
        }
    }
    let iVym: Vec<f64> = std::iter::once(0.0)
        .chain(iVyp[..n - 1].iter().copied())
        .collect();

    let q = get_qy(Zgrid, Ygrid, boundary)?;
    // Fromm slopes
    let sigdy = |k: i32| -> Result<DMatrix<f64>, PropagatorError> {
        Ok((q.shift(k + 1)? - q.shift(k - 1)?) * 0.5)
    };

    let neg = if mu_prime_E < 0.0 { 1 } else { 0 };
    let (a, b) = (-1 + neg, neg);
    let (qa, qb) = (q.shift(a)?, q.shift(b)?);
    let (sa, sb) = (sigdy(a)?, sigdy(b)?);
    let nu = mu_prime_E * dphi;
    let half = 0.5 - neg as f64;

    let Cy = DMatrix::from_fn(n, n, |r, c| {
        let (m, p) = (iVym[r], iVyp[r]);
        let upwind = m * qa[(r, c)] - p * qb[(r, c)];
        let slope = m * sa[(r, c)] - p * sb[(r, c)];
        let slope_sq = m * m * sa[(r, c)] - p * p * sb[(r, c)];
        (upwind + half * (slope - nu / dy * slope_sq)) / dy
    });

    // minus to make it a differential operator
    Ok(-Cy)
}

/// Builds the one-step transition matrix for `grid`.
#[allow(non_snake_case)]
pub fn step_matrix(
    grid: &ChannelGrid,
    options: &StepOptions,
    flow: &FlowFieldCache,
) -> Result<StepMatrix, PropagatorError> {
    let (Zgrid, Ygrid) = (grid.Zgrid, grid.Ygrid);
    let mu_prime_E = options.mu_prime_E;
    let V = flow.get(Zgrid, Ygrid, grid.beta, false, false);

    let (dphi, step_factor) = get_dphi(
        grid,
        &V,
        mu_prime_E,
        options.step_factor,
        options.dphi_max,
    )?;

    let Zeff = grid.effective_Zgrid();
    let n = grid.n_cells();
    let (dy, dz) = (grid.dy(), grid.dz());

    // 1/V over the simulated rows, row-major
    let V_ref: &DMatrix<f64> = &V;
    let inv_V = DVector::from_iterator(
        n,
        (0..Zeff).flat_map(|z| (0..Ygrid).map(move |y| 1.0 / V_ref[(z, y)])),
    );

    let qy = get_qy(Zeff, Ygrid, options.y_boundary)?;
    let mut generator = scale_rows(qy.second_difference() / dy.powi(2), &inv_V);

    if Zeff > 1 {
        let qz = get_qz(Zeff, Ygrid, grid.Zmirror, grid.Zodd())?;
        generator += scale_rows(qz.second_difference() / dz.powi(2), &inv_V);
    }

    if mu_prime_E != 0.0 {
        let Viy = flow.get(Zgrid, Ygrid, grid.beta, true, false);
        let Viy = Viy.rows(0, Zeff).into_owned();
        let Cy = get_cy(
            mu_prime_E,
            dphi,
            &Viy,
            Zeff,
            Ygrid,
            dy,
            options.y_boundary,
        )?;
        generator -= Cy * mu_prime_E;
    }

    let dF = generator * dphi;
    let I = DMatrix::<f64>::identity(n, n);
    let F = match options.method {
        IntegrationMethod::Explicit => I + dF,
        IntegrationMethod::Implicit => (I - dF)
            .try_inverse()
            .ok_or(PropagatorError::SingularMatrix("Implicit"))?,
        IntegrationMethod::Trapezoid => {
            let lhs = &I - &dF * 0.5;
            let rhs = &I + &dF * 0.5;
            lhs.lu()
                .solve(&rhs)
                .ok_or(PropagatorError::SingularMatrix("Trapezoid"))?
        }
    };

    info!(
        "step matrix built: Zgrid={} (simulated {}), Ygrid={}, beta={:.4e}, mu'E={}, dphi={:.4e}, step_factor={:.4e}, method={}",
        Zgrid, Zeff, Ygrid, grid.beta, mu_prime_E, dphi, step_factor, options.method
    );

    Ok(StepMatrix {
        F,
        dphi,
        step_factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn flat_flow(grid: &ChannelGrid, flow: &FlowFieldCache) -> DVector<f64> {
        let V = flow.get(grid.Zgrid, grid.Ygrid, grid.beta, false, false);
        let Zeff = grid.effective_Zgrid();
        DVector::from_fn(grid.n_cells(), |r, _| V[(r / grid.Ygrid % Zeff, r % grid.Ygrid)])
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!(
            "Trapezoid".parse::<IntegrationMethod>().unwrap(),
            IntegrationMethod::Trapezoid
        );
        assert!(matches!(
            "RungeKutta".parse::<IntegrationMethod>(),
            Err(PropagatorError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_grid_validation() {
        assert!(ChannelGrid::new(0, 10, 0.1, false).is_err());
        assert!(ChannelGrid::new(3, 1, 0.1, false).is_err());
        assert!(ChannelGrid::new(3, 10, -0.1, false).is_err());
        let grid = ChannelGrid::new(7, 10, 0.1, true).unwrap();
        assert_eq!(grid.effective_Zgrid(), 4);
        assert!(grid.Zodd());
        assert_eq!(grid.n_cells(), 40);
    }

    #[test]
    fn test_dphi_bounds() {
        let flow = FlowFieldCache::new();
        let grid = ChannelGrid::new(4, 20, 0.5, false).unwrap();
        let V = flow.get(4, 20, 0.5, false, false);
        let v_min = V.min();

        let (dphi, factor) = get_dphi(&grid, &V, 0.0, None, None).unwrap();
        assert_eq!(factor, 1.0);
        assert_relative_eq!(dphi, 0.05f64.powi(2) * v_min / 2.0, max_relative = 1e-14);

        // strong drift takes over
        let (dphi, _) = get_dphi(&grid, &V, 1e4, None, None).unwrap();
        assert_relative_eq!(dphi, v_min / 1e4 * 0.05 / 2.0, max_relative = 1e-14);
    }

    #[test]
    fn test_step_factor_from_dphi_max() {
        let flow = FlowFieldCache::new();
        let grid = ChannelGrid::new(4, 20, 0.5, false).unwrap();
        let V = flow.get(4, 20, 0.5, false, false);
        let (dphi0, _) = get_dphi(&grid, &V, 0.0, None, None).unwrap();

        let (dphi, factor) = get_dphi(&grid, &V, 0.0, None, Some(dphi0 * 0.05)).unwrap();
        assert_relative_eq!(factor, (-3.0f64).exp(), max_relative = 1e-14);
        assert!(dphi <= dphi0 * 0.05);

        // a generous bound never enlarges the step
        let (dphi, factor) = get_dphi(&grid, &V, 0.0, None, Some(dphi0 * 100.0)).unwrap();
        assert_eq!(factor, 1.0);
        assert_eq!(dphi, dphi0);

        assert!(matches!(
            get_dphi(&grid, &V, 0.0, None, Some(0.0)),
            Err(PropagatorError::DegenerateStep(_))
        ));
    }

    #[test]
    fn test_trapezoid_conserves_flux_weighted_mass() {
        let flow = FlowFieldCache::new();
        for (Zgrid, Zmirror) in [(4, false), (6, true), (1, false)] {
            let grid = ChannelGrid::new(Zgrid, 12, 0.3, Zmirror).unwrap();
            let step = step_matrix(&grid, &StepOptions::default(), &flow).unwrap();
            let w = flat_flow(&grid, &flow);
            let drift = step.F.tr_mul(&w) - &w;
            assert!(drift.amax() < 1e-10 * w.amax(), "Zgrid={} drift={}", Zgrid, drift.amax());
        }
    }

    #[test]
    fn test_methods_agree_for_small_steps() {
        let flow = FlowFieldCache::new();
        let grid = ChannelGrid::new(3, 10, 0.2, false).unwrap();
        let mut options = StepOptions {
            step_factor: Some(0.01),
            ..StepOptions::default()
        };
        let trapezoid = step_matrix(&grid, &options, &flow).unwrap();
        options.method = IntegrationMethod::Explicit;
        let explicit = step_matrix(&grid, &options, &flow).unwrap();
        options.method = IntegrationMethod::Implicit;
        let implicit = step_matrix(&grid, &options, &flow).unwrap();
        assert_eq!(trapezoid.dphi, explicit.dphi);
        assert!((&trapezoid.F - &explicit.F).amax() < 1e-3);
        assert!((&trapezoid.F - &implicit.F).amax() < 1e-3);
    }

    #[test]
    fn test_trapezoid_is_stable() {
        let flow = FlowFieldCache::new();
        let grid = ChannelGrid::new(5, 16, 0.25, true).unwrap();
        let options = StepOptions {
            mu_prime_E: 5.0,
            ..StepOptions::default()
        };
        let step = step_matrix(&grid, &options, &flow).unwrap();
        let mut power = step.F.clone();
        for _ in 0..10 {
            power = &power * &power;
        }
        let c = DVector::from_fn(grid.n_cells(), |r, _| if r % 16 == 8 { 1.0 } else { 0.0 });
        assert!((power * &c).amax() < 10.0);
    }

    #[test]
    fn test_drift_moves_profile_downstream() {
        let flow = FlowFieldCache::new();
        let grid = ChannelGrid::new(1, 30, 0.1, false).unwrap();
        let centroid = |mu: f64| {
            let options = StepOptions {
                mu_prime_E: mu,
                ..StepOptions::default()
            };
            let step = step_matrix(&grid, &options, &flow).unwrap();
            let mut c = DVector::from_fn(30, |r, _| if (13..17).contains(&r) { 1.0 } else { 0.0 });
            for _ in 0..200 {
                c = &step.F * c;
            }
            c.iter().enumerate().map(|(i, v)| i as f64 * v).sum::<f64>() / c.sum()
        };
        let still = centroid(0.0);
        assert!(centroid(20.0) > still + 0.5);
        assert!(centroid(-20.0) < still - 0.5);
    }

    #[test]
    fn test_drift_rejects_degenerate_grid() {
        let empty = DMatrix::<f64>::zeros(1, 0);
        assert!(matches!(
            get_cy(1.0, 0.1, &empty, 1, 0, 1.0, Boundary::Neumann),
            Err(PropagatorError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            get_cy(1.0, 0.1, &DMatrix::<f64>::zeros(0, 2), 0, 3, 0.5, Boundary::Neumann),
            Err(PropagatorError::InvalidConfiguration(_))
        ));
        let Viy = DMatrix::<f64>::from_element(2, 3, 1.0);
        assert!(matches!(
            get_cy(1.0, 0.1, &Viy, 2, 3, 0.5, Boundary::Neumann),
            Err(PropagatorError::ShapeMismatch(_))
        ));
    }
}
