//! # Unitless Profile Generation
//!
//! Entry point of the propagator in dimensionless variables. Given an initial
//! concentration field and a list of propagation times `phi`, it
//!
//! 1. validates the times and resolves the Z discretization,
//! 2. picks the largest acceptable step (1/20 of the closest pair of times and
//!    1 % of the smallest nonzero time) unless a step factor is imposed,
//! 3. fetches the step matrix family from a [`StepMatrixCache`],
//! 4. rounds every time to a whole number of steps and propagates all profiles
//!    at once with binary powers,
//! 5. rebuilds the full Z extent of mirrored simulations and applies the readout.

use super::matrix_cache::StepMatrixCache;
use super::neighbor_operators::Boundary;
use super::profile_assembler::{Readout, mirror_z, readout, z_index};
use super::profile_propagator::{StepPattern, compute_profiles};
use super::profile_tensor::ProfileTensor;
use super::propagator_error::PropagatorError;
use super::step_matrix::{ChannelGrid, IntegrationMethod, StepOptions};
use log::debug;
use nalgebra::{DMatrix, DVector};
use std::sync::PoisonError;

/// Concentration at the channel entrance
#[derive(Debug, Clone, PartialEq)]
pub enum InitialProfile {
    /// profile across Y, identical at every height
    OneD(DVector<f64>),
    /// `(Z, Y)` field; Z must match the simulated rows
    TwoD(DMatrix<f64>),
}

impl InitialProfile {
    #[allow(non_snake_case)]
    pub fn Ygrid(&self) -> usize {
        match self {
            InitialProfile::OneD(c) => c.len(),
            InitialProfile::TwoD(c) => c.ncols(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(non_snake_case)]
pub struct UnitlessOptions {
    /// number of Z cells over the full height; inferred from a 2D profile when absent
    pub Zgrid: Option<usize>,
    pub mu_prime_E: f64,
    pub readout: Readout,
    /// simulate the top half only
    pub Zmirror: bool,
    pub step_factor: Option<f64>,
    pub y_boundary: Boundary,
    pub method: IntegrationMethod,
}

impl Default for UnitlessOptions {
    fn default() -> Self {
        Self {
            Zgrid: None,
            mu_prime_E: 0.0,
            readout: Readout::SumZ,
            Zmirror: true,
            step_factor: None,
            y_boundary: Boundary::Neumann,
            method: IntegrationMethod::Trapezoid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitlessProfiles {
    /// `(Nphi, Ygrid)`, or `(Nphi, Zgrid, Ygrid)` for a full-grid readout
    pub profiles: ProfileTensor,
    /// realized propagation times, `dphi·steps`
    pub phi: Vec<f64>,
    pub dphi: f64,
    pub steps: Vec<u64>,
    /// initial field over the full `(Zgrid, Ygrid)` grid
    pub initial: DMatrix<f64>,
}

/// Largest step keeping neighbouring times apart and the rounding error under 1 %
fn max_step(phi: &[f64]) -> Result<f64, PropagatorError> {
    let mut dphi_max = phi
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(f64::INFINITY, f64::min)
        / 20.0;
    if !(dphi_max > 0.0) {
        return Err(PropagatorError::DegenerateStep(dphi_max));
    }
    if let Some(smallest) = phi.iter().copied().filter(|p| *p > 0.0).reduce(f64::min) {
        dphi_max = dphi_max.min(1e-2 * smallest);
    }
    Ok(dphi_max)
}

/// Theoretical profiles after propagating `initial` for every time in `phi`.
///
/// `beta` is the height over width ratio of the channel.
#[allow(non_snake_case)]
pub fn get_unitless_profiles(
    initial: &InitialProfile,
    phi: &[f64],
    beta: f64,
    options: &UnitlessOptions,
    cache: &StepMatrixCache,
) -> Result<UnitlessProfiles, PropagatorError> {
    if let Some(bad) = phi.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
        return Err(PropagatorError::InvalidPropagationTime(*bad));
    }

    let Zgrid = match (options.Zgrid, initial) {
        (Some(Zgrid), _) => Zgrid,
        (None, InitialProfile::TwoD(c)) if !options.Zmirror => c.nrows(),
        (None, _) => return Err(PropagatorError::MissingZgrid),
    };
    let Zeff = if options.Zmirror { (Zgrid + 1) / 2 } else { Zgrid };
    if let Readout::ZSlice(zpos) = options.readout {
        z_index(Zgrid, zpos)?;
    }
    let Ygrid = initial.Ygrid();

    let Cinit = match initial {
        InitialProfile::OneD(c) => {
            // spread the mass over the height unless a single row is read
            let scale = match options.readout {
                Readout::ZSlice(_) => 1.0,
                _ => 1.0 / Zgrid as f64,
            };
            DMatrix::from_fn(Zeff, Ygrid, |_, y| c[y] * scale)
        }
        InitialProfile::TwoD(c) => {
            if c.nrows() != Zeff {
                return Err(PropagatorError::ZDimensionMismatch {
                    expected: Zeff,
                    found: c.nrows(),
                });
            }
            c.clone()
        }
    };

    let dphi_max = if options.step_factor.is_none() && phi.len() > 1 {
        Some(max_step(phi)?)
    } else {
        None
    };

    let grid = ChannelGrid::new(Zgrid, Ygrid, beta, options.Zmirror)?;
    let step_options = StepOptions {
        mu_prime_E: options.mu_prime_E,
        method: options.method,
        step_factor: options.step_factor,
        dphi_max,
        y_boundary: options.y_boundary,
    };
    let entry = cache.step_matrix_entry(&grid, &step_options)?;

    let (dphi, steps, propagated) = {
        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let dphi = entry.dphi();
        let steps: Vec<u64> = phi
            .iter()
            .map(|p| (p / dphi).round_ties_even() as u64)
            .collect();
        let pattern = StepPattern::from_steps(&steps);
        entry.ensure_levels(pattern.n_binary());
        debug!(
            "propagating {} profiles with up to {} steps of {:.4e}",
            phi.len(),
            steps.iter().max().copied().unwrap_or(0),
            dphi
        );
        let flat = DVector::from_fn(Zeff * Ygrid, |i, _| Cinit[(i / Ygrid, i % Ygrid)]);
        let propagated = compute_profiles(&pattern, &flat, entry.powers())?;
        (dphi, steps, propagated)
    };
    let phi: Vec<f64> = steps.iter().map(|s| dphi * *s as f64).collect();

    let mut profiles =
        ProfileTensor::from_rows(&propagated)?.reshape(&[phi.len(), Zeff, Ygrid])?;
    let mut initial = ProfileTensor::from_vec(&[Zeff, Ygrid], Cinit.transpose().as_slice().to_vec())?;
    if options.Zmirror {
        profiles = mirror_z(&profiles, Zgrid)?;
        initial = mirror_z(&initial, Zgrid)?;
    }
    let initial = DMatrix::from_row_slice(Zgrid, Ygrid, initial.as_slice());
    let profiles = readout(profiles, Zgrid, options.readout)?;

    Ok(UnitlessProfiles {
        profiles,
        phi,
        dphi,
        steps,
        initial,
    })
}
