//! # Profiles in Physical Units
//!
//! Converts channel geometry, flow rate and test particles into the unitless
//! problem solved by [`get_unitless_profiles`]:
//!
//! ```text
//! x' = x·D/Q·β     y' = y/Wy     z' = z/Wy     β = Wz/Wy
//! V' = V·Wy²·β/Q   μ' = μ·Wy/D
//! ```
//!
//! Test particles are given either as hydrodynamic radii (Stokes–Einstein,
//! `D = kT/(6π·η·r)`) or, in mobility-scan mode, as electrophoretic mobilities
//! at a fixed field-over-diffusion ratio `muEoD` (`D = muE/muEoD`).

use super::flow_field::UL_PER_HOUR_TO_M3_PER_S;
use super::matrix_cache::StepMatrixCache;
use super::neighbor_operators::Boundary;
use super::profile_assembler::{Readout, reference_position, rounding_error};
use super::profile_tensor::ProfileTensor;
use super::propagator_error::PropagatorError;
use super::step_matrix::IntegrationMethod;
use super::unitless_profiles::{InitialProfile, UnitlessOptions, get_unitless_profiles};
use crate::settings::ChannelConfig;
use log::{info, warn};
use nalgebra::DMatrix;
use prettytable::{Table, row};
use std::f64::consts::PI;

pub const BOLTZMANN_CONSTANT: f64 = 1.38e-23;

/// Rounding errors above this fraction make the profiles unusable for fitting
pub const MAX_ROUNDING_ERROR: f64 = 1e-2;

/// Diffusion coefficients [m²/s] of the test particles.
///
/// With `stepMuE`, `params` are mobilities and `D = params/muEoD`; otherwise they
/// are radii [m].
#[allow(non_snake_case)]
pub fn get_D(
    params: &[f64],
    viscosity: f64,
    temperature: f64,
    muEoD: f64,
    stepMuE: bool,
    boltzmann_constant: f64,
) -> Result<Vec<f64>, PropagatorError> {
    if stepMuE {
        if muEoD == 0.0 {
            return Err(PropagatorError::ZeroFieldMobility);
        }
        return Ok(params.iter().map(|muE| muE / muEoD).collect());
    }
    if let Some(r) = params.iter().find(|r| !(**r > 0.0)) {
        return Err(PropagatorError::NonPositiveRadius(*r));
    }
    let kT = boltzmann_constant * temperature;
    Ok(params
        .iter()
        .map(|r| kT / (6.0 * PI * viscosity * r))
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct UnitlessParameters {
    /// `phi[(d, p)]` for diffusion coefficient `d` and reading position `p`
    pub phi: DMatrix<f64>,
    pub beta: f64,
    pub mu_prime_E: f64,
}

#[allow(non_snake_case)]
pub fn get_unitless_parameters(
    Q: f64,
    D: &[f64],
    readingpos: &[f64],
    Wy: f64,
    Wz: f64,
    muEoD: f64,
) -> UnitlessParameters {
    let mu_prime_E = muEoD * Wy;
    let beta = Wz / Wy;
    let Q = Q * UL_PER_HOUR_TO_M3_PER_S;
    let phi = DMatrix::from_fn(D.len(), readingpos.len(), |d, p| {
        readingpos[p] * D[d] / Q * beta
    });
    UnitlessParameters {
        phi,
        beta,
        mu_prime_E,
    }
}

/// Physical and numerical options of [`get_profiles`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(non_snake_case)]
pub struct ProfileOptions {
    pub Zgrid: Option<usize>,
    /// mobility times transverse field over diffusion coefficient [1/m]
    pub muEoD: f64,
    /// the test parameters are mobilities instead of radii
    pub stepMuE: bool,
    pub full_grid: bool,
    /// height [m] of the profile to read; sum over Z when absent
    pub zpos: Option<f64>,
    pub boltzmann_constant: f64,
    pub Zmirror: bool,
    pub step_factor: Option<f64>,
    pub y_boundary: Boundary,
    pub method: IntegrationMethod,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            Zgrid: None,
            muEoD: 0.0,
            stepMuE: false,
            full_grid: false,
            zpos: None,
            boltzmann_constant: BOLTZMANN_CONSTANT,
            Zmirror: true,
            step_factor: None,
            y_boundary: Boundary::Neumann,
            method: IntegrationMethod::Trapezoid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileReport {
    /// `(n_params, n_readingpos, [Zgrid,] Ygrid)`
    pub profiles: ProfileTensor,
    pub parameters: Vec<f64>,
    pub readingpos: Vec<f64>,
    /// realized unitless times, row-major `(n_params, n_readingpos)`
    pub phi: Vec<f64>,
    pub dphi: f64,
    /// relative rounding error of the propagation time at the first parameter and
    /// the closest nonzero reading position
    pub rounding_error: Option<f64>,
}

impl ProfileReport {
    /// Fails when the rounding error exceeds `limit` in magnitude
    pub fn check_rounding(&self, limit: f64) -> Result<(), PropagatorError> {
        match self.rounding_error {
            Some(error) if error.abs() > limit => {
                Err(PropagatorError::RoundingErrorTooLarge { error, limit })
            }
            _ => Ok(()),
        }
    }

    /// Profile of parameter `param` at reading position `pos`
    pub fn profile(&self, param: usize, pos: usize) -> Result<ProfileTensor, PropagatorError> {
        self.profiles.select(0, param)?.select(0, pos)
    }

    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(row!["Parameter", "Reading position [m]", "phi", "Total signal"]);
        let n_pos = self.readingpos.len();
        for (d, param) in self.parameters.iter().enumerate() {
            for (p, pos) in self.readingpos.iter().enumerate() {
                let total = self
                    .profile(d, p)
                    .map(|profile| profile.as_slice().iter().sum::<f64>())
                    .unwrap_or(f64::NAN);
                table.add_row(row![
                    format!("{:.4e}", param),
                    format!("{:.4e}", pos),
                    format!("{:.4e}", self.phi[d * n_pos + p]),
                    format!("{:.4}", total)
                ]);
            }
        }
        table.printstd();
        match self.rounding_error {
            Some(error) => println!("dphi = {:.4e}, rounding error = {:.3e}", self.dphi, error),
            None => println!("dphi = {:.4e}", self.dphi),
        }
    }
}

/// Theoretical profiles for every test parameter at every reading position.
///
/// `params` are radii [m], or mobilities when `options.stepMuE` is set.
/// Reading positions are in metres from the channel entrance.
#[allow(non_snake_case)]
pub fn get_profiles(
    initial: &InitialProfile,
    channel: &ChannelConfig,
    params: &[f64],
    readingpos: &[f64],
    options: &ProfileOptions,
    cache: &StepMatrixCache,
) -> Result<ProfileReport, PropagatorError> {
    channel.validate()?;
    let D = get_D(
        params,
        channel.viscosity,
        channel.temperature,
        options.muEoD,
        options.stepMuE,
        options.boltzmann_constant,
    )?;
    let unitless = get_unitless_parameters(
        channel.Q,
        &D,
        readingpos,
        channel.Wy,
        channel.Wz,
        options.muEoD,
    );

    let readout = if options.full_grid {
        Readout::FullGrid
    } else if let Some(zpos) = options.zpos {
        Readout::ZSlice(zpos / channel.Wz)
    } else {
        Readout::SumZ
    };
    let unitless_options = UnitlessOptions {
        Zgrid: options.Zgrid,
        mu_prime_E: unitless.mu_prime_E,
        readout,
        Zmirror: options.Zmirror,
        step_factor: options.step_factor,
        y_boundary: options.y_boundary,
        method: options.method,
    };

    // row-major ravel, parameter first
    let (n_params, n_pos) = unitless.phi.shape();
    let phi_requested: Vec<f64> = (0..n_params)
        .flat_map(|d| (0..n_pos).map(move |p| (d, p)))
        .map(|(d, p)| unitless.phi[(d, p)])
        .collect();

    let out = get_unitless_profiles(
        initial,
        &phi_requested,
        unitless.beta,
        &unitless_options,
        cache,
    )?;

    let mut shape = vec![n_params, n_pos];
    shape.extend_from_slice(&out.profiles.shape()[1..]);
    let profiles = out.profiles.reshape(&shape)?;

    let rounding_error = match (reference_position(readingpos), n_params) {
        (Some(idx), n) if n > 0 => rounding_error(phi_requested[idx], out.phi[idx]),
        _ => None,
    };
    if let Some(error) = rounding_error {
        if error.abs() > MAX_ROUNDING_ERROR {
            warn!(
                "rounding error of the propagation time is {:.2} %, lower the step factor",
                100.0 * error
            );
        }
    }
    info!(
        "{} profiles at {} positions, dphi={:.4e}, rounding error={:?}",
        n_params, n_pos, out.dphi, rounding_error
    );

    Ok(ProfileReport {
        profiles,
        parameters: params.to_vec(),
        readingpos: readingpos.to_vec(),
        phi: out.phi,
        dphi: out.dphi,
        rounding_error,
    })
}

/// Profiles for a scan over field-mobility ratios and mobilities.
///
/// Negative mobilities are propagated with `−|muEoD|` and listed first, positive
/// ones with `+|muEoD|`; zero mobilities are skipped. The result has shape
/// `(n_muEoD, n_negative + n_positive, n_readingpos, [Zgrid,] Ygrid)`.
#[allow(non_snake_case)]
pub fn get_electro_profiles(
    initial: &InitialProfile,
    channel: &ChannelConfig,
    absmuEoDs: &[f64],
    muEs: &[f64],
    readingpos: &[f64],
    options: &ProfileOptions,
    cache: &StepMatrixCache,
) -> Result<ProfileTensor, PropagatorError> {
    let negative: Vec<f64> = muEs.iter().copied().filter(|m| *m < 0.0).collect();
    let positive: Vec<f64> = muEs.iter().copied().filter(|m| *m > 0.0).collect();
    if absmuEoDs.is_empty() {
        return Err(PropagatorError::InvalidConfiguration(
            "no field-mobility ratio to scan".to_string(),
        ));
    }
    if negative.is_empty() && positive.is_empty() {
        return Err(PropagatorError::InvalidConfiguration(
            "no nonzero mobility to scan".to_string(),
        ));
    }

    let mut per_ratio = Vec::with_capacity(absmuEoDs.len());
    for muEoD in absmuEoDs.iter().map(|m| m.abs()) {
        let mut groups = Vec::with_capacity(2);
        for (mobilities, sign) in [(&negative, -1.0), (&positive, 1.0)] {
            if mobilities.is_empty() {
                continue;
            }
            let group_options = ProfileOptions {
                muEoD: sign * muEoD,
                stepMuE: true,
                ..*options
            };
            let report = get_profiles(
                initial,
                channel,
                mobilities,
                readingpos,
                &group_options,
                cache,
            )?;
            groups.push(report.profiles);
        }
        let parts: Vec<&ProfileTensor> = groups.iter().collect();
        per_ratio.push(ProfileTensor::concat(&parts, 0)?);
    }
    ProfileTensor::stack(&per_ratio)
}
