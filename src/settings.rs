//! # Settings Module
//!
//! ## Purpose
//! JSON configuration of a sizing run: the channel, the numerical settings of the
//! propagator and the grid of test radii. Everything is plain `serde` data with a
//! `validate()` step, so a configuration that loads is one the propagator accepts.
//!
//! ## Configuration Format
//! ```json
//! {
//!   "channel": { "Q": 100.0, "Wy": 3e-4, "Wz": 5e-5, "viscosity": 1e-3, "temperature": 295.0 },
//!   "settings": { "Zgrid": 11, "method": "Trapezoid", "y_boundary": "Neumann" },
//!   "radii": { "kind": "Log", "rmin": 5e-10, "rmax": 1e-8, "n": 40 }
//! }
//! ```
//! Omitted settings take their defaults; unknown `method` or `y_boundary` values are
//! rejected while parsing.

use crate::Propagator::matrix_cache::CachePolicy;
use crate::Propagator::neighbor_operators::Boundary;
use crate::Propagator::physical_profiles::{BOLTZMANN_CONSTANT, ProfileOptions};
use crate::Propagator::propagator_error::PropagatorError;
use crate::Propagator::step_matrix::IntegrationMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Can't read or write the configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] PropagatorError),
}

/// Geometry and flow of the measurement channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct ChannelConfig {
    /// flow rate [µl/h]
    pub Q: f64,
    /// width [m]
    pub Wy: f64,
    /// height [m]
    pub Wz: f64,
    /// [Pa·s]
    pub viscosity: f64,
    /// [K]
    pub temperature: f64,
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), PropagatorError> {
        let fields = [
            ("Q", self.Q),
            ("Wy", self.Wy),
            ("Wz", self.Wz),
            ("viscosity", self.viscosity),
            ("temperature", self.temperature),
        ];
        for (name, value) in fields {
            if !(value > 0.0) || !value.is_finite() {
                return Err(PropagatorError::InvalidConfiguration(format!(
                    "channel {} must be positive and finite (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn beta(&self) -> f64 {
        self.Wz / self.Wy
    }
}

/// Numerical settings of the propagator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(non_snake_case)]
pub struct PropagatorSettings {
    /// Z cells over the full height
    pub Zgrid: Option<usize>,
    pub z_mirror: bool,
    pub y_boundary: Boundary,
    pub method: IntegrationMethod,
    pub step_factor: Option<f64>,
    /// height [m] of the read profile; sum over Z when absent
    pub zpos: Option<f64>,
    pub full_grid: bool,
    pub boltzmann_constant: f64,
    pub cache_policy: CachePolicy,
}

impl Default for PropagatorSettings {
    fn default() -> Self {
        Self {
            Zgrid: None,
            z_mirror: true,
            y_boundary: Boundary::Neumann,
            method: IntegrationMethod::Trapezoid,
            step_factor: None,
            zpos: None,
            full_grid: false,
            boltzmann_constant: BOLTZMANN_CONSTANT,
            cache_policy: CachePolicy::Unbounded,
        }
    }
}

impl PropagatorSettings {
    pub fn validate(&self) -> Result<(), PropagatorError> {
        if self.Zgrid == Some(0) {
            return Err(PropagatorError::InvalidConfiguration(
                "Zgrid must be at least 1".to_string(),
            ));
        }
        if let Some(step_factor) = self.step_factor {
            if !(step_factor > 0.0) {
                return Err(PropagatorError::InvalidConfiguration(format!(
                    "step factor must be positive (got {})",
                    step_factor
                )));
            }
        }
        if let Some(zpos) = self.zpos {
            if !(zpos >= 0.0) {
                return Err(PropagatorError::InvalidConfiguration(format!(
                    "zpos must be a non-negative height (got {})",
                    zpos
                )));
            }
        }
        if !(self.boltzmann_constant > 0.0) {
            return Err(PropagatorError::InvalidConfiguration(format!(
                "Boltzmann constant must be positive (got {})",
                self.boltzmann_constant
            )));
        }
        if self.cache_policy == (CachePolicy::Lru { capacity: 0 }) {
            return Err(PropagatorError::InvalidConfiguration(
                "LRU cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Options for a radius scan
    pub fn profile_options(&self) -> ProfileOptions {
        ProfileOptions {
            Zgrid: self.Zgrid,
            muEoD: 0.0,
            stepMuE: false,
            full_grid: self.full_grid,
            zpos: self.zpos,
            boltzmann_constant: self.boltzmann_constant,
            Zmirror: self.z_mirror,
            step_factor: self.step_factor,
            y_boundary: self.y_boundary,
            method: self.method,
        }
    }
}

/// Test radii [m]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RadiusGrid {
    /// `n` log-spaced radii from `rmin` to `rmax`
    Log { rmin: f64, rmax: f64, n: usize },
    /// `n` evenly spaced radii from `rmin` to `rmax`
    Linear { rmin: f64, rmax: f64, n: usize },
    /// `start, start + step, …` below `stop`
    Step { start: f64, stop: f64, step: f64 },
}

impl RadiusGrid {
    pub fn radii(&self) -> Result<Vec<f64>, PropagatorError> {
        let invalid = |what: &str| Err(PropagatorError::InvalidConfiguration(what.to_string()));
        match *self {
            RadiusGrid::Log { rmin, rmax, n } | RadiusGrid::Linear { rmin, rmax, n } => {
                if n == 0 {
                    return invalid("radius grid is empty");
                }
                if !(rmin > 0.0) || !(rmax >= rmin) || !rmax.is_finite() {
                    return invalid("radius grid needs 0 < rmin <= rmax");
                }
                if n == 1 {
                    return Ok(vec![rmin]);
                }
                let last = (n - 1) as f64;
                let log = matches!(self, RadiusGrid::Log { .. });
                Ok((0..n)
                    .map(|i| {
                        let t = i as f64 / last;
                        if log {
                            rmin * (rmax / rmin).powf(t)
                        } else {
                            rmin + (rmax - rmin) * t
                        }
                    })
                    .collect())
            }
            RadiusGrid::Step { start, stop, step } => {
                if !(start > 0.0) || !(step > 0.0) || !stop.is_finite() {
                    return invalid("radius steps need start > 0 and step > 0");
                }
                // stop is excluded, even when reached up to rounding
                let n = ((stop - start) / step - 1e-9).ceil().max(0.0) as usize;
                if n == 0 {
                    return invalid("radius grid is empty");
                }
                Ok((0..n).map(|i| start + i as f64 * step).collect())
            }
        }
    }
}

/// Complete description of a sizing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    pub channel: ChannelConfig,
    #[serde(default)]
    pub settings: PropagatorSettings,
    pub radii: RadiusGrid,
}

impl SizingConfig {
    pub fn validate(&self) -> Result<(), PropagatorError> {
        self.channel.validate()?;
        self.settings.validate()?;
        self.radii.radii()?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let config: SizingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
