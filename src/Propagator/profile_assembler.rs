//! Turns propagated flat profiles into observable arrays.
//!
//! Propagated vectors are reshaped to `(Nphi, Zeff, Y)`. A half-channel
//! simulation is completed by appending its own reverse along Z: for an odd full
//! grid the last simulated row lies on the mirror plane and is not repeated. The
//! result is then either returned whole, sliced at one height, or summed over Z
//! (total fluorescence over the channel depth, the default observable).

use super::profile_tensor::ProfileTensor;
use super::propagator_error::PropagatorError;
use serde::{Deserialize, Serialize};

/// What to return for every propagated profile
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Readout {
    /// the whole `(Zgrid, Ygrid)` field
    FullGrid,
    /// one Z row, at a fraction `[0, 1]` of the channel height
    ZSlice(f64),
    /// sum over Z
    #[default]
    SumZ,
}

/// Index of the Z row read at fraction `zpos` of the height
#[allow(non_snake_case)]
pub fn z_index(Zgrid: usize, zpos: f64) -> Result<usize, PropagatorError> {
    if !(0.0..=1.0).contains(&zpos) {
        return Err(PropagatorError::InvalidConfiguration(format!(
            "Z position must be a fraction of the channel height in [0, 1] (got {})",
            zpos
        )));
    }
    if zpos == 1.0 {
        return Ok(Zgrid - 1);
    }
    Ok((Zgrid as f64 * zpos).floor() as usize)
}

/// Completes a half-channel field along the second to last axis.
///
/// `half` has `(Zgrid + 1) / 2` rows on that axis, the result has `Zgrid`.
#[allow(non_snake_case)]
pub fn mirror_z(half: &ProfileTensor, Zgrid: usize) -> Result<ProfileTensor, PropagatorError> {
    if half.ndim() < 2 {
        return Err(PropagatorError::ShapeMismatch(format!(
            "can't mirror a tensor of shape {:?}",
            half.shape()
        )));
    }
    let axis = half.ndim() - 2;
    let Zeff = half.shape()[axis];
    if Zeff != (Zgrid + 1) / 2 {
        return Err(PropagatorError::ZDimensionMismatch {
            expected: (Zgrid + 1) / 2,
            found: Zeff,
        });
    }
    let reflected: Vec<usize> = (0..Zeff - Zgrid % 2).rev().collect();
    let lower = half.take(axis, &reflected)?;
    ProfileTensor::concat(&[half, &lower], axis)
}

/// Reduces full `(…, Zgrid, Ygrid)` profiles according to `readout`.
#[allow(non_snake_case)]
pub fn readout(
    full: ProfileTensor,
    Zgrid: usize,
    readout: Readout,
) -> Result<ProfileTensor, PropagatorError> {
    if full.ndim() < 2 || full.shape()[full.ndim() - 2] != Zgrid {
        return Err(PropagatorError::ShapeMismatch(format!(
            "expected (…, {}, Ygrid) profiles, got {:?}",
            Zgrid,
            full.shape()
        )));
    }
    let axis = full.ndim() - 2;
    match readout {
        Readout::FullGrid => Ok(full),
        Readout::ZSlice(zpos) => full.select(axis, z_index(Zgrid, zpos)?),
        Readout::SumZ => full.sum_axis(axis),
    }
}

/// Index of the smallest strictly positive reading position
pub fn reference_position(readingpos: &[f64]) -> Option<usize> {
    readingpos
        .iter()
        .enumerate()
        .filter(|(_, x)| **x > 0.0)
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Relative error `(phi_actual − phi_requested) / phi_requested` caused by rounding
/// the propagation time to a whole number of steps.
pub fn rounding_error(phi_requested: f64, phi_actual: f64) -> Option<f64> {
    if phi_requested > 0.0 {
        Some((phi_actual - phi_requested) / phi_requested)
    } else {
        None
    }
}
