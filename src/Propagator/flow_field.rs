//! # Poiseuille Flow Field
//!
//! Steady pressure-driven laminar flow over the discretized rectangular channel
//! cross-section, evaluated as a truncated double Fourier series:
//!
//! ```text
//! V(z,y) = 16β²/π⁴ · Σ_{nz,ny odd} sin(nz·π·i/Zgrid)·sin(ny·π·j/Ygrid) / (nz·ny·(nz² + ny²β²))
//! Vmean  = 64β²/π⁶ · Σ_{nz,ny odd} 1 / (nz²·ny²·(nz² + ny²β²))
//! ```
//!
//! Both sums run over the odd harmonics 1..99 (50 terms per axis). The returned
//! field is `V / Vmean`, so that its mean over the continuous cross-section is 1.
//! Cell centres are sampled at `index + 0.5`; with the interface flags the
//! integer positions `1..grid-1` are used instead, giving one row (or column) less.
//!
//! The series is the most expensive pointwise computation reused by every step
//! matrix, so fields are memoized in a [`FlowFieldCache`] keyed by
//! `(Zgrid, Ygrid, beta, yinterface, zinterface)`.

use log::debug;
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Number of odd harmonics kept along each axis (1, 3, ..., 99)
const N_HARMONICS: usize = 50;

/// Conversion from µl/hour to m³/s
pub const UL_PER_HOUR_TO_M3_PER_S: f64 = 1.0 / (3600.0 * 1e9);

/// Memoization key of a flow field. `beta` is stored by bit pattern so that equal
/// aspect ratios hash identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_snake_case)]
pub struct FlowKey {
    pub Zgrid: usize,
    pub Ygrid: usize,
    beta_bits: u64,
    pub y_interface: bool,
    pub z_interface: bool,
}

impl FlowKey {
    #[allow(non_snake_case)]
    pub fn new(Zgrid: usize, Ygrid: usize, beta: f64, y_interface: bool, z_interface: bool) -> Self {
        Self {
            Zgrid,
            Ygrid,
            beta_bits: beta.to_bits(),
            y_interface,
            z_interface,
        }
    }

    pub fn beta(&self) -> f64 {
        f64::from_bits(self.beta_bits)
    }
}

fn sample_positions(grid: usize, interface: bool) -> Vec<f64> {
    if interface {
        (1..grid).map(|i| i as f64).collect()
    } else {
        (0..grid).map(|i| i as f64 + 0.5).collect()
    }
}

/// Evaluates the normalized Fourier series for `key` without touching any cache.
#[allow(non_snake_case)]
pub fn compute_poiseuille_unitless(key: &FlowKey) -> DMatrix<f64> {
    let beta = key.beta();
    let beta2 = beta * beta;
    let zs = sample_positions(key.Zgrid, key.z_interface);
    let ys = sample_positions(key.Ygrid, key.y_interface);
    let harmonics: Vec<f64> = (0..N_HARMONICS).map(|k| (2 * k + 1) as f64).collect();

    // sin tables, one row per harmonic
    let sin_z: Vec<Vec<f64>> = harmonics
        .iter()
        .map(|nz| {
            zs.iter()
                .map(|z| (nz * PI * z / key.Zgrid as f64).sin())
                .collect()
        })
        .collect();
    let sin_y: Vec<Vec<f64>> = harmonics
        .iter()
        .map(|ny| {
            ys.iter()
                .map(|y| (ny * PI * y / key.Ygrid as f64).sin())
                .collect()
        })
        .collect();

    let mut V = DMatrix::<f64>::zeros(zs.len(), ys.len());
    let mut mean_sum = 0.0;
    for (a, nz) in harmonics.iter().enumerate() {
        for (b, ny) in harmonics.iter().enumerate() {
            let denom = nz * nz + ny * ny * beta2;
            let weight = 1.0 / (nz * ny * denom);
            mean_sum += 1.0 / (nz * nz * ny * ny * denom);
            for (i, sz) in sin_z[a].iter().enumerate() {
                let wz = weight * sz;
                for (j, sy) in sin_y[b].iter().enumerate() {
                    V[(i, j)] += wz * sy;
                }
            }
        }
    }

    V *= 16.0 * beta2 / PI.powi(4);
    let Vmean = 64.0 * beta2 / PI.powi(6) * mean_sum;
    V /= Vmean;
    V
}

/// Process-wide store of flow fields. Entries are never mutated after insertion;
/// callers receive shared handles, so repeated lookups return the very same values.
#[derive(Debug, Default)]
pub struct FlowFieldCache {
    fields: Mutex<HashMap<FlowKey, Arc<DMatrix<f64>>>>,
    computations: AtomicUsize,
}

impl FlowFieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the flow field for the given discretization, computing it on first use.
    ///
    /// The map stays locked while a missing field is evaluated, so two threads asking
    /// for the same key never both run the series.
    #[allow(non_snake_case)]
    pub fn get(
        &self,
        Zgrid: usize,
        Ygrid: usize,
        beta: f64,
        y_interface: bool,
        z_interface: bool,
    ) -> Arc<DMatrix<f64>> {
        let key = FlowKey::new(Zgrid, Ygrid, beta, y_interface, z_interface);
        let mut fields = self.fields.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(V) = fields.get(&key) {
            return Arc::clone(V);
        }
        debug!(
            "computing Poiseuille flow for Zgrid={}, Ygrid={}, beta={}, interfaces=({}, {})",
            Zgrid, Ygrid, beta, y_interface, z_interface
        );
        let V = Arc::new(compute_poiseuille_unitless(&key));
        self.computations.fetch_add(1, Ordering::Relaxed);
        fields.insert(key, Arc::clone(&V));
        V
    }

    /// Number of series evaluations performed so far (cache misses).
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_FLOW_FIELDS: OnceLock<Arc<FlowFieldCache>> = OnceLock::new();

/// Shared flow-field cache used when no cache is injected explicitly.
pub fn global_flow_cache() -> Arc<FlowFieldCache> {
    Arc::clone(GLOBAL_FLOW_FIELDS.get_or_init(|| Arc::new(FlowFieldCache::new())))
}

/// Unitless Poiseuille flow (mean 1) from the process-wide cache.
#[allow(non_snake_case)]
pub fn poiseuille_unitless(
    Zgrid: usize,
    Ygrid: usize,
    beta: f64,
    y_interface: bool,
    z_interface: bool,
) -> Arc<DMatrix<f64>> {
    global_flow_cache().get(Zgrid, Ygrid, beta, y_interface, z_interface)
}

/// Dimensional Poiseuille flow [m/s] for a flow rate `Q` in µl/hour through a
/// channel of width `Wy` [m] and aspect ratio `beta`.
#[allow(non_snake_case)]
pub fn poiseuille(Zgrid: usize, Ygrid: usize, Q: f64, Wy: f64, beta: f64) -> DMatrix<f64> {
    let V = poiseuille_unitless(Zgrid, Ygrid, beta, false, false);
    let Q = Q * UL_PER_HOUR_TO_M3_PER_S;
    &*V * (Q / (Wy.powi(2) * beta))
}
