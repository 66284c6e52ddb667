//! # Step Matrix Cache
//!
//! Building a step matrix costs one dense `N×N` factorization, and the same few
//! discretizations are reused across very many parameter combinations. This module
//! keeps every built matrix together with its list of successive squares
//! `[F, F², F⁴, …]` so that propagating to an arbitrary step count only costs
//! `O(log(steps))` multiplications, and only the first time.
//!
//! ## Architecture
//! - **StepMatrixKey**: identifies a matrix uniquely (grid, drift, mirror,
//!   boundary, step factor, method). Floats are hashed by bit pattern.
//! - **StepMatrixEntry**: the power list and the scalars of one matrix. The list
//!   only grows.
//! - **StepMatrixCache**: map from key to shared entry, with an explicit
//!   [`CachePolicy`]. Lookups and insertions are serialized by a mutex; a missing
//!   matrix is built outside the lock and published first-insert-wins, so callers
//!   never observe a partially built entry.
//! - **Global Access**: a process-wide default instance behind `OnceLock`.
//!
//! Eviction under `CachePolicy::Lru` only drops the map's handle: entries already
//! handed out stay valid for their holders.

use super::flow_field::{FlowFieldCache, global_flow_cache};
use super::neighbor_operators::Boundary;
use super::propagator_error::PropagatorError;
use super::step_matrix::{ChannelGrid, IntegrationMethod, StepOptions, get_dphi, step_matrix};
use log::debug;
use nalgebra::DMatrix;
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Lifetime policy of cached step matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// keep everything for the lifetime of the cache
    #[default]
    Unbounded,
    /// keep at most `capacity` matrices, dropping the least recently used
    Lru { capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_snake_case)]
pub struct StepMatrixKey {
    pub Zgrid: usize,
    pub Ygrid: usize,
    beta_bits: u64,
    mu_prime_E_bits: u64,
    pub Zmirror: bool,
    pub y_boundary: Boundary,
    step_factor_bits: u64,
    pub method: IntegrationMethod,
}

impl StepMatrixKey {
    pub fn new(grid: &ChannelGrid, options: &StepOptions, step_factor: f64) -> Self {
        Self {
            Zgrid: grid.Zgrid,
            Ygrid: grid.Ygrid,
            beta_bits: grid.beta.to_bits(),
            mu_prime_E_bits: options.mu_prime_E.to_bits(),
            Zmirror: grid.Zmirror,
            y_boundary: options.y_boundary,
            step_factor_bits: step_factor.to_bits(),
            method: options.method,
        }
    }

    pub fn beta(&self) -> f64 {
        f64::from_bits(self.beta_bits)
    }

    #[allow(non_snake_case)]
    pub fn mu_prime_E(&self) -> f64 {
        f64::from_bits(self.mu_prime_E_bits)
    }

    pub fn step_factor(&self) -> f64 {
        f64::from_bits(self.step_factor_bits)
    }
}

/// Power list `[F, F², …, F^(2^(k-1))]` of one step matrix
#[derive(Debug, Clone)]
pub struct StepMatrixEntry {
    powers: Vec<DMatrix<f64>>,
    dphi: f64,
    step_factor: f64,
}

impl StepMatrixEntry {
    #[allow(non_snake_case)]
    pub fn new(F: DMatrix<f64>, dphi: f64, step_factor: f64) -> Self {
        Self {
            powers: vec![F],
            dphi,
            step_factor,
        }
    }

    pub fn dphi(&self) -> f64 {
        self.dphi
    }

    pub fn step_factor(&self) -> f64 {
        self.step_factor
    }

    pub fn powers(&self) -> &[DMatrix<f64>] {
        &self.powers
    }

    pub fn levels(&self) -> usize {
        self.powers.len()
    }

    /// Appends squares until at least `n_levels` powers are available.
    /// Existing powers are never recomputed.
    pub fn ensure_levels(&mut self, n_levels: usize) {
        if self.powers.len() >= n_levels {
            return;
        }
        debug!(
            "extending power list from {} to {} levels",
            self.powers.len(),
            n_levels
        );
        while self.powers.len() < n_levels {
            // the list is created with F and never shrinks
            let last = &self.powers[self.powers.len() - 1];
            let squared = last * last;
            self.powers.push(squared);
        }
    }
}

pub type SharedEntry = Arc<Mutex<StepMatrixEntry>>;

#[derive(Debug)]
struct Slot {
    entry: SharedEntry,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<StepMatrixKey, Slot>,
    tick: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &StepMatrixKey) -> Option<SharedEntry> {
        self.tick += 1;
        let tick = self.tick;
        self.map.get_mut(key).map(|slot| {
            slot.last_used = tick;
            Arc::clone(&slot.entry)
        })
    }

    fn evict_to(&mut self, capacity: usize, keep: &StepMatrixKey) {
        while self.map.len() > capacity {
            let oldest = self
                .map
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| *key);
            match oldest {
                Some(key) => {
                    debug!("evicting step matrix {:?}", key);
                    self.map.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Memoized step matrices and their power lists
#[derive(Debug)]
pub struct StepMatrixCache {
    policy: CachePolicy,
    flow: Arc<FlowFieldCache>,
    inner: Mutex<CacheInner>,
    builds: AtomicUsize,
}

impl Default for StepMatrixCache {
    fn default() -> Self {
        Self::new(CachePolicy::Unbounded)
    }
}

impl StepMatrixCache {
    /// New cache sharing the process-wide flow fields
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_flow_cache(policy, global_flow_cache())
    }

    pub fn with_flow_cache(policy: CachePolicy, flow: Arc<FlowFieldCache>) -> Self {
        Self {
            policy,
            flow,
            inner: Mutex::new(CacheInner::default()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn flow_cache(&self) -> &Arc<FlowFieldCache> {
        &self.flow
    }

    /// Number of step matrices built so far (cache misses).
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached entry for `grid` and `options`, building it on a miss.
    ///
    /// Without an explicit step factor, it is first derived from
    /// `options.dphi_max`, so that equal requests map onto the same key.
    pub fn step_matrix_entry(
        &self,
        grid: &ChannelGrid,
        options: &StepOptions,
    ) -> Result<SharedEntry, PropagatorError> {
        let step_factor = match options.step_factor {
            Some(step_factor) => step_factor,
            None => {
                let V = self.flow.get(grid.Zgrid, grid.Ygrid, grid.beta, false, false);
                let (_, step_factor) =
                    get_dphi(grid, &V, options.mu_prime_E, None, options.dphi_max)?;
                step_factor
            }
        };
        let key = StepMatrixKey::new(grid, options, step_factor);

        if let Some(entry) = self.lock().touch(&key) {
            debug!("step matrix cache hit for {:?}", key);
            return Ok(entry);
        }

        let fixed = StepOptions {
            step_factor: Some(step_factor),
            ..*options
        };
        let step = step_matrix(grid, &fixed, &self.flow)?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        let built = Arc::new(Mutex::new(StepMatrixEntry::new(
            step.F,
            step.dphi,
            step.step_factor,
        )));

        let mut inner = self.lock();
        // another caller may have published the same key meanwhile
        if let Some(entry) = inner.touch(&key) {
            return Ok(entry);
        }
        let tick = inner.tick;
        inner.map.insert(
            key,
            Slot {
                entry: Arc::clone(&built),
                last_used: tick,
            },
        );
        if let CachePolicy::Lru { capacity } = self.policy {
            inner.evict_to(capacity.max(1), &key);
        }
        Ok(built)
    }

    /// Prints the cached matrices as a table
    pub fn pretty_print(&self) {
        let inner = self.lock();
        let mut table = Table::new();
        table.add_row(row![
            "Zgrid",
            "Ygrid",
            "beta",
            "mu'E",
            "Zmirror",
            "boundary",
            "method",
            "step factor",
            "dphi",
            "levels"
        ]);
        let mut keys: Vec<&StepMatrixKey> = inner.map.keys().collect();
        keys.sort_by_key(|key| inner.map[*key].last_used);
        for key in keys {
            let entry = inner.map[key]
                .entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            table.add_row(row![
                key.Zgrid,
                key.Ygrid,
                format!("{:.4e}", key.beta()),
                format!("{:.4e}", key.mu_prime_E()),
                key.Zmirror,
                key.y_boundary,
                key.method,
                format!("{:.4e}", key.step_factor()),
                format!("{:.4e}", entry.dphi()),
                entry.levels()
            ]);
        }
        table.printstd();
    }
}

static GLOBAL_STEP_MATRICES: OnceLock<Arc<StepMatrixCache>> = OnceLock::new();

/// Process-wide unbounded step-matrix cache
pub fn global_step_matrix_cache() -> Arc<StepMatrixCache> {
    Arc::clone(GLOBAL_STEP_MATRICES.get_or_init(|| Arc::new(StepMatrixCache::default())))
}
