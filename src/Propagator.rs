//! # Diffusion/Electrophoresis Profile Propagator
//!
//! Theoretical concentration profiles in a rectangular microfluidic channel, used
//! as the basis functions of diffusional sizing.
//!
//! ## Model
//!
//! | Symbol | Description | Units |
//! |--------|-------------|-------|
//! | `Q` | Volumetric flow rate | µl/h |
//! | `Wy`, `Wz` | Channel width and height | m |
//! | `D` | Diffusion coefficient | m²/s |
//! | `μE` | Electrophoretic drift velocity across the channel | m/s |
//! | `V` | Poiseuille flow over the cross-section | m/s |
//!
//! ```text
//! V·∂xC = D·(∂y²C + ∂z²C) − μE·∂yC
//! ```
//!
//! becomes, in unitless variables `φ = x·D/Q·β`, `y' = y/Wy`, `z' = z/Wy`,
//! `β = Wz/Wy`, `V' = V·Wy²·β/Q`, `μ' = μ·Wy/D`:
//!
//! ```text
//! V'·∂φC = ∂y'²C + ∂z'²C − μ'E·∂y'C
//! ```
//!
//! The cross-section is discretized on a `Zgrid × Ygrid` grid and one step `dφ`
//! of the equation becomes a dense transition matrix `F`. A profile at time
//! `n·dφ` is `Fⁿ·C₀`, computed from cached binary powers of `F`.
//!
//! ## Pipeline
//! 1. [`flow_field`]: memoized Poiseuille flow.
//! 2. [`neighbor_operators`]: finite-difference shift operators with wall handling.
//! 3. [`step_matrix`]: stable step length and transition matrix.
//! 4. [`matrix_cache`]: process-wide step matrices and their power lists.
//! 5. [`profile_propagator`]: square-and-multiply propagation of many profiles.
//! 6. [`profile_assembler`] and [`profile_tensor`]: Z mirroring and readouts.
//! 7. [`unitless_profiles`] and [`physical_profiles`]: user-facing entry points.

pub mod flow_field;
pub mod matrix_cache;
pub mod neighbor_operators;
pub mod physical_profiles;
pub mod profile_assembler;
pub mod profile_propagator;
pub mod profile_tensor;
pub mod propagator_error;
mod propagator_tests;
pub mod step_matrix;
pub mod unitless_profiles;
