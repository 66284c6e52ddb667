//! Error type shared by every stage of the profile propagator.
//!
//! All variants are explicit rejections of invalid physical or numerical input.
//! Nothing here is retried internally: the error is raised to the caller with the
//! violated precondition in the message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropagatorError {
    #[error("Can't calculate for a zero field-mobility ratio (muEoD == 0)")]
    ZeroFieldMobility,
    #[error("Can't work with non-positive radii: {0}")]
    NonPositiveRadius(f64),
    #[error("The propagation time is incorrect: {0}")]
    InvalidPropagationTime(f64),
    #[error("No Zgrid specified")]
    MissingZgrid,
    #[error("Initial profile Z dimension ({found}) and effective Zgrid ({expected}) not aligned")]
    ZDimensionMismatch { expected: usize, found: usize },
    #[error("dphi too small: {0}")]
    DegenerateStep(f64),
    #[error("Unknown integration method: {0}")]
    UnknownMethod(String),
    #[error("Unknown boundary condition: {0}")]
    UnknownBoundary(String),
    #[error("Singular matrix in {0} integration")]
    SingularMatrix(&'static str),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("{needed} matrix powers needed but only {available} available")]
    InsufficientPowers { needed: usize, available: usize },
    #[error(
        "The relative rounding error is too large ({error:.4} > {limit:.4}), make the radii grid finer or lower the step factor"
    )]
    RoundingErrorTooLarge { error: f64, limit: f64 },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
