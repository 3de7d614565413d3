//! Longwave radiative fluxes through cloudy atmospheres
//!
//! Fluxes are computed with the Tripleclouds method: each layer is split into
//! a clear-sky region and one or two cloudy regions representing the sub-grid
//! variability of cloud optical depth, and the regions of adjacent layers
//! overlap according to an overlap parameter. See [`flux`] for the solver of a
//! single column and [`columns`] for running many columns in parallel.
//!
//! NOTE: with the `python` feature, a Python extension module is also built.
//! It is the only place where `pyo3` is used.

pub mod columns;
pub mod error;
pub mod flux;

#[cfg(feature = "python")]
mod python;

pub use columns::{calc_flux_columns, BatchFluxes, BatchProgress, BatchScattering, ColumnBatch};
pub use error::FluxError;
pub use flux::{
    CloudPdfShape, CloudScattering, ColumnInputs, FluxConfig, FluxProfile, FluxSolver,
};
