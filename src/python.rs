//! Python interface
//!
//! NOTE: this module is the only one using `pyo3`. The work happens in the
//! other modules.

use std::time::{Duration, Instant};

use log::{debug, info};
use ndarray::{Array1, Array3};
use numpy::{PyArray1, PyArray3, PyReadonlyArray2, PyReadonlyArray3, ToPyArray};
use pyo3::exceptions::{PyKeyboardInterrupt, PyValueError};
use pyo3::prelude::*;

use crate::columns::{
    build_thread_pool, calc_flux_columns, BatchFluxes, BatchProgress, BatchScattering, ColumnBatch,
};
use crate::error::FluxError;
use crate::flux::{CloudPdfShape, FluxConfig, FluxSolver};

/// How often Python signals are checked while the workers run.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How often progress is logged.
const LOG_INTERVAL: Duration = Duration::from_secs(5);

impl From<FluxError> for PyErr {
    fn from(e: FluxError) -> Self {
        match e {
            FluxError::Cancelled => PyKeyboardInterrupt::new_err(e.to_string()),
            FluxError::InconsistentInputs
            | FluxError::UnsupportedRegionCount(_)
            | FluxError::InvalidConfig(_)
            | FluxError::NotContiguous => PyValueError::new_err(e.to_string()),
        }
    }
}

/// Fluxes for every column.
///
/// `flux_up` and `flux_dn` are dimensioned (`num_columns`, `num_levels + 1`,
/// `num_spec`), in W/m². `cloud_cover` has shape (`num_columns`, ), or is
/// `None` when it was not requested.
#[pyclass]
struct FluxResults {
    flux_up: Array3<f64>,
    flux_dn: Array3<f64>,
    cloud_cover: Option<Array1<f64>>,
}

#[pymethods]
impl FluxResults {
    #[getter]
    fn flux_up<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray3<f64>> {
        self.flux_up.to_pyarray(py)
    }

    #[getter]
    fn flux_dn<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray3<f64>> {
        self.flux_dn.to_pyarray(py)
    }

    #[getter]
    fn cloud_cover<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyArray1<f64>>> {
        self.cloud_cover.as_ref().map(|cover| cover.to_pyarray(py))
    }
}

impl From<BatchFluxes> for FluxResults {
    fn from(fluxes: BatchFluxes) -> Self {
        Self {
            flux_up: fluxes.flux_up,
            flux_dn: fluxes.flux_dn,
            cloud_cover: fluxes.cloud_cover,
        }
    }
}

/// Compute longwave fluxes for many columns with the Tripleclouds solver.
///
/// Levels are counted from the top of the atmosphere. The inputs are:
///
/// `surface_emission`: surface emission in W/m², shape (`num_columns`,
/// `num_spec`)
///
/// `surface_albedo`: surface albedo, shape (`num_columns`, `num_spec`)
///
/// `planck_hl`: Planck function at half-levels in W/m², shape (`num_columns`,
/// `num_levels + 1`, `num_spec`)
///
/// `cloud_fraction`: cloud fraction, shape (`num_columns`, `num_levels`)
///
/// `fractional_std`: fractional standard deviation of in-cloud optical depth,
/// shape (`num_columns`, `num_levels`)
///
/// `od_clear`: clear-sky optical depth, shape (`num_columns`, `num_levels`,
/// `num_spec`)
///
/// `od_cloud`: mean in-cloud optical depth, shape (`num_columns`,
/// `num_levels`, `num_spec`)
///
/// `overlap_param`: overlap parameter between adjacent layers, shape
/// (`num_columns`, `num_levels - 1`)
///
/// `cloud_ssa` and `cloud_asymmetry`: optional cloud single-scattering albedo
/// and asymmetry factor, shape (`num_columns`, `num_levels`, `num_spec`).
/// Without them the atmosphere does not scatter.
///
/// `num_regions` is 2 or 3, and `pdf_shape` is "gamma" (the default) or
/// "lognormal". The number of worker threads is controlled by `num_threads`.
/// It must be a positive integer, or `None` to automatically choose the number
/// of threads.
#[pyfunction]
#[pyo3(signature = (
    surface_emission,
    surface_albedo,
    planck_hl,
    cloud_fraction,
    fractional_std,
    od_clear,
    od_cloud,
    overlap_param,
    cloud_ssa=None,
    cloud_asymmetry=None,
    num_regions=3,
    angles_per_hemisphere=0,
    pdf_shape="gamma",
    cloud_fraction_threshold=1e-6,
    decorrelation_scaling=0.5,
    compute_cloud_cover=false,
    num_threads=None,
))]
#[allow(clippy::too_many_arguments)]
fn compute_flux(
    py: Python<'_>,
    surface_emission: PyReadonlyArray2<'_, f64>,
    surface_albedo: PyReadonlyArray2<'_, f64>,
    planck_hl: PyReadonlyArray3<'_, f64>,
    cloud_fraction: PyReadonlyArray2<'_, f64>,
    fractional_std: PyReadonlyArray2<'_, f64>,
    od_clear: PyReadonlyArray3<'_, f64>,
    od_cloud: PyReadonlyArray3<'_, f64>,
    overlap_param: PyReadonlyArray2<'_, f64>,
    cloud_ssa: Option<PyReadonlyArray3<'_, f64>>,
    cloud_asymmetry: Option<PyReadonlyArray3<'_, f64>>,
    num_regions: usize,
    angles_per_hemisphere: usize,
    pdf_shape: &str,
    cloud_fraction_threshold: f64,
    decorrelation_scaling: f64,
    compute_cloud_cover: bool,
    num_threads: Option<usize>,
) -> PyResult<FluxResults> {
    let config = FluxConfig {
        angles_per_hemisphere,
        represent_3d_effects: false,
        pdf_shape: pdf_shape.parse::<CloudPdfShape>()?,
        cloud_fraction_threshold,
        decorrelation_scaling,
        compute_cloud_cover,
    };

    let scattering = match (&cloud_ssa, &cloud_asymmetry) {
        (Some(ssa), Some(asymmetry)) => Some(BatchScattering {
            ssa: ssa.as_array(),
            asymmetry: asymmetry.as_array(),
        }),
        (None, None) => None,
        _ => {
            return Err(PyValueError::new_err(
                "cloud_ssa and cloud_asymmetry must be given together",
            ))
        }
    };

    let batch = ColumnBatch {
        surface_emission: surface_emission.as_array(),
        surface_albedo: surface_albedo.as_array(),
        planck_hl: planck_hl.as_array(),
        cloud_fraction: cloud_fraction.as_array(),
        fractional_std: fractional_std.as_array(),
        od_clear: od_clear.as_array(),
        od_cloud: od_cloud.as_array(),
        overlap_param: overlap_param.as_array(),
        scattering,
    };
    let num_columns = batch.num_columns()?;
    debug!("input shapes are consistent");

    let pool = build_thread_pool(num_threads).map_err(|e| PyValueError::new_err(e.to_string()))?;

    let fluxes = match num_regions {
        2 => run(py, &pool, FluxSolver::<2>::new(config)?, &batch, num_columns)?,
        3 => run(py, &pool, FluxSolver::<3>::new(config)?, &batch, num_columns)?,
        n => return Err(FluxError::UnsupportedRegionCount(n).into()),
    };

    Ok(fluxes.into())
}

/// Run the batch in the thread pool, while this thread reports progress and
/// checks for early cancellation.
fn run<const NREG: usize>(
    py: Python<'_>,
    pool: &rayon::ThreadPool,
    solver: FluxSolver<NREG>,
    batch: &ColumnBatch<'_>,
    num_columns: usize,
) -> PyResult<BatchFluxes> {
    let progress = BatchProgress::new();
    let mut outcome = None;

    info!("Computing fluxes for {num_columns} columns with {NREG} regions");

    pool.in_place_scope(|s| -> PyResult<()> {
        s.spawn(|_| {
            outcome = Some(calc_flux_columns(&solver, batch, &progress));
        });

        let mut last_log = Instant::now();
        while !progress.is_finished() {
            if let Err(e) = py.check_signals() {
                progress.cancel();
                return Err(e);
            }

            if last_log.elapsed() >= LOG_INTERVAL {
                let completed = progress.completed();
                let percent = completed as f64 / num_columns as f64 * 100.;
                info!("Completed fluxes for {completed}/{num_columns} columns ({percent:0.2}%)");
                last_log = Instant::now();
            }

            py.allow_threads(|| std::thread::sleep(POLL_INTERVAL));
        }

        Ok(())
    })?;

    match outcome {
        Some(result) => Ok(result?),
        None => Err(FluxError::Cancelled.into()),
    }
}

/// Tripleclouds longwave flux solver.
#[pymodule]
fn tcrad(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(compute_flux, m)?)?;
    m.add_class::<FluxResults>()?;
    Ok(())
}
