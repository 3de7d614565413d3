//! Fluxes for many independent columns in parallel.
//!
//! Columns are distributed over a `rayon` thread pool. Progress is counted in
//! a [`BatchProgress`], which is also how a caller on another thread cancels
//! a run early.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, info};
use ndarray::{Array1, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::FluxError;
use crate::flux::{CloudScattering, ColumnInputs, FluxProfile, FluxSolver, Tracer};

/// Inputs for a batch of columns, each with a leading `num_columns` axis.
///
/// The remaining axes are those of [`ColumnInputs`]:
///
/// `surface_emission` and `surface_albedo`: (`num_columns`, `num_spec`)
///
/// `planck_hl`: (`num_columns`, `num_levels + 1`, `num_spec`)
///
/// `cloud_fraction` and `fractional_std`: (`num_columns`, `num_levels`)
///
/// `od_clear` and `od_cloud`: (`num_columns`, `num_levels`, `num_spec`)
///
/// `overlap_param`: (`num_columns`, `num_levels - 1`)
///
/// The per-column profiles of `cloud_fraction`, `fractional_std` and
/// `overlap_param` must be contiguous in memory.
#[derive(Debug, Clone)]
pub struct ColumnBatch<'a> {
    /// Surface emission in W/m².
    pub surface_emission: ArrayView2<'a, f64>,
    /// Surface albedo.
    pub surface_albedo: ArrayView2<'a, f64>,
    /// Planck function at half-levels in W/m².
    pub planck_hl: ArrayView3<'a, f64>,
    /// Cloud fraction.
    pub cloud_fraction: ArrayView2<'a, f64>,
    /// Fractional standard deviation of in-cloud optical depth.
    pub fractional_std: ArrayView2<'a, f64>,
    /// Clear-sky optical depth.
    pub od_clear: ArrayView3<'a, f64>,
    /// Mean in-cloud optical depth.
    pub od_cloud: ArrayView3<'a, f64>,
    /// Overlap parameter between adjacent layers.
    pub overlap_param: ArrayView2<'a, f64>,
    /// Cloud scattering properties. Without them the atmosphere only absorbs
    /// and emits.
    pub scattering: Option<BatchScattering<'a>>,
}

/// Cloud scattering properties for a batch, each dimensioned (`num_columns`,
/// `num_levels`, `num_spec`).
#[derive(Debug, Clone)]
pub struct BatchScattering<'a> {
    /// Single-scattering albedo of the cloud.
    pub ssa: ArrayView3<'a, f64>,
    /// Asymmetry factor of the cloud.
    pub asymmetry: ArrayView3<'a, f64>,
}

impl<'a> ColumnBatch<'a> {
    /// Number of columns, checking that every input has the same number.
    pub fn num_columns(&self) -> Result<usize, FluxError> {
        let num_columns = self.cloud_fraction.len_of(Axis(0));
        let mut leading = vec![
            self.surface_emission.len_of(Axis(0)),
            self.surface_albedo.len_of(Axis(0)),
            self.planck_hl.len_of(Axis(0)),
            self.fractional_std.len_of(Axis(0)),
            self.od_clear.len_of(Axis(0)),
            self.od_cloud.len_of(Axis(0)),
            self.overlap_param.len_of(Axis(0)),
        ];
        if let Some(scattering) = &self.scattering {
            leading.push(scattering.ssa.len_of(Axis(0)));
            leading.push(scattering.asymmetry.len_of(Axis(0)));
        }

        if leading.iter().any(|&n| n != num_columns) {
            return Err(FluxError::InconsistentInputs);
        }
        Ok(num_columns)
    }

    /// Number of layers in each column.
    pub fn num_levels(&self) -> usize {
        self.cloud_fraction.len_of(Axis(1))
    }

    /// Number of spectral intervals.
    pub fn num_spec(&self) -> usize {
        self.surface_emission.len_of(Axis(1))
    }

    /// Inputs for a single column.
    pub fn column(&self, column: usize) -> Result<ColumnInputs<'_>, FluxError> {
        let profile = |array: ArrayView2<'a, f64>| {
            array
                .index_axis_move(Axis(0), column)
                .to_slice()
                .ok_or(FluxError::NotContiguous)
        };

        ColumnInputs::new(
            self.surface_emission.index_axis(Axis(0), column),
            self.surface_albedo.index_axis(Axis(0), column),
            self.planck_hl.index_axis(Axis(0), column),
            profile(self.cloud_fraction)?,
            profile(self.fractional_std)?,
            self.od_clear.index_axis(Axis(0), column),
            self.od_cloud.index_axis(Axis(0), column),
            profile(self.overlap_param)?,
        )
    }
}

/// Progress of a batch run, shared between the workers and an observer.
#[derive(Debug, Default)]
pub struct BatchProgress {
    completed: AtomicUsize,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl BatchProgress {
    /// No columns completed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of columns completed so far, including failed ones.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Ask the run to stop. Columns not yet started are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether the run was asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Whether the run has returned, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Fluxes for a batch of columns.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFluxes {
    /// Upwelling flux, dimensioned (`num_columns`, `num_levels + 1`,
    /// `num_spec`).
    pub flux_up: Array3<f64>,
    /// Downwelling flux, dimensioned (`num_columns`, `num_levels + 1`,
    /// `num_spec`).
    pub flux_dn: Array3<f64>,
    /// Total cloud cover of each column, if requested.
    pub cloud_cover: Option<Array1<f64>>,
}

/// Compute the fluxes of every column in `batch`.
///
/// This runs in the current `rayon` thread pool. Columns are computed with
/// scattering when `batch.scattering` is set, otherwise without. Returns
/// [`FluxError::Cancelled`] if `progress` was cancelled before every column
/// had started.
pub fn calc_flux_columns<const NREG: usize, T: Tracer>(
    solver: &FluxSolver<NREG, T>,
    batch: &ColumnBatch<'_>,
    progress: &BatchProgress,
) -> Result<BatchFluxes, FluxError> {
    let result = run_columns(solver, batch, progress);
    progress.finished.store(true, Ordering::Release);
    result
}

fn run_columns<const NREG: usize, T: Tracer>(
    solver: &FluxSolver<NREG, T>,
    batch: &ColumnBatch<'_>,
    progress: &BatchProgress,
) -> Result<BatchFluxes, FluxError> {
    let num_columns = batch.num_columns()?;
    let (num_levels, num_spec) = (batch.num_levels(), batch.num_spec());
    debug!(
        "batch of {num_columns} columns with {num_levels} levels and {num_spec} spectral intervals"
    );

    let mut results = Vec::new();
    (0..num_columns)
        .into_par_iter()
        .map(|column| -> Result<FluxProfile, FluxError> {
            if progress.is_cancelled() {
                return Err(FluxError::Cancelled);
            }

            let inputs = batch.column(column)?;
            let mut profile = FluxProfile::new(num_levels, num_spec);
            match &batch.scattering {
                Some(scattering) => {
                    let scattering = CloudScattering::new(
                        scattering.ssa.index_axis(Axis(0), column),
                        scattering.asymmetry.index_axis(Axis(0), column),
                    );
                    solver.calc_flux(&inputs, &scattering, &mut profile)?;
                }
                None => solver.calc_no_scattering_flux(&inputs, &mut profile)?,
            }
            Ok(profile)
        })
        .inspect(|_| {
            progress.completed.fetch_add(1, Ordering::Relaxed);
        })
        .collect_into_vec(&mut results);

    let mut output = BatchFluxes {
        flux_up: Array3::zeros((num_columns, num_levels + 1, num_spec)),
        flux_dn: Array3::zeros((num_columns, num_levels + 1, num_spec)),
        cloud_cover: solver
            .config()
            .compute_cloud_cover
            .then(|| Array1::zeros(num_columns)),
    };

    results
        .into_iter()
        .enumerate()
        .try_for_each(|(column, profile)| -> Result<_, FluxError> {
            let FluxProfile {
                flux_up,
                flux_dn,
                cloud_cover,
            } = profile?;

            output.flux_up.index_axis_mut(Axis(0), column).assign(&flux_up);
            output.flux_dn.index_axis_mut(Axis(0), column).assign(&flux_dn);
            if let (Some(covers), Some(cover)) = (&mut output.cloud_cover, cloud_cover) {
                covers[column] = cover;
            }
            Ok(())
        })?;

    info!("computed fluxes for {num_columns} columns");
    Ok(output)
}

/// Build a thread pool for [`calc_flux_columns`].
///
/// `num_threads` of `None` lets `rayon` choose the number of threads.
pub fn build_thread_pool(
    num_threads: Option<usize>,
) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::FluxConfig;
    use approx::assert_abs_diff_eq;
    use ndarray::{s, Array2};

    /// Owned storage for a batch with columns of increasing cloudiness.
    struct Batch {
        surface_emission: Array2<f64>,
        surface_albedo: Array2<f64>,
        planck_hl: Array3<f64>,
        cloud_fraction: Array2<f64>,
        fractional_std: Array2<f64>,
        od_clear: Array3<f64>,
        od_cloud: Array3<f64>,
        overlap_param: Array2<f64>,
        ssa: Array3<f64>,
        asymmetry: Array3<f64>,
    }

    impl Batch {
        fn new(num_columns: usize) -> Self {
            let (num_levels, num_spec) = (6, 3);
            Self {
                surface_emission: Array2::from_elem((num_columns, num_spec), 390.),
                surface_albedo: Array2::from_elem((num_columns, num_spec), 0.02),
                planck_hl: Array3::from_shape_fn(
                    (num_columns, num_levels + 1, num_spec),
                    |(_, level, spec)| 200. + 30. * level as f64 - 20. * spec as f64,
                ),
                cloud_fraction: Array2::from_shape_fn((num_columns, num_levels), |(col, level)| {
                    ((col + level) % 4) as f64 / 4.
                }),
                fractional_std: Array2::from_elem((num_columns, num_levels), 1.),
                od_clear: Array3::from_shape_fn(
                    (num_columns, num_levels, num_spec),
                    |(_, level, spec)| 0.1 * (level + spec + 1) as f64,
                ),
                od_cloud: Array3::from_elem((num_columns, num_levels, num_spec), 3.),
                overlap_param: Array2::from_elem((num_columns, num_levels - 1), 0.8),
                ssa: Array3::from_elem((num_columns, num_levels, num_spec), 0.5),
                asymmetry: Array3::from_elem((num_columns, num_levels, num_spec), 0.8),
            }
        }

        fn view(&self, scattering: bool) -> ColumnBatch<'_> {
            ColumnBatch {
                surface_emission: self.surface_emission.view(),
                surface_albedo: self.surface_albedo.view(),
                planck_hl: self.planck_hl.view(),
                cloud_fraction: self.cloud_fraction.view(),
                fractional_std: self.fractional_std.view(),
                od_clear: self.od_clear.view(),
                od_cloud: self.od_cloud.view(),
                overlap_param: self.overlap_param.view(),
                scattering: scattering.then(|| BatchScattering {
                    ssa: self.ssa.view(),
                    asymmetry: self.asymmetry.view(),
                }),
            }
        }
    }

    fn solver(config: FluxConfig) -> FluxSolver<3> {
        FluxSolver::new(config).unwrap()
    }

    #[test]
    fn batch_matches_single_columns() {
        let batch = Batch::new(9);
        let config = FluxConfig {
            angles_per_hemisphere: 2,
            compute_cloud_cover: true,
            ..Default::default()
        };
        let solver = solver(config);

        for scattering in [true, false] {
            let view = batch.view(scattering);
            let progress = BatchProgress::new();
            let fluxes = calc_flux_columns(&solver, &view, &progress).unwrap();
            assert_eq!(progress.completed(), 9);
            assert!(progress.is_finished());

            for column in 0..9 {
                let inputs = view.column(column).unwrap();
                let mut profile = FluxProfile::new(6, 3);
                if scattering {
                    let cloud = CloudScattering::new(
                        batch.ssa.index_axis(Axis(0), column),
                        batch.asymmetry.index_axis(Axis(0), column),
                    );
                    solver.calc_flux(&inputs, &cloud, &mut profile).unwrap();
                } else {
                    solver.calc_no_scattering_flux(&inputs, &mut profile).unwrap();
                }

                assert_eq!(fluxes.flux_up.index_axis(Axis(0), column), profile.flux_up);
                assert_eq!(fluxes.flux_dn.index_axis(Axis(0), column), profile.flux_dn);
                let cover = fluxes.cloud_cover.as_ref().unwrap()[column];
                assert_abs_diff_eq!(cover, profile.cloud_cover.unwrap());
            }
        }
    }

    #[test]
    fn runs_in_thread_pool() {
        let batch = Batch::new(5);
        let solver = solver(FluxConfig::default());
        let pool = build_thread_pool(Some(2)).unwrap();

        let progress = BatchProgress::new();
        let fluxes = pool
            .install(|| calc_flux_columns(&solver, &batch.view(true), &progress))
            .unwrap();
        assert_eq!(fluxes.flux_up.dim(), (5, 7, 3));
        assert_eq!(fluxes.cloud_cover, None);
    }

    #[test]
    fn cancelled_before_start() {
        let batch = Batch::new(4);
        let progress = BatchProgress::new();
        progress.cancel();

        let result =
            calc_flux_columns(&solver(FluxConfig::default()), &batch.view(true), &progress);
        assert_eq!(result, Err(FluxError::Cancelled));
        assert!(progress.is_cancelled());
        assert!(progress.is_finished());
    }

    #[test]
    fn mismatched_column_counts() {
        let batch = Batch::new(4);
        let mut view = batch.view(false);
        view.od_cloud = batch.od_cloud.slice(s![..3, .., ..]);

        let progress = BatchProgress::new();
        let result = calc_flux_columns(&solver(FluxConfig::default()), &view, &progress);
        assert_eq!(result, Err(FluxError::InconsistentInputs));
        assert_eq!(progress.completed(), 0);
        assert!(progress.is_finished());
    }

    #[test]
    fn non_contiguous_profiles() {
        let batch = Batch::new(4);
        // Every other element of a wider array, so rows are strided
        let wide = Array2::from_elem((4, 2 * batch.cloud_fraction.ncols()), 0.25);
        let mut view = batch.view(false);
        view.cloud_fraction = wide.slice(s![.., ..;2]);
        assert!(view.cloud_fraction.row(0).as_slice().is_none());

        let progress = BatchProgress::new();
        let result = calc_flux_columns(&solver(FluxConfig::default()), &view, &progress);
        assert_eq!(result, Err(FluxError::NotContiguous));
    }
}
