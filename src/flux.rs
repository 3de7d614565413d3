//! Longwave flux solver for a single column using the Tripleclouds method.
//!
//! Each layer is split into a clear-sky region and one or two cloudy regions
//! ([`region`]), the vertical overlap of the regions in adjacent layers is
//! described by overlap matrices ([`overlap`]), and fluxes are found with a
//! two-stream adding method through the overlapping regions
//! ([`two_stream`]). Optionally, the two-stream fluxes are refined by
//! integrating radiances over several zenith angles ([`radiance`]).

mod layer;
mod overlap;
mod quadrature;
mod radiance;
mod region;
mod trace;
mod two_stream;


use std::num::NonZeroUsize;

use log::{debug, trace};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};

use crate::error::FluxError;

pub use self::layer::{
    calc_radiance_rates, calc_radiance_trans_source, calc_reflectance_transmittance,
    LayerCoefficients, RadianceCoefficients, RadianceRates, RegionOptics,
};
pub use self::overlap::{calc_cloud_cover, calc_overlap_matrices, OverlapMatrices};
pub use self::quadrature::{gauss_legendre, AngleSet, LW_DIFFUSIVITY, MAX_GAUSS_LEGENDRE_POINTS};
pub use self::radiance::{calc_radiance_dn, calc_radiance_up, surface_radiance};
pub use self::region::{
    calc_region_properties, CloudPdfShape, RegionProperties, MIN_GAMMA_OD_SCALING,
};
pub use self::trace::{LogTrace, NoTrace, RoutineStats, RoutineTimer, Tracer};
pub use self::two_stream::{calc_two_stream_flux, RegionFluxes};

use self::trace::traced;

/// Options for the flux solver.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxConfig {
    /// Number of zenith angles per hemisphere for the radiance correction.
    /// Zero keeps the two-stream fluxes.
    pub angles_per_hemisphere: usize,
    /// Request for 3D cloud effects. These are not represented and the flag
    /// is only acknowledged.
    pub represent_3d_effects: bool,
    /// Shape of the in-cloud optical depth distribution.
    pub pdf_shape: CloudPdfShape,
    /// Cloud fractions below this are treated as clear sky.
    pub cloud_fraction_threshold: f64,
    /// Ratio of the decorrelation length of cloud inhomogeneities to that of
    /// cloud boundaries.
    pub decorrelation_scaling: f64,
    /// Whether to compute the total cloud cover.
    pub compute_cloud_cover: bool,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            angles_per_hemisphere: 0,
            represent_3d_effects: false,
            pdf_shape: CloudPdfShape::default(),
            cloud_fraction_threshold: 1.0e-6,
            decorrelation_scaling: 0.5,
            compute_cloud_cover: false,
        }
    }
}

impl FluxConfig {
    fn validate(&self) -> Result<(), FluxError> {
        if !(0. ..1.).contains(&self.cloud_fraction_threshold) {
            return Err(FluxError::InvalidConfig(
                "cloud fraction threshold must be within [0, 1)",
            ));
        }
        if !(self.decorrelation_scaling.is_finite() && self.decorrelation_scaling > 0.) {
            return Err(FluxError::InvalidConfig(
                "decorrelation scaling must be positive and finite",
            ));
        }
        Ok(())
    }
}

/// Flux profile of a column, in W/m².
#[derive(Debug, Clone, PartialEq)]
pub struct FluxProfile {
    /// Upwelling flux, dimensioned `(num_levels + 1, num_spec)`.
    pub flux_up: Array2<f64>,
    /// Downwelling flux, dimensioned `(num_levels + 1, num_spec)`.
    pub flux_dn: Array2<f64>,
    /// Total cloud cover, if requested.
    pub cloud_cover: Option<f64>,
}

impl FluxProfile {
    /// Zeroed storage for a column of `num_levels` layers.
    pub fn new(num_levels: usize, num_spec: usize) -> Self {
        Self {
            flux_up: Array2::zeros((num_levels + 1, num_spec)),
            flux_dn: Array2::zeros((num_levels + 1, num_spec)),
            cloud_cover: None,
        }
    }

    fn check_shape(&self, num_levels: usize, num_spec: usize) -> Result<(), FluxError> {
        let shape = (num_levels + 1, num_spec);
        if self.flux_up.dim() != shape || self.flux_dn.dim() != shape {
            return Err(FluxError::InconsistentInputs);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.flux_up.fill(0.);
        self.flux_dn.fill(0.);
    }
}

/// Inputs describing one atmospheric column.
///
/// Levels are counted from the top of the atmosphere, and half-level 0 is the
/// top of the atmosphere.
#[derive(Debug, Clone)]
pub struct ColumnInputs<'a> {
    num_levels: NonZeroUsize,
    num_spec: NonZeroUsize,
    surface_emission: ArrayView1<'a, f64>,
    surface_albedo: ArrayView1<'a, f64>,
    planck_hl: ArrayView2<'a, f64>,
    cloud_fraction: &'a [f64],
    fractional_std: &'a [f64],
    od_clear: ArrayView2<'a, f64>,
    od_cloud: ArrayView2<'a, f64>,
    overlap_param: &'a [f64],
}

impl<'a> ColumnInputs<'a> {
    /// Check and collect the column inputs.
    ///
    /// `cloud_fraction` and `fractional_std` have length `num_levels`, and
    /// `surface_emission` (in W/m²) and `surface_albedo` have length
    /// `num_spec`. The Planck function `planck_hl`, in W/m², is given at the
    /// `num_levels + 1` half-levels. The clear-sky and in-cloud optical depths
    /// are dimensioned `(num_levels, num_spec)`. The overlap parameter between
    /// each pair of adjacent layers has length `num_levels - 1`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        surface_emission: ArrayView1<'a, f64>,
        surface_albedo: ArrayView1<'a, f64>,
        planck_hl: ArrayView2<'a, f64>,
        cloud_fraction: &'a [f64],
        fractional_std: &'a [f64],
        od_clear: ArrayView2<'a, f64>,
        od_cloud: ArrayView2<'a, f64>,
        overlap_param: &'a [f64],
    ) -> Result<Self, FluxError> {
        let num_levels: NonZeroUsize = cloud_fraction
            .len()
            .try_into()
            .or(Err(FluxError::InconsistentInputs))?;
        let num_spec: NonZeroUsize = surface_emission
            .len()
            .try_into()
            .or(Err(FluxError::InconsistentInputs))?;
        let (nlev, nspec) = (num_levels.get(), num_spec.get());

        if surface_albedo.len() != nspec
            || fractional_std.len() != nlev
            || overlap_param.len() != nlev - 1
            || planck_hl.dim() != (nlev + 1, nspec)
            || od_clear.dim() != (nlev, nspec)
            || od_cloud.dim() != (nlev, nspec)
        {
            return Err(FluxError::InconsistentInputs);
        }

        Ok(Self {
            num_levels,
            num_spec,
            surface_emission,
            surface_albedo,
            planck_hl,
            cloud_fraction,
            fractional_std,
            od_clear,
            od_cloud,
            overlap_param,
        })
    }

    /// Number of layers.
    pub fn num_levels(&self) -> usize {
        self.num_levels.get()
    }

    /// Number of spectral intervals.
    pub fn num_spec(&self) -> usize {
        self.num_spec.get()
    }
}

/// Scattering properties of the cloud, each dimensioned
/// `(num_levels, num_spec)`.
#[derive(Debug, Clone)]
pub struct CloudScattering<'a> {
    /// Single-scattering albedo of the cloud.
    pub ssa: ArrayView2<'a, f64>,
    /// Asymmetry factor of the cloud.
    pub asymmetry: ArrayView2<'a, f64>,
}

impl<'a> CloudScattering<'a> {
    /// Collect the cloud scattering properties.
    pub fn new(ssa: ArrayView2<'a, f64>, asymmetry: ArrayView2<'a, f64>) -> Self {
        Self { ssa, asymmetry }
    }
}

/// Region decomposition and overlap of a column, shared by both solvers.
struct ColumnSetup<const NREG: usize> {
    regions: RegionProperties<NREG>,
    overlap: OverlapMatrices<NREG>,
    /// Whether each layer is clear, indexed by `level + 1` with clear guard
    /// layers above and below.
    clear_layers: Vec<bool>,
}

/// Tripleclouds longwave flux solver.
///
/// `NREG` is the number of regions per layer, either 2 (clear and one cloudy
/// region) or 3 (clear, thin and thick cloud). The solver holds no state
/// between calls and can be shared between threads.
#[derive(Debug)]
pub struct FluxSolver<const NREG: usize = 3, T = NoTrace> {
    config: FluxConfig,
    /// Angles for the radiance integration. Without scattering a single
    /// diffusivity angle is used when no angles were requested.
    angles: AngleSet,
    tracer: T,
}

impl<const NREG: usize> FluxSolver<NREG, NoTrace> {
    /// Build a solver, checking the configuration and region count.
    pub fn new(config: FluxConfig) -> Result<Self, FluxError> {
        region::check_region_count::<NREG>()?;
        config.validate()?;

        if config.represent_3d_effects {
            debug!("3D cloud effects are not represented by the Tripleclouds solver");
        }
        let angles =
            AngleSet::new(config.angles_per_hemisphere).unwrap_or_else(AngleSet::diffusivity);

        Ok(Self {
            config,
            angles,
            tracer: NoTrace,
        })
    }
}

impl<const NREG: usize, T: Tracer> FluxSolver<NREG, T> {
    /// Replace the tracer that receives the timing of each stage.
    pub fn with_tracer<U: Tracer>(self, tracer: U) -> FluxSolver<NREG, U> {
        FluxSolver {
            config: self.config,
            angles: self.angles,
            tracer,
        }
    }

    /// The solver options.
    pub fn config(&self) -> &FluxConfig {
        &self.config
    }

    /// The tracer.
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Compute the fluxes of a scattering atmosphere.
    ///
    /// Scattering is by cloud only. With `angles_per_hemisphere` of zero the
    /// two-stream fluxes are returned, otherwise they are replaced by an
    /// integration of radiances whose scattering source comes from the
    /// two-stream fluxes.
    ///
    /// Nothing is written to `profile` if an error is returned.
    pub fn calc_flux(
        &self,
        inputs: &ColumnInputs<'_>,
        scattering: &CloudScattering<'_>,
        profile: &mut FluxProfile,
    ) -> Result<(), FluxError> {
        let shape = (inputs.num_levels(), inputs.num_spec());
        if scattering.ssa.dim() != shape || scattering.asymmetry.dim() != shape {
            return Err(FluxError::InconsistentInputs);
        }
        let setup = self.setup(inputs, profile)?;
        let fractions = &setup.regions.fractions;

        let optics = traced(&self.tracer, "region_optics", || {
            region_optics(inputs, &setup.regions, Some(scattering))
        });
        let coeffs = traced(&self.tracer, "reflectance_transmittance", || {
            calc_reflectance_transmittance(
                fractions,
                &setup.clear_layers,
                inputs.planck_hl,
                &optics,
            )
        });
        let region_flux = traced(&self.tracer, "two_stream_flux", || {
            calc_two_stream_flux(
                &setup.clear_layers,
                &setup.overlap,
                &coeffs,
                inputs.surface_emission,
                inputs.surface_albedo,
                profile,
            )
        });

        if self.config.angles_per_hemisphere == 0 {
            return Ok(());
        }

        traced(&self.tracer, "radiance_correction", || {
            let bottom = inputs.num_levels() - 1;
            let surface_dn = region_flux.dn_base.index_axis(Axis(0), bottom);
            let surface_up = surface_radiance(
                &fractions[bottom],
                inputs.surface_emission,
                inputs.surface_albedo,
                surface_dn,
            );

            profile.clear();
            for (mu, weight) in self.angles.iter() {
                trace!("radiance correction at mu = {mu:.4}");
                let rates = calc_radiance_rates(
                    mu,
                    fractions,
                    &setup.clear_layers,
                    inputs.planck_hl,
                    &optics,
                    &region_flux,
                );
                let coeffs = calc_radiance_trans_source(
                    mu,
                    fractions,
                    &setup.clear_layers,
                    &optics.od,
                    &rates,
                );
                calc_radiance_dn(
                    weight * mu,
                    &setup.clear_layers,
                    &setup.overlap,
                    &coeffs,
                    &mut profile.flux_dn,
                );
                calc_radiance_up(
                    weight * mu,
                    &setup.clear_layers,
                    &setup.overlap,
                    &coeffs,
                    &surface_up,
                    &mut profile.flux_up,
                );
            }
        });

        Ok(())
    }

    /// Compute the fluxes of a purely absorbing and emitting atmosphere.
    ///
    /// Radiances are always integrated over angle, with a single diffusivity
    /// angle when `angles_per_hemisphere` is zero. The surface reflects the
    /// angle-integrated downwelling flux on top of its emission, rather than
    /// only emitting, so a clear sky over a reflecting surface gives the same
    /// fluxes as [`FluxSolver::calc_flux`] with a single angle.
    ///
    /// Nothing is written to `profile` if an error is returned.
    pub fn calc_no_scattering_flux(
        &self,
        inputs: &ColumnInputs<'_>,
        profile: &mut FluxProfile,
    ) -> Result<(), FluxError> {
        let setup = self.setup(inputs, profile)?;
        let fractions = &setup.regions.fractions;
        let num_spec = inputs.num_spec();

        let optics = traced(&self.tracer, "region_optics", || {
            region_optics(inputs, &setup.regions, None)
        });
        let rates = RadianceRates::planck(NREG, inputs.planck_hl);

        traced(&self.tracer, "radiance_no_scattering", || {
            profile.clear();

            // Downward passes first, as the surface reflects their sum
            let mut surface_dn = Array2::<f64>::zeros((NREG, num_spec));
            let coeffs: Vec<_> = self
                .angles
                .iter()
                .map(|(mu, weight)| {
                    let coeffs = calc_radiance_trans_source(
                        mu,
                        fractions,
                        &setup.clear_layers,
                        &optics.od,
                        &rates,
                    );
                    let radiance = calc_radiance_dn(
                        weight * mu,
                        &setup.clear_layers,
                        &setup.overlap,
                        &coeffs,
                        &mut profile.flux_dn,
                    );
                    surface_dn.scaled_add(weight * mu, &radiance);
                    coeffs
                })
                .collect();

            let surface_up = surface_radiance(
                &fractions[inputs.num_levels() - 1],
                inputs.surface_emission,
                inputs.surface_albedo,
                surface_dn.view(),
            );
            for ((mu, weight), coeffs) in self.angles.iter().zip(&coeffs) {
                calc_radiance_up(
                    weight * mu,
                    &setup.clear_layers,
                    &setup.overlap,
                    coeffs,
                    &surface_up,
                    &mut profile.flux_up,
                );
            }
        });

        Ok(())
    }

    /// Validate the output shape, then compute the region decomposition,
    /// overlap matrices and optionally the cloud cover.
    fn setup(
        &self,
        inputs: &ColumnInputs<'_>,
        profile: &mut FluxProfile,
    ) -> Result<ColumnSetup<NREG>, FluxError> {
        profile.check_shape(inputs.num_levels(), inputs.num_spec())?;

        let regions = traced(&self.tracer, "region_properties", || {
            calc_region_properties::<NREG>(
                inputs.cloud_fraction,
                inputs.fractional_std,
                self.config.pdf_shape,
                self.config.cloud_fraction_threshold,
            )
        })?;
        let overlap = traced(&self.tracer, "overlap_matrices", || {
            calc_overlap_matrices(
                &regions.fractions,
                inputs.overlap_param,
                self.config.decorrelation_scaling,
            )
        });

        profile.cloud_cover = self
            .config
            .compute_cloud_cover
            .then(|| calc_cloud_cover(&regions.fractions, &overlap));

        let mut clear_layers = Vec::with_capacity(regions.num_levels() + 2);
        clear_layers.push(true);
        clear_layers.extend((0..regions.num_levels()).map(|level| regions.is_clear(level)));
        clear_layers.push(true);

        Ok(ColumnSetup {
            regions,
            overlap,
            clear_layers,
        })
    }
}

/// Optical depth, single-scattering albedo and asymmetry factor of each
/// region.
///
/// Only cloud scatters, so the albedo of a region is the cloud albedo
/// weighted by the cloud's share of the region's optical depth.
fn region_optics<const NREG: usize>(
    inputs: &ColumnInputs<'_>,
    regions: &RegionProperties<NREG>,
    scattering: Option<&CloudScattering<'_>>,
) -> RegionOptics {
    let shape = (inputs.num_levels(), NREG, inputs.num_spec());
    let od_cloud_in = |level: usize, region: usize, spec: usize| {
        regions.od_scaling[level][region] * inputs.od_cloud[[level, spec]]
    };

    let od = Array3::from_shape_fn(shape, |(level, region, spec)| {
        inputs.od_clear[[level, spec]] + od_cloud_in(level, region, spec)
    });

    let (ssa, asymmetry) = match scattering {
        Some(scattering) => {
            let ssa = Array3::from_shape_fn(shape, |(level, region, spec)| {
                let od = od[[level, region, spec]];
                if region == 0 || od <= 0. {
                    0.
                } else {
                    scattering.ssa[[level, spec]] * od_cloud_in(level, region, spec) / od
                }
            });
            let asymmetry = Array3::from_shape_fn(shape, |(level, region, spec)| {
                if region == 0 {
                    0.
                } else {
                    scattering.asymmetry[[level, spec]]
                }
            });
            (ssa, asymmetry)
        }
        None => (Array3::zeros(shape), Array3::zeros(shape)),
    };

    RegionOptics { od, ssa, asymmetry }
}
