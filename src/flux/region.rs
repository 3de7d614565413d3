//! Region properties for the Tripleclouds decomposition.
//!
//! Each layer is split into a clear-sky region and one or two cloudy regions.
//! With two cloudy regions the sub-grid distribution of in-cloud optical depth
//! is represented by a "thin" and a "thick" region whose optical depths are
//! scaled versions of the mean in-cloud optical depth. The scalings are chosen
//! so the area-weighted mean optical depth is conserved exactly.

use std::str::FromStr;

use crate::error::FluxError;

/// Minimum optical depth scaling of the thin region in gamma mode, so its
/// optical depth never vanishes at high variability.
pub const MIN_GAMMA_OD_SCALING: f64 = 0.025;

/// Fraction of the cloud given to the thin region for small variability in
/// gamma mode.
const GAMMA_THIN_WEIGHT_MIN: f64 = 0.5;
/// Fraction of the cloud given to the thin region for large variability in
/// gamma mode.
const GAMMA_THIN_WEIGHT_MAX: f64 = 0.9;
/// Fractional standard deviation where the thin weight starts increasing.
const GAMMA_FSD_RAMP_START: f64 = 1.5;
/// Fractional standard deviation where the thin weight saturates.
const GAMMA_FSD_RAMP_END: f64 = 3.725;

/// Gradient of the thin-region weight with fractional standard deviation.
const FSD_GRADIENT: f64 =
    (GAMMA_THIN_WEIGHT_MAX - GAMMA_THIN_WEIGHT_MIN) / (GAMMA_FSD_RAMP_END - GAMMA_FSD_RAMP_START);
/// Intercept of the thin-region weight.
const FSD_INTERCEPT: f64 = GAMMA_THIN_WEIGHT_MIN - GAMMA_FSD_RAMP_START * FSD_GRADIENT;

/// Shape of the sub-grid probability distribution of in-cloud optical depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudPdfShape {
    /// Lognormal distribution, split into two equal-area cloudy regions.
    Lognormal,
    /// Gamma distribution, with a thin region whose area grows with the
    /// variability.
    #[default]
    Gamma,
}

impl FromStr for CloudPdfShape {
    type Err = FluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lognormal" => Ok(Self::Lognormal),
            "gamma" => Ok(Self::Gamma),
            _ => Err(FluxError::InvalidConfig(
                "cloud PDF shape must be \"lognormal\" or \"gamma\"",
            )),
        }
    }
}

/// Area fractions and optical depth scalings of every region in every layer.
///
/// Index 0 of each array is the clear-sky region. Its optical depth scaling
/// is stored as 0 since it contains no cloud, which lets the optical depth of
/// every region be written as `od_clear + od_scaling * od_cloud`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionProperties<const NREG: usize> {
    /// Fractional area coverage of each region, with length `num_levels`.
    pub fractions: Vec<[f64; NREG]>,
    /// Optical depth scaling of each region relative to the mean in-cloud
    /// optical depth, with length `num_levels`.
    pub od_scaling: Vec<[f64; NREG]>,
}

impl<const NREG: usize> RegionProperties<NREG> {
    /// Number of layers described.
    pub fn num_levels(&self) -> usize {
        self.fractions.len()
    }

    /// Whether a layer is entirely clear sky.
    pub fn is_clear(&self, level: usize) -> bool {
        self.fractions[level][0] == 1.0
    }
}

/// Check that `NREG` is a region count with a decomposition available.
pub(crate) fn check_region_count<const NREG: usize>() -> Result<(), FluxError> {
    match NREG {
        2 | 3 => Ok(()),
        n => Err(FluxError::UnsupportedRegionCount(n)),
    }
}

/// Compute the region fractions and optical depth scalings.
///
/// `cloud_fraction` and `fractional_std` are per-layer profiles of the same
/// length. Layers with a cloud fraction below `cloud_fraction_threshold` are
/// treated as entirely clear. The fractional standard deviation is only used
/// with three regions.
///
/// The inputs are assumed to be physically sane: cloud fraction within
/// [0, 1] and a non-negative fractional standard deviation.
pub fn calc_region_properties<const NREG: usize>(
    cloud_fraction: &[f64],
    fractional_std: &[f64],
    pdf_shape: CloudPdfShape,
    cloud_fraction_threshold: f64,
) -> Result<RegionProperties<NREG>, FluxError> {
    check_region_count::<NREG>()?;
    if cloud_fraction.len() != fractional_std.len() {
        return Err(FluxError::InconsistentInputs);
    }

    let num_levels = cloud_fraction.len();
    let mut fractions = Vec::with_capacity(num_levels);
    let mut od_scaling = Vec::with_capacity(num_levels);

    for (&cf, &fsd) in cloud_fraction.iter().zip(fractional_std) {
        let mut frac = [0.; NREG];
        let mut scaling = [1.; NREG];
        scaling[0] = 0.;

        if cf < cloud_fraction_threshold {
            frac[0] = 1.;
        } else {
            frac[0] = 1. - cf;
            match (&mut frac[..], &mut scaling[..]) {
                ([_, thin_frac, thick_frac], [_, thin_scaling, thick_scaling]) => {
                    let (thin, thick) = match pdf_shape {
                        CloudPdfShape::Lognormal => lognormal_split(cf, fsd),
                        CloudPdfShape::Gamma => gamma_split(cf, fsd),
                    };
                    (*thin_frac, *thin_scaling) = thin;
                    (*thick_frac, *thick_scaling) = thick;
                }
                // A single homogeneous cloudy region
                (cloudy, _) => cloudy[1] = cf,
            }
        }

        fractions.push(frac);
        od_scaling.push(scaling);
    }

    Ok(RegionProperties {
        fractions,
        od_scaling,
    })
}

/// Split a cloud into equal-area thin and thick regions, returning the
/// `(area, scaling)` of each.
///
/// The thin scaling approximates the 16th percentile of a lognormal
/// distribution. The areas are equal, so `2 - thin` conserves the mean.
fn lognormal_split(cf: f64, fsd: f64) -> ((f64, f64), (f64, f64)) {
    let variance_factor = fsd * fsd + 1.;
    let thin_scaling = f64::exp(-variance_factor.ln().sqrt()) / variance_factor.sqrt();
    let area = 0.5 * cf;
    ((area, thin_scaling), (area, 2. - thin_scaling))
}

/// Split a cloud into thin and thick regions for a gamma distribution,
/// returning the `(area, scaling)` of each.
fn gamma_split(cf: f64, fsd: f64) -> ((f64, f64), (f64, f64)) {
    let thin_weight = (FSD_INTERCEPT + fsd * FSD_GRADIENT)
        .clamp(GAMMA_THIN_WEIGHT_MIN, GAMMA_THIN_WEIGHT_MAX);
    let thin_area = cf * thin_weight;

    // Approximates the 16th percentile of the gamma distribution
    let thin_scaling = MIN_GAMMA_OD_SCALING
        + (1. - MIN_GAMMA_OD_SCALING) * f64::exp(-fsd * (1. + 0.5 * fsd * (1. + 0.5 * fsd)));

    // Thick area is whatever cloud is left, computed the same way as the
    // clear fraction so the three areas sum to one
    let thick_area = 1. - (1. - cf) - thin_area;
    let thick_scaling = if thick_area > 0. {
        (cf - thin_area * thin_scaling) / thick_area
    } else {
        1.
    };

    ((thin_area, thin_scaling), (thick_area, thick_scaling))
}
