//! Radiative properties of individual layers.
//!
//! Every quantity is dimensioned `(num_levels, NREG, num_spec)`. Emission
//! sources are weighted by the area fraction of their region, so that sources
//! from the different regions of a layer can be summed directly. Only region 0
//! is filled in for entirely clear layers.

use ndarray::{Array3, ArrayView2};

use super::quadrature::LW_DIFFUSIVITY;
use super::two_stream::RegionFluxes;

/// Below this optical depth the Planck function is treated as constant
/// through the layer.
const OD_THRESHOLD: f64 = 1.0e-3;

/// Optical properties of each region of each layer.
#[derive(Debug, Clone)]
pub struct RegionOptics {
    /// Optical depth.
    pub od: Array3<f64>,
    /// Single-scattering albedo.
    pub ssa: Array3<f64>,
    /// Asymmetry factor of the phase function.
    pub asymmetry: Array3<f64>,
}

/// Two-stream reflectance, transmittance and emission of each region.
#[derive(Debug, Clone)]
pub struct LayerCoefficients {
    /// Diffuse reflectance.
    pub reflectance: Array3<f64>,
    /// Diffuse transmittance.
    pub transmittance: Array3<f64>,
    /// Area-weighted upward emission from the top of the layer, in flux units.
    pub source_up: Array3<f64>,
    /// Area-weighted downward emission from the base of the layer, in flux
    /// units.
    pub source_dn: Array3<f64>,
}

/// Radiance source function at the top and base of each region, for a
/// single stream direction pair.
///
/// The source function is per unit area and is assumed to vary linearly with
/// optical depth through the layer.
#[derive(Debug, Clone)]
pub struct RadianceRates {
    /// Source function for upward radiance at the top of the layer.
    pub up_top: Array3<f64>,
    /// Source function for upward radiance at the base of the layer.
    pub up_base: Array3<f64>,
    /// Source function for downward radiance at the top of the layer.
    pub dn_top: Array3<f64>,
    /// Source function for downward radiance at the base of the layer.
    pub dn_base: Array3<f64>,
}

/// Transmittance and area-weighted sources along one stream direction.
#[derive(Debug, Clone)]
pub struct RadianceCoefficients {
    /// Direct transmittance along the stream.
    pub transmittance: Array3<f64>,
    /// Area-weighted upward radiance emerging from the top of the layer.
    pub source_up: Array3<f64>,
    /// Area-weighted downward radiance emerging from the base of the layer.
    pub source_dn: Array3<f64>,
}

/// Number of regions to compute for a layer.
#[inline]
fn active_regions<const NREG: usize>(is_clear: bool) -> usize {
    if is_clear {
        1
    } else {
        NREG
    }
}

/// Compute the two-stream reflectance, transmittance and emission sources.
///
/// `clear_layers` flags entirely clear layers and is indexed by `level + 1`,
/// the first and last entries being the guard layers above the top of the
/// atmosphere and below the surface. `planck_hl` is the Planck function in
/// flux units at the `num_levels + 1` half-levels.
pub fn calc_reflectance_transmittance<const NREG: usize>(
    fractions: &[[f64; NREG]],
    clear_layers: &[bool],
    planck_hl: ArrayView2<'_, f64>,
    optics: &RegionOptics,
) -> LayerCoefficients {
    let shape = optics.od.dim();
    let mut reflectance = Array3::zeros(shape);
    let mut transmittance = Array3::zeros(shape);
    let mut source_up = Array3::zeros(shape);
    let mut source_dn = Array3::zeros(shape);

    let num_spec = shape.2;
    for (level, frac) in fractions.iter().enumerate() {
        for region in 0..active_regions::<NREG>(clear_layers[level + 1]) {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                let od = optics.od[index];
                let ssa = optics.ssa[index];
                let g = optics.asymmetry[index];

                let factor = 0.5 * LW_DIFFUSIVITY * ssa;
                let gamma1 = LW_DIFFUSIVITY - factor * (1. + g);
                let gamma2 = factor * (1. - g);

                let k_exponent = f64::sqrt(((gamma1 - gamma2) * (gamma1 + gamma2)).max(1.0e-12));
                let exponential = f64::exp(-k_exponent * od);
                let exponential2 = exponential * exponential;
                let reftrans_factor =
                    1. / (k_exponent + gamma1 + (k_exponent - gamma1) * exponential2);
                let r = gamma2 * (1. - exponential2) * reftrans_factor;
                let t = 2. * k_exponent * exponential * reftrans_factor;

                let planck_top = planck_hl[[level, spec]];
                let planck_base = planck_hl[[level + 1, spec]];

                let (s_up, s_dn) = if od > OD_THRESHOLD {
                    // Planck function linear in optical depth
                    let coeff = (planck_base - planck_top) / (od * (gamma1 + gamma2));
                    let coeff_up_top = coeff + planck_top;
                    let coeff_up_base = coeff + planck_base;
                    let coeff_dn_top = -coeff + planck_top;
                    let coeff_dn_base = -coeff + planck_base;
                    (
                        coeff_up_top - r * coeff_dn_top - t * coeff_up_base,
                        coeff_dn_base - r * coeff_up_base - t * coeff_dn_top,
                    )
                } else {
                    let s = (1. - r - t) * 0.5 * (planck_top + planck_base);
                    (s, s)
                };

                reflectance[index] = r;
                transmittance[index] = t;
                source_up[index] = frac[region] * s_up;
                source_dn[index] = frac[region] * s_dn;
            }
        }
    }

    LayerCoefficients {
        reflectance,
        transmittance,
        source_up,
        source_dn,
    }
}

impl RadianceRates {
    /// Source function of a non-scattering atmosphere, which is the Planck
    /// function in every region and direction.
    pub fn planck(num_regions: usize, planck_hl: ArrayView2<'_, f64>) -> Self {
        let (num_half_levels, num_spec) = planck_hl.dim();
        let num_levels = num_half_levels - 1;

        let top = Array3::from_shape_fn((num_levels, num_regions, num_spec), |(l, _, g)| {
            planck_hl[[l, g]]
        });
        let base = Array3::from_shape_fn((num_levels, num_regions, num_spec), |(l, _, g)| {
            planck_hl[[l + 1, g]]
        });

        Self {
            up_top: top.clone(),
            up_base: base.clone(),
            dn_top: top,
            dn_base: base,
        }
    }
}

/// Compute the radiance source function for the stream pair at `mu`, from
/// thermal emission plus scattering of the two-stream fluxes.
///
/// The phase function is the Eddington approximation `1 + 3 g cos(theta)`
/// and each two-stream flux is treated as an isotropic hemisphere of
/// radiance. The per-region fluxes are area-weighted, so they are divided by
/// the region fraction to get the flux per unit area.
pub fn calc_radiance_rates<const NREG: usize>(
    mu: f64,
    fractions: &[[f64; NREG]],
    clear_layers: &[bool],
    planck_hl: ArrayView2<'_, f64>,
    optics: &RegionOptics,
    region_flux: &RegionFluxes,
) -> RadianceRates {
    let shape = optics.od.dim();
    let mut rates = RadianceRates {
        up_top: Array3::zeros(shape),
        up_base: Array3::zeros(shape),
        dn_top: Array3::zeros(shape),
        dn_base: Array3::zeros(shape),
    };

    let num_spec = shape.2;
    for (level, frac) in fractions.iter().enumerate() {
        for region in 0..active_regions::<NREG>(clear_layers[level + 1]) {
            if frac[region] <= 0. {
                continue;
            }
            let inv_frac = 1. / frac[region];

            for spec in 0..num_spec {
                let index = [level, region, spec];
                let ssa = optics.ssa[index];
                let forward = 0.5 * ssa * (1. + 1.5 * optics.asymmetry[index] * mu);
                let backward = ssa - forward;
                let emission = 1. - ssa;

                let planck_top = planck_hl[[level, spec]];
                let planck_base = planck_hl[[level + 1, spec]];

                let up_top = region_flux.up_top[index] * inv_frac;
                let dn_top = region_flux.dn_top[index] * inv_frac;
                let up_base = region_flux.up_base[index] * inv_frac;
                let dn_base = region_flux.dn_base[index] * inv_frac;

                rates.up_top[index] = emission * planck_top + forward * up_top + backward * dn_top;
                rates.up_base[index] =
                    emission * planck_base + forward * up_base + backward * dn_base;
                rates.dn_top[index] = emission * planck_top + forward * dn_top + backward * up_top;
                rates.dn_base[index] =
                    emission * planck_base + forward * dn_base + backward * up_base;
            }
        }
    }

    rates
}

/// Compute the transmittance and area-weighted sources along the stream pair
/// at `mu`, for a source function varying linearly with optical depth.
pub fn calc_radiance_trans_source<const NREG: usize>(
    mu: f64,
    fractions: &[[f64; NREG]],
    clear_layers: &[bool],
    od: &Array3<f64>,
    rates: &RadianceRates,
) -> RadianceCoefficients {
    let shape = od.dim();
    let mut transmittance = Array3::zeros(shape);
    let mut source_up = Array3::zeros(shape);
    let mut source_dn = Array3::zeros(shape);

    let num_spec = shape.2;
    for (level, frac) in fractions.iter().enumerate() {
        for region in 0..active_regions::<NREG>(clear_layers[level + 1]) {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                let od = od[index];
                let t = f64::exp(-od / mu);

                let (up_top, up_base) = (rates.up_top[index], rates.up_base[index]);
                let (dn_top, dn_base) = (rates.dn_top[index], rates.dn_base[index]);

                let (s_up, s_dn) = if od > OD_THRESHOLD {
                    let path_factor = mu / od * (1. - t);
                    (
                        up_top - t * up_base + (up_base - up_top) * path_factor,
                        dn_base - t * dn_top - (dn_base - dn_top) * path_factor,
                    )
                } else {
                    (
                        (1. - t) * 0.5 * (up_top + up_base),
                        (1. - t) * 0.5 * (dn_top + dn_base),
                    )
                };

                transmittance[index] = t;
                source_up[index] = frac[region] * s_up;
                source_dn[index] = frac[region] * s_dn;
            }
        }
    }

    RadianceCoefficients {
        transmittance,
        source_up,
        source_dn,
    }
}
