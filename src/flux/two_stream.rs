//! Two-stream flux assembly through overlapping regions.
//!
//! This is the Tripleclouds adding method: an upward sweep from the surface
//! accumulates the total albedo and upward source seen from each region, then
//! a downward sweep from the top of the atmosphere resolves the fluxes.
//! Albedos are carried across half-levels with the downward overlap matrix
//! (downwelling radiation decides which regions below are illuminated) and
//! sources with the upward one.

use ndarray::{Array2, Array3, ArrayView1, Axis};

use super::layer::LayerCoefficients;
use super::overlap::{transfer, transfer_transposed, OverlapMatrices};
use super::FluxProfile;

/// Area-weighted fluxes in every region at the top and base of every layer,
/// each dimensioned `(num_levels, NREG, num_spec)`.
#[derive(Debug, Clone)]
pub struct RegionFluxes {
    /// Upwelling flux at the top of the layer.
    pub up_top: Array3<f64>,
    /// Downwelling flux at the top of the layer.
    pub dn_top: Array3<f64>,
    /// Upwelling flux at the base of the layer.
    pub up_base: Array3<f64>,
    /// Downwelling flux at the base of the layer.
    pub dn_base: Array3<f64>,
}

impl RegionFluxes {
    /// All fluxes zero.
    pub fn zeros(num_levels: usize, num_regions: usize, num_spec: usize) -> Self {
        let shape = (num_levels, num_regions, num_spec);
        Self {
            up_top: Array3::zeros(shape),
            dn_top: Array3::zeros(shape),
            up_base: Array3::zeros(shape),
            dn_base: Array3::zeros(shape),
        }
    }
}

/// Read the values of every region at one level and spectral interval.
#[inline]
pub(crate) fn regions_at<const NREG: usize>(
    array: &Array3<f64>,
    level: usize,
    spec: usize,
) -> [f64; NREG] {
    std::array::from_fn(|region| array[[level, region, spec]])
}

/// Move per-region values across a half-level.
///
/// Between two clear layers only region 0 carries anything, so it is copied
/// directly instead of going through the matrix.
#[inline]
pub(crate) fn across<const NREG: usize>(
    matrix: &[[f64; NREG]; NREG],
    values: &[f64; NREG],
    both_clear: bool,
) -> [f64; NREG] {
    if both_clear {
        let mut out = [0.; NREG];
        out[0] = values[0];
        out
    } else {
        transfer(matrix, values)
    }
}

/// Albedo seen from each region above a half-level.
///
/// The flux going down from a region is reflected by each region below in
/// proportion to its share, and is assumed to come back up into the region it
/// left.
#[inline]
fn albedo_across<const NREG: usize>(
    v: &[[f64; NREG]; NREG],
    albedo_below: &[f64; NREG],
    both_clear: bool,
) -> [f64; NREG] {
    if both_clear {
        across(v, albedo_below, true)
    } else {
        transfer_transposed(v, albedo_below)
    }
}

/// Compute the two-stream flux profile.
///
/// `clear_layers` is indexed by `level + 1`, with clear guard layers at both
/// ends. The surface is treated as a clear region below the lowest layer with
/// the given albedo and emission. There is no downwelling flux at the top of
/// the atmosphere.
///
/// The half-level fluxes are written to `profile`, and the per-region fluxes
/// at the top and base of every layer are returned.
pub fn calc_two_stream_flux<const NREG: usize>(
    clear_layers: &[bool],
    overlap: &OverlapMatrices<NREG>,
    coeffs: &LayerCoefficients,
    surface_emission: ArrayView1<'_, f64>,
    surface_albedo: ArrayView1<'_, f64>,
    profile: &mut FluxProfile,
) -> RegionFluxes {
    let (num_levels, _, num_spec) = coeffs.transmittance.dim();
    let regions = |level: usize| if clear_layers[level + 1] { 1 } else { NREG };

    // Total albedo and source at the top of each layer region, and just below
    // its base
    let mut albedo_top = Array3::<f64>::zeros((num_levels, NREG, num_spec));
    let mut source_top = Array3::<f64>::zeros((num_levels, NREG, num_spec));
    let mut albedo_base = Array3::<f64>::zeros((num_levels, NREG, num_spec));
    let mut source_base = Array3::<f64>::zeros((num_levels, NREG, num_spec));

    for level in (0..num_levels).rev() {
        let half_level = level + 1;
        let both_clear = clear_layers[level + 1] && clear_layers[level + 2];

        for spec in 0..num_spec {
            let (albedo_below, source_below) = if half_level == num_levels {
                let mut albedo = [0.; NREG];
                let mut source = [0.; NREG];
                albedo[0] = surface_albedo[spec];
                source[0] = surface_emission[spec];
                (albedo, source)
            } else {
                (
                    regions_at::<NREG>(&albedo_top, half_level, spec),
                    regions_at::<NREG>(&source_top, half_level, spec),
                )
            };

            let albedo = albedo_across(&overlap.v[half_level], &albedo_below, both_clear);
            let source = across(&overlap.u[half_level], &source_below, both_clear);

            for region in 0..NREG {
                albedo_base[[level, region, spec]] = albedo[region];
                source_base[[level, region, spec]] = source[region];
            }
        }

        for region in 0..regions(level) {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                let r = coeffs.reflectance[index];
                let t = coeffs.transmittance[index];
                let albedo = albedo_base[index];

                let inv_denom = 1. / (1. - albedo * r);
                albedo_top[index] = r + t * t * albedo * inv_denom;
                source_top[index] = coeffs.source_up[index]
                    + t * (source_base[index] + albedo * coeffs.source_dn[index]) * inv_denom;
            }
        }
    }

    let mut fluxes = RegionFluxes::zeros(num_levels, NREG, num_spec);
    for level in 0..num_levels {
        let both_clear = clear_layers[level] && clear_layers[level + 1];

        // Downwelling flux entering the top of each region of this layer
        if level > 0 {
            for spec in 0..num_spec {
                let dn_above = regions_at::<NREG>(&fluxes.dn_base, level - 1, spec);
                let dn = across(&overlap.v[level], &dn_above, both_clear);
                for region in 0..NREG {
                    fluxes.dn_top[[level, region, spec]] = dn[region];
                }
            }
        }

        for region in 0..regions(level) {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                let r = coeffs.reflectance[index];
                let t = coeffs.transmittance[index];
                let dn_top = fluxes.dn_top[index];

                let inv_denom = 1. / (1. - albedo_base[index] * r);
                let dn_base = (t * dn_top + r * source_base[index] + coeffs.source_dn[index])
                    * inv_denom;

                fluxes.up_top[index] = albedo_top[index] * dn_top + source_top[index];
                fluxes.dn_base[index] = dn_base;
                fluxes.up_base[index] = albedo_base[index] * dn_base + source_base[index];
            }
        }
    }

    sum_regions(&fluxes, &mut profile.flux_up, &mut profile.flux_dn);
    fluxes
}

/// Sum per-region fluxes into half-level fluxes.
fn sum_regions(fluxes: &RegionFluxes, flux_up: &mut Array2<f64>, flux_dn: &mut Array2<f64>) {
    let num_levels = fluxes.up_top.dim().0;
    if num_levels == 0 {
        return;
    }

    let sum_over_regions =
        |array: &Array3<f64>, level: usize| array.index_axis(Axis(0), level).sum_axis(Axis(0));

    flux_up.row_mut(0).assign(&sum_over_regions(&fluxes.up_top, 0));
    flux_dn.row_mut(0).assign(&sum_over_regions(&fluxes.dn_top, 0));
    for level in 0..num_levels {
        flux_up
            .row_mut(level + 1)
            .assign(&sum_over_regions(&fluxes.up_base, level));
        flux_dn
            .row_mut(level + 1)
            .assign(&sum_over_regions(&fluxes.dn_base, level));
    }
}

#[cfg(test)]
mod tests {
    use super::super::layer::{calc_reflectance_transmittance, RegionOptics};
    use super::super::overlap::calc_overlap_matrices;
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn isothermal_black_atmosphere_emits_planck() {
        // An opaque isothermal atmosphere over a black surface at the same
        // temperature is in radiative equilibrium.
        let num_levels = 4;
        let fractions = vec![[0.6, 0.2, 0.2]; num_levels];
        let clear_layers = vec![true, false, false, false, false, true];
        let overlap = calc_overlap_matrices(&fractions, &[0.7; 3], 0.5);
        let optics = RegionOptics {
            od: Array3::from_elem((num_levels, 3, 1), 20.),
            ssa: Array3::zeros((num_levels, 3, 1)),
            asymmetry: Array3::zeros((num_levels, 3, 1)),
        };
        let planck = Array2::from_elem((num_levels + 1, 1), 400.);
        let coeffs =
            calc_reflectance_transmittance(&fractions, &clear_layers, planck.view(), &optics);

        let mut profile = FluxProfile::new(num_levels, 1);
        let emission = Array1::from_elem(1, 400.);
        let albedo = Array1::zeros(1);
        calc_two_stream_flux(
            &clear_layers,
            &overlap,
            &coeffs,
            emission.view(),
            albedo.view(),
            &mut profile,
        );

        for half_level in 0..=num_levels {
            assert_abs_diff_eq!(profile.flux_up[[half_level, 0]], 400., epsilon = 1e-9);
        }
        assert_eq!(profile.flux_dn[[0, 0]], 0.);
        for half_level in 1..=num_levels {
            assert_abs_diff_eq!(profile.flux_dn[[half_level, 0]], 400., epsilon = 1e-9);
        }
    }

    #[test]
    fn transparent_atmosphere_passes_surface_emission() {
        let fractions = vec![[1., 0., 0.]; 2];
        let clear_layers = vec![true; 4];
        let overlap = calc_overlap_matrices(&fractions, &[0.5], 0.5);
        let optics = RegionOptics {
            od: Array3::zeros((2, 3, 2)),
            ssa: Array3::zeros((2, 3, 2)),
            asymmetry: Array3::zeros((2, 3, 2)),
        };
        let planck = Array2::from_elem((3, 2), 300.);
        let coeffs =
            calc_reflectance_transmittance(&fractions, &clear_layers, planck.view(), &optics);

        let mut profile = FluxProfile::new(2, 2);
        let emission = array![150., 250.];
        let albedo = array![0.2, 0.];
        let fluxes = calc_two_stream_flux(
            &clear_layers,
            &overlap,
            &coeffs,
            emission.view(),
            albedo.view(),
            &mut profile,
        );

        for half_level in 0..3 {
            assert_abs_diff_eq!(profile.flux_up[[half_level, 0]], 150., epsilon = 1e-12);
            assert_abs_diff_eq!(profile.flux_up[[half_level, 1]], 250., epsilon = 1e-12);
            assert_abs_diff_eq!(profile.flux_dn[[half_level, 0]], 0., epsilon = 1e-12);
        }
        assert_eq!(fluxes.up_top[[0, 1, 0]], 0.);
    }

    #[test]
    fn overcast_layer_sees_surface_albedo() {
        let fractions = [[0., 0.5, 0.5]];
        let clear_layers = [true, false, true];
        let overlap = calc_overlap_matrices(&fractions, &[], 0.5);
        let optics = RegionOptics {
            od: Array3::from_elem((1, 3, 1), 50.),
            ssa: Array3::zeros((1, 3, 1)),
            asymmetry: Array3::zeros((1, 3, 1)),
        };
        let planck = Array2::from_elem((2, 1), 100.);
        let coeffs =
            calc_reflectance_transmittance(&fractions, &clear_layers, planck.view(), &optics);

        let mut profile = FluxProfile::new(1, 1);
        let emission = Array1::zeros(1);
        let albedo = Array1::from_elem(1, 0.5);
        calc_two_stream_flux(
            &clear_layers,
            &overlap,
            &coeffs,
            emission.view(),
            albedo.view(),
            &mut profile,
        );

        assert_abs_diff_eq!(profile.flux_dn[[1, 0]], 100., epsilon = 1e-9);
        assert_abs_diff_eq!(profile.flux_up[[1, 0]], 50., epsilon = 1e-9);
        assert_abs_diff_eq!(profile.flux_up[[0, 0]], 100., epsilon = 1e-9);
    }
}
