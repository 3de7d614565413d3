//! Radiance passes along a single stream direction.
//!
//! Radiances here are in flux units (`pi` times the radiance) and are
//! area-weighted in each region, like the two-stream fluxes. Each pass adds
//! `weight * mu` times the region-summed radiance at every half-level into a
//! flux profile.

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::layer::RadianceCoefficients;
use super::overlap::OverlapMatrices;
use super::two_stream::across;

/// Read one spectral interval of every region.
#[inline]
fn column_of<const NREG: usize>(array: &Array2<f64>, spec: usize) -> [f64; NREG] {
    std::array::from_fn(|region| array[[region, spec]])
}

/// Add `weight_mu` times the region sum of `radiance` to one row of `flux`.
fn accumulate(flux: &mut Array2<f64>, half_level: usize, radiance: &Array2<f64>, weight_mu: f64) {
    let mut row = flux.row_mut(half_level);
    for (spec, value) in row.iter_mut().enumerate() {
        *value += weight_mu * radiance.column(spec).sum();
    }
}

/// Propagate downward radiance from the top of the atmosphere to the surface.
///
/// No radiance enters at the top of the atmosphere. The contribution to the
/// downwelling flux is added to `flux_dn`, and the area-weighted radiance
/// reaching the base of the lowest layer in each of its regions is returned,
/// dimensioned `(NREG, num_spec)`.
pub fn calc_radiance_dn<const NREG: usize>(
    weight_mu: f64,
    clear_layers: &[bool],
    overlap: &OverlapMatrices<NREG>,
    coeffs: &RadianceCoefficients,
    flux_dn: &mut Array2<f64>,
) -> Array2<f64> {
    let (num_levels, _, num_spec) = coeffs.transmittance.dim();
    let mut radiance = Array2::<f64>::zeros((NREG, num_spec));

    for level in 0..num_levels {
        if level > 0 {
            let both_clear = clear_layers[level] && clear_layers[level + 1];
            for spec in 0..num_spec {
                let moved = across(
                    &overlap.v[level],
                    &column_of::<NREG>(&radiance, spec),
                    both_clear,
                );
                for (region, value) in moved.into_iter().enumerate() {
                    radiance[[region, spec]] = value;
                }
            }
        }

        let regions = if clear_layers[level + 1] { 1 } else { NREG };
        for region in 0..regions {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                radiance[[region, spec]] = coeffs.transmittance[index] * radiance[[region, spec]]
                    + coeffs.source_dn[index];
            }
        }

        accumulate(flux_dn, level + 1, &radiance, weight_mu);
    }

    radiance
}

/// Propagate upward radiance from the surface to the top of the atmosphere.
///
/// `surface_up` is the area-weighted radiance leaving the surface into each
/// region of the lowest layer, dimensioned `(NREG, num_spec)`. The
/// contribution to the upwelling flux is added to `flux_up`.
pub fn calc_radiance_up<const NREG: usize>(
    weight_mu: f64,
    clear_layers: &[bool],
    overlap: &OverlapMatrices<NREG>,
    coeffs: &RadianceCoefficients,
    surface_up: &Array2<f64>,
    flux_up: &mut Array2<f64>,
) {
    let (num_levels, _, num_spec) = coeffs.transmittance.dim();
    let mut radiance = surface_up.clone();

    for level in (0..num_levels).rev() {
        accumulate(flux_up, level + 1, &radiance, weight_mu);

        let regions = if clear_layers[level + 1] { 1 } else { NREG };
        for region in 0..regions {
            for spec in 0..num_spec {
                let index = [level, region, spec];
                radiance[[region, spec]] = coeffs.transmittance[index] * radiance[[region, spec]]
                    + coeffs.source_up[index];
            }
        }

        if level > 0 {
            let both_clear = clear_layers[level] && clear_layers[level + 1];
            for spec in 0..num_spec {
                let moved = across(
                    &overlap.u[level],
                    &column_of::<NREG>(&radiance, spec),
                    both_clear,
                );
                for (region, value) in moved.into_iter().enumerate() {
                    radiance[[region, spec]] = value;
                }
            }
        }
    }

    accumulate(flux_up, 0, &radiance, weight_mu);
}

/// Area-weighted radiance leaving a Lambertian surface into each region of
/// the lowest layer.
///
/// `fractions` are the region fractions of the lowest layer and `flux_dn` the
/// area-weighted downwelling flux reaching the surface in each of its regions,
/// dimensioned `(NREG, num_spec)`. Reflection stays within the region it
/// arrived in.
pub fn surface_radiance<const NREG: usize>(
    fractions: &[f64; NREG],
    surface_emission: ArrayView1<'_, f64>,
    surface_albedo: ArrayView1<'_, f64>,
    flux_dn: ArrayView2<'_, f64>,
) -> Array2<f64> {
    let num_spec = surface_emission.len();
    Array2::from_shape_fn((NREG, num_spec), |(region, spec)| {
        fractions[region] * surface_emission[spec] + surface_albedo[spec] * flux_dn[[region, spec]]
    })
}
