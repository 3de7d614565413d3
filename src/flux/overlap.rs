//! Overlap matrices between the regions of vertically adjacent layers.
//!
//! At each half-level the regions of the layer above and the layer below
//! overlap horizontally. The overlap is described by a matrix of overlapping
//! areas, derived from the region fractions of the two layers and an overlap
//! parameter that blends maximum overlap (1) and random overlap (0). Space above
//! the top of the atmosphere and the surface below the lowest layer are treated
//! as clear-sky guard layers.

/// Overlap matrices at every half-level.
///
/// Both matrices are indexed as `[half_level][destination][source]`, with
/// `num_levels + 1` half-levels where 0 is the top of the atmosphere.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapMatrices<const NREG: usize> {
    /// Upward transfer: `u[k][i][j]` is the fraction of the upwelling flux in
    /// region `j` of the layer below half-level `k` that enters region `i` of
    /// the layer above.
    pub u: Vec<[[f64; NREG]; NREG]>,
    /// Downward transfer: `v[k][j][i]` is the fraction of the downwelling flux
    /// in region `i` of the layer above half-level `k` that enters region `j`
    /// of the layer below.
    pub v: Vec<[[f64; NREG]; NREG]>,
}

/// Region fractions of a clear-sky guard layer.
pub(crate) fn clear_fractions<const NREG: usize>() -> [f64; NREG] {
    let mut frac = [0.; NREG];
    frac[0] = 1.;
    frac
}

/// Apply a `[destination][source]` transfer matrix to one value per region.
pub(crate) fn transfer<const NREG: usize>(
    matrix: &[[f64; NREG]; NREG],
    source: &[f64; NREG],
) -> [f64; NREG] {
    matrix.map(|row| row.iter().zip(source).map(|(m, s)| m * s).sum())
}

/// Apply the transpose of a `[destination][source]` transfer matrix, giving
/// for each source region the destination values weighted by its share of
/// flux going into each of them.
pub(crate) fn transfer_transposed<const NREG: usize>(
    matrix: &[[f64; NREG]; NREG],
    destination: &[f64; NREG],
) -> [f64; NREG] {
    std::array::from_fn(|src| (0..NREG).map(|dest| matrix[dest][src] * destination[dest]).sum())
}

/// Compute the upward and downward overlap matrices.
///
/// `fractions` holds the region fractions of each of the `num_levels` layers.
/// `overlap_param` holds the overlap parameter between each pair of adjacent
/// layers and has length `num_levels - 1`. The overlap of the cloudy
/// sub-regions uses `overlap_param` raised to `1 / decorrelation_scaling`, so
/// in-cloud inhomogeneities decorrelate faster than cloud boundaries when the
/// scaling is below 1.
///
/// The caller is responsible for `overlap_param` having the right length.
pub fn calc_overlap_matrices<const NREG: usize>(
    fractions: &[[f64; NREG]],
    overlap_param: &[f64],
    decorrelation_scaling: f64,
) -> OverlapMatrices<NREG> {
    let num_levels = fractions.len();
    let clear = clear_fractions::<NREG>();

    let mut u = Vec::with_capacity(num_levels + 1);
    let mut v = Vec::with_capacity(num_levels + 1);

    for half_level in 0..=num_levels {
        let upper = if half_level == 0 {
            &clear
        } else {
            &fractions[half_level - 1]
        };
        let lower = fractions.get(half_level).unwrap_or(&clear);

        // The guard layers are clear, so any value works at the boundaries
        let alpha = if half_level == 0 || half_level == num_levels {
            1.
        } else {
            overlap_param[half_level - 1]
        };
        let alpha_inhom = alpha.max(0.).powf(1. / decorrelation_scaling);

        let area = overlap_areas(upper, lower, alpha, alpha_inhom);

        let mut u_matrix = [[0.; NREG]; NREG];
        let mut v_matrix = [[0.; NREG]; NREG];
        for i in 0..NREG {
            for j in 0..NREG {
                if lower[j] > 0. {
                    u_matrix[i][j] = area[i][j] / lower[j];
                }
                if upper[i] > 0. {
                    v_matrix[j][i] = area[i][j] / upper[i];
                }
            }
        }
        u.push(u_matrix);
        v.push(v_matrix);
    }

    OverlapMatrices { u, v }
}

/// Area of overlap between region `i` of the upper layer and region `j` of
/// the lower layer, as `area[i][j]`.
fn overlap_areas<const NREG: usize>(
    upper: &[f64; NREG],
    lower: &[f64; NREG],
    alpha: f64,
    alpha_inhom: f64,
) -> [[f64; NREG]; NREG] {
    let cf_upper = 1. - upper[0];
    let cf_lower = 1. - lower[0];

    // Combined cloud cover of the two layers, blending maximum and random
    // overlap
    let max_cover = cf_upper.max(cf_lower);
    let random_cover = cf_upper + cf_lower - cf_upper * cf_lower;
    let pair_cover = (alpha * max_cover + (1. - alpha) * random_cover)
        .min(1.)
        .min(cf_upper + cf_lower)
        .max(max_cover);
    let cloudy_overlap = (cf_upper + cf_lower - pair_cover).max(0.);

    let mut area = [[0.; NREG]; NREG];
    area[0][0] = (1. - pair_cover).max(0.);

    if cf_lower > 0. {
        for j in 1..NREG {
            area[0][j] = ((cf_lower - cloudy_overlap) * lower[j] / cf_lower).max(0.);
        }
    }
    if cf_upper > 0. {
        for i in 1..NREG {
            area[i][0] = ((cf_upper - cloudy_overlap) * upper[i] / cf_upper).max(0.);
        }
    }
    if cf_upper > 0. && cf_lower > 0. {
        let max_overlap = max_overlap_of_cloudy(upper, lower, cf_upper, cf_lower);
        for i in 1..NREG {
            for j in 1..NREG {
                let random = (upper[i] / cf_upper) * (lower[j] / cf_lower);
                area[i][j] = cloudy_overlap
                    * (alpha_inhom * max_overlap[i][j] + (1. - alpha_inhom) * random);
            }
        }
    }

    area
}

/// Maximum overlap of the normalised cloudy sub-region distributions of two
/// layers, with thinner regions overlapping thinner regions.
fn max_overlap_of_cloudy<const NREG: usize>(
    upper: &[f64; NREG],
    lower: &[f64; NREG],
    cf_upper: f64,
    cf_lower: f64,
) -> [[f64; NREG]; NREG] {
    let mut overlap = [[0.; NREG]; NREG];

    let mut upper_start = 0.;
    for i in 1..NREG {
        let upper_end = upper_start + upper[i] / cf_upper;
        let mut lower_start = 0.;
        for j in 1..NREG {
            let lower_end = lower_start + lower[j] / cf_lower;
            overlap[i][j] =
                (f64::min(upper_end, lower_end) - f64::max(upper_start, lower_start)).max(0.);
            lower_start = lower_end;
        }
        upper_start = upper_end;
    }

    overlap
}

/// Total cloud cover of the column.
///
/// The clear-sky line of sight from the top of the atmosphere is followed down
/// through every layer using the clear-to-clear terms of the downward overlap
/// matrices.
pub fn calc_cloud_cover<const NREG: usize>(
    fractions: &[[f64; NREG]],
    overlap: &OverlapMatrices<NREG>,
) -> f64 {
    let Some(top) = fractions.first() else {
        return 0.;
    };

    let clear_cover = overlap.v[1..fractions.len()]
        .iter()
        .fold(top[0], |clear, v| clear * v[0][0]);

    (1. - clear_cover).clamp(0., 1.)
}
