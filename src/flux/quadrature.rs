//! Angular quadrature for the radiance correction.

use log::warn;
use smallvec::SmallVec;

/// Maximum number of Gauss-Legendre points per hemisphere.
pub const MAX_GAUSS_LEGENDRE_POINTS: usize = 8;

/// Diffusivity factor of the two-stream scheme, the inverse of the cosine of
/// the effective zenith angle of diffuse radiation.
pub const LW_DIFFUSIVITY: f64 = 1.66;

/// Zenith angle cosines and weights for integrating radiance into flux.
///
/// The weights are normalised so that `sum(weight * mu) == 1`, so a field of
/// radiances expressed in flux units (`pi * I`) integrates to the matching
/// hemispheric flux.
#[derive(Debug, Clone, PartialEq)]
pub struct AngleSet {
    /// Cosine of the zenith angle of each stream.
    pub mu: SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]>,
    /// Flux-normalised weight of each stream.
    pub weight: SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]>,
}

impl AngleSet {
    /// Angles for `num_angles` streams per hemisphere.
    ///
    /// A single angle uses the diffusivity approximation, so it reproduces the
    /// non-scattering limit of the two-stream scheme. Two or more angles use
    /// Gauss-Legendre quadrature, with at most [`MAX_GAUSS_LEGENDRE_POINTS`].
    /// Returns `None` for zero angles.
    pub fn new(num_angles: usize) -> Option<Self> {
        let (mu, mut weight) = match num_angles {
            0 => return None,
            1 => return Some(Self::diffusivity()),
            n => {
                if n > MAX_GAUSS_LEGENDRE_POINTS {
                    warn!(
                        "{n} angles per hemisphere requested, \
                         using the maximum of {MAX_GAUSS_LEGENDRE_POINTS}"
                    );
                }
                gauss_legendre(n.min(MAX_GAUSS_LEGENDRE_POINTS))
            }
        };

        let norm: f64 = mu.iter().zip(&weight).map(|(mu, w)| mu * w).sum();
        for w in &mut weight {
            *w /= norm;
        }

        Some(Self { mu, weight })
    }

    /// A single stream at the diffusivity angle.
    pub fn diffusivity() -> Self {
        Self {
            mu: SmallVec::from_slice(&[1. / LW_DIFFUSIVITY]),
            weight: SmallVec::from_slice(&[LW_DIFFUSIVITY]),
        }
    }

    /// Number of streams per hemisphere.
    pub fn len(&self) -> usize {
        self.mu.len()
    }

    /// Whether there are no streams.
    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    /// Iterate over `(mu, weight)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.mu.iter().copied().zip(self.weight.iter().copied())
    }
}

/// Gauss-Legendre quadrature on [0, 1].
///
/// Returns the `(nodes, weights)` for `num_points` points, found by Newton
/// iteration on the roots of the Legendre polynomial. The weights sum to 1.
pub fn gauss_legendre(
    num_points: usize,
) -> (
    SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]>,
    SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]>,
) {
    use std::f64::consts::PI;
    const TOLERANCE: f64 = 1e-15;
    const MAX_ITERATIONS: usize = 100;

    let n = num_points;
    let mut nodes: SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]> = SmallVec::from_elem(0., n);
    let mut weights: SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]> = SmallVec::from_elem(0., n);

    // Roots are symmetric about zero on [-1, 1], so only half are found
    for i in 0..(n + 1) / 2 {
        let mut z = f64::cos(PI * (i as f64 + 0.75) / (n as f64 + 0.5));
        let mut derivative = 0.;

        for _ in 0..MAX_ITERATIONS {
            let (p_n, p_prev) = legendre(n, z);
            derivative = n as f64 * (z * p_n - p_prev) / (z * z - 1.);
            let step = p_n / derivative;
            z -= step;
            if step.abs() < TOLERANCE {
                break;
            }
        }

        let w = 2. / ((1. - z * z) * derivative * derivative);

        // Map from [-1, 1] to [0, 1]
        nodes[i] = 0.5 * (1. - z);
        nodes[n - 1 - i] = 0.5 * (1. + z);
        weights[i] = 0.5 * w;
        weights[n - 1 - i] = 0.5 * w;
    }

    (nodes, weights)
}

/// Legendre polynomials `(P_n(z), P_{n-1}(z))` by the three-term recurrence.
fn legendre(n: usize, z: f64) -> (f64, f64) {
    let mut p = 1.;
    let mut p_prev = 0.;
    for j in 1..=n {
        let j = j as f64;
        (p, p_prev) = (((2. * j - 1.) * z * p - (j - 1.) * p_prev) / j, p);
    }
    (p, p_prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn zero_angles_means_two_stream() {
        assert!(AngleSet::new(0).is_none());
    }

    #[test]
    fn single_angle_is_diffusivity() {
        let angles = AngleSet::new(1).unwrap();
        assert_eq!(angles.len(), 1);
        assert_abs_diff_eq!(angles.mu[0], 1. / LW_DIFFUSIVITY);
        assert_abs_diff_eq!(angles.weight[0], LW_DIFFUSIVITY, epsilon = 1e-12);
    }

    #[test]
    fn weights_are_flux_normalised() {
        for n in 1..=12 {
            let angles = AngleSet::new(n).unwrap();
            assert_eq!(angles.len(), n.min(MAX_GAUSS_LEGENDRE_POINTS));
            let total: f64 = angles.iter().map(|(mu, w)| mu * w).sum();
            assert_abs_diff_eq!(total, 1., epsilon = 1e-12);
        }
    }

    #[test]
    fn gauss_legendre_two_points() {
        let (nodes, weights) = gauss_legendre(2);
        let offset = 0.5 / f64::sqrt(3.);
        assert_abs_diff_eq!(nodes[0], 0.5 - offset, epsilon = 1e-14);
        assert_abs_diff_eq!(nodes[1], 0.5 + offset, epsilon = 1e-14);
        assert_abs_diff_eq!(weights[0], 0.5, epsilon = 1e-14);
        assert_abs_diff_eq!(weights[1], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn gauss_legendre_integrates_polynomials() {
        for n in 1..=MAX_GAUSS_LEGENDRE_POINTS {
            let (nodes, weights) = gauss_legendre(n);
            assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1., epsilon = 1e-13);
            assert!(nodes.windows(2).all(|w| w[0] < w[1]));

            // Exact up to degree 2n - 1
            let degree = 2 * n - 1;
            let integral: f64 = nodes
                .iter()
                .zip(&weights)
                .map(|(x, w)| w * x.powi(degree as i32))
                .sum();
            assert_abs_diff_eq!(integral, 1. / (degree as f64 + 1.), epsilon = 1e-12);
        }
    }
}
