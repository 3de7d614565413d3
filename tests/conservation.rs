//! Conservation tests for the Tripleclouds solver.
//!
//! These check properties that hold whatever the details of the scheme:
//! - the region decomposition conserves area and mean cloud optical depth
//! - overlap matrices move all of the flux leaving each region somewhere
//! - an isothermal opaque atmosphere over a black surface is in equilibrium

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{Array1, Array2};
use tcrad::flux::{
    calc_overlap_matrices, calc_region_properties, AngleSet, CloudPdfShape, CloudScattering,
    ColumnInputs, FluxConfig, FluxProfile, FluxSolver, MAX_GAUSS_LEGENDRE_POINTS,
};

const CLOUD_FRACTION: [f64; 7] = [0., 1e-8, 0.05, 0.3, 0.5, 0.95, 1.];
const FRACTIONAL_STD: [f64; 7] = [0., 0.4, 1., 1.5, 2.5, 3.725, 6.];

mod region_decomposition {
    use super::*;

    fn check<const NREG: usize>(pdf_shape: CloudPdfShape) {
        for fsd in FRACTIONAL_STD {
            let fractional_std = [fsd; CLOUD_FRACTION.len()];
            let props =
                calc_region_properties::<NREG>(&CLOUD_FRACTION, &fractional_std, pdf_shape, 1e-6)
                    .unwrap();

            for (level, &cf) in CLOUD_FRACTION.iter().enumerate() {
                let fractions = props.fractions[level];
                let scaling = props.od_scaling[level];
                assert_abs_diff_eq!(fractions.iter().sum::<f64>(), 1., epsilon = 1e-12);
                assert!(fractions.iter().all(|&f| f >= 0.));

                let cloud_od: f64 = (1..NREG).map(|r| fractions[r] * scaling[r]).sum();
                let expected = if cf < 1e-6 { 0. } else { cf };
                assert_abs_diff_eq!(cloud_od, expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_lognormal_three_regions() {
        check::<3>(CloudPdfShape::Lognormal);
    }

    #[test]
    fn test_gamma_three_regions() {
        check::<3>(CloudPdfShape::Gamma);
    }

    #[test]
    fn test_two_regions() {
        check::<2>(CloudPdfShape::Lognormal);
        check::<2>(CloudPdfShape::Gamma);
    }

    /// A half-cloudy layer with unit variability.
    #[test]
    fn test_half_cloudy_lognormal() {
        let props =
            calc_region_properties::<3>(&[0.5], &[1.], CloudPdfShape::Lognormal, 1e-6).unwrap();
        let thin = f64::exp(-f64::sqrt(f64::ln(2.))) / f64::sqrt(2.);

        assert_eq!(props.fractions[0], [0.5, 0.25, 0.25]);
        assert_relative_eq!(props.od_scaling[0][1], thin, max_relative = 1e-12);
        assert_relative_eq!(props.od_scaling[0][2], 2. - thin, max_relative = 1e-12);
    }
}

mod overlap {
    use super::*;

    #[test]
    fn test_matrices_conserve_flux() {
        let props = calc_region_properties::<3>(
            &CLOUD_FRACTION,
            &FRACTIONAL_STD,
            CloudPdfShape::Gamma,
            1e-6,
        )
        .unwrap();

        for overlap_param in [0., 0.3, 0.8, 1.] {
            let alpha = [overlap_param; CLOUD_FRACTION.len() - 1];
            let overlap = calc_overlap_matrices(&props.fractions, &alpha, 0.5);
            assert_eq!(overlap.u.len(), CLOUD_FRACTION.len() + 1);

            for half_level in 1..CLOUD_FRACTION.len() {
                let above = props.fractions[half_level - 1];
                let below = props.fractions[half_level];

                for src in 0..3 {
                    if below[src] > 0. {
                        let total: f64 = (0..3).map(|dest| overlap.u[half_level][dest][src]).sum();
                        assert_abs_diff_eq!(total, 1., epsilon = 1e-10);
                    }
                    if above[src] > 0. {
                        let total: f64 = (0..3).map(|dest| overlap.v[half_level][dest][src]).sum();
                        assert_abs_diff_eq!(total, 1., epsilon = 1e-10);
                    }
                }
            }
        }
    }
}

mod energy {
    use super::*;

    const PLANCK: f64 = 350.;

    /// Storage for an isothermal column with optically thick layers.
    struct Isothermal {
        emission: Array1<f64>,
        albedo: Array1<f64>,
        planck: Array2<f64>,
        cloud_fraction: Vec<f64>,
        fractional_std: Vec<f64>,
        od_clear: Array2<f64>,
        od_cloud: Array2<f64>,
        overlap_param: Vec<f64>,
        ssa: Array2<f64>,
        asymmetry: Array2<f64>,
    }

    impl Isothermal {
        fn new() -> Self {
            let cloud_fraction = vec![0.2, 0.9, 0.4, 0., 1., 0.6];
            let (num_levels, num_spec) = (cloud_fraction.len(), 2);
            Self {
                emission: Array1::from_elem(num_spec, PLANCK),
                albedo: Array1::zeros(num_spec),
                planck: Array2::from_elem((num_levels + 1, num_spec), PLANCK),
                fractional_std: vec![1.5; num_levels],
                od_clear: Array2::from_elem((num_levels, num_spec), 15.),
                od_cloud: Array2::from_elem((num_levels, num_spec), 20.),
                overlap_param: vec![0.6; num_levels - 1],
                ssa: Array2::from_elem((num_levels, num_spec), 0.7),
                asymmetry: Array2::from_elem((num_levels, num_spec), 0.85),
                cloud_fraction,
            }
        }

        fn inputs(&self) -> ColumnInputs<'_> {
            ColumnInputs::new(
                self.emission.view(),
                self.albedo.view(),
                self.planck.view(),
                &self.cloud_fraction,
                &self.fractional_std,
                self.od_clear.view(),
                self.od_cloud.view(),
                &self.overlap_param,
            )
            .unwrap()
        }
    }

    fn check_equilibrium<const NREG: usize>(angles_per_hemisphere: usize, scattering: bool) {
        let column = Isothermal::new();
        let config = FluxConfig {
            angles_per_hemisphere,
            ..Default::default()
        };
        let solver = FluxSolver::<NREG>::new(config).unwrap();

        let num_levels = column.cloud_fraction.len();
        let mut profile = FluxProfile::new(num_levels, 2);
        if scattering {
            let cloud = CloudScattering::new(column.ssa.view(), column.asymmetry.view());
            solver.calc_flux(&column.inputs(), &cloud, &mut profile).unwrap();
        } else {
            solver
                .calc_no_scattering_flux(&column.inputs(), &mut profile)
                .unwrap();
        }

        // Deep inside the atmosphere the radiation field is isotropic
        for half_level in 2..=num_levels {
            for spec in 0..2 {
                assert_relative_eq!(
                    profile.flux_up[[half_level, spec]],
                    PLANCK,
                    max_relative = 1e-8
                );
                assert_relative_eq!(
                    profile.flux_dn[[half_level, spec]],
                    PLANCK,
                    max_relative = 1e-8
                );
            }
        }
        assert_eq!(profile.flux_dn[[0, 0]], 0.);
    }

    #[test]
    fn test_non_scattering_equilibrium() {
        for angles in [0, 1, 3, MAX_GAUSS_LEGENDRE_POINTS] {
            check_equilibrium::<3>(angles, false);
            check_equilibrium::<2>(angles, false);
        }
    }

    #[test]
    fn test_scattering_equilibrium() {
        for angles in [0, 2, 6] {
            check_equilibrium::<3>(angles, true);
            check_equilibrium::<2>(angles, true);
        }
    }

    #[test]
    fn test_angle_weights_are_normalised() {
        for n in 1..=MAX_GAUSS_LEGENDRE_POINTS {
            let angles = AngleSet::new(n).unwrap();
            let total: f64 = angles.iter().map(|(mu, weight)| mu * weight).sum();
            assert_abs_diff_eq!(total, 1., epsilon = 1e-12);
        }
    }
}
