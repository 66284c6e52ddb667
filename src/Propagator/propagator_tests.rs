#[cfg(test)]
mod tests {
    use crate::Propagator::flow_field::FlowFieldCache;
    use crate::Propagator::matrix_cache::{CachePolicy, StepMatrixCache};
    use crate::Propagator::neighbor_operators::Boundary;
    use crate::Propagator::physical_profiles::{
        BOLTZMANN_CONSTANT, ProfileOptions, get_D, get_profiles,
    };
    use crate::Propagator::profile_assembler::Readout;
    use crate::Propagator::profile_propagator::{StepPattern, compute_profiles};
    use crate::Propagator::propagator_error::PropagatorError;
    use crate::Propagator::step_matrix::{ChannelGrid, StepOptions};
    use crate::Propagator::unitless_profiles::{
        InitialProfile, UnitlessOptions, get_unitless_profiles,
    };
    use crate::settings::ChannelConfig;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};
    use std::f64::consts::PI;
    use std::sync::Arc;

    fn isolated_cache() -> StepMatrixCache {
        StepMatrixCache::with_flow_cache(CachePolicy::Unbounded, Arc::new(FlowFieldCache::new()))
    }

    /// Band of fluid in the middle third of the channel, unit sum
    fn inlet_profile(Ygrid: usize) -> DVector<f64> {
        let band = (Ygrid / 3)..(2 * Ygrid / 3);
        let width = band.len() as f64;
        DVector::from_fn(Ygrid, |y, _| if band.contains(&y) { 1.0 / width } else { 0.0 })
    }

    #[test]
    fn test_binary_propagation_matches_repeated_steps() {
        let cache = isolated_cache();
        let grid = ChannelGrid::new(5, 14, 0.2, true).unwrap();
        let options = StepOptions {
            mu_prime_E: 3.0,
            ..StepOptions::default()
        };
        let entry = cache.step_matrix_entry(&grid, &options).unwrap();
        let mut entry = entry.lock().unwrap();

        let steps = [5, 5, 13, 0, 7, 5, 2];
        let pattern = StepPattern::from_steps(&steps);
        entry.ensure_levels(pattern.n_binary());
        let initial = DVector::from_fn(grid.n_cells(), |i, _| ((i % 14) as f64 - 6.5).abs());
        let out = compute_profiles(&pattern, &initial, entry.powers()).unwrap();

        let F = &entry.powers()[0];
        for (profile, k) in out.iter().zip(steps) {
            let mut expected = initial.clone();
            for _ in 0..k {
                expected = F * expected;
            }
            assert!((profile - expected).amax() < 1e-10 * initial.amax());
        }
    }

    #[test]
    fn test_flux_weighted_mass_is_conserved() {
        let cache = isolated_cache();
        let (Zgrid, Ygrid, beta) = (4, 20, 0.25);
        let options = UnitlessOptions {
            Zgrid: Some(Zgrid),
            Zmirror: false,
            readout: Readout::FullGrid,
            ..UnitlessOptions::default()
        };
        let init = InitialProfile::OneD(inlet_profile(Ygrid));
        let phi = [0.0, 1e-3, 4e-3, 2e-2];
        let out = get_unitless_profiles(&init, &phi, beta, &options, &cache).unwrap();

        let V = cache.flow_cache().get(Zgrid, Ygrid, beta, false, false);
        let flux = |field: &[f64]| -> f64 {
            field
                .iter()
                .enumerate()
                .map(|(i, c)| V[(i / Ygrid, i % Ygrid)] * c)
                .sum()
        };
        let initial: Vec<f64> = out.initial.transpose().as_slice().to_vec();
        let reference = flux(&initial);
        for p in 0..phi.len() {
            let field = out.profiles.select(0, p).unwrap();
            assert_relative_eq!(flux(field.as_slice()), reference, max_relative = 1e-9);
        }
        // the band has spread out by the last position
        let last = out.profiles.select(0, 3).unwrap();
        assert!(last.get(&[0, 0]).unwrap() > 0.0);
    }

    #[test]
    fn test_mirrored_half_channel_matches_full_channel() {
        for Zgrid in [6, 7] {
            let cache = isolated_cache();
            let init = InitialProfile::OneD(inlet_profile(12));
            let phi = [2e-3, 5e-3];
            let full = UnitlessOptions {
                Zgrid: Some(Zgrid),
                Zmirror: false,
                readout: Readout::FullGrid,
                step_factor: Some(0.5),
                ..UnitlessOptions::default()
            };
            let half = UnitlessOptions {
                Zmirror: true,
                ..full
            };
            let a = get_unitless_profiles(&init, &phi, 0.3, &full, &cache).unwrap();
            let b = get_unitless_profiles(&init, &phi, 0.3, &half, &cache).unwrap();
            assert_eq!(a.dphi, b.dphi);
            assert_eq!(a.profiles.shape(), b.profiles.shape());
            assert_eq!(a.initial, b.initial);
            for (x, y) in a.profiles.as_slice().iter().zip(b.profiles.as_slice()) {
                assert!((x - y).abs() < 1e-8, "Zgrid={}: {} vs {}", Zgrid, x, y);
            }
        }
    }

    fn wide_channel() -> ChannelConfig {
        ChannelConfig {
            Q: 308.0,
            Wy: 1400e-6,
            Wz: 50e-6,
            viscosity: 1e-3,
            temperature: 295.0,
        }
    }

    fn radius_for(D: f64, channel: &ChannelConfig) -> f64 {
        BOLTZMANN_CONSTANT * channel.temperature / (6.0 * PI * channel.viscosity * D)
    }

    /// max |computed − reference| / max(computed), edges excluded
    fn interior_deviation(computed: &[f64], reference: &[f64]) -> f64 {
        let n = computed.len();
        let scale = computed[..n - 3].iter().copied().fold(0.0, f64::max);
        computed[3..n - 3]
            .iter()
            .zip(&reference[3..n - 3])
            .map(|(c, r)| (c - r).abs() / scale)
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_wide_channel_profile_is_converged() {
        let cache = isolated_cache();
        let channel = wide_channel();
        let radius = radius_for(1.2e-10, &channel);
        let D = get_D(&[radius], 1e-3, 295.0, 0.0, false, BOLTZMANN_CONSTANT).unwrap();
        assert_relative_eq!(D[0], 1.2e-10, max_relative = 1e-12);

        let init = InitialProfile::OneD(inlet_profile(50));
        let options = ProfileOptions {
            Zgrid: Some(7),
            ..ProfileOptions::default()
        };
        let coarse =
            get_profiles(&init, &channel, &[radius], &[5.6e-3], &options, &cache).unwrap();
        let fine = get_profiles(
            &init,
            &channel,
            &[radius],
            &[5.6e-3],
            &ProfileOptions {
                step_factor: Some((-2.0f64).exp()),
                ..options
            },
            &cache,
        )
        .unwrap();
        assert_eq!(coarse.profiles.shape(), &[1, 1, 50]);
        assert!(fine.dphi < coarse.dphi);
        let deviation = interior_deviation(coarse.profiles.as_slice(), fine.profiles.as_slice());
        assert!(deviation < 0.1, "deviation {}", deviation);

        // diffusion has smoothed the band edges
        let p = coarse.profiles.as_slice();
        assert!(p[16] > 0.0 && p[16] < p[25]);
    }

    #[test]
    fn test_electrophoresis_shifts_and_stays_converged() {
        let cache = isolated_cache();
        let channel = wide_channel();
        let radius = radius_for(1.2e-10, &channel);
        let init = InitialProfile::OneD(inlet_profile(50));
        let still = ProfileOptions {
            Zgrid: Some(7),
            ..ProfileOptions::default()
        };
        let driven = ProfileOptions {
            // mu'E = muEoD·Wy = 280, a few cells of drift at this position
            muEoD: 2e5,
            ..still
        };
        let centroid = |profile: &[f64]| -> f64 {
            let total: f64 = profile.iter().sum();
            profile
                .iter()
                .enumerate()
                .map(|(i, c)| i as f64 * c)
                .sum::<f64>()
                / total
        };

        let at_rest = get_profiles(&init, &channel, &[radius], &[5.6e-3], &still, &cache).unwrap();
        let moved = get_profiles(&init, &channel, &[radius], &[5.6e-3], &driven, &cache).unwrap();
        let fine = get_profiles(
            &init,
            &channel,
            &[radius],
            &[5.6e-3],
            &ProfileOptions {
                step_factor: Some((-2.0f64).exp()),
                ..driven
            },
            &cache,
        )
        .unwrap();

        assert!(
            centroid(moved.profiles.as_slice()) > centroid(at_rest.profiles.as_slice()) + 0.5
        );
        let deviation = interior_deviation(moved.profiles.as_slice(), fine.profiles.as_slice());
        assert!(deviation < 0.1, "deviation {}", deviation);
    }

    #[test]
    fn test_repeated_requests_are_served_from_cache() {
        let cache = isolated_cache();
        let channel = ChannelConfig {
            Q: 100.0,
            Wy: 300e-6,
            Wz: 50e-6,
            viscosity: 1e-3,
            temperature: 295.0,
        };
        let init = InitialProfile::OneD(inlet_profile(15));
        let options = ProfileOptions {
            Zgrid: Some(5),
            ..ProfileOptions::default()
        };
        let radii = [1e-9, 2e-9, 4e-9];
        let positions = [1e-3, 3e-3, 9e-3];
        let first = get_profiles(&init, &channel, &radii, &positions, &options, &cache).unwrap();
        let second = get_profiles(&init, &channel, &radii, &positions, &options, &cache).unwrap();
        assert_eq!(cache.builds(), 1);
        assert_eq!(cache.flow_cache().computations(), 1);
        for (a, b) in first
            .profiles
            .as_slice()
            .iter()
            .zip(second.profiles.as_slice())
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_invalid_inputs_fail_before_any_matrix_work() {
        let cache = isolated_cache();
        let channel = wide_channel();
        let init = InitialProfile::OneD(inlet_profile(20));
        let options = ProfileOptions {
            Zgrid: Some(3),
            ..ProfileOptions::default()
        };
        assert!(matches!(
            get_profiles(&init, &channel, &[1e-9, -1e-9], &[1e-3], &options, &cache),
            Err(PropagatorError::NonPositiveRadius(_))
        ));
        let mobility = ProfileOptions {
            stepMuE: true,
            ..options
        };
        assert!(matches!(
            get_profiles(&init, &channel, &[1e-8], &[1e-3], &mobility, &cache),
            Err(PropagatorError::ZeroFieldMobility)
        ));
        assert!(matches!(
            get_profiles(&init, &channel, &[1e-9], &[-1e-3], &options, &cache),
            Err(PropagatorError::InvalidPropagationTime(_))
        ));
        let dirichlet = UnitlessOptions {
            Zgrid: Some(3),
            y_boundary: Boundary::Dirichlet,
            ..UnitlessOptions::default()
        };
        let bad_2d = InitialProfile::TwoD(DMatrix::from_element(3, 20, 0.05));
        assert!(matches!(
            get_unitless_profiles(&bad_2d, &[1e-3], 0.1, &dirichlet, &cache),
            Err(PropagatorError::ZDimensionMismatch { expected: 2, found: 3 })
        ));
        assert_eq!(cache.builds(), 0);
    }
}
