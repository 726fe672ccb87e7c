//! Property-based tests using proptest
//!
//! Grid tiling and reconstruction must be exact for every shape, patch and
//! overlap combination; random samplers must stay inside the volume.

use medpatch::{GridAggregator, GridSampler, Subject, UniformSampler, Volume};
use ndarray::Array3;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// (size, patch, overlap) for one axis with patch <= size and overlap < patch
fn axis_strategy() -> impl Strategy<Value = (usize, usize, usize)> {
    (1usize..18)
        .prop_flat_map(|size| (Just(size), 1..=size))
        .prop_flat_map(|(size, patch)| (Just(size), Just(patch), 0..patch))
}

fn grid_strategy() -> impl Strategy<Value = ([usize; 3], [usize; 3], [usize; 3])> {
    (axis_strategy(), axis_strategy(), axis_strategy()).prop_map(|(x, y, z)| {
        ([x.0, y.0, z.0], [x.1, y.1, z.1], [x.2, y.2, z.2])
    })
}

fn ramp(shape: [usize; 3]) -> Volume {
    let data = Array3::from_shape_fn(shape, |(x, y, z)| (x * 400 + y * 20 + z) as f32);
    Volume::intensity(data).unwrap()
}

proptest! {
    // Property: grid reconstruction reproduces the input exactly
    #[test]
    fn test_grid_round_trip_exact((shape, patch, overlap) in grid_strategy()) {
        let subject = Subject::new("p", [("image", ramp(shape))]).unwrap();
        let grid = GridSampler::new(patch, overlap).unwrap();
        let mut aggregator = GridAggregator::for_subject(&grid, &subject).unwrap();

        for p in grid.iter(&subject).unwrap() {
            // a second write to any voxel would be rejected here
            prop_assert!(aggregator.add(p.location(), p.get("image").unwrap()).is_ok());
        }
        prop_assert!(aggregator.is_complete());
        let output = aggregator.finalize().unwrap();
        prop_assert_eq!(output, ramp(shape));
    }

    // Property: location count formula matches enumeration, and every location fits
    #[test]
    fn test_grid_locations_fit((shape, patch, overlap) in grid_strategy()) {
        let grid = GridSampler::new(patch, overlap).unwrap();
        let locations: Vec<_> = grid.locations_for(shape).unwrap().collect();
        prop_assert_eq!(locations.len(), grid.len_for(shape).unwrap());
        for location in &locations {
            prop_assert_eq!(location.shape(), patch);
            prop_assert!(location.validate_within(shape).is_ok());
        }
        let last = locations.last().unwrap();
        prop_assert_eq!(last.end(), shape);
    }

    // Property: uniform locations satisfy 0 <= start and start + patch <= size
    #[test]
    fn test_uniform_within_bounds(
        (shape, patch, _) in grid_strategy(),
        seed in any::<u64>()
    ) {
        let sampler = UniformSampler::new(patch).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for location in sampler.locations_for(shape, 16, &mut rng).unwrap() {
            for axis in 0..3 {
                prop_assert!(location.end()[axis] <= shape[axis]);
                prop_assert_eq!(location.end()[axis] - location.start()[axis], patch[axis]);
            }
        }
    }
}
