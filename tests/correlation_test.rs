mod common;

use std::sync::{Arc, Mutex};

use common::{SHAPE, grid, max_error, speckle};
use dvc_volume::{
    Algorithm, BoxRegion, CancellationToken, Correlator, DvcError, DvcParameters, NewtonSeed,
    ProgressCallback, Region, SphereRegion, SubsetSpec, VolumeMeta, VoxelGrid, compute,
};
use nalgebra::Vector3;
use ndarray::Array3;

fn params(algorithm: Algorithm) -> DvcParameters {
    DvcParameters {
        subset: SubsetSpec::new([11, 11, 11], [5, 5, 5]).unwrap(),
        algorithm,
        ..DvcParameters::default()
    }
}

fn central_box() -> BoxRegion {
    BoxRegion::new(Vector3::repeat(20.0), Vector3::repeat(12.0))
}

#[test]
fn identical_volumes_have_zero_displacement_fft() {
    let volume = grid(speckle([0.0; 3]));
    let result = compute(&volume, &volume, &central_box(), params(Algorithm::Fft)).unwrap();
    let field = &result.displacement;

    assert_eq!(field.dim(), (3, 3, 3));
    assert_eq!(field.valid_count(), 27);
    assert!(max_error(field, [0.0; 3]) < 0.05);
    assert!(field.quality.iter().all(|&q| q > 0.99));
}

#[test]
fn identical_volumes_have_zero_displacement_newton() {
    let volume = grid(speckle([0.0; 3]));
    let result = compute(&volume, &volume, &central_box(), params(Algorithm::Newton)).unwrap();
    assert_eq!(result.displacement.valid_count(), 27);
    assert!(max_error(&result.displacement, [0.0; 3]) < 0.05);
}

#[test]
fn integer_shift_is_recovered_by_fft() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(speckle([2.0, -1.0, 1.0]));
    let result = compute(&reference, &deformed, &central_box(), params(Algorithm::Fft)).unwrap();
    assert_eq!(result.displacement.valid_count(), 27);
    assert!(max_error(&result.displacement, [2.0, -1.0, 1.0]) < 0.1);
}

#[test]
fn integer_shift_is_recovered_by_newton() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(speckle([-1.0, 2.0, -2.0]));
    let result = compute(&reference, &deformed, &central_box(), params(Algorithm::Newton)).unwrap();
    assert_eq!(result.displacement.valid_count(), 27);
    assert!(max_error(&result.displacement, [-1.0, 2.0, -2.0]) < 0.1);
}

#[test]
fn unseeded_newton_never_reports_a_false_minimum() {
    let reference = grid(speckle([0.0; 3]));
    let params = DvcParameters {
        newton_seed: NewtonSeed::Zero,
        ..params(Algorithm::Newton)
    };
    for shift in [4.0, 6.0] {
        let deformed = grid(speckle([shift, 0.0, 0.0]));
        let result = compute(&reference, &deformed, &central_box(), params.clone()).unwrap();
        let field = &result.displacement;
        assert!(max_error(field, [shift, 0.0, 0.0]) <= 0.5, "shift {shift}");
        for (quality, valid) in field.quality.iter().zip(field.mask.iter()) {
            if *valid {
                assert!(*quality >= 0.5);
            }
        }
    }
}

#[test]
fn intensity_offset_does_not_bias_the_estimate() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(speckle([1.0, 1.0, -1.0]).mapv(|v| v + 50.0));
    for algorithm in [Algorithm::Fft, Algorithm::Newton] {
        let result = compute(&reference, &deformed, &central_box(), params(algorithm)).unwrap();
        assert_eq!(result.displacement.valid_count(), 27);
        assert!(max_error(&result.displacement, [1.0, 1.0, -1.0]) < 0.1);
    }
}

#[test]
fn physical_spacing_scales_displacement() {
    let meta = VolumeMeta::axis_aligned(Vector3::zeros(), Vector3::new(0.5, 0.5, 2.0));
    let reference = VoxelGrid::new(speckle([0.0; 3]), meta.clone());
    let deformed = VoxelGrid::new(speckle([2.0, 0.0, 1.0]), meta);
    let region = BoxRegion::new(Vector3::new(10.0, 10.0, 40.0), Vector3::new(6.0, 6.0, 24.0));
    let result = compute(&reference, &deformed, &region, params(Algorithm::Fft)).unwrap();
    assert!(result.displacement.valid_count() > 0);
    assert!(max_error(&result.displacement, [1.0, 0.0, 2.0]) < 0.1);
}

#[test]
fn translation_has_near_zero_strain() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(speckle([1.0, -2.0, 1.0]));
    let result = compute(&reference, &deformed, &central_box(), params(Algorithm::Newton)).unwrap();
    let strain = &result.strain;
    assert_eq!(strain.valid_count(), 27);
    for component in [&strain.exx, &strain.eyy, &strain.ezz, &strain.exy, &strain.eyz, &strain.ezx] {
        assert!(component.iter().all(|e| e.abs() < 0.01));
    }
}

#[test]
fn region_outside_volume_gives_empty_field() {
    let volume = grid(speckle([0.0; 3]));
    let region = BoxRegion::new(Vector3::repeat(-100.0), Vector3::repeat(10.0));
    let result = compute(&volume, &volume, &region, params(Algorithm::Fft)).unwrap();
    assert_eq!(result.displacement.valid_count(), 0);
    assert_eq!(result.strain.valid_count(), 0);
}

#[test]
fn region_too_small_for_a_subset_gives_empty_field() {
    let volume = grid(speckle([0.0; 3]));
    let region = BoxRegion::new(Vector3::zeros(), Vector3::repeat(2.0));
    let params = DvcParameters {
        subset: SubsetSpec::new([32, 32, 32], [8, 8, 8]).unwrap(),
        ..DvcParameters::default()
    };
    let result = compute(&volume, &volume, &region, params).unwrap();
    assert_eq!(result.displacement.valid_count(), 0);
}

#[test]
fn mismatched_volumes_fail_immediately() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(Array3::zeros((SHAPE, SHAPE, SHAPE - 1)));
    let err = compute(&reference, &deformed, &central_box(), params(Algorithm::Fft)).unwrap_err();
    assert!(matches!(err, DvcError::ShapeMismatch { .. }));
}

#[test]
fn uniform_volume_yields_no_valid_newton_samples() {
    let flat = grid(Array3::from_elem((SHAPE, SHAPE, SHAPE), 100.0));
    let result = compute(&flat, &flat, &central_box(), params(Algorithm::Newton)).unwrap();
    assert_eq!(result.displacement.dim(), (3, 3, 3));
    assert_eq!(result.displacement.valid_count(), 0);
    assert!(result.displacement.u.iter().all(|&u| u == 0.0));
}

#[test]
fn sphere_region_limits_valid_voxels() {
    let volume = grid(speckle([0.0; 3]));
    let sphere = SphereRegion::new(Vector3::repeat(20.0), 6.0);
    let result = compute(&volume, &volume, &sphere, params(Algorithm::Fft)).unwrap();
    let field = &result.displacement;
    assert!(field.valid_count() > 0);
    for (index, valid) in field.mask.indexed_iter() {
        if *valid {
            let [i, j, k] = [index.0, index.1, index.2];
            assert!(sphere.contains(&field.geometry.physical([i, j, k])));
        }
    }
}

#[test]
fn dedicated_pool_matches_global_pool() {
    let reference = grid(speckle([0.0; 3]));
    let deformed = grid(speckle([1.0, 0.0, -1.0]));
    let global = compute(&reference, &deformed, &central_box(), params(Algorithm::Fft)).unwrap();
    let pooled = compute(
        &reference,
        &deformed,
        &central_box(),
        DvcParameters {
            threads: Some(2),
            ..params(Algorithm::Fft)
        },
    )
    .unwrap();
    assert_eq!(global.displacement.mask, pooled.displacement.mask);
    assert_eq!(global.displacement.u, pooled.displacement.u);
}

struct CancelAfterFirst {
    token: CancellationToken,
    calls: Mutex<usize>,
}

impl ProgressCallback for CancelAfterFirst {
    fn on_progress(&self, _completed: usize, _total: usize) {
        *self.calls.lock().unwrap() += 1;
        self.token.cancel();
    }
}

#[test]
fn cancellation_aborts_between_subsets() {
    let volume = grid(speckle([0.0; 3]));
    let token = CancellationToken::new();
    let progress = Arc::new(CancelAfterFirst {
        token: token.clone(),
        calls: Mutex::new(0),
    });
    let err = Correlator::new(DvcParameters {
        threads: Some(1),
        ..params(Algorithm::Fft)
    })
    .with_cancellation(token)
    .with_progress(progress.clone())
    .run(&volume, &volume, &central_box())
    .unwrap_err();

    assert!(matches!(err, DvcError::Cancelled));
    assert!(*progress.calls.lock().unwrap() < 27);
}

#[tokio::test(flavor = "current_thread")]
async fn async_run_matches_blocking_run() {
    let reference = Arc::new(grid(speckle([0.0; 3])));
    let deformed = Arc::new(grid(speckle([0.0, 1.0, 0.0])));
    let region: Arc<dyn Region> = Arc::new(central_box());

    let blocking = compute(&reference, &deformed, region.as_ref(), params(Algorithm::Fft)).unwrap();
    let result = Correlator::new(params(Algorithm::Fft))
        .run_async(reference, deformed, region)
        .await
        .unwrap();

    assert_eq!(result.displacement.mask, blocking.displacement.mask);
    assert!(max_error(&result.displacement, [0.0, 1.0, 0.0]) < 0.1);
}
