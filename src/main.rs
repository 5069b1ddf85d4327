use std::sync::Arc;

use dvc_volume::{
    BoxRegion, Component, Correlator, DvcParameters, LoggingProgress, Orientation, VolumeMeta,
    VoxelGrid,
};
use nalgebra::Vector3;
use ndarray::Array3;
use tracing_subscriber::EnvFilter;

const SHAPE: usize = 64;
const SHIFT: [f64; 3] = [2.0, -1.0, 1.5];

/// Gaussian speckle pattern translated by `shift`
fn speckle(shift: [f64; 3]) -> Array3<f32> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let blobs: Vec<[f64; 4]> = (0..2500)
        .map(|_| [next() * SHAPE as f64, next() * SHAPE as f64, next() * SHAPE as f64, 0.5 + next()])
        .collect();

    let mut volume = Array3::<f32>::zeros((SHAPE, SHAPE, SHAPE));
    for blob in &blobs {
        let center = [blob[0] + shift[0], blob[1] + shift[1], blob[2] + shift[2]];
        let lo = center.map(|c| (c - 6.0).floor().max(0.0) as usize);
        let hi = center.map(|c| ((c + 6.0).ceil().max(0.0) as usize).min(SHAPE - 1));
        for i in lo[0]..=hi[0] {
            for j in lo[1]..=hi[1] {
                for k in lo[2]..=hi[2] {
                    let d2 = (i as f64 - center[0]).powi(2)
                        + (j as f64 - center[1]).powi(2)
                        + (k as f64 - center[2]).powi(2);
                    volume[[i, j, k]] += (blob[3] * (-d2 / 4.5).exp()) as f32;
                }
            }
        }
    }
    volume
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let meta = VolumeMeta::default();
    let reference = Arc::new(VoxelGrid::new(speckle([0.0; 3]), meta.clone()));
    let deformed = Arc::new(VoxelGrid::new(speckle(SHIFT), meta));
    let region = Arc::new(BoxRegion::new(
        Vector3::repeat(SHAPE as f64 / 2.0),
        Vector3::repeat(SHAPE as f64 / 2.0),
    ));

    let correlator = Correlator::new(DvcParameters::default())
        .with_progress(Arc::new(LoggingProgress::default()));
    let result = correlator
        .run_async(reference, deformed, region)
        .await
        .expect("synthetic volumes share shape and spacing");

    let field = &result.displacement;
    let valid = field.valid_count().max(1) as f32;
    let mean = [Component::U, Component::V, Component::W].map(|component| {
        field
            .component(component)
            .iter()
            .zip(field.mask.iter())
            .filter(|(_, valid)| **valid)
            .map(|(v, _)| *v)
            .sum::<f32>()
            / valid
    });
    tracing::info!("Mean displacement {:?}, expected {:?}", mean, SHIFT);

    let index = field.dim().2 / 2;
    if let Some(image) = field.slice_to_image(Component::U, index, Orientation::Axial) {
        if let Err(err) = image.save("displacement_u.png") {
            tracing::error!("Could not save preview: {}", err);
        }
    }
}
