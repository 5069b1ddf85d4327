//! Synthetic volume helpers shared by the integration tests

use dvc_volume::{DisplacementField, VolumeMeta, VoxelGrid};
use ndarray::Array3;

pub const SHAPE: usize = 40;

/// Deterministic xorshift sequence in [0, 1)
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Gaussian speckle pattern, every blob translated by `shift` voxels
pub fn speckle(shift: [f64; 3]) -> Array3<f32> {
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    let blobs: Vec<[f64; 4]> = (0..700)
        .map(|_| {
            [
                rng.next() * SHAPE as f64,
                rng.next() * SHAPE as f64,
                rng.next() * SHAPE as f64,
                0.5 + rng.next(),
            ]
        })
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

pub fn grid(data: Array3<f32>) -> VoxelGrid {
    VoxelGrid::new(data, VolumeMeta::default())
}

/// Largest deviation of the valid displacements from `expected`
pub fn max_error(field: &DisplacementField, expected: [f64; 3]) -> f64 {
    let mut worst = 0.0f64;
    for ((index, valid), u) in field.mask.indexed_iter().zip(field.u.iter()) {
        if !*valid {
            continue;
        }
        let actual = [*u as f64, field.v[index] as f64, field.w[index] as f64];
        for axis in 0..3 {
            worst = worst.max((actual[axis] - expected[axis]).abs());
        }
    }
    worst
}
