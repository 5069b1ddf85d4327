//! Per-subset displacement estimation.
//!
//! Both strategies see one subset at a time through [`SubsetContext`] and
//! report a [`DisplacementSample`]. Failures are recorded in the sample's
//! [`SampleStatus`] and never abort the run.

pub mod fft;
pub mod newton;

use ndarray::{Array3, ArrayView3, s};

use crate::enums::Algorithm;
use crate::params::DvcParameters;
use crate::subset::{SubsetCenter, SubsetSpec};

pub use fft::FftStrategy;
pub use newton::NewtonRaphsonStrategy;

/// Energy below which a zero-mean window is treated as featureless
pub(crate) const MIN_ENERGY: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleStatus {
    Converged,
    /// Peak correlation coefficient below the threshold, or no texture
    LowCorrelation,
    /// Peak on the border of the search range
    SearchEdge,
    /// Displaced window leaves the deformed volume
    OutOfBounds,
    /// Normal equations are singular or ill-conditioned
    Singular,
    /// Iteration cap reached before the step fell below tolerance
    NotConverged,
}

impl SampleStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SampleStatus::Converged)
    }
}

/// Displacement estimate for one subset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplacementSample {
    pub lattice: [usize; 3],
    pub center: [usize; 3],
    /// Displacement in voxels along (x, y, z)
    pub displacement: [f64; 3],
    pub quality: f32,
    pub status: SampleStatus,
}

impl DisplacementSample {
    pub(crate) fn failed(subset: &SubsetCenter, status: SampleStatus) -> Self {
        Self {
            lattice: subset.lattice,
            center: subset.center,
            displacement: [0.0; 3],
            quality: 0.0,
            status,
        }
    }
}

/// Both volumes plus the subset being correlated
pub struct SubsetContext<'a> {
    pub(crate) reference: ArrayView3<'a, f32>,
    pub(crate) deformed: ArrayView3<'a, f32>,
    pub(crate) subset: SubsetCenter,
    pub(crate) spec: SubsetSpec,
}

impl<'a> SubsetContext<'a> {
    /// First voxel of the subset window
    pub(crate) fn window_origin(&self) -> [isize; 3] {
        let lower = self.spec.lower_half();
        [0, 1, 2].map(|axis| self.subset.center[axis] as isize - lower[axis] as isize)
    }

    /// Reference window around the center, if it lies in the volume
    pub(crate) fn reference_window(&self) -> Option<ArrayView3<'a, f32>> {
        self.window_at(self.reference, [0; 3])
    }

    /// Deformed window shifted by an integer offset, if it lies in the volume
    pub(crate) fn deformed_window(&self, offset: [isize; 3]) -> Option<ArrayView3<'a, f32>> {
        self.window_at(self.deformed, offset)
    }

    fn window_at(&self, volume: ArrayView3<'a, f32>, offset: [isize; 3]) -> Option<ArrayView3<'a, f32>> {
        let origin = self.window_origin();
        let (nx, ny, nz) = volume.dim();
        let shape = [nx, ny, nz];
        let mut start = [0usize; 3];
        for axis in 0..3 {
            let first = origin[axis] + offset[axis];
            if first < 0 || first as usize + self.spec.size[axis] > shape[axis] {
                return None;
            }
            start[axis] = first as usize;
        }
        let [x, y, z] = start;
        let [sx, sy, sz] = self.spec.size;
        Some(volume.slice_move(s![x..x + sx, y..y + sy, z..z + sz]))
    }
}

/// The capability shared by all correlation strategies
pub trait CorrelationStrategy: Send + Sync {
    fn correlate(&self, context: &SubsetContext<'_>) -> DisplacementSample;
}

/// Build the strategy selected by `params.algorithm`
pub fn strategy_for(params: &DvcParameters) -> Box<dyn CorrelationStrategy> {
    match params.algorithm {
        Algorithm::Fft => Box::new(FftStrategy::from_params(params)),
        Algorithm::Newton => Box::new(NewtonRaphsonStrategy::from_params(params)),
    }
}

/// Subtract the mean; returns the centred copy and its energy
pub(crate) fn zero_mean(window: &ArrayView3<f32>) -> (Array3<f32>, f64) {
    let n = window.len().max(1) as f64;
    let mean = window.iter().map(|&v| v as f64).sum::<f64>() / n;
    let centred = window.mapv(|v| (v as f64 - mean) as f32);
    let energy = centred.iter().map(|&v| (v as f64) * (v as f64)).sum();
    (centred, energy)
}

/// Zero-normalised cross-correlation of a centred reference against `other`
pub(crate) fn zncc(reference: &Array3<f32>, reference_energy: f64, other: &ArrayView3<f32>) -> Option<f32> {
    let (other, other_energy) = zero_mean(other);
    let cross: f64 = reference
        .iter()
        .zip(other.iter())
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum();
    coefficient(cross, reference_energy, other_energy)
}

/// Correlation coefficient from a cross term and the two window energies;
/// undefined when either window is featureless
pub(crate) fn coefficient(cross: f64, energy_a: f64, energy_b: f64) -> Option<f32> {
    if energy_a <= MIN_ENERGY || energy_b <= MIN_ENERGY {
        return None;
    }
    Some((cross / (energy_a * energy_b).sqrt()).clamp(-1.0, 1.0) as f32)
}
