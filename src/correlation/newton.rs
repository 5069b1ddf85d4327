//! Gauss-Newton refinement of a subset displacement.
//!
//! Minimises the zero-mean sum of squared differences between the reference
//! subset and the deformed volume resampled at `x + d`. Means are removed from
//! both intensities and gradients, so a uniform intensity offset between the
//! scans does not bias the estimate. The final displacement is only accepted
//! when the correlation coefficient there reaches the threshold.

use nalgebra::{Matrix3, Vector3};
use ndarray::ArrayView3;

use super::fft::FftStrategy;
use super::{
    CorrelationStrategy, DisplacementSample, MIN_ENERGY, SampleStatus, SubsetContext, coefficient,
};
use crate::enums::NewtonSeed;
use crate::interpolator::Interpolator;
use crate::params::DvcParameters;

/// Step halvings tried before accepting that no descent is possible
const MAX_HALVINGS: usize = 8;

/// Smallest accepted ratio between the extreme eigenvalues of the normal matrix
const MIN_CONDITION_RATIO: f64 = 1e-6;

pub struct NewtonRaphsonStrategy {
    max_iterations: usize,
    tolerance: f64,
    threshold: f32,
    seed: Option<FftStrategy>,
}

/// Zero-mean intensities, residuals and gradients at one displacement
struct Linearisation {
    deformed: Vec<f64>,
    residuals: Vec<f64>,
    gradients: Vec<Vector3<f64>>,
    ssd: f64,
}

impl NewtonRaphsonStrategy {
    pub fn from_params(params: &DvcParameters) -> Self {
        let seed = match params.newton_seed {
            NewtonSeed::Fft => Some(FftStrategy::from_params(params)),
            NewtonSeed::Zero => None,
        };
        Self {
            max_iterations: params.newton_max_iterations,
            tolerance: params.newton_tolerance,
            threshold: params.correlation_threshold,
            seed,
        }
    }

    /// Continuous positions of the subset voxels
    fn positions(context: &SubsetContext<'_>) -> Vec<Vector3<f64>> {
        let origin = context.window_origin();
        let [sx, sy, sz] = context.spec.size;
        let mut positions = Vec::with_capacity(sx * sy * sz);
        for i in 0..sx {
            for j in 0..sy {
                for k in 0..sz {
                    positions.push(Vector3::new(
                        (origin[0] + i as isize) as f64,
                        (origin[1] + j as isize) as f64,
                        (origin[2] + k as isize) as f64,
                    ));
                }
            }
        }
        positions
    }

    /// Whether the displaced window stays inside the deformed volume
    fn in_bounds(context: &SubsetContext<'_>, displacement: &Vector3<f64>) -> bool {
        let origin = context.window_origin();
        let (nx, ny, nz) = context.deformed.dim();
        let dims = [nx, ny, nz];
        (0..3).all(|axis| {
            let first = origin[axis] as f64 + displacement[axis];
            let last = first + (context.spec.size[axis] - 1) as f64;
            first >= 0.0 && last <= (dims[axis] - 1) as f64
        })
    }

    fn resample(deformed: &ArrayView3<f32>, positions: &[Vector3<f64>], displacement: &Vector3<f64>) -> Vec<f64> {
        positions
            .iter()
            .map(|p| {
                let q = p + displacement;
                Interpolator::trilinear_interpolate(deformed, [q.x, q.y, q.z]) as f64
            })
            .collect()
    }

    fn centred(values: Vec<f64>) -> Vec<f64> {
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        values.into_iter().map(|v| v - mean).collect()
    }

    /// Centred reference intensities, if the window lies in the volume
    fn reference_values(context: &SubsetContext<'_>) -> Option<Vec<f64>> {
        let window = context.reference_window()?;
        Some(Self::centred(window.iter().map(|&v| v as f64).collect()))
    }

    fn ssd(reference: &[f64], deformed: &[f64]) -> f64 {
        reference
            .iter()
            .zip(deformed)
            .map(|(r, d)| (r - d) * (r - d))
            .sum()
    }

    /// Correlation coefficient of two centred intensity lists
    fn correlation(reference: &[f64], reference_energy: f64, deformed: &[f64]) -> Option<f32> {
        let deformed_energy: f64 = deformed.iter().map(|d| d * d).sum();
        let cross: f64 = reference.iter().zip(deformed).map(|(r, d)| r * d).sum();
        coefficient(cross, reference_energy, deformed_energy)
    }

    fn linearise(
        context: &SubsetContext<'_>,
        reference: &[f64],
        positions: &[Vector3<f64>],
        displacement: &Vector3<f64>,
    ) -> Linearisation {
        let deformed = Self::centred(Self::resample(&context.deformed, positions, displacement));
        let raw: Vec<Vector3<f64>> = positions
            .iter()
            .map(|p| {
                let q = p + displacement;
                let g = Interpolator::trilinear_gradient(&context.deformed, [q.x, q.y, q.z]);
                Vector3::new(g[0] as f64, g[1] as f64, g[2] as f64)
            })
            .collect();
        let mean = raw.iter().sum::<Vector3<f64>>() / raw.len().max(1) as f64;
        let gradients = raw.into_iter().map(|g| g - mean).collect();
        let residuals: Vec<f64> = reference.iter().zip(&deformed).map(|(r, d)| r - d).collect();
        let ssd = residuals.iter().map(|r| r * r).sum();
        Linearisation {
            deformed,
            residuals,
            gradients,
            ssd,
        }
    }

    /// Normal matrix is usable when it is well conditioned
    fn is_well_conditioned(hessian: &Matrix3<f64>) -> bool {
        let eigenvalues = hessian.symmetric_eigenvalues();
        let largest = eigenvalues.max();
        let smallest = eigenvalues.min();
        largest > MIN_ENERGY && smallest > MIN_CONDITION_RATIO * largest
    }

    /// Full Gauss-Newton step, or `None` when the normal equations are singular
    fn gauss_newton_step(linear: &Linearisation) -> Option<Vector3<f64>> {
        let mut hessian = Matrix3::zeros();
        let mut rhs = Vector3::zeros();
        for (g, r) in linear.gradients.iter().zip(&linear.residuals) {
            hessian += g * g.transpose();
            rhs += g * *r;
        }
        if !Self::is_well_conditioned(&hessian) {
            return None;
        }
        hessian.cholesky().map(|c| c.solve(&rhs))
    }

    /// Largest fraction of `step` that does not increase the SSD, with the
    /// centred intensities there
    fn line_search(
        context: &SubsetContext<'_>,
        reference: &[f64],
        positions: &[Vector3<f64>],
        displacement: &Vector3<f64>,
        step: &Vector3<f64>,
        ssd: f64,
    ) -> Option<(Vector3<f64>, Vec<f64>)> {
        let mut scale = 1.0;
        for _ in 0..MAX_HALVINGS {
            let trial = displacement + step * scale;
            if Self::in_bounds(context, &trial) {
                let resampled = Self::centred(Self::resample(&context.deformed, positions, &trial));
                if Self::ssd(reference, &resampled) <= ssd {
                    return Some((trial, resampled));
                }
            }
            scale *= 0.5;
        }
        None
    }

    /// Accept a stationary point only if it correlates well enough
    fn verdict(
        &self,
        reference: &[f64],
        reference_energy: f64,
        deformed: &[f64],
        displacement: Vector3<f64>,
    ) -> (Vector3<f64>, f32, SampleStatus) {
        match Self::correlation(reference, reference_energy, deformed) {
            Some(quality) if quality >= self.threshold => {
                (displacement, quality, SampleStatus::Converged)
            }
            quality => (
                displacement,
                quality.unwrap_or(0.0),
                SampleStatus::LowCorrelation,
            ),
        }
    }

    fn refine(&self, context: &SubsetContext<'_>, start: Vector3<f64>) -> (Vector3<f64>, f32, SampleStatus) {
        let Some(reference) = Self::reference_values(context) else {
            return (start, 0.0, SampleStatus::OutOfBounds);
        };
        let reference_energy: f64 = reference.iter().map(|v| v * v).sum();
        if reference_energy <= MIN_ENERGY {
            return (start, 0.0, SampleStatus::Singular);
        }

        let positions = Self::positions(context);
        let mut displacement = start;

        for _ in 0..self.max_iterations {
            if !Self::in_bounds(context, &displacement) {
                return (displacement, 0.0, SampleStatus::OutOfBounds);
            }
            let linear = Self::linearise(context, &reference, &positions, &displacement);
            let Some(step) = Self::gauss_newton_step(&linear) else {
                let quality = Self::correlation(&reference, reference_energy, &linear.deformed);
                return (displacement, quality.unwrap_or(0.0), SampleStatus::Singular);
            };

            match Self::line_search(context, &reference, &positions, &displacement, &step, linear.ssd) {
                Some((trial, deformed)) => {
                    displacement = trial;
                    // tolerance applies to the full step, not the halved one
                    if step.norm() < self.tolerance {
                        return self.verdict(&reference, reference_energy, &deformed, displacement);
                    }
                }
                // no descent along the Gauss-Newton direction: local minimum
                None => {
                    return self.verdict(&reference, reference_energy, &linear.deformed, displacement);
                }
            }
        }

        (displacement, 0.0, SampleStatus::NotConverged)
    }
}

impl CorrelationStrategy for NewtonRaphsonStrategy {
    fn correlate(&self, context: &SubsetContext<'_>) -> DisplacementSample {
        let start = match &self.seed {
            Some(fft) => {
                let estimate = fft.estimate(context);
                if !estimate.status.is_valid() {
                    return DisplacementSample {
                        quality: estimate.quality,
                        ..DisplacementSample::failed(&context.subset, estimate.status)
                    };
                }
                Vector3::from(estimate.displacement)
            }
            None => Vector3::zeros(),
        };

        let (displacement, quality, status) = self.refine(context, start);
        if !status.is_valid() {
            return DisplacementSample {
                quality,
                ..DisplacementSample::failed(&context.subset, status)
            };
        }
        DisplacementSample {
            lattice: context.subset.lattice,
            center: context.subset.center,
            displacement: displacement.into(),
            quality,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subset::{SubsetCenter, SubsetSpec};
    use ndarray::Array3;

    fn smooth_volume(shape: usize, shift: [f64; 3]) -> Array3<f32> {
        Array3::from_shape_fn((shape, shape, shape), |(i, j, k)| {
            let (x, y, z) = (i as f64 - shift[0], j as f64 - shift[1], k as f64 - shift[2]);
            ((0.45 * x).sin() * (0.3 * y + 0.4).cos()
                + (0.25 * z + 0.2 * x).sin()
                + 0.5 * (0.35 * y - 0.3 * z).cos()) as f32
        })
    }

    fn context<'a>(reference: &'a Array3<f32>, deformed: &'a Array3<f32>) -> SubsetContext<'a> {
        SubsetContext {
            reference: reference.view(),
            deformed: deformed.view(),
            subset: SubsetCenter {
                lattice: [1, 2, 3],
                center: [12, 12, 12],
            },
            spec: SubsetSpec::new([9, 9, 9], [1, 1, 1]).unwrap(),
        }
    }

    fn strategy(seed: NewtonSeed) -> NewtonRaphsonStrategy {
        NewtonRaphsonStrategy::from_params(&DvcParameters {
            subset: SubsetSpec::new([9, 9, 9], [1, 1, 1]).unwrap(),
            newton_seed: seed,
            ..DvcParameters::default()
        })
    }

    #[test]
    fn refines_subpixel_shift_from_zero() {
        let reference = smooth_volume(25, [0.0; 3]);
        let deformed = smooth_volume(25, [0.4, -0.3, 0.25]);
        let sample = strategy(NewtonSeed::Zero).correlate(&context(&reference, &deformed));
        assert_eq!(sample.status, SampleStatus::Converged);
        assert_eq!(sample.lattice, [1, 2, 3]);
        for (d, expected) in sample.displacement.iter().zip([0.4, -0.3, 0.25]) {
            assert!((d - expected).abs() < 0.1, "{d} vs {expected}");
        }
        assert!(sample.quality > 0.9);
    }

    #[test]
    fn identical_volumes_stay_at_zero() {
        let reference = smooth_volume(25, [0.0; 3]);
        let sample = strategy(NewtonSeed::Fft).correlate(&context(&reference, &reference));
        assert_eq!(sample.status, SampleStatus::Converged);
        assert!(sample.displacement.iter().all(|d| d.abs() < 0.05));
        assert!(sample.quality > 0.99);
    }

    #[test]
    fn uniform_subset_is_singular() {
        let flat = Array3::from_elem((25, 25, 25), 7.0f32);
        let sample = strategy(NewtonSeed::Zero).correlate(&context(&flat, &flat));
        assert_eq!(sample.status, SampleStatus::Singular);
        assert_eq!(sample.displacement, [0.0; 3]);
    }

    #[test]
    fn flat_deformed_volume_is_singular() {
        let reference = smooth_volume(25, [0.0; 3]);
        let flat = Array3::from_elem((25, 25, 25), 1.0f32);
        let sample = strategy(NewtonSeed::Zero).correlate(&context(&reference, &flat));
        assert_eq!(sample.status, SampleStatus::Singular);
        assert_eq!(sample.displacement, [0.0; 3]);
    }

    #[test]
    fn iteration_cap_marks_failure() {
        let reference = smooth_volume(25, [0.0; 3]);
        let deformed = smooth_volume(25, [0.8, 0.6, -0.7]);
        let strategy = NewtonRaphsonStrategy {
            max_iterations: 1,
            tolerance: 1e-12,
            threshold: 0.5,
            seed: None,
        };
        let sample = strategy.correlate(&context(&reference, &deformed));
        assert_eq!(sample.status, SampleStatus::NotConverged);
        assert!(!sample.status.is_valid());
    }

    #[test]
    fn converged_point_is_stationary() {
        let reference = smooth_volume(25, [0.0; 3]);
        let deformed = smooth_volume(25, [0.7, -0.45, 0.3]);
        let context = context(&reference, &deformed);
        let strategy = strategy(NewtonSeed::Zero);
        let (displacement, _, status) = strategy.refine(&context, Vector3::zeros());
        assert_eq!(status, SampleStatus::Converged);

        let values = NewtonRaphsonStrategy::reference_values(&context).unwrap();
        let positions = NewtonRaphsonStrategy::positions(&context);
        let linear = NewtonRaphsonStrategy::linearise(&context, &values, &positions, &displacement);
        let step = NewtonRaphsonStrategy::gauss_newton_step(&linear).unwrap();
        assert!(step.norm() < 0.01, "residual step {}", step.norm());
    }

    #[test]
    fn start_outside_the_volume_is_out_of_bounds() {
        let reference = smooth_volume(25, [0.0; 3]);
        let strategy = strategy(NewtonSeed::Zero);
        let context = context(&reference, &reference);
        let (_, quality, status) = strategy.refine(&context, Vector3::new(-20.0, 0.0, 0.0));
        assert_eq!(status, SampleStatus::OutOfBounds);
        assert_eq!(quality, 0.0);

        let (_, _, status) = strategy.refine(&context, Vector3::new(0.0, 0.0, 9.0));
        assert_eq!(status, SampleStatus::OutOfBounds);
    }

    #[test]
    fn weak_correlation_is_rejected_at_the_minimum() {
        let strategy = strategy(NewtonSeed::Zero);
        let reference = vec![1.0, -2.0, 0.5, 0.5, -1.5, 1.5];
        let energy: f64 = reference.iter().map(|v| v * v).sum();
        let at = Vector3::new(0.25, 0.0, -0.5);

        let scaled: Vec<f64> = reference.iter().map(|v| 2.0 * v).collect();
        let (displacement, quality, status) = strategy.verdict(&reference, energy, &scaled, at);
        assert_eq!(status, SampleStatus::Converged);
        assert_eq!(displacement, at);
        assert!((quality - 1.0).abs() < 1e-6);

        let inverted: Vec<f64> = reference.iter().map(|v| -v).collect();
        let (_, quality, status) = strategy.verdict(&reference, energy, &inverted, at);
        assert_eq!(status, SampleStatus::LowCorrelation);
        assert!(quality < 0.0);

        let (_, quality, status) = strategy.verdict(&reference, energy, &[0.0; 6], at);
        assert_eq!(status, SampleStatus::LowCorrelation);
        assert_eq!(quality, 0.0);
    }
}
