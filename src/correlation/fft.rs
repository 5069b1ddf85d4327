//! Cross-correlation of a subset against a larger search window.
//!
//! The reference subset is zero-padded into the search window frame, so
//! `ifft(F(search) · conj(F(reference)))` peaks at the integer shift. The
//! peak is then confirmed and refined on the zero-normalised correlation
//! coefficient, which is symmetric around the true shift and bounded in
//! [-1, 1].

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array1, Array3, ArrayView3, Axis, Zip, s};
use num_complex::Complex32;
use rustfft::{Fft, FftDirection, FftPlanner};

use super::{
    CorrelationStrategy, DisplacementSample, MIN_ENERGY, SampleStatus, SubsetContext, zero_mean,
    zncc,
};
use crate::enums::{PeakFit, Window};
use crate::params::DvcParameters;

/// Cached 3D transform plans for one window shape
struct Fft3 {
    forward: [Arc<dyn Fft<f32>>; 3],
    inverse: [Arc<dyn Fft<f32>>; 3],
}

impl Fft3 {
    fn new(shape: [usize; 3]) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: shape.map(|n| planner.plan_fft(n, FftDirection::Forward)),
            inverse: shape.map(|n| planner.plan_fft(n, FftDirection::Inverse)),
        }
    }

    /// In-place separable transform, one axis at a time
    fn process(&self, data: &mut Array3<Complex32>, direction: FftDirection) {
        let plans = match direction {
            FftDirection::Forward => &self.forward,
            FftDirection::Inverse => &self.inverse,
        };
        for (axis, plan) in plans.iter().enumerate() {
            let mut buffer = Vec::with_capacity(data.len_of(Axis(axis)));
            let mut scratch = vec![Complex32::new(0.0, 0.0); plan.get_inplace_scratch_len()];
            for mut lane in data.lanes_mut(Axis(axis)) {
                buffer.clear();
                buffer.extend(lane.iter().copied());
                plan.process_with_scratch(&mut buffer, &mut scratch);
                lane.iter_mut()
                    .zip(&buffer)
                    .for_each(|(dst, src)| *dst = *src);
            }
        }
    }
}

/// Integer peak plus refinement for one subset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FftEstimate {
    pub integer: [isize; 3],
    pub displacement: [f64; 3],
    pub quality: f32,
    pub status: SampleStatus,
}

impl FftEstimate {
    fn failed(status: SampleStatus, quality: f32) -> Self {
        Self {
            integer: [0; 3],
            displacement: [0.0; 3],
            quality,
            status,
        }
    }
}

pub struct FftStrategy {
    max_shift: [usize; 3],
    threshold: f32,
    window: Window,
    peak_fit: PeakFit,
    search_shape: [usize; 3],
    plans: Fft3,
}

impl FftStrategy {
    pub fn from_params(params: &DvcParameters) -> Self {
        let max_shift = params.search_shift();
        let search_shape = [0, 1, 2].map(|axis| params.subset.size[axis] + 2 * max_shift[axis]);
        Self {
            max_shift,
            threshold: params.correlation_threshold,
            window: params.window,
            peak_fit: params.peak_fit,
            search_shape,
            plans: Fft3::new(search_shape),
        }
    }

    /// Estimate the displacement of one subset
    pub fn estimate(&self, context: &SubsetContext<'_>) -> FftEstimate {
        let Some(window) = context.reference_window() else {
            return FftEstimate::failed(SampleStatus::OutOfBounds, 0.0);
        };
        let (reference, energy) = zero_mean(&window);
        if energy <= MIN_ENERGY {
            return FftEstimate::failed(SampleStatus::LowCorrelation, 0.0);
        }

        let peak = self.integer_peak(context, &reference);
        let Some((peak, peak_zncc)) = self.climb(context, &reference, energy, peak) else {
            return FftEstimate::failed(SampleStatus::OutOfBounds, 0.0);
        };

        if peak_zncc < self.threshold {
            return FftEstimate::failed(SampleStatus::LowCorrelation, peak_zncc);
        }
        if (0..3).any(|axis| peak[axis].unsigned_abs() >= self.max_shift[axis]) {
            return FftEstimate::failed(SampleStatus::SearchEdge, peak_zncc);
        }

        let mut displacement = peak.map(|d| d as f64);
        for (axis, value) in displacement.iter_mut().enumerate() {
            let mut below = peak;
            let mut above = peak;
            below[axis] -= 1;
            above[axis] += 1;
            let neighbours = (
                self.score(context, &reference, energy, below),
                self.score(context, &reference, energy, above),
            );
            if let (Some(minus), Some(plus)) = neighbours {
                *value += self.subpixel_offset(minus, peak_zncc, plus);
            }
        }

        FftEstimate {
            integer: peak,
            displacement,
            quality: peak_zncc,
            status: SampleStatus::Converged,
        }
    }

    fn integer_peak(&self, context: &SubsetContext<'_>, reference: &Array3<f32>) -> [isize; 3] {
        let shape = self.search_shape;
        let shift = self.max_shift;

        let mut padded = Array3::<Complex32>::zeros((shape[0], shape[1], shape[2]));
        let tapered = self.taper(reference);
        let [sx, sy, sz] = context.spec.size;
        Zip::from(padded.slice_mut(s![
            shift[0]..shift[0] + sx,
            shift[1]..shift[1] + sy,
            shift[2]..shift[2] + sz
        ]))
        .and(&tapered)
        .for_each(|dst, &src| *dst = Complex32::new(src, 0.0));

        let mut search = self.search_window(context);
        self.plans.process(&mut padded, FftDirection::Forward);
        self.plans.process(&mut search, FftDirection::Forward);
        Zip::from(&mut search)
            .and(&padded)
            .for_each(|spectrum, r| *spectrum *= r.conj());
        self.plans.process(&mut search, FftDirection::Inverse);

        let mut best = ([0usize; 3], f32::NEG_INFINITY);
        for ((i, j, k), value) in search.indexed_iter() {
            if value.re > best.1 {
                best = ([i, j, k], value.re);
            }
        }
        [0, 1, 2].map(|axis| {
            let index = best.0[axis] as isize;
            let n = shape[axis] as isize;
            if index > n / 2 { index - n } else { index }
        })
    }

    /// Zero-mean deformed window around the subset; voxels outside the volume
    /// take the window mean
    fn search_window(&self, context: &SubsetContext<'_>) -> Array3<Complex32> {
        let origin = context.window_origin();
        let shift = self.max_shift;
        let (nx, ny, nz) = context.deformed.dim();
        let dims = [nx as isize, ny as isize, nz as isize];
        let start = [0, 1, 2].map(|axis| origin[axis] - shift[axis] as isize);
        let shape = self.search_shape;

        let sample = |i: usize, j: usize, k: usize| -> Option<f32> {
            let p = [start[0] + i as isize, start[1] + j as isize, start[2] + k as isize];
            if (0..3).all(|axis| p[axis] >= 0 && p[axis] < dims[axis]) {
                Some(context.deformed[[p[0] as usize, p[1] as usize, p[2] as usize]])
            } else {
                None
            }
        };

        let raw = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| sample(i, j, k));
        let (sum, count) = raw
            .iter()
            .flatten()
            .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };

        raw.mapv(|v| Complex32::new(v.map_or(0.0, |v| (v as f64 - mean) as f32), 0.0))
    }

    fn taper(&self, reference: &Array3<f32>) -> Array3<f32> {
        match self.window {
            Window::None => reference.clone(),
            Window::Hann => {
                let (nx, ny, nz) = reference.dim();
                let (wx, wy, wz) = (hann(nx), hann(ny), hann(nz));
                Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
                    reference[[i, j, k]] * wx[i] * wy[j] * wz[k]
                })
            }
        }
    }

    fn score(
        &self,
        context: &SubsetContext<'_>,
        reference: &Array3<f32>,
        energy: f64,
        offset: [isize; 3],
    ) -> Option<f32> {
        let window: ArrayView3<f32> = context.deformed_window(offset)?;
        zncc(reference, energy, &window)
    }

    /// Move to the best face neighbour until the ZNCC is a local maximum
    fn climb(
        &self,
        context: &SubsetContext<'_>,
        reference: &Array3<f32>,
        energy: f64,
        start: [isize; 3],
    ) -> Option<([isize; 3], f32)> {
        let mut peak = start;
        let mut best = self.score(context, reference, energy, peak)?;
        // each step strictly increases the score, the search range bounds the walk
        let max_steps: usize = self.max_shift.iter().map(|s| 2 * s).sum();
        for _ in 0..max_steps {
            let mut next = None;
            for axis in 0..3 {
                for delta in [-1isize, 1] {
                    let mut candidate = peak;
                    candidate[axis] += delta;
                    if let Some(score) = self.score(context, reference, energy, candidate) {
                        if score > best {
                            best = score;
                            next = Some(candidate);
                        }
                    }
                }
            }
            match next {
                Some(candidate) => peak = candidate,
                None => break,
            }
        }
        Some((peak, best))
    }

    fn subpixel_offset(&self, minus: f32, center: f32, plus: f32) -> f64 {
        let (minus, center, plus) = (minus as f64, center as f64, plus as f64);
        let gaussian = match self.peak_fit {
            PeakFit::Gaussian if minus > 0.0 && center > 0.0 && plus > 0.0 => {
                Some((minus.ln(), center.ln(), plus.ln()))
            }
            _ => None,
        };
        let (minus, center, plus) = gaussian.unwrap_or((minus, center, plus));
        let curvature = minus - 2.0 * center + plus;
        if curvature >= 0.0 {
            return 0.0;
        }
        ((minus - plus) / (2.0 * curvature)).clamp(-0.5, 0.5)
    }
}

impl CorrelationStrategy for FftStrategy {
    fn correlate(&self, context: &SubsetContext<'_>) -> DisplacementSample {
        let estimate = self.estimate(context);
        DisplacementSample {
            lattice: context.subset.lattice,
            center: context.subset.center,
            displacement: estimate.displacement,
            quality: estimate.quality,
            status: estimate.status,
        }
    }
}

/// Hann weights that stay non-zero on the window border
fn hann(n: usize) -> Array1<f32> {
    Array1::from_shape_fn(n, |i| {
        (0.5 - 0.5 * (2.0 * PI * (i + 1) as f64 / (n + 1) as f64).cos()) as f32
    })
}
