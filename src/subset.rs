//! Enumeration of correlation subsets.
//!
//! Candidate centers sit on a regular lattice that starts at the minimum of
//! the region's bounding box (clipped to the volume). A candidate is kept only
//! when its physical position lies in the region and its full window lies in
//! the volume; truncated windows are never produced.

use nalgebra::Vector3;

use crate::engine::DvcError;
use crate::region::Region;
use crate::volume::VolumeMeta;

const BOUNDS_EPSILON: f64 = 1e-9;

/// Subset window size and lattice step, in voxels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsetSpec {
    pub size: [usize; 3],
    pub step: [usize; 3],
}

impl Default for SubsetSpec {
    fn default() -> Self {
        Self {
            size: [15; 3],
            step: [5; 3],
        }
    }
}

impl SubsetSpec {
    pub fn new(size: [usize; 3], step: [usize; 3]) -> Result<Self, DvcError> {
        let spec = Self { size, step };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), DvcError> {
        if self.size.contains(&0) {
            return Err(DvcError::InvalidSubsetSize(self.size));
        }
        if self.step.contains(&0) {
            return Err(DvcError::InvalidStepSize(self.step));
        }
        Ok(())
    }

    /// Voxels of the window before the center on each axis
    pub fn lower_half(&self) -> [usize; 3] {
        self.size.map(|s| s / 2)
    }

    /// Voxels of the window after the center on each axis
    pub fn upper_half(&self) -> [usize; 3] {
        self.size.map(|s| s.saturating_sub(1) - s / 2)
    }
}

/// Regular grid of candidate subset centers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lattice {
    pub origin: [usize; 3],
    pub dims: [usize; 3],
    pub step: [usize; 3],
}

impl Lattice {
    pub fn empty(step: [usize; 3]) -> Self {
        Self {
            origin: [0; 3],
            dims: [0; 3],
            step,
        }
    }

    /// Lattice covering the region's bounding box clipped to a volume of `shape`
    pub fn for_region(
        region: &dyn Region,
        meta: &VolumeMeta,
        shape: [usize; 3],
        step: [usize; 3],
    ) -> Self {
        if shape.contains(&0) {
            return Self::empty(step);
        }

        let (min, max) = match region.bounds() {
            Some(bounds) => {
                let corners = bounds.corners().map(|c| meta.physical_to_index(c));
                let mut min = Vector3::repeat(f64::INFINITY);
                let mut max = Vector3::repeat(f64::NEG_INFINITY);
                for corner in &corners {
                    min = min.inf(corner);
                    max = max.sup(corner);
                }
                (min, max)
            }
            None => (
                Vector3::zeros(),
                Vector3::new(
                    (shape[0] - 1) as f64,
                    (shape[1] - 1) as f64,
                    (shape[2] - 1) as f64,
                ),
            ),
        };

        let mut origin = [0usize; 3];
        let mut dims = [0usize; 3];
        for axis in 0..3 {
            let last = (shape[axis] - 1) as f64;
            let lo = (min[axis] - BOUNDS_EPSILON).ceil().max(0.0);
            let hi = (max[axis] + BOUNDS_EPSILON).floor().min(last);
            if !(lo <= hi) {
                return Self::empty(step);
            }
            let (lo, hi) = (lo as usize, hi as usize);
            origin[axis] = lo;
            dims[axis] = (hi - lo) / step[axis] + 1;
        }

        Self { origin, dims, step }
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Volume index of the lattice point `(a, b, c)`
    pub fn center(&self, lattice: [usize; 3]) -> [usize; 3] {
        [
            self.origin[0] + lattice[0] * self.step[0],
            self.origin[1] + lattice[1] * self.step[1],
            self.origin[2] + lattice[2] * self.step[2],
        ]
    }

    /// Lattice coordinate of a row-major flat index
    pub fn unravel(&self, flat: usize) -> [usize; 3] {
        let [_, ny, nz] = self.dims;
        [flat / (ny * nz), (flat / nz) % ny, flat % nz]
    }
}

/// A subset accepted by the sampler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsetCenter {
    pub lattice: [usize; 3],
    pub center: [usize; 3],
}

/// Lazy, single-pass sequence of valid subset centers
pub struct SubsetSampler<'a> {
    lattice: Lattice,
    spec: SubsetSpec,
    region: &'a dyn Region,
    meta: &'a VolumeMeta,
    shape: [usize; 3],
    next: usize,
}

impl<'a> SubsetSampler<'a> {
    pub fn new(
        region: &'a dyn Region,
        meta: &'a VolumeMeta,
        shape: [usize; 3],
        spec: SubsetSpec,
    ) -> Self {
        Self {
            lattice: Lattice::for_region(region, meta, shape, spec.step),
            spec,
            region,
            meta,
            shape,
            next: 0,
        }
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    fn window_fits(&self, center: [usize; 3]) -> bool {
        let lower = self.spec.lower_half();
        let upper = self.spec.upper_half();
        (0..3).all(|axis| center[axis] >= lower[axis] && center[axis] + upper[axis] < self.shape[axis])
    }

    fn in_region(&self, center: [usize; 3]) -> bool {
        let index = Vector3::new(center[0] as f64, center[1] as f64, center[2] as f64);
        self.region.contains(&self.meta.index_to_physical(index))
    }
}

impl Iterator for SubsetSampler<'_> {
    type Item = SubsetCenter;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.lattice.len() {
            let lattice = self.lattice.unravel(self.next);
            self.next += 1;
            let center = self.lattice.center(lattice);
            if self.window_fits(center) && self.in_region(center) {
                return Some(SubsetCenter { lattice, center });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.lattice.len() - self.next))
    }
}
