//! Dense displacement field on the sampling lattice.
//!
//! One field voxel per lattice point. Voxels whose subset failed (or was never
//! sampled) are masked out and hold zero; no interpolation or extrapolation
//! is applied here.

use image::{ImageBuffer, Luma};
use nalgebra::Vector3;
use ndarray::{Array3, ArrayView2, Zip, s};

use crate::correlation::DisplacementSample;
use crate::enums::{Component, Orientation};
use crate::subset::Lattice;
use crate::volume::VolumeMeta;

/// Placement of the lattice in the volume
#[derive(Clone, Debug, PartialEq)]
pub struct FieldGeometry {
    pub lattice: Lattice,
    pub meta: VolumeMeta,
}

impl FieldGeometry {
    /// Physical distance between neighbouring field voxels on each axis
    pub fn spacing(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| self.meta.spacing[axis] * self.lattice.step[axis] as f64)
    }

    /// Volume index of a field voxel
    pub fn volume_index(&self, index: [usize; 3]) -> [usize; 3] {
        self.lattice.center(index)
    }

    pub fn physical(&self, index: [usize; 3]) -> Vector3<f64> {
        let [x, y, z] = self.volume_index(index);
        self.meta
            .index_to_physical(Vector3::new(x as f64, y as f64, z as f64))
    }
}

#[derive(Clone, Debug)]
pub struct DisplacementField {
    pub u: Array3<f32>,
    pub v: Array3<f32>,
    pub w: Array3<f32>,
    pub quality: Array3<f32>,
    pub mask: Array3<bool>,
    pub geometry: FieldGeometry,
}

impl DisplacementField {
    /// Field with every voxel invalid
    pub fn empty(geometry: FieldGeometry) -> Self {
        let [nx, ny, nz] = geometry.lattice.dims;
        let shape = (nx, ny, nz);
        Self {
            u: Array3::zeros(shape),
            v: Array3::zeros(shape),
            w: Array3::zeros(shape),
            quality: Array3::zeros(shape),
            mask: Array3::from_elem(shape, false),
            geometry,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.u.dim()
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }

    pub fn component(&self, component: Component) -> &Array3<f32> {
        match component {
            Component::U => &self.u,
            Component::V => &self.v,
            Component::W => &self.w,
        }
    }

    /// Euclidean norm of the displacement; zero where invalid
    pub fn magnitude(&self) -> Array3<f32> {
        let mut magnitude = Array3::zeros(self.dim());
        Zip::from(&mut magnitude)
            .and(&self.u)
            .and(&self.v)
            .and(&self.w)
            .and(&self.mask)
            .par_for_each(|m, &u, &v, &w, &valid| {
                if valid {
                    *m = (u * u + v * v + w * w).sqrt();
                }
            });
        magnitude
    }

    /// Plane of one component; `None` if `index` is past the field
    pub fn slice(
        &self,
        component: Component,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, &orientation) {
            return None;
        }
        let data = self.component(component);
        let slice = match orientation {
            Orientation::Sagittal => data.slice(s![index, .., ..]),
            Orientation::Coronal => data.slice(s![.., index, ..]),
            Orientation::Axial => data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    fn mask_slice(&self, index: usize, orientation: &Orientation) -> ArrayView2<'_, bool> {
        match orientation {
            Orientation::Sagittal => self.mask.slice(s![index, .., ..]),
            Orientation::Coronal => self.mask.slice(s![.., index, ..]),
            Orientation::Axial => self.mask.slice(s![.., .., index]),
        }
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.dim();
        let max_index = match orientation {
            Orientation::Sagittal => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Axial => dim.2,
        };
        index < max_index
    }

    /// 8-bit preview of one plane, stretched over its valid values; invalid
    /// voxels are black
    pub fn slice_to_image(
        &self,
        component: Component,
        index: usize,
        orientation: Orientation,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.slice(component, index, orientation)?;
        let mask = self.mask_slice(index, &orientation);
        let (min, max) = slice
            .iter()
            .zip(mask.iter())
            .filter(|(_, valid)| **valid)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (&v, _)| {
                (lo.min(v), hi.max(v))
            });
        let range = if max > min { max - min } else { 1.0 };

        // rows of the image run along the second slice axis
        let (width, height) = slice.dim();
        let mut pixels = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                let value = if mask[[col, row]] {
                    Self::normalize_to_u8(slice[[col, row]], min, range)
                } else {
                    0
                };
                pixels.push(value);
            }
        }
        ImageBuffer::from_raw(width as u32, height as u32, pixels)
    }

    #[inline]
    fn normalize_to_u8(value: f32, min: f32, range: f32) -> u8 {
        (((value - min) / range) * 254.0 + 1.0).clamp(1.0, 255.0) as u8
    }
}

/// Scatter per-subset samples into a field on `geometry`'s lattice.
///
/// Displacements are converted from voxels to physical units along the grid
/// axes. Samples flagged as failed leave their voxel invalid.
pub fn assemble(samples: &[DisplacementSample], geometry: FieldGeometry) -> DisplacementField {
    let spacing = geometry.meta.spacing;
    let mut field = DisplacementField::empty(geometry);
    let (nx, ny, nz) = field.dim();

    for sample in samples {
        let [a, b, c] = sample.lattice;
        if a >= nx || b >= ny || c >= nz {
            tracing::warn!("Dropping sample outside the lattice at {:?}", sample.lattice);
            continue;
        }
        field.quality[[a, b, c]] = sample.quality;
        if !sample.status.is_valid() {
            continue;
        }
        field.u[[a, b, c]] = (sample.displacement[0] * spacing[0]) as f32;
        field.v[[a, b, c]] = (sample.displacement[1] * spacing[1]) as f32;
        field.w[[a, b, c]] = (sample.displacement[2] * spacing[2]) as f32;
        field.mask[[a, b, c]] = true;
    }

    field
}
