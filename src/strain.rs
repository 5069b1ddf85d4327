//! Small-strain tensor from a displacement field.
//!
//! Gradients are finite differences on the field lattice, scaled by the
//! physical lattice spacing. A stencil only reads voxels whose displacement is
//! valid; where a neighbour is missing the [`BoundaryPolicy`] decides between
//! a one-sided difference and dropping the voxel.

use ndarray::Array3;
use rayon::prelude::*;

use crate::enums::BoundaryPolicy;
use crate::field::{DisplacementField, FieldGeometry};

#[derive(Clone, Debug)]
pub struct StrainTensor {
    pub exx: Array3<f32>,
    pub eyy: Array3<f32>,
    pub ezz: Array3<f32>,
    pub exy: Array3<f32>,
    pub eyz: Array3<f32>,
    pub ezx: Array3<f32>,
    pub mask: Array3<bool>,
    pub geometry: FieldGeometry,
}

impl StrainTensor {
    pub fn from_displacement(field: &DisplacementField, policy: BoundaryPolicy) -> Self {
        let (nx, ny, nz) = field.dim();
        let spacing = field.geometry.spacing();
        let components = [&field.u, &field.v, &field.w];

        let tensors: Vec<Option<[f32; 6]>> = (0..nx * ny * nz)
            .into_par_iter()
            .map(|flat| {
                let index = [flat / (ny * nz), (flat / nz) % ny, flat % nz];
                if !field.mask[index] {
                    return None;
                }
                // gradient[i][j] = ∂(component i)/∂(axis j)
                let mut gradient = [[0.0f64; 3]; 3];
                for (axis, h) in spacing.iter().enumerate() {
                    let stencil = Stencil::at(&field.mask, index, axis, policy)?;
                    for (row, component) in components.iter().enumerate() {
                        gradient[row][axis] = stencil.apply(component) / h;
                    }
                }
                Some(symmetric_part(&gradient))
            })
            .collect();

        let shape = (nx, ny, nz);
        let component = |n: usize| {
            Array3::from_shape_fn(shape, |(i, j, k)| {
                tensors[(i * ny + j) * nz + k].map_or(0.0, |t| t[n])
            })
        };
        Self {
            exx: component(0),
            eyy: component(1),
            ezz: component(2),
            exy: component(3),
            eyz: component(4),
            ezx: component(5),
            mask: Array3::from_shape_fn(shape, |(i, j, k)| {
                tensors[(i * ny + j) * nz + k].is_some()
            }),
            geometry: field.geometry.clone(),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.exx.dim()
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }

    /// Von Mises equivalent strain of the deviatoric part; zero where invalid
    pub fn equivalent_strain(&self) -> Array3<f32> {
        Array3::from_shape_fn(self.dim(), |index| {
            if !self.mask[index] {
                return 0.0;
            }
            let (xx, yy, zz) = (self.exx[index], self.eyy[index], self.ezz[index]);
            let (xy, yz, zx) = (self.exy[index], self.eyz[index], self.ezx[index]);
            let mean = (xx + yy + zz) / 3.0;
            let (dx, dy, dz) = (xx - mean, yy - mean, zz - mean);
            let contraction = dx * dx + dy * dy + dz * dz + 2.0 * (xy * xy + yz * yz + zx * zx);
            (2.0 / 3.0 * contraction).sqrt()
        })
    }
}

/// Neighbours and weights of a first-derivative stencil, in lattice units
struct Stencil {
    points: [([usize; 3], f64); 2],
}

impl Stencil {
    fn at(mask: &Array3<bool>, index: [usize; 3], axis: usize, policy: BoundaryPolicy) -> Option<Self> {
        let n = mask.shape()[axis];
        let neighbour = |offset: isize| -> Option<[usize; 3]> {
            let position = index[axis] as isize + offset;
            if position < 0 || position >= n as isize {
                return None;
            }
            let mut neighbour = index;
            neighbour[axis] = position as usize;
            mask[neighbour].then_some(neighbour)
        };

        match (neighbour(-1), neighbour(1), policy) {
            (Some(before), Some(after), _) => Some(Self {
                points: [(before, -0.5), (after, 0.5)],
            }),
            (Some(before), None, BoundaryPolicy::OneSided) => Some(Self {
                points: [(before, -1.0), (index, 1.0)],
            }),
            (None, Some(after), BoundaryPolicy::OneSided) => Some(Self {
                points: [(index, -1.0), (after, 1.0)],
            }),
            _ => None,
        }
    }

    fn apply(&self, values: &Array3<f32>) -> f64 {
        self.points
            .iter()
            .map(|(point, weight)| values[*point] as f64 * weight)
            .sum()
    }
}

/// exx, eyy, ezz, exy, eyz, ezx from a displacement gradient
fn symmetric_part(gradient: &[[f64; 3]; 3]) -> [f32; 6] {
    [
        gradient[0][0],
        gradient[1][1],
        gradient[2][2],
        0.5 * (gradient[0][1] + gradient[1][0]),
        0.5 * (gradient[1][2] + gradient[2][1]),
        0.5 * (gradient[2][0] + gradient[0][2]),
    ]
    .map(|e| e as f32)
}
