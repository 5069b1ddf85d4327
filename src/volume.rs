use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3, ArrayViewMut3};

/// Geometry of a voxel grid in physical space.
///
/// Array axis 0, 1 and 2 correspond to x, y and z. The physical position of
/// index `(i, j, k)` is `origin + direction * (index ⊙ spacing)`.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeMeta {
    pub origin: Vector3<f64>,
    pub spacing: Vector3<f64>,
    pub direction: Matrix3<f64>,
}

impl Default for VolumeMeta {
    fn default() -> Self {
        Self {
            origin: Vector3::zeros(),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
        }
    }
}

impl VolumeMeta {
    pub fn new(origin: Vector3<f64>, spacing: Vector3<f64>, direction: Matrix3<f64>) -> Self {
        Self {
            origin,
            spacing,
            direction,
        }
    }

    /// Identity orientation with the given origin and spacing
    pub fn axis_aligned(origin: Vector3<f64>, spacing: Vector3<f64>) -> Self {
        Self::new(origin, spacing, Matrix3::identity())
    }

    /// Map a continuous grid index to physical coordinates
    pub fn index_to_physical(&self, index: Vector3<f64>) -> Vector3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Map physical coordinates to a continuous grid index.
    ///
    /// Direction cosines are orthonormal, so the transpose is the inverse.
    pub fn physical_to_index(&self, point: Vector3<f64>) -> Vector3<f64> {
        (self.direction.transpose() * (point - self.origin)).component_div(&self.spacing)
    }

    pub(crate) fn has_valid_spacing(&self) -> bool {
        self.spacing.iter().all(|s| s.is_finite() && *s > 0.0)
    }

    pub(crate) fn has_orthonormal_direction(&self) -> bool {
        let gram = self.direction.transpose() * self.direction;
        (gram - Matrix3::identity()).amax() < 1e-6
    }
}

/// A scalar volume together with its physical geometry
#[derive(Clone, Debug, Default)]
pub struct VoxelGrid {
    data: Array3<f32>,
    meta: VolumeMeta,
}

impl VoxelGrid {
    pub fn new(data: Array3<f32>, meta: VolumeMeta) -> Self {
        Self { data, meta }
    }

    /// Build a grid from 16-bit scanner intensities
    pub fn from_u16(data: &Array3<u16>, meta: VolumeMeta) -> Self {
        Self::new(data.mapv(f32::from), meta)
    }

    /// Get the dimensions of the volume along (x, y, z)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub(crate) fn shape(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.dim();
        [nx, ny, nz]
    }

    /// Get a view of the underlying data
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Get a mutable view of the underlying data; the shape stays fixed
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    pub fn meta(&self) -> &VolumeMeta {
        &self.meta
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Physical coordinate of an integer voxel index
    pub fn voxel_to_physical(&self, index: [usize; 3]) -> Vector3<f64> {
        self.meta.index_to_physical(Vector3::new(
            index[0] as f64,
            index[1] as f64,
            index[2] as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    #[test]
    fn physical_round_trip_with_rotation() {
        let rotation = Rotation3::from_euler_angles(0.1, -0.4, 0.7).into_inner();
        let meta = VolumeMeta::new(
            Vector3::new(10.0, -5.0, 2.5),
            Vector3::new(0.5, 0.25, 2.0),
            rotation,
        );
        let index = Vector3::new(3.0, 7.5, 1.25);
        let back = meta.physical_to_index(meta.index_to_physical(index));
        assert!((back - index).norm() < 1e-9);
        assert!(meta.has_orthonormal_direction());
    }

    #[test]
    fn spacing_scales_physical_position() {
        let meta = VolumeMeta::axis_aligned(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.5, 2.0, 1.0));
        let grid = VoxelGrid::new(Array3::zeros((4, 4, 4)), meta);
        let p = grid.voxel_to_physical([2, 1, 3]);
        assert_eq!(p, Vector3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn u16_intensities_are_converted() {
        let raw = Array3::from_shape_fn((2, 2, 2), |(i, j, k)| (i * 4 + j * 2 + k) as u16 * 1000);
        let grid = VoxelGrid::from_u16(&raw, VolumeMeta::default());
        assert_eq!(grid.dim(), (2, 2, 2));
        assert_eq!(grid.data()[[1, 1, 1]], 7000.0);
    }

    #[test]
    fn degenerate_geometry_is_detected() {
        let mut meta = VolumeMeta::default();
        meta.spacing = Vector3::new(1.0, 0.0, 1.0);
        assert!(!meta.has_valid_spacing());
        meta.spacing = Vector3::new(1.0, 1.0, 1.0);
        meta.direction = Matrix3::new(1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0);
        assert!(!meta.has_orthonormal_direction());
    }
}
