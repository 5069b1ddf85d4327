use ndarray::ArrayView3;

/// Half-width of the central difference taken on the interpolant, in voxels
const GRADIENT_HALF_STEP: f64 = 0.5;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Sample `volume` at a continuous index, clamped to the volume bounds
    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
        let (nx, ny, nz) = volume.dim();

        let x = p[0].clamp(0.0, (nx - 1) as f64);
        let y = p[1].clamp(0.0, (ny - 1) as f64);
        let z = p[2].clamp(0.0, (nz - 1) as f64);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(nx - 1);
        let y1 = (y0 + 1).min(ny - 1);
        let z1 = (z0 + 1).min(nz - 1);

        let dx = (x - x0 as f64) as f32;
        let dy = (y - y0 as f64) as f32;
        let dz = (z - z0 as f64) as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let c00 = volume[[x0, y0, z0]].mul_add(one_minus_dx, volume[[x1, y0, z0]] * dx);
        let c10 = volume[[x0, y1, z0]].mul_add(one_minus_dx, volume[[x1, y1, z0]] * dx);
        let c01 = volume[[x0, y0, z1]].mul_add(one_minus_dx, volume[[x1, y0, z1]] * dx);
        let c11 = volume[[x0, y1, z1]].mul_add(one_minus_dx, volume[[x1, y1, z1]] * dx);

        let c0 = c00.mul_add(one_minus_dy, c10 * dy);
        let c1 = c01.mul_add(one_minus_dy, c11 * dy);

        c0.mul_add(one_minus_dz, c1 * dz)
    }

    /// Central-difference gradient of the trilinear interpolant, per voxel
    #[inline]
    pub(crate) fn trilinear_gradient(volume: &ArrayView3<f32>, p: [f64; 3]) -> [f32; 3] {
        let mut gradient = [0.0f32; 3];
        for (axis, g) in gradient.iter_mut().enumerate() {
            let mut forward = p;
            let mut backward = p;
            forward[axis] += GRADIENT_HALF_STEP;
            backward[axis] -= GRADIENT_HALF_STEP;
            *g = (Self::trilinear_interpolate(volume, forward)
                - Self::trilinear_interpolate(volume, backward))
                / (2.0 * GRADIENT_HALF_STEP) as f32;
        }
        gradient
    }
}
