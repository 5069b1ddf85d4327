use std::str::FromStr;

use crate::engine::DvcError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Displacement component along one grid axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    U,
    V,
    W,
}

/// Per-subset correlation strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    Fft,
    Newton,
}

impl FromStr for Algorithm {
    type Err = DvcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fft" => Ok(Algorithm::Fft),
            "newton" => Ok(Algorithm::Newton),
            _ => Err(DvcError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Subpixel interpolation of the correlation peak
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeakFit {
    #[default]
    Parabolic,
    Gaussian,
}

/// Taper applied to the reference subset before the FFT
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Window {
    #[default]
    None,
    Hann,
}

/// Starting point of the Newton-Raphson iteration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NewtonSeed {
    #[default]
    Fft,
    Zero,
}

/// Differencing rule where a stencil neighbour is missing or invalid.
///
/// `OneSided` falls back to a forward or backward difference (first order,
/// lower accuracy at the edge of the valid data), `Invalid` drops the voxel
/// from the strain mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundaryPolicy {
    #[default]
    OneSided,
    Invalid,
}
