//! # DVC-volume library
//!
//! This crate computes Digital Volume Correlation (DVC) between two
//! volumetric scans of the same specimen: a dense displacement field and the
//! small-strain tensor derived from it, restricted to a region of interest.
//!
//! A run proceeds in four stages:
//!  - Subset sampling: candidate subset centers on a regular lattice inside
//!    the region, keeping only subsets whose full window fits the volume
//!  - Correlation: one displacement estimate per subset, either by FFT
//!    cross-correlation with subpixel peak fitting or by Gauss-Newton
//!    refinement of the zero-mean squared difference
//!  - Assembly: samples are scattered onto the lattice; failed subsets stay
//!    masked out
//!  - Strain: central finite differences of the displacement field
//!
//! Subsets are correlated in parallel using rayon. A subset that fails to
//! correlate (low correlation, ambiguous peak, singular system, no
//! convergence) never aborts the run; it is reported through the validity
//! masks of the result.
//!
//! Loading scans from disk, rendering and region editing are left to the
//! caller: volumes come in as [`VoxelGrid`]s and regions as anything that
//! implements [`Region`].
//!
//! # Examples
//!
//! ## Correlating two volumes inside a box
//!
//! ```no_run
//! # use dvc_volume::{BoxRegion, DvcParameters, SubsetSpec, VolumeMeta, VoxelGrid, compute};
//! # use nalgebra::Vector3;
//! # use ndarray::Array3;
//! # let reference = VoxelGrid::new(Array3::zeros((64, 64, 64)), VolumeMeta::default());
//! # let deformed = reference.clone();
//! let region = BoxRegion::new(Vector3::new(32.0, 32.0, 32.0), Vector3::new(30.0, 30.0, 30.0));
//! let params = DvcParameters {
//!     subset: SubsetSpec::new([15, 15, 15], [5, 5, 5]).expect("positive sizes"),
//!     ..DvcParameters::default()
//! };
//! let result = compute(&reference, &deformed, &region, params)
//!     .expect("volumes should share shape and spacing");
//! println!(
//!     "{} valid displacement voxels, {} valid strain voxels",
//!     result.displacement.valid_count(),
//!     result.strain.valid_count()
//! );
//! ```

pub mod correlation;
pub mod engine;
pub mod enums;
pub mod field;
mod interpolator;
pub mod params;
pub mod progress;
pub mod region;
pub mod strain;
pub mod subset;
pub mod volume;

pub use correlation::{
    CorrelationStrategy, DisplacementSample, FftStrategy, NewtonRaphsonStrategy, SampleStatus,
};
pub use engine::{Correlator, DvcError, DvcResult, compute};
pub use enums::{Algorithm, BoundaryPolicy, Component, NewtonSeed, Orientation, PeakFit, Window};
pub use field::{DisplacementField, FieldGeometry};
pub use params::DvcParameters;
pub use progress::{CancellationToken, LoggingProgress, ProgressCallback};
pub use region::{Aabb, BoxRegion, Region, SphereRegion};
pub use strain::StrainTensor;
pub use subset::{Lattice, SubsetCenter, SubsetSampler, SubsetSpec};
pub use volume::{VolumeMeta, VoxelGrid};
