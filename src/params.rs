use crate::engine::DvcError;
use crate::enums::{Algorithm, BoundaryPolicy, NewtonSeed, PeakFit, Window};
use crate::subset::SubsetSpec;

/// Tuning of a correlation run.
///
/// ```
/// # use dvc_volume::{Algorithm, DvcParameters, SubsetSpec};
/// let params = DvcParameters {
///     subset: SubsetSpec::new([21, 21, 21], [7, 7, 7]).unwrap(),
///     algorithm: "newton".parse::<Algorithm>().unwrap(),
///     ..DvcParameters::default()
/// };
/// assert!(params.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct DvcParameters {
    pub subset: SubsetSpec,
    pub algorithm: Algorithm,
    /// Search-window expansion on each side; `None` means half the subset
    pub max_shift: Option<[usize; 3]>,
    pub correlation_threshold: f32,
    pub window: Window,
    pub peak_fit: PeakFit,
    pub newton_max_iterations: usize,
    /// Step norm, in voxels, below which Newton iteration stops
    pub newton_tolerance: f64,
    pub newton_seed: NewtonSeed,
    pub boundary_policy: BoundaryPolicy,
    /// Size of a dedicated worker pool; `None` uses the global rayon pool
    pub threads: Option<usize>,
}

impl Default for DvcParameters {
    fn default() -> Self {
        Self {
            subset: SubsetSpec::default(),
            algorithm: Algorithm::default(),
            max_shift: None,
            correlation_threshold: 0.5,
            window: Window::default(),
            peak_fit: PeakFit::default(),
            newton_max_iterations: 20,
            newton_tolerance: 1e-3,
            newton_seed: NewtonSeed::default(),
            boundary_policy: BoundaryPolicy::default(),
            threads: None,
        }
    }
}

impl DvcParameters {
    pub fn validate(&self) -> Result<(), DvcError> {
        self.subset.validate()?;

        if !(-1.0..=1.0).contains(&self.correlation_threshold) {
            return Err(DvcError::InvalidParameter(format!(
                "correlation threshold {} outside [-1, 1]",
                self.correlation_threshold
            )));
        }
        if self.newton_max_iterations == 0 {
            return Err(DvcError::InvalidParameter(
                "Newton iteration cap must be positive".to_string(),
            ));
        }
        if !(self.newton_tolerance.is_finite() && self.newton_tolerance > 0.0) {
            return Err(DvcError::InvalidParameter(format!(
                "Newton tolerance {} must be positive",
                self.newton_tolerance
            )));
        }
        if self.threads == Some(0) {
            return Err(DvcError::InvalidParameter(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        if let Some(shift) = self.max_shift {
            if shift.contains(&0) {
                return Err(DvcError::InvalidParameter(format!(
                    "search expansion {shift:?} must be positive on every axis"
                )));
            }
        }
        Ok(())
    }

    /// Search-window expansion actually used on each side
    pub fn search_shift(&self) -> [usize; 3] {
        self.max_shift
            .unwrap_or_else(|| self.subset.size.map(|s| (s / 2).max(1)))
    }
}
