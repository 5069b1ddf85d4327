use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use web_time::Instant;

use crate::correlation::{
    CorrelationStrategy, DisplacementSample, SampleStatus, SubsetContext, strategy_for,
};
use crate::field::{DisplacementField, FieldGeometry, assemble};
use crate::params::DvcParameters;
use crate::progress::{CancellationToken, ProgressCallback, ProgressTracker};
use crate::region::Region;
use crate::strain::StrainTensor;
use crate::subset::SubsetSampler;
use crate::volume::VoxelGrid;

#[derive(Debug, Error)]
pub enum DvcError {
    #[error("Volume has no voxels")]
    EmptyVolume,

    #[error("Volume shapes differ: reference {reference:?}, deformed {deformed:?}")]
    ShapeMismatch {
        reference: (usize, usize, usize),
        deformed: (usize, usize, usize),
    },

    #[error("Voxel spacings differ: reference {reference:?}, deformed {deformed:?}")]
    SpacingMismatch {
        reference: [f64; 3],
        deformed: [f64; 3],
    },

    #[error("Invalid voxel spacing {0:?}")]
    InvalidSpacing([f64; 3]),

    #[error("Direction cosines are not orthonormal")]
    InvalidDirection,

    #[error("Subset size must be positive, got {0:?}")]
    InvalidSubsetSize([usize; 3]),

    #[error("Step size must be positive, got {0:?}")]
    InvalidStepSize([usize; 3]),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown correlation algorithm {0:?}, expected \"fft\" or \"newton\"")]
    UnknownAlgorithm(String),

    #[error("Correlation run was cancelled")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Correlation worker stopped before reporting: {0}")]
    WorkerDropped(#[from] futures::channel::oneshot::Canceled),
}

/// Displacement and strain produced by one run
#[derive(Clone, Debug)]
pub struct DvcResult {
    pub displacement: DisplacementField,
    pub strain: StrainTensor,
}

#[derive(Clone, Default)]
pub struct Correlator {
    params: DvcParameters,
    cancellation: CancellationToken,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Correlator {
    pub fn new(params: DvcParameters) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn params(&self) -> &DvcParameters {
        &self.params
    }

    /// Correlate `deformed` against `reference` inside `region`
    ///
    /// # Errors
    ///
    /// Returns error if the volumes or parameters fail their preconditions,
    /// or if the run is cancelled. Subsets that fail to correlate are not
    /// errors; they show up as invalid voxels in the result masks.
    pub fn run(
        &self,
        reference: &VoxelGrid,
        deformed: &VoxelGrid,
        region: &dyn Region,
    ) -> Result<DvcResult, DvcError> {
        Self::validate_volumes(reference, deformed)?;
        self.params.validate()?;

        match self.params.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                pool.install(|| self.correlate(reference, deformed, region))
            }
            None => self.correlate(reference, deformed, region),
        }
    }

    /// Run on the rayon pool without blocking the calling executor
    pub async fn run_async(
        self,
        reference: Arc<VoxelGrid>,
        deformed: Arc<VoxelGrid>,
        region: Arc<dyn Region>,
    ) -> Result<DvcResult, DvcError> {
        let (sender, receiver) = futures::channel::oneshot::channel();
        rayon::spawn(move || {
            let result = self.run(&reference, &deformed, region.as_ref());
            let _ = sender.send(result);
        });
        receiver.await?
    }

    fn validate_volumes(reference: &VoxelGrid, deformed: &VoxelGrid) -> Result<(), DvcError> {
        if reference.is_empty() || deformed.is_empty() {
            return Err(DvcError::EmptyVolume);
        }
        if reference.dim() != deformed.dim() {
            return Err(DvcError::ShapeMismatch {
                reference: reference.dim(),
                deformed: deformed.dim(),
            });
        }
        let (reference_meta, deformed_meta) = (reference.meta(), deformed.meta());
        if reference_meta.spacing != deformed_meta.spacing {
            return Err(DvcError::SpacingMismatch {
                reference: reference_meta.spacing.into(),
                deformed: deformed_meta.spacing.into(),
            });
        }
        if !reference_meta.has_valid_spacing() {
            return Err(DvcError::InvalidSpacing(reference_meta.spacing.into()));
        }
        if !reference_meta.has_orthonormal_direction() {
            return Err(DvcError::InvalidDirection);
        }
        Ok(())
    }

    fn correlate(
        &self,
        reference: &VoxelGrid,
        deformed: &VoxelGrid,
        region: &dyn Region,
    ) -> Result<DvcResult, DvcError> {
        let start = Instant::now();
        let spec = self.params.subset;
        let sampler = SubsetSampler::new(region, reference.meta(), reference.shape(), spec);
        let lattice = *sampler.lattice();

        tracing::info!(
            "Starting {:?} correlation: {} lattice candidates, subset {:?}, step {:?}",
            self.params.algorithm,
            lattice.len(),
            spec.size,
            spec.step
        );

        let strategy: Box<dyn CorrelationStrategy> = strategy_for(&self.params);
        let tracker = ProgressTracker::new(self.progress.as_deref(), lattice.len());
        let (reference_view, deformed_view) = (reference.data(), deformed.data());

        let samples: Vec<DisplacementSample> = sampler
            .par_bridge()
            .filter_map(|subset| {
                if self.cancellation.is_cancelled() {
                    return None;
                }
                let context = SubsetContext {
                    reference: reference_view,
                    deformed: deformed_view,
                    subset,
                    spec,
                };
                let sample = strategy.correlate(&context);
                tracker.tick();
                Some(sample)
            })
            .collect();

        if self.cancellation.is_cancelled() {
            tracing::warn!("Correlation cancelled after {} subsets", samples.len());
            return Err(DvcError::Cancelled);
        }

        Self::log_failures(&samples);

        let geometry = FieldGeometry {
            lattice,
            meta: reference.meta().clone(),
        };
        let displacement = assemble(&samples, geometry);
        let strain = StrainTensor::from_displacement(&displacement, self.params.boundary_policy);

        let valid = displacement.valid_count();
        tracker.finish(valid);
        if valid == 0 {
            tracing::warn!("Correlation produced no valid displacement samples");
        }
        tracing::info!(
            "Correlated {} subsets, {} valid, {} strain voxels in {} ms",
            samples.len(),
            valid,
            strain.valid_count(),
            start.elapsed().as_millis()
        );

        Ok(DvcResult {
            displacement,
            strain,
        })
    }

    fn log_failures(samples: &[DisplacementSample]) {
        let mut histogram: HashMap<SampleStatus, usize> = HashMap::new();
        for sample in samples.iter().filter(|s| !s.status.is_valid()) {
            *histogram.entry(sample.status).or_default() += 1;
        }
        if !histogram.is_empty() {
            tracing::debug!("Failed subsets by reason: {:?}", histogram);
        }
    }
}

/// Correlate with default progress and cancellation handling
pub fn compute(
    reference: &VoxelGrid,
    deformed: &VoxelGrid,
    region: &dyn Region,
    params: DvcParameters,
) -> Result<DvcResult, DvcError> {
    Correlator::new(params).run(reference, deformed, region)
}
