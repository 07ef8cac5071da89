use std::{path::PathBuf, sync::Arc};

use serde::Serialize;

use crate::{
    estimator::{EstimationTarget, EstimatorError, PoseEstimator},
    matrix::{MatrixError, PoseMatrix, PoseTolerance},
    request::{DecodedRequest, PoseRequest, RequestError},
    scene::{SceneError, SceneLayout},
};

/// Error types for the pose pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    /// The request body is invalid
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The request could not be stored on disk
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// The estimator failed
    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    /// The estimated pose is not a rigid transformation
    #[error("Invalid pose matrix: {0}")]
    InvalidPose(#[source] MatrixError),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration of the [`PosePipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory under which a scene directory is created per request.
    pub output_dir: PathBuf,
    /// Tolerances used to validate the estimated pose.
    pub tolerance: PoseTolerance,
    /// Keep scene directories once the request is answered.
    pub keep_requests: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("saved_requests"),
            tolerance: PoseTolerance::default(),
            keep_requests: true,
        }
    }
}

/// Result of a successful estimation.
#[derive(Debug, Clone, Serialize)]
pub struct PoseEstimate {
    /// Identifier of the request, also the name of its scene directory.
    pub request_id: String,
    /// Object-in-camera transformation of the final frame.
    pub matrix: PoseMatrix,
}

/// Processes pose requests end to end: decode, store, estimate, validate.
pub struct PosePipeline {
    config: PipelineConfig,
    estimator: Arc<dyn PoseEstimator>,
}

impl PosePipeline {
    /// Create a new pipeline running `estimator`.
    pub fn new(config: PipelineConfig, estimator: Arc<dyn PoseEstimator>) -> Self {
        Self { config, estimator }
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Estimate the object pose described by `request`.
    ///
    /// # Arguments
    ///
    /// * `request` - The deserialized request body.
    ///
    /// # Returns
    ///
    /// The validated pose and the id of the request.
    pub async fn estimate(&self, request: PoseRequest) -> Result<PoseEstimate, PoseError> {
        let request = request.decode()?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let scene = SceneLayout::new(&self.config.output_dir, &request_id);

        let target = EstimationTarget {
            reference_frame: request.reference_frame().stem.clone(),
            final_frame: request.final_frame().stem.clone(),
            num_frames: request.frames.len(),
        };

        log::info!(
            "request {}: {} frame(s), reference frame {}",
            request_id,
            target.num_frames,
            target.reference_frame
        );

        let result = self.run(&scene, request, &target).await;

        if !self.config.keep_requests {
            if let Err(err) = scene.remove() {
                log::warn!("request {}: failed to clean up: {}", request_id, err);
            }
        }

        let matrix = result?;
        log::info!("request {}: pose estimation complete", request_id);

        Ok(PoseEstimate { request_id, matrix })
    }

    async fn run(
        &self,
        scene: &SceneLayout,
        request: DecodedRequest,
        target: &EstimationTarget,
    ) -> Result<PoseMatrix, PoseError> {
        let writer = scene.clone();
        tokio::task::spawn_blocking(move || writer.write(&request)).await??;

        let matrix = self.estimator.estimate(scene, target).await?;
        matrix
            .validate(&self.config.tolerance)
            .map_err(PoseError::InvalidPose)?;

        Ok(matrix)
    }
}
