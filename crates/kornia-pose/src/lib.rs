#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Pose
//!
//! Glue between an HTTP-facing request and an external 6D pose estimator
//! such as FoundationPose.
//!
//! ## Pipeline
//!
//! 1. [`request::PoseRequest`] is decoded and normalized.
//! 2. The payload is written to a per-request [`scene::SceneLayout`].
//! 3. A [`estimator::PoseEstimator`] backend runs on the scene.
//! 4. The returned [`matrix::PoseMatrix`] is validated before being handed back.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kornia_pose::{
//!     estimator::{SubprocessConfig, SubprocessEstimator},
//!     pipeline::{PipelineConfig, PosePipeline},
//! };
//!
//! let estimator = SubprocessEstimator::new(SubprocessConfig::default());
//! let pipeline = PosePipeline::new(PipelineConfig::default(), Arc::new(estimator));
//! ```

/// External pose estimator backends.
pub mod estimator;

/// Pose matrix parsing and validation.
pub mod matrix;

/// End-to-end request processing.
pub mod pipeline;

/// Request body model and normalization.
pub mod request;

/// Per-request scene directory layout.
pub mod scene;

pub use estimator::{EstimationTarget, EstimatorError, PoseEstimator};
pub use matrix::{MatrixError, PoseMatrix, PoseTolerance};
pub use pipeline::{PoseError, PoseEstimate, PosePipeline};
pub use request::{DecodedRequest, PoseRequest, RequestError};
pub use scene::{SceneError, SceneLayout};
