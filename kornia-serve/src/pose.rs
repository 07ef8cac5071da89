use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use kornia_pose::{PoseError, PosePipeline, PoseRequest};

/// Error reported to the client as `{"error": ..., "details": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.error,
            "details": self.details,
        }));
        (self.status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // body could not be read, e.g. over the configured length limit
            JsonRejection::BytesRejection(_) => Self {
                status: rejection.status(),
                error: "Failed to read request body",
                details: rejection.body_text(),
            },
            _ => Self {
                status: StatusCode::BAD_REQUEST,
                error: "Invalid or empty JSON!",
                details: rejection.body_text(),
            },
        }
    }
}

impl From<PoseError> for ApiError {
    fn from(err: PoseError) -> Self {
        let (status, error, details) = match &err {
            PoseError::Request(e) => (StatusCode::BAD_REQUEST, "Invalid request", e.to_string()),
            PoseError::Scene(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store request",
                e.to_string(),
            ),
            PoseError::Estimator(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Pose estimation failed",
                e.details(),
            ),
            PoseError::InvalidPose(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid pose matrix",
                e.to_string(),
            ),
            PoseError::Join(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                e.to_string(),
            ),
        };
        Self {
            status,
            error,
            details,
        }
    }
}

/// Build the application routes.
pub fn router(pipeline: Arc<PosePipeline>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(|| async { "it is running!" }))
        .route("/pose/estimate", post(estimate_pose))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(pipeline)
}

/// Handle `POST /pose/estimate`.
pub async fn estimate_pose(
    State(pipeline): State<Arc<PosePipeline>>,
    body: Result<Json<PoseRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        log::warn!("rejected request body: {}", rejection.body_text());
        ApiError::from(rejection)
    })?;

    let estimate = pipeline.estimate(request).await.map_err(|err| {
        match &err {
            PoseError::Request(e) => log::warn!("invalid request: {}", e),
            PoseError::Estimator(e) => log::error!("{}\n{}", e, e.details()),
            e => log::error!("{}", e),
        }
        ApiError::from(err)
    })?;

    Ok(Json(serde_json::json!({
        "status": "Pose estimation complete",
        "request_id": estimate.request_id,
        "transformation_matrix": estimate.matrix,
    })))
}
