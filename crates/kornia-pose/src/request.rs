use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Error types for the request module.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The camera matrix is not a finite 3x3 matrix.
    #[error("Invalid camera matrix: {0}")]
    InvalidCameraMatrix(String),

    /// The request does not carry any image.
    #[error("The request must contain at least one image")]
    NoImages,

    /// An image filename cannot be used as a file stem.
    #[error("Invalid image filename: {0:?}")]
    InvalidFilename(String),

    /// Two images normalize to the same file stem.
    #[error("Duplicated image filename: {0:?}")]
    DuplicateFilename(String),

    /// A payload is not valid base64.
    #[error("Field `{field}` is not valid base64: {source}")]
    InvalidBase64 {
        /// Path of the offending field in the request body.
        field: String,
        /// Underlying decoding error.
        source: base64::DecodeError,
    },

    /// A payload decodes to zero bytes.
    #[error("Field `{field}` is empty")]
    EmptyPayload {
        /// Path of the offending field in the request body.
        field: String,
    },
}

/// Camera intrinsics as sent by clients: either three rows or nine row-major values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraMatrixInput {
    /// Nested rows, e.g. `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    Rows(Vec<Vec<f64>>),
    /// Flat row-major list of nine values.
    Flat(Vec<f64>),
}

/// One RGB-D frame of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Frame identifier, used as the file stem on disk.
    pub filename: String,
    /// Base64 encoded color image.
    pub rgb: String,
    /// Base64 encoded depth image.
    pub depth: String,
}

/// Textured mesh of the object to localize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshPayload {
    /// Base64 encoded Wavefront OBJ file.
    pub obj: String,
    /// Base64 encoded material library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtl: Option<String>,
    /// Base64 encoded texture image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
}

/// Body of a pose estimation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseRequest {
    /// Pinhole camera intrinsics.
    pub camera_matrix: CameraMatrixInput,
    /// RGB-D frames of the scene.
    pub images: Vec<ImagePayload>,
    /// Base64 encoded segmentation mask of the object in the reference frame.
    pub mask: String,
    /// Object mesh.
    pub mesh: MeshPayload,
}

/// A decoded RGB-D frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Normalized file stem.
    pub stem: String,
    /// Raw color image bytes.
    pub rgb: Vec<u8>,
    /// Raw depth image bytes.
    pub depth: Vec<u8>,
}

/// A decoded mesh.
#[derive(Debug, Clone)]
pub struct DecodedMesh {
    /// Raw OBJ bytes.
    pub obj: Vec<u8>,
    /// Raw material library bytes, if any.
    pub mtl: Option<Vec<u8>>,
    /// Raw texture bytes, if any.
    pub texture: Option<Vec<u8>>,
}

/// A request whose payloads are decoded and whose fields are normalized.
///
/// Frames are sorted by stem, the order in which the estimator walks the scene.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    /// Camera intrinsics, row-major.
    pub camera_matrix: [[f64; 3]; 3],
    /// Frames sorted by stem. Never empty.
    pub frames: Vec<DecodedFrame>,
    /// Raw mask bytes for the reference frame.
    pub mask: Vec<u8>,
    /// Object mesh.
    pub mesh: DecodedMesh,
}

impl DecodedRequest {
    /// The frame the estimator registers the object on. The mask belongs to it.
    pub fn reference_frame(&self) -> &DecodedFrame {
        &self.frames[0]
    }

    /// The last frame processed by the estimator. Its pose is the one returned.
    pub fn final_frame(&self) -> &DecodedFrame {
        &self.frames[self.frames.len() - 1]
    }
}

impl PoseRequest {
    /// Validate the request and decode all of its payloads.
    ///
    /// # Returns
    ///
    /// A [`DecodedRequest`] with at least one frame, or the first problem found.
    pub fn decode(self) -> Result<DecodedRequest, RequestError> {
        let camera_matrix = normalize_camera_matrix(&self.camera_matrix)?;

        if self.images.is_empty() {
            return Err(RequestError::NoImages);
        }

        let mut seen = HashSet::new();
        let mut frames = Vec::with_capacity(self.images.len());
        for (i, image) in self.images.iter().enumerate() {
            let stem = normalize_filename(&image.filename)?;
            if !seen.insert(stem.clone()) {
                return Err(RequestError::DuplicateFilename(stem));
            }
            frames.push(DecodedFrame {
                rgb: decode_payload(&format!("images[{i}].rgb"), &image.rgb)?,
                depth: decode_payload(&format!("images[{i}].depth"), &image.depth)?,
                stem,
            });
        }
        frames.sort_by(|a, b| a.stem.cmp(&b.stem));

        let mesh = DecodedMesh {
            obj: decode_payload("mesh.obj", &self.mesh.obj)?,
            mtl: self
                .mesh
                .mtl
                .as_deref()
                .map(|data| decode_payload("mesh.mtl", data))
                .transpose()?,
            texture: self
                .mesh
                .texture
                .as_deref()
                .map(|data| decode_payload("mesh.texture", data))
                .transpose()?,
        };

        Ok(DecodedRequest {
            camera_matrix,
            frames,
            mask: decode_payload("mask", &self.mask)?,
            mesh,
        })
    }
}

/// Convert the client camera matrix into a 3x3 row-major array.
pub fn normalize_camera_matrix(input: &CameraMatrixInput) -> Result<[[f64; 3]; 3], RequestError> {
    let values: Vec<f64> = match input {
        CameraMatrixInput::Rows(rows) => {
            if rows.len() != 3 || rows.iter().any(|row| row.len() != 3) {
                let shape = rows.iter().map(|row| row.len()).collect::<Vec<_>>();
                return Err(RequestError::InvalidCameraMatrix(format!(
                    "expected 3 rows of 3 values, got row lengths {shape:?}"
                )));
            }
            rows.iter().flatten().copied().collect()
        }
        CameraMatrixInput::Flat(values) => {
            if values.len() != 9 {
                return Err(RequestError::InvalidCameraMatrix(format!(
                    "expected 9 values, got {}",
                    values.len()
                )));
            }
            values.clone()
        }
    };

    if values.iter().any(|v| !v.is_finite()) {
        return Err(RequestError::InvalidCameraMatrix(
            "all entries must be finite".to_string(),
        ));
    }

    let mut k = [[0.0; 3]; 3];
    for (i, v) in values.into_iter().enumerate() {
        k[i / 3][i % 3] = v;
    }
    Ok(k)
}

/// Turn a client supplied filename into a safe file stem.
///
/// Surrounding whitespace and a trailing `.png` extension are removed.
pub fn normalize_filename(filename: &str) -> Result<String, RequestError> {
    let trimmed = filename.trim();
    let stem = match trimmed.len().checked_sub(4) {
        Some(split)
            if trimmed.is_char_boundary(split)
                && trimmed[split..].eq_ignore_ascii_case(".png") =>
        {
            &trimmed[..split]
        }
        _ => trimmed,
    };

    if stem.is_empty()
        || stem == "."
        || stem == ".."
        || stem.contains(['/', '\\', '\0'])
    {
        return Err(RequestError::InvalidFilename(filename.to_string()));
    }

    Ok(stem.to_string())
}

/// Decode a base64 payload, tolerating a data URL prefix and line wrapping.
pub fn decode_payload(field: &str, data: &str) -> Result<Vec<u8>, RequestError> {
    let data = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };

    let compact = data
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect::<Vec<_>>();

    let bytes = STANDARD
        .decode(compact)
        .map_err(|source| RequestError::InvalidBase64 {
            field: field.to_string(),
            source,
        })?;

    if bytes.is_empty() {
        return Err(RequestError::EmptyPayload {
            field: field.to_string(),
        });
    }

    Ok(bytes)
}
