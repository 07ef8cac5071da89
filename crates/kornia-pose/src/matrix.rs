use std::path::Path;

use serde::Serialize;

/// Error types for the matrix module.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// Error reading the matrix file
    #[error("Failed to read pose file: {0}")]
    Io(#[from] std::io::Error),

    /// A value is not a number
    #[error("Parse error in row {row}: {message}")]
    Parse {
        /// Zero based index of the offending row.
        row: usize,
        /// Description of the failure.
        message: String,
    },

    /// The matrix is not 4x4
    #[error("Expected a 4x4 matrix, got {0}")]
    InvalidShape(String),

    /// The matrix holds NaN or infinite values
    #[error("Pose matrix contains non-finite values")]
    NonFinite,

    /// The rotation block is not orthogonal
    #[error("Rotation is not orthogonal: |R^T R - I| = {residual:e} exceeds {tolerance:e}")]
    NotOrthogonal {
        /// Frobenius norm of `R^T R - I`.
        residual: f64,
        /// Accepted tolerance.
        tolerance: f64,
    },

    /// The rotation block is a reflection or scaled
    #[error("Rotation determinant is {determinant}, expected 1 within {tolerance:e}")]
    InvalidDeterminant {
        /// Determinant of the rotation block.
        determinant: f64,
        /// Accepted tolerance.
        tolerance: f64,
    },

    /// The last row is not `[0, 0, 0, 1]`
    #[error("Last row must be [0, 0, 0, 1], got {0:?}")]
    InvalidHomogeneousRow([f64; 4]),
}

/// Numeric tolerances used when validating a pose matrix.
#[derive(Debug, Clone, Copy)]
pub struct PoseTolerance {
    /// Maximum Frobenius norm of `R^T R - I`. Also bounds the deviation of the last row.
    pub orthogonality: f64,
    /// Maximum absolute deviation of `det(R)` from one.
    pub determinant: f64,
}

impl Default for PoseTolerance {
    fn default() -> Self {
        Self {
            orthogonality: 1e-3,
            determinant: 1e-3,
        }
    }
}

/// A rigid transformation as a row-major 4x4 homogeneous matrix.
///
/// The rotation block maps coordinates from the **object** frame to the
/// **camera** frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PoseMatrix(pub [[f64; 4]; 4]);

impl PoseMatrix {
    /// The identity transformation.
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self(m)
    }

    /// Build a pose from a rotation matrix and a translation vector.
    pub fn from_parts(rotation: &[[f64; 3]; 3], translation: &[f64; 3]) -> Self {
        let mut m = Self::identity().0;
        for i in 0..3 {
            m[i][..3].copy_from_slice(&rotation[i]);
            m[i][3] = translation[i];
        }
        Self(m)
    }

    /// Rows of the matrix.
    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// The top-left 3x3 rotation block.
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.0;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    /// The translation column.
    pub fn translation(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// Check that the matrix is a proper rigid transformation.
    ///
    /// # Arguments
    ///
    /// * `tol` - The accepted numeric deviations.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the rotation block is orthogonal with determinant one and
    /// the last row is `[0, 0, 0, 1]`.
    pub fn validate(&self, tol: &PoseTolerance) -> Result<(), MatrixError> {
        if self.0.iter().flatten().any(|v| !v.is_finite()) {
            return Err(MatrixError::NonFinite);
        }

        let rotation = self.rotation();

        let residual = orthogonality_residual(&rotation);
        if residual > tol.orthogonality {
            return Err(MatrixError::NotOrthogonal {
                residual,
                tolerance: tol.orthogonality,
            });
        }

        let det = determinant(&rotation);
        if (det - 1.0).abs() > tol.determinant {
            return Err(MatrixError::InvalidDeterminant {
                determinant: det,
                tolerance: tol.determinant,
            });
        }

        let last = self.0[3];
        let expected = [0.0, 0.0, 0.0, 1.0];
        if last
            .iter()
            .zip(expected.iter())
            .any(|(a, b)| (a - b).abs() > tol.orthogonality)
        {
            return Err(MatrixError::InvalidHomogeneousRow(last));
        }

        Ok(())
    }
}

fn array33_to_faer_mat(array: &[[f64; 3]; 3]) -> faer::Mat<f64> {
    faer::Mat::from_fn(3, 3, |i, j| array[i][j])
}

/// Frobenius norm of `R^T R - I`.
pub fn orthogonality_residual(rotation: &[[f64; 3]; 3]) -> f64 {
    let r = array33_to_faer_mat(rotation);
    let rtr = r.transpose() * r.as_ref();
    let residual = rtr - faer::Mat::<f64>::identity(3, 3);
    residual.norm_l2()
}

/// Determinant of a 3x3 matrix.
pub fn determinant(rotation: &[[f64; 3]; 3]) -> f64 {
    array33_to_faer_mat(rotation).determinant()
}

/// Parse a pose matrix from whitespace separated text.
///
/// Blank lines are ignored. Exactly four rows of four values are expected.
pub fn parse_pose_matrix(text: &str) -> Result<PoseMatrix, MatrixError> {
    let rows = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(row, line)| {
            line.split_whitespace()
                .map(|value| {
                    value.parse::<f64>().map_err(|e| MatrixError::Parse {
                        row,
                        message: format!("{value}: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rows.len() != 4 || rows.iter().any(|row| row.len() != 4) {
        let shape = rows.iter().map(|row| row.len()).collect::<Vec<_>>();
        return Err(MatrixError::InvalidShape(format!(
            "{} rows with lengths {shape:?}",
            rows.len()
        )));
    }

    let mut m = [[0.0; 4]; 4];
    for (dst, src) in m.iter_mut().zip(rows.iter()) {
        dst.copy_from_slice(src);
    }
    Ok(PoseMatrix(m))
}

/// Read and parse a pose matrix file.
pub fn read_pose_matrix(path: impl AsRef<Path>) -> Result<PoseMatrix, MatrixError> {
    let text = std::fs::read_to_string(path)?;
    parse_pose_matrix(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rotation_z(angle: f64) -> [[f64; 3]; 3] {
        let (s, c) = angle.sin_cos();
        [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
    }

    #[test]
    fn test_parse_pose_matrix() -> Result<(), MatrixError> {
        let text = "1.0 0.0 0.0 0.1\n0 1 0 -0.2\n\n0 0 1 0.5\n0 0 0 1\n";
        let pose = parse_pose_matrix(text)?;
        assert_eq!(pose.translation(), [0.1, -0.2, 0.5]);
        assert_eq!(pose.rotation(), rotation_z(0.0));
        assert_eq!(pose.rows()[3], [0.0, 0.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_parse_pose_matrix_errors() {
        assert!(matches!(
            parse_pose_matrix("1 0 0 0\n0 1 0 0\n0 0 1 0\n"),
            Err(MatrixError::InvalidShape(_))
        ));
        assert!(matches!(
            parse_pose_matrix("1 0 0 0\n0 1 0\n0 0 1 0\n0 0 0 1\n"),
            Err(MatrixError::InvalidShape(_))
        ));
        assert!(matches!(
            parse_pose_matrix("1 0 0 0\n0 1 0 0\n0 0 x 0\n0 0 0 1\n"),
            Err(MatrixError::Parse { row: 2, .. })
        ));
    }

    #[test]
    fn test_read_missing_file() {
        assert!(matches!(
            read_pose_matrix("/nonexistent/ob_in_cam/000001.txt"),
            Err(MatrixError::Io(_))
        ));
    }

    #[test]
    fn test_validate_rigid() -> Result<(), MatrixError> {
        let pose = PoseMatrix::from_parts(&rotation_z(0.7), &[0.1, 0.2, 0.3]);
        pose.validate(&PoseTolerance::default())?;
        assert_relative_eq!(determinant(&pose.rotation()), 1.0, epsilon = 1e-12);
        assert_relative_eq!(orthogonality_residual(&pose.rotation()), 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_validate_rounded_text() -> Result<(), MatrixError> {
        // values as the estimator writes them, truncated to 8 digits
        let text = "7.64842187e-01 -6.44217687e-01 0.00000000e+00 1.00000000e-01\n\
                    6.44217687e-01 7.64842187e-01 0.00000000e+00 2.00000000e-01\n\
                    0.00000000e+00 0.00000000e+00 1.00000000e+00 3.00000000e-01\n\
                    0.00000000e+00 0.00000000e+00 0.00000000e+00 1.00000000e+00\n";
        parse_pose_matrix(text)?.validate(&PoseTolerance::default())
    }

    #[test]
    fn test_validate_rejects_scaled_rotation() {
        let mut rotation = rotation_z(0.3);
        rotation.iter_mut().flatten().for_each(|v| *v *= 2.0);
        let pose = PoseMatrix::from_parts(&rotation, &[0.0; 3]);
        assert!(matches!(
            pose.validate(&PoseTolerance::default()),
            Err(MatrixError::NotOrthogonal { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_reflection() {
        let reflection = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]];
        let pose = PoseMatrix::from_parts(&reflection, &[0.0; 3]);
        match pose.validate(&PoseTolerance::default()) {
            Err(MatrixError::InvalidDeterminant { determinant, .. }) => {
                assert_relative_eq!(determinant, -1.0, epsilon = 1e-12)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_last_row() {
        let mut pose = PoseMatrix::identity();
        pose.0[3] = [0.0, 0.0, 1.0, 1.0];
        assert!(matches!(
            pose.validate(&PoseTolerance::default()),
            Err(MatrixError::InvalidHomogeneousRow(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut pose = PoseMatrix::identity();
        pose.0[0][3] = f64::NAN;
        assert!(matches!(
            pose.validate(&PoseTolerance::default()),
            Err(MatrixError::NonFinite)
        ));
    }

    #[test]
    fn test_serialize_nested() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(PoseMatrix::identity())?;
        assert_eq!(json[0], serde_json::json!([1.0, 0.0, 0.0, 0.0]));
        assert_eq!(json[3][3], serde_json::json!(1.0));
        Ok(())
    }
}
