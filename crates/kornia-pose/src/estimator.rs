use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    matrix::{read_pose_matrix, MatrixError, PoseMatrix},
    scene::{absolute, SceneLayout},
};

/// Error types for the estimator backends.
#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    /// The estimator process could not be started
    #[error("Failed to launch the pose estimator: {0}")]
    Spawn(std::io::Error),

    /// The estimator exited with a failure status
    #[error("Pose estimator exited with status {status:?}")]
    Failed {
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The estimator did not finish in time
    #[error("Pose estimator timed out after {0:?}")]
    Timeout(Duration),

    /// The estimator finished but its output is missing or malformed
    #[error("Failed to read the estimated pose: {0}")]
    Output(#[from] MatrixError),
}

impl EstimatorError {
    /// Details suitable for reporting back to a client.
    pub fn details(&self) -> String {
        match self {
            EstimatorError::Failed { stderr, .. } if !stderr.trim().is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Which frames of a scene the estimator works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimationTarget {
    /// Frame the object is registered on, the one with a mask.
    pub reference_frame: String,
    /// Frame whose pose is reported.
    pub final_frame: String,
    /// Number of frames in the scene.
    pub num_frames: usize,
}

/// A backend estimating the pose of the scene object.
///
/// Implementations receive a fully written [`SceneLayout`] and return the
/// object-in-camera transformation of the target's final frame. The matrix is
/// validated by the caller.
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    /// Run the estimation on `scene`.
    async fn estimate(
        &self,
        scene: &SceneLayout,
        target: &EstimationTarget,
    ) -> Result<PoseMatrix, EstimatorError>;
}

/// Configuration of the [`SubprocessEstimator`].
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Interpreter or executable to launch.
    pub program: PathBuf,
    /// Script passed as first argument. Its directory is used as working directory.
    pub script: PathBuf,
    /// Extra arguments appended after the scene arguments.
    pub extra_args: Vec<String>,
    /// Maximum run time. The process is killed when exceeded.
    pub timeout: Option<Duration>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self::foundation_pose(default_foundation_pose_root(
            std::env::var_os("HOME").map(PathBuf::from),
        ))
    }
}

/// `<home>/FoundationPose`, or `./FoundationPose` when no home directory is known.
fn default_foundation_pose_root(home: Option<PathBuf>) -> PathBuf {
    match home {
        Some(home) => home.join("FoundationPose"),
        None => {
            let root = PathBuf::from(".").join("FoundationPose");
            log::warn!(
                "HOME is not set, looking for the estimator in {}",
                root.display()
            );
            root
        }
    }
}

impl SubprocessConfig {
    /// Run `run_demo.py` of a FoundationPose checkout with `python`.
    pub fn foundation_pose(root: impl AsRef<Path>) -> Self {
        Self {
            program: PathBuf::from("python"),
            script: root.as_ref().join("run_demo.py"),
            extra_args: Vec::new(),
            timeout: None,
        }
    }
}

/// Runs an external estimator script on the scene directory.
///
/// The command line is
/// `program script --test_scene_dir <scene> --mesh_file <mesh> --debug_dir <debug> [extra_args]`
/// and the pose is read back from `<debug>/ob_in_cam/<final frame>.txt`.
pub struct SubprocessEstimator {
    config: SubprocessConfig,
}

impl SubprocessEstimator {
    /// Create a new estimator with the given configuration.
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    /// The estimator configuration.
    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    fn command(&self, scene: &SceneLayout) -> Result<tokio::process::Command, EstimatorError> {
        // the working directory changes, so every path handed over must be absolute
        let scene = scene.to_absolute().map_err(EstimatorError::Spawn)?;
        let script = absolute(&self.config.script).map_err(EstimatorError::Spawn)?;

        let mut cmd = tokio::process::Command::new(&self.config.program);
        cmd.arg(&script)
            .arg("--test_scene_dir")
            .arg(scene.root())
            .arg("--mesh_file")
            .arg(scene.mesh_file())
            .arg("--debug_dir")
            .arg(scene.debug_dir())
            .args(&self.config.extra_args)
            .kill_on_drop(true);

        if let Some(dir) = script.parent() {
            cmd.current_dir(dir);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl PoseEstimator for SubprocessEstimator {
    async fn estimate(
        &self,
        scene: &SceneLayout,
        target: &EstimationTarget,
    ) -> Result<PoseMatrix, EstimatorError> {
        let mut cmd = self.command(scene)?;
        log::debug!("running pose estimator: {:?}", cmd);

        let output = match self.config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| EstimatorError::Timeout(timeout))?,
            None => cmd.output().await,
        }
        .map_err(EstimatorError::Spawn)?;

        log::debug!(
            "pose estimator stdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        );

        if !output.status.success() {
            return Err(EstimatorError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(read_pose_matrix(scene.pose_file(&target.final_frame))?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const FAKE_ESTIMATOR: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --test_scene_dir) scene="$2"; shift 2 ;;
    --mesh_file) mesh="$2"; shift 2 ;;
    --debug_dir) debug="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -f "$scene/cam_K.txt" ] || { echo "missing cam_K.txt" >&2; exit 4; }
[ -f "$mesh" ] || { echo "missing mesh" >&2; exit 5; }
mkdir -p "$debug/ob_in_cam"
printf '1 0 0 0.1\n0 1 0 0.2\n0 0 1 0.3\n0 0 0 1\n' > "$debug/ob_in_cam/000001.txt"
"#;

    fn setup(script: &str) -> Result<(tempfile::TempDir, SubprocessEstimator, SceneLayout), std::io::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let script_path = tmp_dir.path().join("run_demo.sh");
        std::fs::write(&script_path, script)?;

        let scene = SceneLayout::new(tmp_dir.path(), "request");
        std::fs::create_dir_all(scene.mesh_dir())?;
        std::fs::write(scene.cam_k_path(), "1 0 0\n0 1 0\n0 0 1\n")?;
        std::fs::write(scene.mesh_file(), "v 0 0 0\n")?;

        let estimator = SubprocessEstimator::new(SubprocessConfig {
            program: PathBuf::from("sh"),
            script: script_path,
            extra_args: vec!["--est_refine_iter".to_string(), "5".to_string()],
            timeout: Some(Duration::from_secs(30)),
        });
        Ok((tmp_dir, estimator, scene))
    }

    fn target(frame: &str) -> EstimationTarget {
        EstimationTarget {
            reference_frame: frame.to_string(),
            final_frame: frame.to_string(),
            num_frames: 1,
        }
    }

    #[test]
    fn test_default_config() {
        let config = SubprocessConfig::foundation_pose("/opt/FoundationPose");
        assert_eq!(config.program, PathBuf::from("python"));
        assert_eq!(config.script, PathBuf::from("/opt/FoundationPose/run_demo.py"));
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_default_root_without_home() {
        assert_eq!(
            default_foundation_pose_root(None),
            PathBuf::from("./FoundationPose")
        );
        assert_eq!(
            default_foundation_pose_root(Some(PathBuf::from("/home/user"))),
            PathBuf::from("/home/user/FoundationPose")
        );
    }

    #[tokio::test]
    async fn test_subprocess_success() -> Result<(), Box<dyn std::error::Error>> {
        let (_tmp_dir, estimator, scene) = setup(FAKE_ESTIMATOR)?;
        let pose = estimator.estimate(&scene, &target("000001")).await?;
        assert_eq!(pose.translation(), [0.1, 0.2, 0.3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_subprocess_missing_output() -> Result<(), Box<dyn std::error::Error>> {
        let (_tmp_dir, estimator, scene) = setup(FAKE_ESTIMATOR)?;
        let result = estimator.estimate(&scene, &target("000042")).await;
        assert!(matches!(
            result,
            Err(EstimatorError::Output(MatrixError::Io(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_subprocess_failure() -> Result<(), Box<dyn std::error::Error>> {
        let (_tmp_dir, estimator, scene) = setup("echo 'CUDA out of memory' >&2\nexit 3\n")?;
        match estimator.estimate(&scene, &target("000001")).await {
            Err(err @ EstimatorError::Failed { .. }) => {
                assert!(matches!(err, EstimatorError::Failed { status: Some(3), .. }));
                assert_eq!(err.details().trim(), "CUDA out of memory");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_subprocess_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let (_tmp_dir, mut estimator, scene) = setup("sleep 5\n")?;
        estimator.config.timeout = Some(Duration::from_millis(100));
        let result = estimator.estimate(&scene, &target("000001")).await;
        assert!(matches!(result, Err(EstimatorError::Timeout(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_subprocess_spawn_error() -> Result<(), Box<dyn std::error::Error>> {
        let (_tmp_dir, mut estimator, scene) = setup(FAKE_ESTIMATOR)?;
        estimator.config.program = PathBuf::from("/nonexistent/python");
        let result = estimator.estimate(&scene, &target("000001")).await;
        assert!(matches!(result, Err(EstimatorError::Spawn(_))));
        Ok(())
    }
}
