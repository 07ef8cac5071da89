use std::path::{Path, PathBuf};

use crate::request::DecodedRequest;

/// Error types for the scene module.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// Error creating, writing or removing a file or directory
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        /// Path being manipulated.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Directory tree holding everything the estimator needs for a single request.
///
/// ```text
/// <root>/cam_K.txt
/// <root>/rgb/<stem>.png
/// <root>/depth/<stem>.png
/// <root>/masks/<reference stem>.png
/// <root>/mesh/model.obj, model.mtl, texture.png
/// <root>/debug/
/// ```
#[derive(Debug, Clone)]
pub struct SceneLayout {
    root: PathBuf,
}

impl SceneLayout {
    /// Create the layout of request `request_id` under `output_dir`.
    ///
    /// Nothing is touched on disk until [`SceneLayout::write`] is called.
    pub fn new(output_dir: impl AsRef<Path>, request_id: &str) -> Self {
        Self {
            root: output_dir.as_ref().join(request_id),
        }
    }

    /// The same layout with its root resolved against the current directory.
    pub fn to_absolute(&self) -> std::io::Result<Self> {
        Ok(Self {
            root: absolute(&self.root)?,
        })
    }

    /// Root directory of the scene.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the camera intrinsics file.
    pub fn cam_k_path(&self) -> PathBuf {
        self.root.join("cam_K.txt")
    }

    /// Directory of the color images.
    pub fn rgb_dir(&self) -> PathBuf {
        self.root.join("rgb")
    }

    /// Directory of the depth images.
    pub fn depth_dir(&self) -> PathBuf {
        self.root.join("depth")
    }

    /// Directory of the segmentation masks.
    pub fn masks_dir(&self) -> PathBuf {
        self.root.join("masks")
    }

    /// Directory of the mesh files.
    pub fn mesh_dir(&self) -> PathBuf {
        self.root.join("mesh")
    }

    /// Path of the OBJ mesh handed to the estimator.
    pub fn mesh_file(&self) -> PathBuf {
        self.mesh_dir().join("model.obj")
    }

    /// Directory where the estimator writes its outputs.
    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }

    /// Path of the object-in-camera pose written by the estimator for frame `stem`.
    pub fn pose_file(&self, stem: &str) -> PathBuf {
        self.debug_dir().join("ob_in_cam").join(format!("{stem}.txt"))
    }

    /// Write the whole request to disk, creating the directory tree.
    pub fn write(&self, request: &DecodedRequest) -> Result<(), SceneError> {
        for dir in [
            self.rgb_dir(),
            self.depth_dir(),
            self.masks_dir(),
            self.mesh_dir(),
            self.debug_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| SceneError::Io { path: dir, source })?;
        }

        write_file(
            &self.cam_k_path(),
            format_camera_matrix(&request.camera_matrix).as_bytes(),
        )?;

        for frame in &request.frames {
            let name = format!("{}.png", frame.stem);
            write_file(&self.rgb_dir().join(&name), &frame.rgb)?;
            write_file(&self.depth_dir().join(&name), &frame.depth)?;
        }

        let mask_name = format!("{}.png", request.reference_frame().stem);
        write_file(&self.masks_dir().join(mask_name), &request.mask)?;

        write_file(&self.mesh_file(), &request.mesh.obj)?;
        if let Some(mtl) = &request.mesh.mtl {
            write_file(&self.mesh_dir().join("model.mtl"), mtl)?;
        }
        if let Some(texture) = &request.mesh.texture {
            write_file(&self.mesh_dir().join("texture.png"), texture)?;
        }

        log::debug!(
            "wrote scene with {} frame(s) to {}",
            request.frames.len(),
            self.root.display()
        );

        Ok(())
    }

    /// Delete the scene directory and everything in it.
    pub fn remove(&self) -> Result<(), SceneError> {
        std::fs::remove_dir_all(&self.root).map_err(|source| SceneError::Io {
            path: self.root.clone(),
            source,
        })
    }
}

/// Format the camera intrinsics as three space separated rows.
pub fn format_camera_matrix(k: &[[f64; 3]; 3]) -> String {
    k.iter()
        .map(|row| format!("{} {} {}\n", row[0], row[1], row[2]))
        .collect()
}

/// Resolve `path` against the current directory if it is relative.
pub(crate) fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), SceneError> {
    std::fs::write(path, data).map_err(|source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    })
}
