//! Location of the ONNX model files.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::bail;

const MODEL_DIR_VAR: &str = "SMART_VISION_MODEL_DIR";
const DEFAULT_MODEL_DIR: &str = "models";

pub const FACE_DETECTION: &str = "face_detection_short_range.onnx";
pub const EMOTION_FERPLUS: &str = "emotion-ferplus-8.onnx";
pub const PALM_DETECTION: &str = "palm_detection_full.onnx";
pub const HAND_LANDMARK: &str = "hand_landmark_full.onnx";

/// Directory that the networks are loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDir {
    path: PathBuf,
}

impl ModelDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Uses `$SMART_VISION_MODEL_DIR` if set, `./models` otherwise.
    pub fn from_env() -> Self {
        match env::var_os(MODEL_DIR_VAR) {
            Some(dir) => Self::new(dir),
            None => Self::new(DEFAULT_MODEL_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the model file `name`, failing if it does not exist.
    pub fn path(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.path.join(name);
        if !path.is_file() {
            bail!(
                "model file {} not found (set `{MODEL_DIR_VAR}` to the directory containing it)",
                path.display()
            );
        }
        Ok(path)
    }
}

impl Default for ModelDir {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_reported() {
        let dir = ModelDir::new("/nonexistent/model/dir");
        let err = dir.path(FACE_DETECTION).unwrap_err().to_string();
        assert!(err.contains(FACE_DETECTION), "{err}");
        assert!(err.contains(MODEL_DIR_VAR), "{err}");
    }

    #[test]
    fn finds_existing_file() {
        let dir = ModelDir::new(env!("CARGO_MANIFEST_DIR"));
        assert_eq!(
            dir.path("Cargo.toml").unwrap(),
            Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
        );
    }
}
