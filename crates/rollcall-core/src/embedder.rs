//! ONNX-backed [`Embedder`]: SCRFD detection followed by ArcFace extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::gallery::{EmbedError, Embedder};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`. Missing files are an error.
    pub fn load(model_dir: &Path) -> Result<Self, ModelLoadError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }

    pub fn model_paths(model_dir: &Path) -> [PathBuf; 2] {
        [
            model_dir.join(DETECTOR_MODEL_FILE),
            model_dir.join(RECOGNIZER_MODEL_FILE),
        ]
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        let faces = self
            .detector
            .detect(image)
            .map_err(|e| EmbedError::Detection(e.to_string()))?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.recognizer.extract(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(?face, "face box outside frame; skipped");
                }
                Err(e) => return Err(EmbedError::Extraction(e.to_string())),
            }
        }
        Ok(embeddings)
    }
}
