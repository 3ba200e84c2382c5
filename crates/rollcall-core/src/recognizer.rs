//! ArcFace face recognizer via ONNX Runtime.
//!
//! Crops a detected face from an RGB frame, resizes it to 112×112 and
//! extracts an L2-normalized 512-dimensional embedding (w600k_r50).

use crate::types::{Embedding, FaceBox};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its size per side.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("recognizer inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract the embedding for `face` in `frame`.
    pub fn extract(&mut self, frame: &RgbImage, face: &FaceBox) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(frame, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(e.to_string()))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square-ish crop around `face` with margin, resized to the network input.
fn crop_face(frame: &RgbImage, face: &FaceBox) -> Option<RgbImage> {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let mx = face.width * CROP_MARGIN;
    let my = face.height * CROP_MARGIN;

    let x0 = (face.x - mx).clamp(0.0, fw);
    let y0 = (face.y - my).clamp(0.0, fh);
    let x1 = (face.x + face.width + mx).clamp(0.0, fw);
    let y1 = (face.y + face.height + my).clamp(0.0, fh);

    let (w, h) = ((x1 - x0).floor() as u32, (y1 - y0).floor() as u32);
    if w == 0 || h == 0 {
        return None;
    }
    let region = image::imageops::crop_imm(frame, x0 as u32, y0 as u32, w, h).to_image();
    Some(image::imageops::resize(&region, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_face_resizes_to_input() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([40, 80, 120]));
        let face = FaceBox { x: 100.0, y: 50.0, width: 60.0, height: 80.0, confidence: 0.9 };
        let crop = crop_face(&frame, &face).unwrap();
        assert_eq!(crop.dimensions(), (INPUT_SIZE, INPUT_SIZE));
        assert_eq!(crop.get_pixel(56, 56).0, [40, 80, 120]);
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = RgbImage::new(100, 100);
        let face = FaceBox { x: 150.0, y: 150.0, width: 20.0, height: 20.0, confidence: 0.9 };
        assert!(crop_face(&frame, &face).is_none());
    }

    #[test]
    fn test_tensor_normalization_per_channel() {
        let crop = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([255, 0, 128]));
        let t = to_tensor(&crop);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
