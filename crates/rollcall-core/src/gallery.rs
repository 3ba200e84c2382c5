//! Reference image directory scanning and gallery construction.

use crate::types::{Embedding, Gallery, Identity};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as reference images (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("embedding extraction failed: {0}")]
    Extraction(String),
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read image directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns an RGB image into one embedding per detected face.
///
/// Faces are returned most-confident first. An empty vector means no face
/// was found, which is a normal outcome and not an error.
pub trait Embedder {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        (**self).embed(image)
    }
}

/// Whether `path` has one of the supported reference image extensions.
pub fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Identity for a reference image: the file name with its extension stripped.
pub fn identity_for(path: &Path) -> Option<Identity> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// List reference image files in `dir`, sorted by file name.
pub fn list_reference_images(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| GalleryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_reference_image(p))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Identities named by the reference images in `dir`, in scan order, deduplicated.
///
/// Includes images in which no face can be detected.
pub fn roster(dir: &Path) -> Result<Vec<Identity>, GalleryError> {
    let mut names: Vec<Identity> = Vec::new();
    for path in list_reference_images(dir)? {
        if let Some(name) = identity_for(&path) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Builds gallery snapshots from a directory of reference images.
pub struct EmbeddingStore<E> {
    image_dir: PathBuf,
    embedder: E,
}

impl<E: Embedder> EmbeddingStore<E> {
    pub fn new(image_dir: impl Into<PathBuf>, embedder: E) -> Self {
        Self {
            image_dir: image_dir.into(),
            embedder,
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Scan the image directory and embed the first face of every reference image.
    ///
    /// Unreadable images, images without a detectable face, and images the
    /// embedder fails on are skipped. When two files share a stem, the one
    /// later in file-name order replaces the earlier one.
    pub fn load(&mut self) -> Result<Gallery, GalleryError> {
        let mut gallery = Gallery::new();
        let paths = list_reference_images(&self.image_dir)?;
        let mut skipped = 0usize;

        for path in &paths {
            let Some(identity) = identity_for(path) else {
                skipped += 1;
                continue;
            };

            let image = match image::open(path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable reference image");
                    skipped += 1;
                    continue;
                }
            };

            match self.embedder.embed(&image) {
                Ok(faces) => match faces.into_iter().next() {
                    Some(embedding) => gallery.insert(identity, embedding),
                    None => {
                        tracing::debug!(path = %path.display(), "no face in reference image");
                        skipped += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "embedding failed for reference image");
                    skipped += 1;
                }
            }
        }

        tracing::info!(
            dir = %self.image_dir.display(),
            files = paths.len(),
            identities = gallery.len(),
            skipped,
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Rebuild the gallery after the image directory changed.
    pub fn reload(&mut self) -> Result<Gallery, GalleryError> {
        self.load()
    }

    /// Embed every face in a probe image.
    pub fn embed_probes(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        self.embedder.embed(image)
    }
}

/// Test embedder: a solid-colour image is one "face" whose embedding is its
/// mean colour scaled to [0, 1]. Black images have no face. A green channel
/// above 200 adds a second face with embedding `[1, 1, 1]`.
#[cfg(test)]
pub(crate) struct ColorEmbedder;

#[cfg(test)]
impl Embedder for ColorEmbedder {
    fn embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        let n = (image.width() * image.height()).max(1) as f32;
        let mut sum = [0f32; 3];
        for p in image.pixels() {
            for c in 0..3 {
                sum[c] += p.0[c] as f32;
            }
        }
        let mean: Vec<f32> = sum.iter().map(|s| s / n / 255.0).collect();
        if mean.iter().all(|&v| v < 0.02) {
            return Ok(Vec::new());
        }
        let mut faces = vec![Embedding::new(mean.clone())];
        if mean[1] > 200.0 / 255.0 {
            faces.push(Embedding::new(vec![1.0, 1.0, 1.0]));
        }
        Ok(faces)
    }
}

#[cfg(test)]
pub(crate) fn solid(r: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(16, 16, image::Rgb([r, g, b]))
}
