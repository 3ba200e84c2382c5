//! Labeled attendance snapshots and enrollment reference images.

use crate::annotate::{self, LABEL_COLOR};
use crate::gallery;
use chrono::NaiveDateTime;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LABEL_ORIGIN: (u32, u32) = (50, 50);
const LABEL_SCALE: u32 = 2;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to remove stale reference image {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `{identity}_{YYYY-MM-DD_HH-MM-SS}.jpg`
pub fn snapshot_file_name(identity: &str, at: NaiveDateTime) -> String {
    format!("{identity}_{}.jpg", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Text burned into a snapshot: `{identity} - Date: {date} Time: {time}`.
pub fn snapshot_label(identity: &str, at: NaiveDateTime) -> String {
    format!(
        "{identity} - Date: {} Time: {}",
        at.format("%Y-%m-%d"),
        at.format("%H-%M-%S")
    )
}

/// Annotate a copy of `frame` and save it into `dir`. Returns the written path.
pub fn save_snapshot(
    frame: &RgbImage,
    identity: &str,
    at: NaiveDateTime,
    dir: &Path,
) -> Result<PathBuf, SnapshotError> {
    let mut labeled = frame.clone();
    let (x, y) = LABEL_ORIGIN;
    annotate::draw_text(&mut labeled, x, y, &snapshot_label(identity, at), LABEL_SCALE, LABEL_COLOR);

    let path = dir.join(snapshot_file_name(identity, at));
    write_image(&labeled, &path)?;
    tracing::info!(identity, path = %path.display(), "snapshot saved");
    Ok(path)
}

/// Save an un-annotated reference image `{identity}.jpg` into `dir`.
///
/// Existing reference images with the same stem (`.png`, `.JPEG`, ...) are
/// removed first; afterwards `{identity}.jpg` is the identity's only image.
pub fn save_reference(frame: &RgbImage, identity: &str, dir: &Path) -> Result<PathBuf, SnapshotError> {
    let path = dir.join(format!("{identity}.jpg"));

    let stale = gallery::list_reference_images(dir)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| gallery::identity_for(p).as_deref() == Some(identity));
    for old in stale {
        std::fs::remove_file(&old).map_err(|source| SnapshotError::Remove {
            path: old.clone(),
            source,
        })?;
        tracing::info!(identity, path = %old.display(), "previous reference image removed");
    }

    write_image(frame, &path)?;
    tracing::info!(identity, path = %path.display(), "reference image saved");
    Ok(path)
}

fn write_image(img: &RgbImage, path: &Path) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SnapshotError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    img.save(path).map_err(|source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-10-17 08:04:09", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_snapshot_naming() {
        assert_eq!(snapshot_file_name("alice", at()), "alice_2026-10-17_08-04-09.jpg");
        assert_eq!(
            snapshot_label("alice", at()),
            "alice - Date: 2026-10-17 Time: 08-04-09"
        );
    }

    #[test]
    fn test_save_snapshot_writes_annotated_copy() {
        let dir = TempDir::new().unwrap();
        let frame = RgbImage::from_pixel(640, 120, image::Rgb([10, 10, 10]));

        let path = save_snapshot(&frame, "alice", at(), &dir.path().join("caps")).unwrap();

        assert!(path.ends_with("alice_2026-10-17_08-04-09.jpg"));
        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), frame.dimensions());
        // The source frame is untouched; the saved copy carries green text.
        assert!(frame.pixels().all(|p| p.0 == [10, 10, 10]));
        assert!(saved.pixels().any(|p| p.0[1] > 150 && p.0[0] < 100));
    }

    #[test]
    fn test_save_reference_overwrites() {
        let dir = TempDir::new().unwrap();
        let first = save_reference(&RgbImage::new(8, 8), "bob", dir.path()).unwrap();
        let second =
            save_reference(&RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255])), "bob", dir.path())
                .unwrap();
        assert_eq!(first, second);
        let saved = image::open(&second).unwrap().to_rgb8();
        assert!(saved.get_pixel(4, 4).0[0] > 200);
    }

    #[test]
    fn test_save_reference_removes_other_extensions() {
        let dir = TempDir::new().unwrap();
        for name in ["bob.png", "bob.JPEG", "bobby.png"] {
            RgbImage::new(4, 4).save_with_format(dir.path().join(name), image::ImageFormat::Png).unwrap();
        }

        save_reference(&RgbImage::new(8, 8), "bob", dir.path()).unwrap();

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["bob.jpg", "bobby.png"]);
    }
}
