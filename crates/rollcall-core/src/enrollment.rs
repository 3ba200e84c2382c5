//! Registration of an unrecognized face as a new identity.

use crate::gallery::{Embedder, EmbeddingStore, GalleryError};
use crate::ledger::{AttendanceLedger, LedgerError};
use crate::snapshot::{self, SnapshotError};
use crate::types::{Gallery, Identity};
use chrono::NaiveDateTime;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("invalid identity name {0:?}: must be non-empty and usable as a file name")]
    InvalidName(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Outcome of a successful registration.
#[derive(Debug)]
pub struct Enrolled {
    pub identity: Identity,
    pub at: NaiveDateTime,
    /// Fresh gallery snapshot that includes the new reference image.
    pub gallery: Gallery,
    /// Whether the new reference image yielded an embedding.
    pub recognizable: bool,
}

/// Normalize a user-supplied name into an identity.
///
/// Surrounding whitespace is trimmed. Names that cannot serve as a file
/// stem in the image directory are rejected. Existing identities are not
/// rejected; registering one again replaces its reference image.
pub fn validate_name(name: &str) -> Result<Identity, EnrollmentError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.contains(['/', '\\', '\0'])
        || trimmed.chars().any(char::is_control);
    if bad {
        return Err(EnrollmentError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Writes the reference image, records attendance, and rebuilds the gallery.
pub struct EnrollmentFlow;

impl EnrollmentFlow {
    /// Register `name` from `frame` (the full-resolution capture).
    ///
    /// Order: reference image into the store's image directory, ledger
    /// entry at `at`, then a full gallery reload.
    pub fn register<E: Embedder>(
        name: &str,
        frame: &RgbImage,
        at: NaiveDateTime,
        store: &mut EmbeddingStore<E>,
        ledger: &mut AttendanceLedger,
    ) -> Result<Enrolled, EnrollmentError> {
        let identity = validate_name(name)?;

        snapshot::save_reference(frame, &identity, store.image_dir())?;
        ledger.record(&identity, at)?;
        let gallery = store.reload()?;

        let recognizable = gallery.contains(&identity);
        if !recognizable {
            tracing::warn!(identity = %identity, "enrolled image has no detectable face; identity will not be recognized");
        }
        tracing::info!(identity = %identity, gallery = gallery.len(), "new identity enrolled");

        Ok(Enrolled {
            identity,
            at,
            gallery,
            recognizable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::{solid, ColorEmbedder};
    use tempfile::TempDir;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-10-17 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Alice Smith ").unwrap(), "Alice Smith");
        for bad in ["", "   ", "../etc", "a/b", "a\\b", ".hidden", "tab\tname"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_register_round_trip() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("faces");
        std::fs::create_dir_all(&images).unwrap();
        let mut store = EmbeddingStore::new(&images, ColorEmbedder);
        let mut ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();

        let enrolled =
            EnrollmentFlow::register("alice", &solid(180, 60, 20), now(), &mut store, &mut ledger).unwrap();

        assert!(enrolled.recognizable);
        assert!(enrolled.gallery.contains("alice"));
        assert!(images.join("alice.jpg").exists());
        assert!(ledger.time_of("alice", now().date()).is_some());

        // A fresh load sees the same identity.
        assert!(store.load().unwrap().contains("alice"));
    }

    #[test]
    fn test_reregister_replaces_existing_reference() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("faces");
        std::fs::create_dir_all(&images).unwrap();
        solid(200, 0, 0).save(images.join("alice.png")).unwrap();
        let mut store = EmbeddingStore::new(&images, ColorEmbedder);
        let mut ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();
        assert!(store.load().unwrap().get("alice").unwrap().values[0] > 0.7);

        let enrolled =
            EnrollmentFlow::register("alice", &solid(0, 0, 200), now(), &mut store, &mut ledger).unwrap();

        let e = enrolled.gallery.get("alice").unwrap();
        assert!(e.values[0] < 0.1 && e.values[2] > 0.7, "{e:?}");
        assert_eq!(enrolled.gallery.len(), 1);
        assert!(!images.join("alice.png").exists());
    }

    #[test]
    fn test_register_faceless_frame_still_records() {
        let dir = TempDir::new().unwrap();
        let mut store = EmbeddingStore::new(dir.path(), ColorEmbedder);
        let mut ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();

        let enrolled =
            EnrollmentFlow::register("bob", &solid(0, 0, 0), now(), &mut store, &mut ledger).unwrap();

        assert!(!enrolled.recognizable);
        assert!(ledger.contains("bob"));
    }

    #[test]
    fn test_register_rejects_bad_name_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut store = EmbeddingStore::new(dir.path(), ColorEmbedder);
        let mut ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();

        let result = EnrollmentFlow::register(" ", &solid(90, 90, 90), now(), &mut store, &mut ledger);

        assert!(matches!(result, Err(EnrollmentError::InvalidName(_))));
        assert!(ledger.is_empty());
    }
}
