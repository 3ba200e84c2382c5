//! Interactive capture session: capture → match → record, or enroll.
//!
//! A `CaptureSession` exclusively owns the live gallery snapshot, the
//! embedding store and the ledger handle. Frontends drive it either through
//! the primitive operations (`on_capture_triggered`, `confirm_enrollment`,
//! `decline_enrollment`, `on_quit_triggered`) or through [`CaptureSession::run`]
//! with a [`Prompt`] implementation.

use crate::enrollment::{EnrollmentError, EnrollmentFlow};
use crate::gallery::{self, EmbedError, Embedder, EmbeddingStore, GalleryError};
use crate::ledger::{AttendanceLedger, LedgerError};
use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
use crate::snapshot::{self, SnapshotError};
use crate::types::{Gallery, Identity};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;
use thiserror::Error;

/// Default factor applied to frames before face extraction.
pub const DEFAULT_DOWNSCALE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session stopped")]
    Stopped,
    #[error("no enrollment is pending")]
    NoPendingEnrollment,
    #[error("frame capture failed: {0}")]
    Frame(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
}

/// Source of full-resolution RGB frames (a camera, a file, a test script).
///
/// `grab` may block; the session does not time it out.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn grab(&mut self) -> Result<RgbImage, Self::Error>;
}

/// Wall-clock time used for ledger entries and snapshot names.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local time from the system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Operator input for the interactive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Capture,
    Quit,
}

/// Interactive capability used by [`CaptureSession::run`].
pub trait Prompt {
    /// Block until the operator asks for a capture or to quit.
    fn next_command(&mut self) -> Command;

    /// Ask whether to register the unrecognized face; `Some(name)` confirms.
    fn confirm_enrollment(&mut self) -> Option<String>;

    /// Show what happened.
    fn report(&mut self, notice: &Notice);

    /// A capture or enrollment failed. Return `true` to keep the session going.
    fn keep_going(&mut self, error: &SessionError) -> bool;
}

/// Events surfaced to a [`Prompt`].
#[derive(Debug)]
pub enum Notice {
    Captured(CaptureResult),
    Enrolled(EnrollmentReceipt),
    EnrollmentSkipped,
    InvalidName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Capturing,
    Deciding,
    Recording,
    Enrolling,
    Stopped,
}

/// One recorded attendance from a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    pub identity: Identity,
    pub distance: f32,
    pub at: NaiveDateTime,
    pub snapshot: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureResult {
    /// No face in the frame; nothing was changed.
    NoFace,
    /// At least one face matched. `unmatched` faces in the same frame are ignored.
    Recognized { matches: Vec<Attendance>, unmatched: usize },
    /// Faces were found but none matched; an enrollment is now pending.
    Unrecognized { faces: usize },
}

impl CaptureResult {
    pub fn is_recognized(&self) -> bool {
        matches!(self, CaptureResult::Recognized { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub identity: Identity,
    pub at: NaiveDateTime,
    /// False when no face could be extracted from the saved reference image.
    pub recognizable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub gallery_size: usize,
    pub roster_size: usize,
    pub present_today: usize,
    pub enrollment_pending: bool,
}

/// Tunables for a capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tolerance: f32,
    /// Scale factor for the copy of each frame used for face extraction.
    pub downscale: f32,
    pub image_dir: PathBuf,
    pub captured_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl SessionConfig {
    pub fn new(image_dir: PathBuf, captured_dir: PathBuf, ledger_path: PathBuf) -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
            image_dir,
            captured_dir,
            ledger_path,
        }
    }
}

struct PendingEnrollment {
    frame: RgbImage,
    faces: usize,
}

pub struct CaptureSession<S, E> {
    config: SessionConfig,
    source: S,
    store: EmbeddingStore<E>,
    ledger: AttendanceLedger,
    gallery: Gallery,
    clock: Box<dyn Clock + Send>,
    state: SessionState,
    pending: Option<PendingEnrollment>,
}

impl<S: FrameSource, E: Embedder> CaptureSession<S, E> {
    /// Prepare directories, open the ledger, load the gallery and reconcile
    /// the ledger with the reference image roster.
    ///
    /// Fails if the ledger is malformed or the image directory is unreadable.
    pub fn start(config: SessionConfig, source: S, embedder: E) -> Result<Self, SessionError> {
        for dir in [&config.image_dir, &config.captured_dir] {
            std::fs::create_dir_all(dir).map_err(|e| SessionError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;
        }

        let mut ledger = AttendanceLedger::open(&config.ledger_path)?;
        let mut store = EmbeddingStore::new(&config.image_dir, embedder);
        let gallery = store.load()?;

        let roster = gallery::roster(&config.image_dir)?;
        let added = ledger.reconcile(&roster)?;

        tracing::info!(
            identities = gallery.len(),
            roster = ledger.len(),
            added,
            tolerance = config.tolerance,
            "capture session ready"
        );

        Ok(Self {
            config,
            source,
            store,
            ledger,
            gallery,
            clock: Box::new(SystemClock),
            state: SessionState::Idle,
            pending: None,
        })
    }

    /// Replace the clock (tests, replays).
    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Identities present on `date` with their recorded time.
    pub fn attendance_on(&self, date: NaiveDate) -> Vec<(Identity, NaiveTime)> {
        self.ledger.present_on(date)
    }

    /// Current date according to the session clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    pub fn status(&self) -> SessionStatus {
        let today = self.today();
        SessionStatus {
            state: self.state,
            gallery_size: self.gallery.len(),
            roster_size: self.ledger.len(),
            present_today: self.ledger.present_on(today).len(),
            enrollment_pending: self.pending.is_some(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }

    /// Capture a frame, match every face, and record or stage enrollment.
    ///
    /// A pending enrollment from an earlier capture is discarded. On error
    /// the session returns to `Idle` and may be triggered again.
    pub fn on_capture_triggered(&mut self) -> Result<CaptureResult, SessionError> {
        if self.state == SessionState::Stopped {
            return Err(SessionError::Stopped);
        }
        if let Some(p) = self.pending.take() {
            tracing::info!(faces = p.faces, "discarding unanswered enrollment");
        }

        let result = self.capture();
        if result.is_err() {
            self.transition(SessionState::Idle);
        }
        result
    }

    fn capture(&mut self) -> Result<CaptureResult, SessionError> {
        self.transition(SessionState::Capturing);
        let frame = self
            .source
            .grab()
            .map_err(|e| SessionError::Frame(Box::new(e)))?;

        let small = downscale(&frame, self.config.downscale);
        let probes = self.store.embed_probes(&small)?;
        tracing::debug!(
            width = frame.width(),
            height = frame.height(),
            faces = probes.len(),
            "frame captured"
        );

        if probes.is_empty() {
            self.transition(SessionState::Idle);
            return Ok(CaptureResult::NoFace);
        }

        self.transition(SessionState::Deciding);
        let outcomes = EuclideanMatcher.compare_all(&probes, &self.gallery, self.config.tolerance);

        if !outcomes.iter().any(MatchOutcome::is_match) {
            tracing::info!(faces = probes.len(), "no face recognized; enrollment pending");
            self.pending = Some(PendingEnrollment {
                frame,
                faces: probes.len(),
            });
            self.transition(SessionState::Enrolling);
            return Ok(CaptureResult::Unrecognized { faces: probes.len() });
        }

        self.transition(SessionState::Recording);
        let at = self.clock.now();
        let mut matches = Vec::new();
        let mut unmatched = 0usize;

        for outcome in outcomes {
            let MatchOutcome::Match { identity, distance } = outcome else {
                unmatched += 1;
                continue;
            };
            tracing::info!(identity = %identity, distance, "face recognized");
            self.ledger.record(&identity, at)?;
            let snapshot = snapshot::save_snapshot(&frame, &identity, at, &self.config.captured_dir)?;
            matches.push(Attendance {
                identity,
                distance,
                at,
                snapshot,
            });
        }

        self.transition(SessionState::Idle);
        Ok(CaptureResult::Recognized { matches, unmatched })
    }

    /// Register the face from the pending capture under `name`.
    ///
    /// An invalid name keeps the enrollment pending so it can be retried.
    pub fn confirm_enrollment(&mut self, name: &str) -> Result<EnrollmentReceipt, SessionError> {
        if self.state == SessionState::Stopped {
            return Err(SessionError::Stopped);
        }
        let pending = self.pending.take().ok_or(SessionError::NoPendingEnrollment)?;
        let at = self.clock.now();

        match EnrollmentFlow::register(name, &pending.frame, at, &mut self.store, &mut self.ledger) {
            Ok(enrolled) => {
                self.gallery = enrolled.gallery;
                self.transition(SessionState::Idle);
                Ok(EnrollmentReceipt {
                    identity: enrolled.identity,
                    at: enrolled.at,
                    recognizable: enrolled.recognizable,
                })
            }
            Err(e @ EnrollmentError::InvalidName(_)) => {
                self.pending = Some(pending);
                Err(e.into())
            }
            Err(e) => {
                self.transition(SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Drop the pending enrollment. Returns whether one was pending.
    pub fn decline_enrollment(&mut self) -> bool {
        let had = self.pending.take().is_some();
        if self.state == SessionState::Enrolling {
            self.transition(SessionState::Idle);
        }
        if had {
            tracing::info!("enrollment declined");
        }
        had
    }

    pub fn on_quit_triggered(&mut self) {
        self.pending = None;
        self.transition(SessionState::Stopped);
        tracing::info!("capture session stopped");
    }

    /// Drive the session from `prompt` until the operator quits.
    ///
    /// Returns the error that made the prompt give up, if any.
    pub fn run<P: Prompt>(&mut self, prompt: &mut P) -> Result<(), SessionError> {
        loop {
            if prompt.next_command() == Command::Quit {
                self.on_quit_triggered();
                return Ok(());
            }

            let result = match self.on_capture_triggered() {
                Ok(result) => result,
                Err(e) => {
                    if prompt.keep_going(&e) {
                        continue;
                    }
                    self.on_quit_triggered();
                    return Err(e);
                }
            };

            let needs_enrollment = matches!(result, CaptureResult::Unrecognized { .. });
            prompt.report(&Notice::Captured(result));
            if needs_enrollment {
                if let Err(e) = self.enroll_interactively(prompt) {
                    if !prompt.keep_going(&e) {
                        self.on_quit_triggered();
                        return Err(e);
                    }
                }
            }
        }
    }

    fn enroll_interactively<P: Prompt>(&mut self, prompt: &mut P) -> Result<(), SessionError> {
        loop {
            let Some(name) = prompt.confirm_enrollment() else {
                self.decline_enrollment();
                prompt.report(&Notice::EnrollmentSkipped);
                return Ok(());
            };
            match self.confirm_enrollment(&name) {
                Ok(receipt) => {
                    prompt.report(&Notice::Enrolled(receipt));
                    return Ok(());
                }
                Err(SessionError::Enrollment(EnrollmentError::InvalidName(bad))) => {
                    prompt.report(&Notice::InvalidName(bad));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reduced-resolution copy of `frame` for face extraction.
fn downscale(frame: &RgbImage, factor: f32) -> Cow<'_, RgbImage> {
    if !(factor > 0.0 && factor < 1.0) {
        return Cow::Borrowed(frame);
    }
    let width = ((frame.width() as f32 * factor).round() as u32).max(1);
    let height = ((frame.height() as f32 * factor).round() as u32).max(1);
    Cow::Owned(image::imageops::resize(frame, width, height, FilterType::Triangle))
}
