//! rollcall-core — Face-recognition attendance engine.
//!
//! Builds a gallery of reference face embeddings, matches live captures
//! against it by Euclidean distance, and keeps a per-day attendance ledger.
//! Embeddings come from SCRFD detection + ArcFace recognition via ONNX Runtime.

pub mod annotate;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod enrollment;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod snapshot;
pub mod types;

pub use config::{Config, ConfigError};
pub use embedder::OnnxEmbedder;
pub use enrollment::{EnrollmentError, EnrollmentFlow};
pub use gallery::{EmbedError, Embedder, EmbeddingStore, GalleryError};
pub use ledger::{AttendanceLedger, LedgerError, LedgerRow};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
pub use session::{
    Attendance, CaptureResult, CaptureSession, Clock, Command, EnrollmentReceipt, FrameSource, Notice, Prompt,
    SessionConfig, SessionError, SessionState, SessionStatus, SystemClock,
};
pub use types::{Embedding, FaceBox, Gallery, Identity};
