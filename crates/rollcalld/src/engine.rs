use chrono::{NaiveDate, NaiveTime};
use rollcall_core::embedder::ModelLoadError;
use rollcall_core::{
    CaptureResult, CaptureSession, Config, Embedder, EnrollmentReceipt, FrameSource, Identity,
    OnnxEmbedder, SessionError, SessionStatus,
};
use rollcall_hw::{Camera, CameraError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("model error: {0}")]
    Models(#[from] ModelLoadError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<CaptureResult, EngineError>>,
    },
    ConfirmEnrollment {
        name: String,
        reply: oneshot::Sender<Result<EnrollmentReceipt, EngineError>>,
    },
    DeclineEnrollment {
        reply: oneshot::Sender<bool>,
    },
    Attendance {
        date: Option<NaiveDate>,
        reply: oneshot::Sender<Vec<(Identity, NaiveTime)>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Capture a frame, match it and record attendance.
    pub async fn capture(&self) -> Result<CaptureResult, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    /// Register the pending unrecognized face under `name`.
    pub async fn confirm_enrollment(&self, name: String) -> Result<EnrollmentReceipt, EngineError> {
        self.request(|reply| EngineRequest::ConfirmEnrollment { name, reply })
            .await?
    }

    pub async fn decline_enrollment(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::DeclineEnrollment { reply })
            .await
    }

    /// Identities present on `date`; `None` means today on the session clock.
    pub async fn attendance(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<(Identity, NaiveTime)>, EngineError> {
        self.request(|reply| EngineRequest::Attendance { date, reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Stop the session. The engine thread exits after replying.
    pub async fn quit(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Quit { reply }).await
    }
}

/// Open the camera, load both ONNX models and start the capture session
/// on a dedicated OS thread. Fails fast if any resource is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    camera.warm_up(config.warmup_frames);

    let embedder = OnnxEmbedder::load(&config.model_dir)?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let session = CaptureSession::start(config.session(), camera, embedder)?;
    spawn_session(session)
}

/// Serve requests against `session` on a thread named `rollcall-engine`.
pub fn spawn_session<S, E>(mut session: CaptureSession<S, E>) -> Result<EngineHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    E: Embedder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { reply } => {
                        let _ = reply.send(session.on_capture_triggered().map_err(Into::into));
                    }
                    EngineRequest::ConfirmEnrollment { name, reply } => {
                        let _ = reply.send(session.confirm_enrollment(&name).map_err(Into::into));
                    }
                    EngineRequest::DeclineEnrollment { reply } => {
                        let _ = reply.send(session.decline_enrollment());
                    }
                    EngineRequest::Attendance { date, reply } => {
                        let date = date.unwrap_or_else(|| session.today());
                        let _ = reply.send(session.attendance_on(date));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(session.status());
                    }
                    EngineRequest::Quit { reply } => {
                        session.on_quit_triggered();
                        let _ = reply.send(());
                        break;
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
