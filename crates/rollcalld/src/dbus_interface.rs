use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDate;
use rollcall_core::{EnrollmentError, SessionError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// Delay between answering `Quit` and closing the bus connection.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// D-Bus interface for the attendance kiosk daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Structured replies are JSON strings.
pub struct RollcallService {
    engine: EngineHandle,
    shutdown: Arc<Notify>,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, shutdown: Arc<Notify>) -> Self {
        Self { engine, shutdown }
    }
}

#[derive(Serialize)]
struct PresentEntry {
    identity: String,
    time: String,
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Capture one frame, match every face and record attendance.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture requested");
        let result = self.engine.capture().await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Register the face from the last unrecognized capture.
    async fn confirm_enrollment(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enrollment confirmation requested");
        let receipt = self
            .engine
            .confirm_enrollment(name.to_string())
            .await
            .map_err(to_fdo)?;
        to_json(&receipt)
    }

    /// Discard the pending enrollment. Returns whether one was pending.
    async fn decline_enrollment(&self) -> zbus::fdo::Result<bool> {
        self.engine.decline_enrollment().await.map_err(to_fdo)
    }

    /// Identities present on `date` (`YYYY-MM-DD`, empty for today).
    async fn attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let present: Vec<PresentEntry> = self
            .engine
            .attendance(date)
            .await
            .map_err(to_fdo)?
            .into_iter()
            .map(|(identity, time)| PresentEntry {
                identity,
                time: time.format("%H:%M:%S").to_string(),
            })
            .collect();
        to_json(&present)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": status.state,
            "gallery_size": status.gallery_size,
            "roster_size": status.roster_size,
            "present_today": status.present_today,
            "enrollment_pending": status.enrollment_pending,
        })
        .to_string())
    }

    /// Stop the session and shut the daemon down.
    async fn quit(&self) -> zbus::fdo::Result<()> {
        tracing::info!("quit requested");
        let result = self.engine.quit().await.map_err(to_fdo);
        schedule_shutdown(self.shutdown.clone());
        result
    }
}

/// `YYYY-MM-DD`, or `None` (today) for an empty string.
fn parse_date(date: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    if date.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date {date:?}: {e}")))
}

/// Signal shutdown once the current method reply has had time to go out.
fn schedule_shutdown(shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        shutdown.notify_one();
    })
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Session(SessionError::Enrollment(EnrollmentError::InvalidName(_)))
        | EngineError::Session(SessionError::NoPendingEnrollment) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::warn!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("").unwrap(), None);
        assert_eq!(
            parse_date("2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(matches!(
            parse_date("01/03/2024"),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_signalled_after_grace_period() {
        let shutdown = Arc::new(Notify::new());
        let started = tokio::time::Instant::now();
        schedule_shutdown(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), shutdown.notified())
            .await
            .unwrap();
        assert!(started.elapsed() >= SHUTDOWN_GRACE);
    }
}
