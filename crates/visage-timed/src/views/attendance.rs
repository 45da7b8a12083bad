use super::{RecentFeed, ViewContext};
use crate::capture::{CaptureController, CaptureEvent, CaptureStatus};
use crate::records::save_attendance_record;
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use visage_time_core::capture::CaptureError;
use visage_time_core::{datetime, AttendanceRecord, DetectionMode, NewAttendance};

/// Last recognition, shown until the hold period ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recognition {
    pub name: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceStatus {
    pub capture: CaptureStatus,
    pub result: Option<Recognition>,
    pub recent: Vec<AttendanceRecord>,
}

pub struct AttendanceView {
    feed: RecentFeed,
    capture: Arc<Mutex<CaptureController>>,
    result: Arc<StdMutex<Option<Recognition>>>,
    handler: JoinHandle<()>,
}

impl AttendanceView {
    pub async fn enter(ctx: ViewContext) -> Self {
        let feed = RecentFeed::spawn(ctx.store.as_ref());
        let (mut capture, events) = CaptureController::new(
            ctx.source.clone(),
            DetectionMode::Recognize,
            ctx.config.detect_interval,
            ctx.config.recognition_delay,
        );
        let _ = capture.prepare().await;

        let capture = Arc::new(Mutex::new(capture));
        let result = Arc::new(StdMutex::new(None));
        let handler = tokio::spawn(handle_recognitions(
            ctx,
            events,
            capture.clone(),
            result.clone(),
        ));

        Self {
            feed,
            capture,
            result,
            handler,
        }
    }

    pub async fn start_detection(&self) -> Result<(), CaptureError> {
        self.capture.lock().await.start()
    }

    pub async fn status(&self) -> AttendanceStatus {
        let capture = self.capture.lock().await.status();
        let result = self.result.lock().unwrap_or_else(|e| e.into_inner()).clone();
        AttendanceStatus {
            capture,
            result,
            recent: self.feed.recent(),
        }
    }

    /// Ends the subscription, pending timers and the camera stream.
    pub async fn leave(self) {
        self.handler.abort();
        self.capture.lock().await.teardown().await;
    }
}

/// Record attendance for each recognition, hold the result on screen, then
/// start over with a fresh capture session.
async fn handle_recognitions(
    ctx: ViewContext,
    mut events: mpsc::UnboundedReceiver<CaptureEvent>,
    capture: Arc<Mutex<CaptureController>>,
    result: Arc<StdMutex<Option<Recognition>>>,
) {
    let set_result = |value: Option<Recognition>| {
        *result.lock().unwrap_or_else(|e| e.into_inner()) = value;
    };

    while let Some(CaptureEvent::Recognized(identity)) = events.recv().await {
        let now = chrono::Local::now();
        let time = datetime::format_time(&now.naive_local());
        let date = datetime::format_date(&now.date_naive());

        let user = ctx.auth.current_user();
        let name = user.as_ref().map(|u| u.name.clone()).unwrap_or(identity);
        let user_id = user.map(|u| u.id).unwrap_or_else(|| "unknown".to_string());

        set_result(Some(Recognition {
            name: name.clone(),
            time: time.clone(),
        }));

        let record = NewAttendance {
            name: name.clone(),
            time: time.clone(),
            date,
            user_id,
        };
        match save_attendance_record(ctx.store.as_ref(), record).await {
            Ok(_) => ctx
                .notifier
                .success("Attendance Recorded", format!("{name} marked present at {time}")),
            Err(e) => {
                tracing::error!(error = %e, "failed to save attendance");
                ctx.notifier
                    .error("Error", "Failed to save attendance record");
            }
        }

        tokio::time::sleep(ctx.config.result_hold).await;
        set_result(None);
        capture.lock().await.stop();
        tracing::debug!("attendance capture reset");
    }
}
