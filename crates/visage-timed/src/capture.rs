//! Polling detection loop behind the registration and attendance views.

use crate::engine::{EngineError, FaceSource};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use visage_time_core::capture::{CaptureError, DetectionAction};
use visage_time_core::{CaptureSession, DetectionMode, DetectionState};

const MODELS_FAILED: &str = "Failed to load face detection models. Please try again.";
const CAMERA_FAILED: &str = "Unable to access camera. Please check permissions and try again.";
const MODELS_PENDING: &str = "Face detection models not loaded yet. Please wait.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Recognized(String),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub mode: DetectionMode,
    pub state: DetectionState,
    pub models_loaded: bool,
    pub detecting: bool,
    pub face_detected: bool,
    pub error: Option<String>,
}

pub struct CaptureController {
    source: Arc<dyn FaceSource>,
    session: Arc<Mutex<CaptureSession>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    task: Option<JoinHandle<()>>,
    interval: Duration,
    recognition_delay: Duration,
    error: Option<String>,
    closed: bool,
}

impl CaptureController {
    pub fn new(
        source: Arc<dyn FaceSource>,
        mode: DetectionMode,
        interval: Duration,
        recognition_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            source,
            session: Arc::new(Mutex::new(CaptureSession::new(mode))),
            events,
            task: None,
            interval,
            recognition_delay,
            error: None,
            closed: false,
        };
        (controller, rx)
    }

    fn session(&self) -> std::sync::MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the models, then open the camera. The camera is only opened once
    /// the models are available.
    pub async fn prepare(&mut self) -> Result<(), EngineError> {
        if let Err(e) = self.source.load_models().await {
            tracing::error!(error = %e, "error loading face detection models");
            self.error = Some(MODELS_FAILED.to_string());
            return Err(e);
        }
        self.session().set_models_loaded(true);

        if let Err(e) = self.source.open_camera().await {
            tracing::error!(error = %e, "error accessing camera");
            self.error = Some(CAMERA_FAILED.to_string());
            return Err(e);
        }
        self.closed = false;
        self.error = None;
        Ok(())
    }

    /// Begin polling. Restarting clears any found face and pending
    /// recognition.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if let Err(e) = self.session().start() {
            self.error = Some(MODELS_PENDING.to_string());
            return Err(e);
        }
        self.abort_task();
        self.task = Some(tokio::spawn(run_detection(
            self.source.clone(),
            self.session.clone(),
            self.events.clone(),
            self.interval,
            self.recognition_delay,
        )));
        tracing::debug!(mode = ?self.session().mode(), "detection started");
        Ok(())
    }

    /// Freeze the current frame and stop detecting. Registration only, and
    /// only while a face is in view.
    pub async fn capture(&mut self) -> Result<String, ControlError> {
        {
            let session = self.session();
            if session.mode() != DetectionMode::Register {
                return Err(CaptureError::WrongMode.into());
            }
            if !session.face_detected() {
                return Err(CaptureError::NoFace.into());
            }
        }
        let image = self.source.snapshot().await?;
        self.session().capture()?;
        self.abort_task();
        Ok(image)
    }

    /// Stop polling without releasing the camera.
    pub fn stop(&mut self) {
        self.abort_task();
        self.session().stop();
    }

    /// Stop polling and release the camera.
    pub async fn teardown(&mut self) {
        self.stop();
        if !self.closed {
            self.source.close_camera().await;
            self.closed = true;
        }
    }

    pub fn status(&self) -> CaptureStatus {
        let session = self.session();
        CaptureStatus {
            mode: session.mode(),
            state: session.state(),
            models_loaded: session.models_loaded(),
            detecting: session.is_detecting(),
            face_detected: session.face_detected(),
            error: self.error.clone(),
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.abort_task();
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let source = self.source.clone();
            handle.spawn(async move { source.close_camera().await });
        }
    }
}

async fn run_detection(
    source: Arc<dyn FaceSource>,
    session: Arc<Mutex<CaptureSession>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    interval: Duration,
    recognition_delay: Duration,
) {
    let lock = || session.lock().unwrap_or_else(|e| e.into_inner());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; detection starts one interval in.
    ticker.tick().await;

    let mut deadline: Option<Instant> = None;
    loop {
        let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
        tokio::select! {
            _ = ticker.tick() => {
                if !lock().is_detecting() {
                    return;
                }
                match source.detect().await {
                    Ok(faces) => {
                        if lock().on_detection(faces.len()) == DetectionAction::ScheduleRecognition {
                            tracing::debug!(faces = faces.len(), "face found, recognition scheduled");
                            deadline = Some(Instant::now() + recognition_delay);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "face detection error"),
                }
            }
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                let identity = lock().complete_recognition();
                tracing::info!(identity, "face recognized");
                let _ = events.send(CaptureEvent::Recognized(identity.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::EngineStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use visage_time_core::capture::PLACEHOLDER_IDENTITY;
    use visage_time_core::FaceRegion;

    /// Face source replaying scripted face counts. `None` is a detection
    /// error; an empty script reports no faces.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub script: Mutex<VecDeque<Option<usize>>>,
        pub models_fail: AtomicBool,
        pub camera_fail: AtomicBool,
        pub camera_open: AtomicBool,
        pub detect_calls: AtomicUsize,
        pub close_calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn scripted(script: &[Option<usize>]) -> Arc<Self> {
            let source = Self::default();
            *source.script.lock().unwrap() = script.iter().copied().collect();
            Arc::new(source)
        }
    }

    fn face() -> FaceRegion {
        FaceRegion {
            bbox: visage_time_core::BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.9,
            },
            landmarks: Vec::new(),
            expressions: Default::default(),
        }
    }

    #[async_trait]
    impl FaceSource for FakeSource {
        async fn load_models(&self) -> Result<(), EngineError> {
            if self.models_fail.load(Ordering::SeqCst) {
                return Err(EngineError::ModelsNotLoaded);
            }
            Ok(())
        }

        async fn open_camera(&self) -> Result<(), EngineError> {
            if self.camera_fail.load(Ordering::SeqCst) {
                return Err(EngineError::CameraNotOpen);
            }
            self.camera_open.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn detect(&self) -> Result<Vec<FaceRegion>, EngineError> {
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(None) => Err(EngineError::CameraNotOpen),
                Some(Some(n)) => Ok(vec![face(); n]),
                None => Ok(Vec::new()),
            }
        }

        async fn snapshot(&self) -> Result<String, EngineError> {
            Ok("data:image/png;base64,ZmFrZQ==".into())
        }

        async fn close_camera(&self) {
            self.camera_open.store(false, Ordering::SeqCst);
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn status(&self) -> EngineStatus {
            EngineStatus {
                camera_active: self.camera_open.load(Ordering::SeqCst),
                models_loaded: !self.models_fail.load(Ordering::SeqCst),
            }
        }
    }

    fn controller(
        source: Arc<FakeSource>,
        mode: DetectionMode,
    ) -> (CaptureController, mpsc::UnboundedReceiver<CaptureEvent>) {
        CaptureController::new(
            source,
            mode,
            Duration::from_millis(500),
            Duration::from_millis(1500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_fires_after_delay_and_stops_polling() {
        let source = FakeSource::scripted(&[Some(0), Some(1)]);
        let (mut ctl, mut rx) = controller(source.clone(), DetectionMode::Recognize);
        ctl.prepare().await.unwrap();

        let started = Instant::now();
        ctl.start().unwrap();
        assert_eq!(ctl.status().state, DetectionState::Pending);

        let event = rx.recv().await.unwrap();
        assert_eq!(event, CaptureEvent::Recognized(PLACEHOLDER_IDENTITY.into()));
        // Face seen on the second tick (1000 ms), reported 1500 ms later.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3000), "{elapsed:?}");
        assert_eq!(ctl.status().state, DetectionState::Idle);

        let calls = source.detect_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_scheduled_once_while_face_stays() {
        let source = FakeSource::scripted(&[Some(1), Some(1), Some(1), Some(1)]);
        let (mut ctl, mut rx) = controller(source, DetectionMode::Recognize);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();

        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_errors_skip_the_tick() {
        let source = FakeSource::scripted(&[None, None, Some(1)]);
        let (mut ctl, _rx) = controller(source.clone(), DetectionMode::Register);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(ctl.status().state, DetectionState::Pending);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(ctl.status().face_detected);
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_freezes_frame_and_stops() {
        let source = FakeSource::scripted(&[Some(1)]);
        let (mut ctl, _rx) = controller(source.clone(), DetectionMode::Register);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();
        assert!(matches!(
            ctl.capture().await,
            Err(ControlError::Capture(CaptureError::NoFace))
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let image = ctl.capture().await.unwrap();
        assert!(image.starts_with("data:image/png;base64,"));
        assert!(!ctl.status().detecting);

        let calls = source.detect_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_rejected_in_recognize_mode() {
        let source = FakeSource::scripted(&[Some(1)]);
        let (mut ctl, _rx) = controller(source, DetectionMode::Recognize);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(
            ctl.capture().await,
            Err(ControlError::Capture(CaptureError::WrongMode))
        ));
    }

    #[tokio::test]
    async fn test_start_requires_models() {
        let source = Arc::new(FakeSource::default());
        source.models_fail.store(true, Ordering::SeqCst);
        let (mut ctl, _rx) = controller(source.clone(), DetectionMode::Recognize);

        assert!(ctl.prepare().await.is_err());
        assert!(!source.camera_open.load(Ordering::SeqCst));
        assert_eq!(ctl.status().error.as_deref(), Some(MODELS_FAILED));
        assert_eq!(ctl.start().unwrap_err(), CaptureError::ModelsNotLoaded);
        assert_eq!(ctl.status().error.as_deref(), Some(MODELS_PENDING));
    }

    #[tokio::test]
    async fn test_camera_failure_reported() {
        let source = Arc::new(FakeSource::default());
        source.camera_fail.store(true, Ordering::SeqCst);
        let (mut ctl, _rx) = controller(source, DetectionMode::Register);
        assert!(ctl.prepare().await.is_err());
        assert!(ctl.status().models_loaded);
        assert_eq!(ctl.status().error.as_deref(), Some(CAMERA_FAILED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_camera_and_timer() {
        let source = FakeSource::scripted(&[]);
        let (mut ctl, _rx) = controller(source.clone(), DetectionMode::Recognize);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), 2);

        ctl.teardown().await;
        assert!(!source.camera_open.load(Ordering::SeqCst));
        assert!(!ctl.status().detecting);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), 2);

        ctl.teardown().await;
        assert_eq!(source.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_camera() {
        let source = FakeSource::scripted(&[]);
        let (mut ctl, _rx) = controller(source.clone(), DetectionMode::Register);
        ctl.prepare().await.unwrap();
        ctl.start().unwrap();
        drop(ctl);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!source.camera_open.load(Ordering::SeqCst));
        assert_eq!(source.detect_calls.load(Ordering::SeqCst), 0);
    }
}
