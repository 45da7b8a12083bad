use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use visage_time_core::{FaceDetector, FaceRegion};
use visage_time_hw::Camera;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] visage_time_hw::CameraError),
    #[error("failed to load face detection models: {0}")]
    Detector(#[from] visage_time_core::detector::DetectorError),
    #[error("frame error: {0}")]
    Frame(#[from] visage_time_hw::FrameError),
    #[error("camera is not open")]
    CameraNotOpen,
    #[error("face detection models not loaded")]
    ModelsNotLoaded,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStatus {
    pub camera_active: bool,
    pub models_loaded: bool,
}

/// Camera plus detector, as seen by the capture loop.
#[async_trait]
pub trait FaceSource: Send + Sync {
    /// Load the detection bundles. A no-op once loaded.
    async fn load_models(&self) -> Result<(), EngineError>;

    async fn open_camera(&self) -> Result<(), EngineError>;

    /// Run detection on the current camera frame.
    async fn detect(&self) -> Result<Vec<FaceRegion>, EngineError>;

    /// Freeze the current frame as a PNG data URL.
    async fn snapshot(&self) -> Result<String, EngineError>;

    /// Stop the camera stream. Idempotent.
    async fn close_camera(&self);

    async fn status(&self) -> EngineStatus;
}

/// Messages sent from the capture loop and views to the engine thread.
enum EngineRequest {
    LoadModels {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    OpenCamera {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Detect {
        reply: oneshot::Sender<Result<Vec<FaceRegion>, EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    CloseCamera {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
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
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

#[async_trait]
impl FaceSource for EngineHandle {
    async fn load_models(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::LoadModels { reply }).await?
    }

    async fn open_camera(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::OpenCamera { reply }).await?
    }

    async fn detect(&self) -> Result<Vec<FaceRegion>, EngineError> {
        self.request(|reply| EngineRequest::Detect { reply }).await?
    }

    async fn snapshot(&self) -> Result<String, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await?
    }

    async fn close_camera(&self) {
        if self
            .request(|reply| EngineRequest::CloseCamera { reply })
            .await
            .is_err()
        {
            tracing::warn!("engine gone before camera close");
        }
    }

    async fn status(&self) -> EngineStatus {
        self.request(|reply| EngineRequest::Status { reply })
            .await
            .unwrap_or_default()
    }
}

/// State owned by the engine thread.
struct Engine {
    camera_device: String,
    model_dir: PathBuf,
    camera: Option<Camera>,
    detector: Option<FaceDetector>,
}

impl Engine {
    fn load_models(&mut self) -> Result<(), EngineError> {
        if self.detector.is_none() {
            let detector = FaceDetector::load(&self.model_dir)?;
            tracing::info!(dir = %self.model_dir.display(), "face detection models loaded");
            self.detector = Some(detector);
        }
        Ok(())
    }

    fn open_camera(&mut self) -> Result<(), EngineError> {
        if self.camera.as_ref().is_some_and(Camera::is_active) {
            return Ok(());
        }
        let camera = Camera::open(&self.camera_device)?;
        tracing::info!(
            device = %self.camera_device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        self.camera = Some(camera);
        Ok(())
    }

    fn detect(&mut self) -> Result<Vec<FaceRegion>, EngineError> {
        let camera = self.camera.as_ref().ok_or(EngineError::CameraNotOpen)?;
        let detector = self.detector.as_mut().ok_or(EngineError::ModelsNotLoaded)?;
        let frame = camera.capture_frame()?;
        let faces = detector.detect(&frame.data, frame.width, frame.height)?;
        tracing::trace!(seq = frame.sequence, faces = faces.len(), "detection");
        Ok(faces)
    }

    fn snapshot(&mut self) -> Result<String, EngineError> {
        let camera = self.camera.as_ref().ok_or(EngineError::CameraNotOpen)?;
        let frame = camera.capture_frame()?;
        Ok(frame.to_png_data_url()?)
    }

    fn close_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            camera_active: self.camera.as_ref().is_some_and(Camera::is_active),
            models_loaded: self.detector.is_some(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Nothing is opened up front: models load and the camera opens on request,
/// so a missing model or camera degrades the capture views only.
pub fn spawn_engine(camera_device: &str, model_dir: PathBuf) -> Result<EngineHandle, EngineError> {
    let missing = visage_time_core::detector::check_models(&model_dir);
    if !missing.is_empty() {
        tracing::warn!(
            dir = %model_dir.display(),
            missing = ?missing.iter().map(|b| b.file_name()).collect::<Vec<_>>(),
            "face detection models not found; place the ONNX bundles in the model directory"
        );
    }

    let mut engine = Engine {
        camera_device: camera_device.to_string(),
        model_dir,
        camera: None,
        detector: None,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("visage-time-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::LoadModels { reply } => {
                        let _ = reply.send(engine.load_models());
                    }
                    EngineRequest::OpenCamera { reply } => {
                        let _ = reply.send(engine.open_camera());
                    }
                    EngineRequest::Detect { reply } => {
                        let _ = reply.send(engine.detect());
                    }
                    EngineRequest::Snapshot { reply } => {
                        let _ = reply.send(engine.snapshot());
                    }
                    EngineRequest::CloseCamera { reply } => {
                        engine.close_camera();
                        let _ = reply.send(());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            engine.close_camera();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_reports_missing_models_and_camera() {
        let engine = spawn_engine(
            "/dev/visage-time-no-such-camera",
            PathBuf::from("/nonexistent/visage-time-models"),
        )
        .unwrap();

        assert!(matches!(engine.load_models().await, Err(EngineError::Detector(_))));
        assert!(matches!(engine.open_camera().await, Err(EngineError::Camera(_))));
        assert!(matches!(engine.detect().await, Err(EngineError::CameraNotOpen)));
        engine.close_camera().await;

        let status = engine.status().await;
        assert!(!status.camera_active);
        assert!(!status.models_loaded);
    }
}
