//! Detection state for the capture views.
//!
//! Pure state machine driven by the polling loop in the daemon. It does not
//! own any timers; it only decides what the loop should do next.

use serde::Serialize;
use thiserror::Error;

/// Identity reported by the recognition flow. No stored descriptors are
/// compared, a detected face is reported under this name.
pub const PLACEHOLDER_IDENTITY: &str = "Face Detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Register,
    Recognize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    Idle,
    /// Detecting, no face in the latest frame.
    Pending,
    /// Detecting, latest frame contained at least one face.
    Found,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("face detection models not loaded yet, please wait")]
    ModelsNotLoaded,
    #[error("no face detected to capture")]
    NoFace,
    #[error("capture is only available in registration mode")]
    WrongMode,
    #[error("capture is locked until the registration completes")]
    Locked,
}

/// What the polling loop should do after a detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionAction {
    None,
    /// Report the recognition after the fixed delay, then stop detecting.
    ScheduleRecognition,
}

#[derive(Debug, Clone)]
pub struct CaptureSession {
    mode: DetectionMode,
    state: DetectionState,
    models_loaded: bool,
    recognition_scheduled: bool,
}

impl CaptureSession {
    pub fn new(mode: DetectionMode) -> Self {
        Self {
            mode,
            state: DetectionState::Idle,
            models_loaded: false,
            recognition_scheduled: false,
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn is_detecting(&self) -> bool {
        self.state != DetectionState::Idle
    }

    pub fn face_detected(&self) -> bool {
        self.state == DetectionState::Found
    }

    pub fn models_loaded(&self) -> bool {
        self.models_loaded
    }

    pub fn set_models_loaded(&mut self, loaded: bool) {
        self.models_loaded = loaded;
    }

    /// Begin detecting. Clears any previous found-face state.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if !self.models_loaded {
            return Err(CaptureError::ModelsNotLoaded);
        }
        self.state = DetectionState::Pending;
        self.recognition_scheduled = false;
        Ok(())
    }

    /// Apply one detection result (number of faces in the frame).
    pub fn on_detection(&mut self, face_count: usize) -> DetectionAction {
        if !self.is_detecting() {
            return DetectionAction::None;
        }

        if face_count == 0 {
            self.state = DetectionState::Pending;
            return DetectionAction::None;
        }

        self.state = DetectionState::Found;
        if self.mode == DetectionMode::Recognize && !self.recognition_scheduled {
            self.recognition_scheduled = true;
            return DetectionAction::ScheduleRecognition;
        }
        DetectionAction::None
    }

    /// Finish a scheduled recognition: report the identity and go idle.
    pub fn complete_recognition(&mut self) -> &'static str {
        self.state = DetectionState::Idle;
        self.recognition_scheduled = false;
        PLACEHOLDER_IDENTITY
    }

    /// Freeze the current frame as the captured image (registration only).
    pub fn capture(&mut self) -> Result<(), CaptureError> {
        if self.mode != DetectionMode::Register {
            return Err(CaptureError::WrongMode);
        }
        if self.state != DetectionState::Found {
            return Err(CaptureError::NoFace);
        }
        self.state = DetectionState::Idle;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.state = DetectionState::Idle;
        self.recognition_scheduled = false;
    }
}
