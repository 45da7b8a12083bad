//! visage-time-core: attendance domain and face detection engine.
//!
//! Record types and ranking, registration rules, the detection state
//! machine, view routing, reports, and ONNX-based face detection.

pub mod capture;
pub mod dashboard;
pub mod datetime;
pub mod detector;
pub mod ranking;
pub mod registry;
pub mod reports;
pub mod router;
pub mod types;

pub use capture::{CaptureSession, DetectionMode, DetectionState};
pub use detector::{FaceDetector, ModelBundle};
pub use ranking::{recent_records, Snapshot, RECENT_LIMIT};
pub use router::{Navigation, Route};
pub use types::{
    AttendanceRecord, BoundingBox, EmployeeRegistration, Expressions, FaceRegion, NewAttendance,
    Role, SessionUser,
};

/// Default model directory: `/usr/share/visage-time/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/visage-time/models")
}
