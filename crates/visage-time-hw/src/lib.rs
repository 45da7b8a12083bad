//! visage-time-hw: Camera capture for the attendance kiosk.
//!
//! V4L2 camera access, RGB frame conversion, and PNG data-URL snapshots
//! of the current frame.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
